use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use rayon::prelude::*;

use crate::camera::ProjectiveCamera;
use crate::error::Fuse3dError;
use crate::fusion::FusedMapOutput;
use crate::io::codec::{read_consistency_blob, read_depth_map, read_normal_map};
use crate::io::config::read_fusion_config;
use crate::model::Model;

/// Layout of an MVS workspace directory:
/// `stereo/fusion.cfg`, `stereo/depth_maps/<image>.<type>.bin`,
/// `stereo/normal_maps/<image>.<type>.bin` and
/// `stereo/consistency_graphs/<image>.<type>.bin`.
pub struct FusionWorkspace {
    pub root: PathBuf,
    /// The estimator pass the maps come from, e.g. `photometric` or
    /// `geometric`.
    pub input_type: String,
}

impl FusionWorkspace {
    pub fn new<P: AsRef<Path>>(root: P, input_type: &str) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            input_type: input_type.to_string(),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("stereo").join("fusion.cfg")
    }

    fn map_path(&self, kind: &str, image_name: &str) -> PathBuf {
        self.root
            .join("stereo")
            .join(kind)
            .join(format!("{}.{}.bin", image_name, self.input_type))
    }

    /// Where the optional fused-map byproduct of a run over this workspace
    /// goes.
    pub fn fused_map_output(&self) -> FusedMapOutput {
        FusedMapOutput {
            depth_dir: self.root.join("stereo").join("depth_maps"),
            normal_dir: self.root.join("stereo").join("normal_maps"),
            suffix: self.input_type.clone(),
        }
    }

    /// Loads the fusion inputs for every image named in `fusion.cfg` into
    /// the model and returns the participation mask. Color bitmaps are
    /// rescaled to the depth-map resolution when the estimator ran at a
    /// reduced size.
    pub fn load(
        &self,
        model: &mut Model,
        stop_flag: Option<&AtomicBool>,
    ) -> Result<Vec<bool>, Fuse3dError> {
        let names = read_fusion_config(self.config_path())?;
        let mut used = vec![false; model.len()];

        for name in names {
            if stop_flag.map_or(false, |flag| flag.load(Ordering::Relaxed)) {
                return Ok(used);
            }

            let image_id = model.image_id(&name)?;
            used[image_id] = true;

            let depth_map = read_depth_map(self.map_path("depth_maps", &name))?;
            let normal_map = read_normal_map(self.map_path("normal_maps", &name))?;
            if depth_map.width() != normal_map.width()
                || depth_map.height() != normal_map.height()
            {
                return Err(Fuse3dError::assertion(format!(
                    "depth and normal maps of `{}` disagree: {}x{} vs {}x{}",
                    name,
                    depth_map.width(),
                    depth_map.height(),
                    normal_map.width(),
                    normal_map.height()
                )));
            }
            debug!(
                "loaded `{}`: {}x{} maps",
                name,
                depth_map.width(),
                depth_map.height()
            );

            model.depth_maps[image_id] = depth_map;
            model.normal_maps[image_id] = normal_map;
            model.consistency_lists[image_id] =
                read_consistency_blob(self.map_path("consistency_graphs", &name))?;
        }

        self.rescale_bitmaps(model, &used);
        model.check_dimensions(&used)?;

        Ok(used)
    }

    fn rescale_bitmaps(&self, model: &mut Model, used: &[bool]) {
        let targets: Vec<(usize, usize)> = model
            .depth_maps
            .iter()
            .map(|map| (map.width(), map.height()))
            .collect();

        model
            .images
            .par_iter_mut()
            .enumerate()
            .for_each(|(image_id, image)| {
                if !used[image_id] {
                    return;
                }
                let (width, height) = targets[image_id];
                if image.width() != width || image.height() != height {
                    image.rescale(
                        width as f32 / image.width() as f32,
                        height as f32 / image.height() as f32,
                    );
                }
            });
    }
}

/// Reads per-image calibration records: one line per image holding the
/// name followed by 12 row-major `P` floats, 12 `invP` floats and 9 `R`
/// floats.
pub fn read_calibration<P: AsRef<Path>>(
    path: P,
) -> Result<Vec<(String, ProjectiveCamera)>, Fuse3dError> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);

    let mut cameras = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let name = tokens
            .next()
            .ok_or_else(|| Fuse3dError::parser("calibration line without image name"))?
            .to_string();
        let values = tokens
            .map(|token| {
                token
                    .parse::<f32>()
                    .map_err(|err| Fuse3dError::parser(err.to_string()))
            })
            .collect::<Result<Vec<f32>, Fuse3dError>>()?;
        if values.len() != 33 {
            return Err(Fuse3dError::parser(format!(
                "calibration of `{}` holds {} values, expected 33",
                name,
                values.len()
            )));
        }

        let mut p = [0.0f32; 12];
        let mut inv_p = [0.0f32; 12];
        let mut r = [0.0f32; 9];
        p.copy_from_slice(&values[0..12]);
        inv_p.copy_from_slice(&values[12..24]);
        r.copy_from_slice(&values[24..33]);
        cameras.push((name, ProjectiveCamera::from_row_major(&p, &inv_p, &r)));
    }

    Ok(cameras)
}
