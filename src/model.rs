use itertools::izip;

use crate::error::Fuse3dError;
use crate::image::FusionImage;
use crate::maps::{DepthMap, NormalMap};

/// In-memory fusion inputs: per-image calibration and bitmaps, depth and
/// normal maps, and the raw flat consistency lists written by the stereo
/// estimator. Maps and lists start empty and are filled by the workspace
/// loader for the images named in the fusion configuration.
#[derive(Clone, Default)]
pub struct Model {
    pub images: Vec<FusionImage>,
    pub depth_maps: Vec<DepthMap>,
    pub normal_maps: Vec<NormalMap>,
    pub consistency_lists: Vec<Vec<i32>>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an image and allocates its empty map slots. Returns the
    /// image id used everywhere else in the crate.
    pub fn add_image(&mut self, image: FusionImage) -> usize {
        self.images.push(image);
        self.depth_maps.push(DepthMap::zeros(0, 0, 0.0, 0.0));
        self.normal_maps.push(NormalMap::zeros(0, 0));
        self.consistency_lists.push(Vec::new());
        self.images.len() - 1
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn image_name(&self, image_id: usize) -> &str {
        &self.images[image_id].name
    }

    pub fn image_id(&self, name: &str) -> Result<usize, Fuse3dError> {
        self.images
            .iter()
            .position(|image| image.name == name)
            .ok_or_else(|| {
                Fuse3dError::invalid_parameter(format!("image `{}` is not in the model", name))
            })
    }

    /// Structural consistency of the loaded inputs. Per-image width/height
    /// agreement is only required for participating images; the other slots
    /// stay empty.
    pub fn check_dimensions(&self, used: &[bool]) -> Result<(), Fuse3dError> {
        if self.images.len() != used.len()
            || self.images.len() != self.depth_maps.len()
            || self.images.len() != self.normal_maps.len()
            || self.images.len() != self.consistency_lists.len()
        {
            return Err(Fuse3dError::assertion(
                "image, depth-map, normal-map and consistency-list counts differ",
            ));
        }

        for (image, depth_map, normal_map, used) in
            izip!(&self.images, &self.depth_maps, &self.normal_maps, used)
        {
            if !used {
                continue;
            }
            if image.width() != depth_map.width()
                || image.height() != depth_map.height()
                || image.width() != normal_map.width()
                || image.height() != normal_map.height()
            {
                return Err(Fuse3dError::assertion(format!(
                    "image `{}` dimensions disagree: image {}x{}, depth map {}x{}, normal map {}x{}",
                    image.name,
                    image.width(),
                    image.height(),
                    depth_map.width(),
                    depth_map.height(),
                    normal_map.width(),
                    normal_map.height()
                )));
            }
        }

        Ok(())
    }
}
