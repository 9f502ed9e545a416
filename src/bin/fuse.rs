use std::path::PathBuf;

use clap::Parser;
use fuse3d::error::Fuse3dError;
use fuse3d::image::{FusionImage, IntoArray3};
use fuse3d::io::{read_calibration, write_ply, write_ply_binary, FusionWorkspace};
use fuse3d::{DepthFusion, FusionParameters, Model};
use log::info;

/// Fuses multi-view stereo depth and normal maps into a colored point cloud.
#[derive(Parser)]
struct Args {
    /// Path to the MVS workspace directory
    workspace: PathBuf,
    /// Which estimator pass to fuse: photometric or geometric
    #[clap(long, default_value = "geometric")]
    input_type: String,
    /// Output PLY file
    #[clap(long, default_value = "fused.ply")]
    output: PathBuf,
    /// Output encoding: ascii or binary
    #[clap(long, default_value = "binary")]
    format: String,
    /// Minimum number of pixels per fused point
    #[clap(long, default_value_t = 5)]
    min_num_pixels: usize,
    /// Maximum number of pixels per fused point
    #[clap(long, default_value_t = 10_000)]
    max_num_pixels: usize,
    /// Maximum consistency-graph hops per fused point
    #[clap(long, default_value_t = 100)]
    max_traversal_depth: usize,
    /// Maximum reprojection error in pixels
    #[clap(long, default_value_t = 2.0)]
    max_reproj_error: f32,
    /// Maximum relative depth error
    #[clap(long, default_value_t = 0.01)]
    max_depth_error: f32,
    /// Maximum normal deviation in degrees
    #[clap(long, default_value_t = 10.0)]
    max_normal_error: f32,
    /// Also write per-image fused depth and normal maps
    #[clap(long)]
    write_fused_maps: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut model = Model::new();
    for (name, camera) in read_calibration(args.workspace.join("calibration.txt"))? {
        let color = image::open(args.workspace.join("images").join(&name))?
            .into_rgb8()
            .into_array3();
        model.add_image(FusionImage::new(name, camera, color));
    }
    info!("model holds {} images", model.len());

    let workspace = FusionWorkspace::new(&args.workspace, &args.input_type);
    let used = workspace.load(&mut model, None)?;

    let params = FusionParameters {
        min_num_pixels: args.min_num_pixels,
        max_num_pixels: args.max_num_pixels,
        max_traversal_depth: args.max_traversal_depth,
        max_reproj_error: args.max_reproj_error,
        max_depth_error: args.max_depth_error,
        max_normal_error: args.max_normal_error,
    };

    let mut fusion = DepthFusion::new(params, model, used)?;
    if args.write_fused_maps {
        fusion = fusion.with_fused_map_output(workspace.fused_map_output());
    }
    fusion.run()?;

    match args.format.as_str() {
        "ascii" => write_ply(&args.output, fusion.fused_points())?,
        "binary" => write_ply_binary(&args.output, fusion.fused_points())?,
        other => {
            return Err(
                Fuse3dError::invalid_parameter(format!("unknown format `{}`", other)).into(),
            )
        }
    }

    println!(
        "{} fused points written to {}",
        fusion.fused_points().len(),
        args.output.display()
    );
    Ok(())
}
