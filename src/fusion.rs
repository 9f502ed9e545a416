use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::info;
use nalgebra::{Vector3, Vector4};
use ndarray::Array2;
use ordered_float::OrderedFloat;

use crate::camera::ProjectiveCamera;
use crate::consistency::ConsistencyGraph;
use crate::error::Fuse3dError;
use crate::io::codec::{write_depth_map, write_normal_map};
use crate::maps::{DepthMap, NormalMap};
use crate::model::Model;

/// Thresholds and limits of one fusion run.
#[derive(Clone, Debug)]
pub struct FusionParameters {
    /// Minimum number of pixels a fused point must draw from.
    pub min_num_pixels: usize,
    /// Maximum number of pixels merged into one point.
    pub max_num_pixels: usize,
    /// Maximum number of consistency-graph hops from the seed pixel.
    pub max_traversal_depth: usize,
    /// Maximum reprojection error against the reference point, in pixels.
    pub max_reproj_error: f32,
    /// Maximum relative depth error against the reference point.
    pub max_depth_error: f32,
    /// Maximum angle between a pixel normal and the reference normal,
    /// in degrees.
    pub max_normal_error: f32,
}

impl Default for FusionParameters {
    fn default() -> Self {
        Self {
            min_num_pixels: 5,
            max_num_pixels: 10_000,
            max_traversal_depth: 100,
            max_reproj_error: 2.0,
            max_depth_error: 0.01,
            max_normal_error: 10.0,
        }
    }
}

impl FusionParameters {
    pub fn check(&self) -> Result<(), Fuse3dError> {
        if self.min_num_pixels < 1 {
            return Err(Fuse3dError::invalid_parameter(
                "min_num_pixels must be at least 1",
            ));
        }
        if self.min_num_pixels > self.max_num_pixels {
            return Err(Fuse3dError::invalid_parameter(
                "min_num_pixels must not exceed max_num_pixels",
            ));
        }
        if self.max_traversal_depth == 0 {
            return Err(Fuse3dError::invalid_parameter(
                "max_traversal_depth must be positive",
            ));
        }
        if self.max_reproj_error < 0.0 || self.max_depth_error < 0.0 || self.max_normal_error < 0.0
        {
            return Err(Fuse3dError::invalid_parameter(
                "error thresholds must be non-negative",
            ));
        }
        Ok(())
    }
}

/// One output point of the fusion: median position, renormalized mean
/// normal and mean color over its supporting pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FusedPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub nx: f32,
    pub ny: f32,
    pub nz: f32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Where the optional per-image fused depth/normal map byproduct is written.
#[derive(Clone, Debug)]
pub struct FusedMapOutput {
    pub depth_dir: PathBuf,
    pub normal_dir: PathBuf,
    /// File names follow `<image>.<suffix>.fused.bin`.
    pub suffix: String,
}

/// Median with the reference even-size rule: partially select the element at
/// `len / 2` and average it with the maximum of the lower partition. Not a
/// textbook median for even sizes; downstream results depend on this exact
/// tie-break.
pub(crate) fn median(elems: &mut [f32]) -> f32 {
    assert!(!elems.is_empty());
    let mid_idx = elems.len() / 2;
    let even = elems.len() % 2 == 0;
    let (lower, mid_elem, _) = elems.select_nth_unstable_by_key(mid_idx, |v| OrderedFloat(*v));
    if even {
        let lower_max = lower
            .iter()
            .copied()
            .max_by_key(|v| OrderedFloat(*v))
            .unwrap();
        (*mid_elem + lower_max) / 2.0
    } else {
        *mid_elem
    }
}

fn mean_channel(sum: u64, num_pixels: usize) -> u8 {
    (sum as f64 / num_pixels as f64).round().clamp(0.0, 255.0) as u8
}

struct ViewState {
    used: bool,
    visited: Array2<bool>,
    camera: ProjectiveCamera,
}

#[derive(Clone, Copy)]
struct TraversalTask {
    image_id: usize,
    row: i32,
    col: i32,
    depth: usize,
}

/// Merges per-image depth and normal maps into a deduplicated colored point
/// cloud by walking the cross-image consistency graph.
///
/// Every pixel is consumed by at most one fused point: the visited bitmaps
/// only ever flip from false to true, even when a candidate point is later
/// discarded for insufficient support.
pub struct DepthFusion {
    params: FusionParameters,
    max_squared_reproj_error: f32,
    min_cos_normal_error: f32,
    model: Model,
    graph: ConsistencyGraph,
    states: Vec<ViewState>,
    stack: Vec<TraversalTask>,
    sample_x: Vec<f32>,
    sample_y: Vec<f32>,
    sample_z: Vec<f32>,
    normal_sum: Vector3<f64>,
    color_sum: [u64; 3],
    ref_point: Vector4<f32>,
    ref_normal: Vector3<f32>,
    points: Vec<FusedPoint>,
    stop_flag: Option<Arc<AtomicBool>>,
    fused_map_output: Option<FusedMapOutput>,
}

impl DepthFusion {
    /// Prepares a fusion run over the loaded model. `used` flags the images
    /// named in the fusion configuration; only those participate.
    pub fn new(
        params: FusionParameters,
        mut model: Model,
        used: Vec<bool>,
    ) -> Result<Self, Fuse3dError> {
        params.check()?;
        model.check_dimensions(&used)?;

        let lists = std::mem::take(&mut model.consistency_lists);
        let graph = ConsistencyGraph::new(&model.images, lists)?;

        let states = model
            .images
            .iter()
            .zip(&used)
            .map(|(image, &used)| ViewState {
                used,
                visited: if used {
                    Array2::from_elem((image.height(), image.width()), false)
                } else {
                    Array2::from_elem((0, 0), false)
                },
                camera: image.camera.clone(),
            })
            .collect();

        Ok(Self {
            max_squared_reproj_error: params.max_reproj_error * params.max_reproj_error,
            min_cos_normal_error: params.max_normal_error.to_radians().cos(),
            params,
            model,
            graph,
            states,
            stack: Vec::new(),
            sample_x: Vec::new(),
            sample_y: Vec::new(),
            sample_z: Vec::new(),
            normal_sum: Vector3::zeros(),
            color_sum: [0; 3],
            ref_point: Vector4::zeros(),
            ref_normal: Vector3::zeros(),
            points: Vec::new(),
            stop_flag: None,
            fused_map_output: None,
        })
    }

    /// Cancellation flag polled between images; on cancellation the run
    /// stops early and keeps the points fused so far.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_flag = Some(flag);
        self
    }

    /// Also write, per image, a sparse copy of its depth/normal map holding
    /// only the pixels consumed by accepted fused points.
    pub fn with_fused_map_output(mut self, output: FusedMapOutput) -> Self {
        self.fused_map_output = Some(output);
        self
    }

    pub fn fused_points(&self) -> &[FusedPoint] {
        &self.points
    }

    pub fn into_points(self) -> Vec<FusedPoint> {
        self.points
    }

    pub fn is_visited(&self, image_id: usize, row: usize, col: usize) -> bool {
        let state = &self.states[image_id];
        state.used && state.visited[[row, col]]
    }

    fn is_stopped(&self) -> bool {
        self.stop_flag
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    /// Runs the fusion: for every unvisited pixel of every participating
    /// image, in raster order, grow one candidate point through the
    /// consistency graph and reduce it if enough pixels support it.
    pub fn run(&mut self) -> Result<(), Fuse3dError> {
        self.points.clear();

        let num_images = self.states.len();
        for image_id in 0..num_images {
            if self.is_stopped() {
                break;
            }
            if !self.states[image_id].used {
                continue;
            }

            let start = Instant::now();
            let height = self.model.depth_maps[image_id].height();
            let width = self.model.depth_maps[image_id].width();

            let mut fused_maps = self
                .fused_map_output
                .is_some()
                .then(|| self.init_fused_maps(image_id));
            let points_before = self.points.len();

            for row in 0..height {
                for col in 0..width {
                    if self.states[image_id].visited[[row, col]] {
                        continue;
                    }

                    self.sample_x.clear();
                    self.sample_y.clear();
                    self.sample_z.clear();
                    self.normal_sum = Vector3::zeros();
                    self.color_sum = [0; 3];

                    self.fuse(image_id, row as i32, col as i32);

                    let num_pixels = self.sample_x.len();
                    if num_pixels >= self.params.min_num_pixels {
                        let point = self.reduce(num_pixels);
                        self.points.push(point);

                        if let Some((fused_depth, fused_normal)) = fused_maps.as_mut() {
                            fused_depth.set(row, col, self.model.depth_maps[image_id].get(row, col));
                            fused_normal.set_normal(
                                row,
                                col,
                                &self.model.normal_maps[image_id].normal(row, col),
                            );
                        }
                    }
                }
            }

            info!(
                "fused image [{}/{}] `{}`: {} points in {:.3}s",
                image_id + 1,
                num_images,
                self.model.image_name(image_id),
                self.points.len() - points_before,
                start.elapsed().as_secs_f64()
            );

            if let Some((fused_depth, fused_normal)) = fused_maps {
                self.write_fused_maps(image_id, &fused_depth, &fused_normal)?;
            }
        }

        self.points.shrink_to_fit();
        info!("number of fused points: {}", self.points.len());
        Ok(())
    }

    /// Depth-first traversal over the consistency graph, expressed as an
    /// explicit worklist. Partners are pushed in reverse so they pop in
    /// consistency-list order, matching the recursive reference order.
    fn fuse(&mut self, image_id: usize, row: i32, col: i32) {
        self.stack.clear();
        self.stack.push(TraversalTask {
            image_id,
            row,
            col,
            depth: 0,
        });

        while let Some(task) = self.stack.pop() {
            self.fuse_pixel(task);
        }
    }

    fn fuse_pixel(&mut self, task: TraversalTask) {
        let state = &self.states[task.image_id];
        if !state.used {
            return;
        }

        let depth_map = &self.model.depth_maps[task.image_id];
        if task.col < 0
            || task.row < 0
            || task.col >= depth_map.width() as i32
            || task.row >= depth_map.height() as i32
        {
            return;
        }
        let (row, col) = (task.row as usize, task.col as usize);

        let depth = depth_map.get(row, col);
        // Pixels with non-positive depth were filtered by the estimator.
        if depth <= 0.0 {
            return;
        }

        if state.visited[[row, col]] {
            return;
        }

        // Past the seed, the pixel must stay consistent with the traversal's
        // reference point.
        if task.depth > 0 {
            let proj = state.camera.project(&self.ref_point);

            let depth_error = ((proj.z - depth) / depth).abs();
            if depth_error > self.params.max_depth_error {
                return;
            }

            let col_diff = proj.x / proj.z - task.col as f32;
            let row_diff = proj.y / proj.z - task.row as f32;
            let squared_reproj_error = col_diff * col_diff + row_diff * row_diff;
            if squared_reproj_error > self.max_squared_reproj_error {
                return;
            }
        }

        let normal = state
            .camera
            .rotate_to_world(&self.model.normal_maps[task.image_id].normal(row, col));

        if task.depth > 0 && self.ref_normal.dot(&normal) < self.min_cos_normal_error {
            return;
        }

        let xyz = state.camera.unproject(task.col as f32, task.row as f32, depth);
        let color = self.model.images[task.image_id].color_at(row, col);

        // Consumed for good, regardless of whether the candidate survives.
        self.states[task.image_id].visited[[row, col]] = true;

        self.sample_x.push(xyz.x);
        self.sample_y.push(xyz.y);
        self.sample_z.push(xyz.z);
        self.normal_sum += normal.cast::<f64>();
        self.color_sum[0] += color[0] as u64;
        self.color_sum[1] += color[1] as u64;
        self.color_sum[2] += color[2] as u64;

        if task.depth == 0 {
            self.ref_point = Vector4::new(xyz.x, xyz.y, xyz.z, 1.0);
            self.ref_normal = normal;
        }

        // Bound both the branch depth and the pixel budget of one point.
        let next_depth = task.depth + 1;
        if next_depth >= self.params.max_traversal_depth
            || self.sample_x.len() >= self.params.max_num_pixels
        {
            return;
        }

        let base = self.stack.len();
        let xyz_h = Vector4::new(xyz.x, xyz.y, xyz.z, 1.0);
        for &partner in self.graph.partners(task.image_id, row, col) {
            let next_image_id = partner as usize;
            let next_proj = self.states[next_image_id].camera.project(&xyz_h);
            self.stack.push(TraversalTask {
                image_id: next_image_id,
                row: (next_proj.y / next_proj.z).round() as i32,
                col: (next_proj.x / next_proj.z).round() as i32,
                depth: next_depth,
            });
        }
        self.stack[base..].reverse();
    }

    fn reduce(&mut self, num_pixels: usize) -> FusedPoint {
        let mean_normal = self.normal_sum.normalize();
        FusedPoint {
            x: median(&mut self.sample_x),
            y: median(&mut self.sample_y),
            z: median(&mut self.sample_z),
            nx: mean_normal.x as f32,
            ny: mean_normal.y as f32,
            nz: mean_normal.z as f32,
            r: mean_channel(self.color_sum[0], num_pixels),
            g: mean_channel(self.color_sum[1], num_pixels),
            b: mean_channel(self.color_sum[2], num_pixels),
        }
    }

    /// Starts the per-image byproduct maps. Pixels consumed while fusing
    /// earlier images keep their estimates.
    fn init_fused_maps(&self, image_id: usize) -> (DepthMap, NormalMap) {
        let depth_map = &self.model.depth_maps[image_id];
        let normal_map = &self.model.normal_maps[image_id];
        let mut fused_depth = DepthMap::zeros(
            depth_map.width(),
            depth_map.height(),
            depth_map.depth_min,
            depth_map.depth_max,
        );
        let mut fused_normal = NormalMap::zeros(normal_map.width(), normal_map.height());

        let visited = &self.states[image_id].visited;
        for row in 0..depth_map.height() {
            for col in 0..depth_map.width() {
                if visited[[row, col]] {
                    fused_depth.set(row, col, depth_map.get(row, col));
                    fused_normal.set_normal(row, col, &normal_map.normal(row, col));
                }
            }
        }

        (fused_depth, fused_normal)
    }

    fn write_fused_maps(
        &self,
        image_id: usize,
        fused_depth: &DepthMap,
        fused_normal: &NormalMap,
    ) -> Result<(), Fuse3dError> {
        let output = self.fused_map_output.as_ref().unwrap();
        let file_name = format!(
            "{}.{}.fused.bin",
            self.model.image_name(image_id),
            output.suffix
        );
        write_depth_map(output.depth_dir.join(&file_name), fused_depth)?;
        write_normal_map(output.normal_dir.join(&file_name), fused_normal)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::FusionImage;
    use crate::maps::{DepthMap, NormalMap};
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, Array3};
    use rstest::{fixture, rstest};

    fn camera_with_offset(offset: f32) -> ProjectiveCamera {
        ProjectiveCamera::from_row_major(
            &[
                1.0, 0.0, 0.0, offset, //
                0.0, 1.0, 0.0, 0.0, //
                0.0, 0.0, 1.0, 0.0,
            ],
            &[
                1.0, 0.0, 0.0, -offset, //
                0.0, 1.0, 0.0, 0.0, //
                0.0, 0.0, 1.0, 0.0,
            ],
            &[
                1.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, //
                0.0, 0.0, 1.0,
            ],
        )
    }

    fn flat_view(
        name: &str,
        offset: f32,
        width: usize,
        height: usize,
        color: [u8; 3],
    ) -> (FusionImage, DepthMap, NormalMap) {
        let mut bitmap = Array3::<u8>::zeros((height, width, 3));
        for mut pixel in bitmap.rows_mut() {
            pixel[0] = color[0];
            pixel[1] = color[1];
            pixel[2] = color[2];
        }
        let image = FusionImage::new(name.to_string(), camera_with_offset(offset), bitmap);
        let depth_map = DepthMap::new(Array2::from_elem((height, width), 1.0), 0.1, 10.0);
        let mut normal_map = NormalMap::zeros(width, height);
        for row in 0..height {
            for col in 0..width {
                normal_map.set_normal(row, col, &Vector3::new(0.0, 0.0, 1.0));
            }
        }
        (image, depth_map, normal_map)
    }

    /// Two aligned 2x2 views at uniform depth 1; pixel (0, 0) of the first
    /// is consistent with the second.
    #[fixture]
    fn two_view_model() -> Model {
        let mut model = Model::new();
        for (name, color) in [("a", [10, 20, 30]), ("b", [20, 40, 50])] {
            let (image, depth_map, normal_map) = flat_view(name, 0.0, 2, 2, color);
            let id = model.add_image(image);
            model.depth_maps[id] = depth_map;
            model.normal_maps[id] = normal_map;
        }
        model.consistency_lists[0] = vec![0, 0, 1, 1];
        model
    }

    #[rstest]
    fn test_two_view_fusion(two_view_model: Model) {
        let params = FusionParameters {
            min_num_pixels: 2,
            ..Default::default()
        };
        let mut fusion = DepthFusion::new(params, two_view_model, vec![true, true]).unwrap();
        fusion.run().unwrap();

        let points = fusion.fused_points();
        assert_eq!(points.len(), 1);

        let point = points[0];
        assert_abs_diff_eq!(point.x, 0.0);
        assert_abs_diff_eq!(point.y, 0.0);
        assert_abs_diff_eq!(point.z, 1.0);
        assert_abs_diff_eq!(point.nz, 1.0, epsilon = 1e-6);
        assert_eq!((point.r, point.g, point.b), (15, 30, 40));

        // Both supporting pixels are consumed, as is every rejected seed.
        assert!(fusion.is_visited(0, 0, 0));
        assert!(fusion.is_visited(1, 0, 0));
        for row in 0..2 {
            for col in 0..2 {
                assert!(fusion.is_visited(0, row, col));
                assert!(fusion.is_visited(1, row, col));
            }
        }
    }

    #[rstest]
    fn test_second_run_is_noop(two_view_model: Model) {
        let params = FusionParameters {
            min_num_pixels: 2,
            ..Default::default()
        };
        let mut fusion = DepthFusion::new(params, two_view_model, vec![true, true]).unwrap();
        fusion.run().unwrap();
        assert_eq!(fusion.fused_points().len(), 1);

        // Visited pixels stay visited, so a second pass finds no seeds.
        fusion.run().unwrap();
        assert!(fusion.fused_points().is_empty());
    }

    #[rstest]
    fn test_traversal_depth_one_keeps_seeds_only(two_view_model: Model) {
        let params = FusionParameters {
            min_num_pixels: 1,
            max_traversal_depth: 1,
            ..Default::default()
        };
        let mut fusion = DepthFusion::new(params, two_view_model, vec![true, true]).unwrap();
        fusion.run().unwrap();

        // No partner expansion: every pixel becomes its own point.
        assert_eq!(fusion.fused_points().len(), 8);
    }

    #[rstest]
    fn test_unused_partner_is_skipped(two_view_model: Model) {
        let params = FusionParameters {
            min_num_pixels: 1,
            ..Default::default()
        };
        let mut fusion = DepthFusion::new(params, two_view_model, vec![true, false]).unwrap();
        fusion.run().unwrap();

        assert_eq!(fusion.fused_points().len(), 4);
        assert!(!fusion.is_visited(1, 0, 0));
    }

    fn reproj_model(partner_offset: f32) -> Model {
        let mut model = Model::new();
        for (name, offset) in [("a", 0.0), ("b", partner_offset)] {
            let (image, depth_map, normal_map) = flat_view(name, offset, 4, 1, [100, 100, 100]);
            let id = model.add_image(image);
            model.depth_maps[id] = depth_map;
            model.normal_maps[id] = normal_map;
        }
        model.consistency_lists[0] = vec![0, 0, 1, 1];
        model
    }

    #[test]
    fn test_reproj_error_boundary_is_accepted() {
        // The seed point (0, 0, 1) lands at column 1.5 of the partner view
        // and is rounded to pixel 2, leaving exactly 0.5 pixels of error.
        let params = FusionParameters {
            min_num_pixels: 2,
            max_reproj_error: 0.5,
            ..Default::default()
        };
        let mut fusion = DepthFusion::new(params, reproj_model(1.5), vec![true, true]).unwrap();
        fusion.run().unwrap();

        assert_eq!(fusion.fused_points().len(), 1);
        assert!(fusion.is_visited(1, 0, 2));
        // Partner sample back-projects to x = 0.5; even-size median of
        // [0, 0.5] is 0.25.
        assert_abs_diff_eq!(fusion.fused_points()[0].x, 0.25);
    }

    #[test]
    fn test_reproj_error_above_boundary_is_rejected() {
        let params = FusionParameters {
            min_num_pixels: 2,
            max_reproj_error: 0.49,
            ..Default::default()
        };
        let mut fusion = DepthFusion::new(params, reproj_model(1.5), vec![true, true]).unwrap();
        fusion.run().unwrap();

        assert!(fusion.fused_points().is_empty());
        // The rejected partner pixel was never reached, but every seed of
        // both images was consumed by its failed candidate.
        assert!(fusion.is_visited(0, 0, 0));
        assert!(fusion.is_visited(1, 0, 2));
    }

    #[test]
    fn test_normal_angle_rejection() {
        let mut model = reproj_model(0.0);
        // Partner normals perpendicular to the reference normal.
        for col in 0..4 {
            model.normal_maps[1].set_normal(0, col, &Vector3::new(1.0, 0.0, 0.0));
        }

        let params = FusionParameters {
            min_num_pixels: 2,
            max_normal_error: 10.0,
            ..Default::default()
        };
        let mut fusion = DepthFusion::new(params, model, vec![true, true]).unwrap();
        fusion.run().unwrap();
        assert!(fusion.fused_points().is_empty());
    }

    #[test]
    fn test_stop_flag_skips_run() {
        let flag = Arc::new(AtomicBool::new(true));
        let params = FusionParameters {
            min_num_pixels: 1,
            ..Default::default()
        };
        let mut fusion = DepthFusion::new(params, reproj_model(0.0), vec![true, true])
            .unwrap()
            .with_stop_flag(flag);
        fusion.run().unwrap();
        assert!(fusion.fused_points().is_empty());
    }

    #[test]
    fn test_median_reference_rule() {
        assert_abs_diff_eq!(median(&mut [5.0]), 5.0);
        assert_abs_diff_eq!(median(&mut [1.0, 3.0]), 2.0);
        assert_abs_diff_eq!(median(&mut [1.0, 2.0, 3.0]), 2.0);
        assert_abs_diff_eq!(median(&mut [1.0, 2.0, 3.0, 4.0]), 2.5);
        assert_abs_diff_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_abs_diff_eq!(median(&mut [2.0, 1.0]), 1.5);
    }

    #[test]
    fn test_mean_channel_rounds_and_saturates() {
        assert_eq!(mean_channel(10, 3), 3);
        assert_eq!(mean_channel(11, 3), 4);
        assert_eq!(mean_channel(765, 3), 255);
        assert_eq!(mean_channel(0, 5), 0);
    }

    #[test]
    fn test_parameter_check() {
        assert!(FusionParameters::default().check().is_ok());
        assert!(FusionParameters {
            min_num_pixels: 0,
            ..Default::default()
        }
        .check()
        .is_err());
        assert!(FusionParameters {
            min_num_pixels: 10,
            max_num_pixels: 5,
            ..Default::default()
        }
        .check()
        .is_err());
        assert!(FusionParameters {
            max_traversal_depth: 0,
            ..Default::default()
        }
        .check()
        .is_err());
        assert!(FusionParameters {
            max_reproj_error: -1.0,
            ..Default::default()
        }
        .check()
        .is_err());
    }
}
