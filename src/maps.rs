use nalgebra::Vector3;
use ndarray::{s, Array2, Array3};

use crate::utils::access::IntoVector3;

/// Per-pixel depth estimates of one image. Values `<= 0` mark pixels
/// filtered out by the estimator.
#[derive(Clone)]
pub struct DepthMap {
    pub data: Array2<f32>,
    pub depth_min: f32,
    pub depth_max: f32,
}

impl DepthMap {
    pub fn new(data: Array2<f32>, depth_min: f32, depth_max: f32) -> Self {
        Self {
            data,
            depth_min,
            depth_max,
        }
    }

    pub fn zeros(width: usize, height: usize, depth_min: f32, depth_max: f32) -> Self {
        Self {
            data: Array2::zeros((height, width)),
            depth_min,
            depth_max,
        }
    }

    pub fn width(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn height(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[[row, col]]
    }

    pub fn set(&mut self, row: usize, col: usize, depth: f32) {
        self.data[[row, col]] = depth;
    }
}

/// Per-pixel camera-space surface normals of one image, unit length where
/// the depth is valid. Shape (height, width, 3).
#[derive(Clone)]
pub struct NormalMap {
    pub data: Array3<f32>,
}

impl NormalMap {
    pub fn new(data: Array3<f32>) -> Self {
        assert_eq!(data.shape()[2], 3, "normal maps have exactly 3 channels");
        Self { data }
    }

    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            data: Array3::zeros((height, width, 3)),
        }
    }

    pub fn width(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn height(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn normal(&self, row: usize, col: usize) -> Vector3<f32> {
        self.data.slice(s![row, col, ..]).into_vector3()
    }

    pub fn set_normal(&mut self, row: usize, col: usize, normal: &Vector3<f32>) {
        self.data[[row, col, 0]] = normal.x;
        self.data[[row, col, 1]] = normal.y;
        self.data[[row, col, 2]] = normal.z;
    }
}
