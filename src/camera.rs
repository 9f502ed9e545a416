use nalgebra::{Matrix3, Matrix3x4, Vector3, Vector4};

/// Projective calibration of one model image.
///
/// `p` maps homogeneous world coordinates into `(col * depth, row * depth,
/// depth)`, `inv_p` is its pseudo-inverse and maps back into world space,
/// and `r` rotates world vectors into the camera frame. The inverse rotation
/// is cached since the fusion pass only ever needs camera-to-world.
#[derive(Clone, Debug)]
pub struct ProjectiveCamera {
    pub p: Matrix3x4<f32>,
    pub inv_p: Matrix3x4<f32>,
    pub r: Matrix3<f32>,
    inv_r: Matrix3<f32>,
}

impl ProjectiveCamera {
    /// Builds a camera from row-major contiguous buffers, the layout used by
    /// the stereo estimator output.
    pub fn from_row_major(p: &[f32; 12], inv_p: &[f32; 12], r: &[f32; 9]) -> Self {
        let r = Matrix3::from_row_slice(r);
        Self {
            p: Matrix3x4::from_row_slice(p),
            inv_p: Matrix3x4::from_row_slice(inv_p),
            inv_r: r.transpose(),
            r,
        }
    }

    /// Project a homogeneous world point into `(col * depth, row * depth,
    /// depth)` image space.
    pub fn project(&self, point: &Vector4<f32>) -> Vector3<f32> {
        self.p * point
    }

    /// Back-project the pixel `(col, row)` at the given depth into a 3D
    /// world point.
    pub fn unproject(&self, col: f32, row: f32, depth: f32) -> Vector3<f32> {
        self.inv_p * Vector4::new(col * depth, row * depth, depth, 1.0)
    }

    /// Rotate a camera-space vector into the world frame.
    pub fn rotate_to_world(&self, vector: &Vector3<f32>) -> Vector3<f32> {
        self.inv_r * vector
    }
}
