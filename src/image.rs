use image::{flat::SampleLayout, imageops, RgbImage};
use ndarray::{Array3, ShapeBuilder};

use crate::camera::ProjectiveCamera;

/// Trait to convert into ndarray::Array3 using the shape
/// [height, width, channels].
pub trait IntoArray3 {
    fn into_array3(self) -> Array3<u8>;
}

impl IntoArray3 for RgbImage {
    fn into_array3(self) -> Array3<u8> {
        let SampleLayout {
            channels,
            channel_stride,
            height,
            height_stride,
            width,
            width_stride,
        } = self.sample_layout();
        let shape = (height as usize, width as usize, channels as usize);
        let strides = (height_stride, width_stride, channel_stride);
        Array3::from_shape_vec(shape.strides(strides), self.into_raw()).unwrap()
    }
}

/// Trait to convert objects into image::RgbImage.
pub trait IntoImageRgb8 {
    fn into_image_rgb8(self) -> RgbImage;
}

impl IntoImageRgb8 for Array3<u8> {
    fn into_image_rgb8(self) -> RgbImage {
        let (height, width, channels) = self.dim();
        if channels != 3 {
            panic!("Array3 must have 3 channels");
        }
        RgbImage::from_raw(width as u32, height as u32, self.into_raw_vec()).unwrap()
    }
}

/// A model image participating in fusion: its name, projective calibration
/// and RGB bitmap. Immutable during the fusion pass.
#[derive(Clone)]
pub struct FusionImage {
    pub name: String,
    pub camera: ProjectiveCamera,
    /// RGB colors, shape (height, width, 3).
    pub color: Array3<u8>,
}

impl FusionImage {
    pub fn new(name: String, camera: ProjectiveCamera, color: Array3<u8>) -> Self {
        Self {
            name,
            camera,
            color,
        }
    }

    pub fn width(&self) -> usize {
        self.color.shape()[1]
    }

    pub fn height(&self) -> usize {
        self.color.shape()[0]
    }

    pub fn color_at(&self, row: usize, col: usize) -> [u8; 3] {
        [
            self.color[[row, col, 0]],
            self.color[[row, col, 1]],
            self.color[[row, col, 2]],
        ]
    }

    /// Resamples the bitmap by independent x/y factors. Used to bring raw
    /// color images down to the depth-map resolution when the estimator ran
    /// at a reduced size.
    pub fn rescale(&mut self, scale_x: f32, scale_y: f32) {
        let dst_width = (self.width() as f32 * scale_x).round() as u32;
        let dst_height = (self.height() as f32 * scale_y).round() as u32;
        let color = std::mem::take(&mut self.color).into_image_rgb8();
        self.color = imageops::resize(
            &color,
            dst_width,
            dst_height,
            imageops::FilterType::Triangle,
        )
        .into_array3();
    }
}
