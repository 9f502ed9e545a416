use ndarray::Array2;

use crate::error::Fuse3dError;
use crate::image::FusionImage;

const NO_PARTNERS: i32 = -1;

/// Read-only lookup from (image, row, col) to the list of other images in
/// which that pixel was found geometrically consistent.
///
/// Built once per fusion run from the per-image flat lists written by the
/// stereo estimator. The wire layout is a repetition of
/// `[col, row, count, partner_image_id * count]`; decoding keeps the flat
/// lists and adds one dense per-image index map pointing at the `count`
/// field of each record.
pub struct ConsistencyGraph {
    lists: Vec<Vec<i32>>,
    index_maps: Vec<Array2<i32>>,
}

impl ConsistencyGraph {
    pub fn new(images: &[FusionImage], lists: Vec<Vec<i32>>) -> Result<Self, Fuse3dError> {
        if images.len() != lists.len() {
            return Err(Fuse3dError::assertion(format!(
                "consistency list count {} does not match image count {}",
                lists.len(),
                images.len()
            )));
        }

        let mut index_maps = Vec::with_capacity(images.len());
        for (image, list) in images.iter().zip(&lists) {
            let mut index_map =
                Array2::from_elem((image.height(), image.width()), NO_PARTNERS);
            let mut i = 0;
            while i < list.len() {
                if i + 3 > list.len() {
                    return Err(Fuse3dError::parser(format!(
                        "truncated consistency record in image `{}`",
                        image.name
                    )));
                }
                let col = list[i];
                let row = list[i + 1];
                let count = list[i + 2];
                if col < 0
                    || row < 0
                    || col as usize >= image.width()
                    || row as usize >= image.height()
                {
                    return Err(Fuse3dError::parser(format!(
                        "consistency record for image `{}` addresses pixel ({}, {}) outside {}x{}",
                        image.name,
                        row,
                        col,
                        image.width(),
                        image.height()
                    )));
                }
                if count < 0 || i + 3 + count as usize > list.len() {
                    return Err(Fuse3dError::parser(format!(
                        "consistency record for image `{}` has invalid partner count {}",
                        image.name, count
                    )));
                }
                index_map[[row as usize, col as usize]] = (i + 2) as i32;
                i += 3 + count as usize;
            }
            index_maps.push(index_map);
        }

        Ok(Self { lists, index_maps })
    }

    /// Partner image ids consistent with the given pixel, empty if the pixel
    /// has no recorded entry. The pixel must be inside the image bounds.
    pub fn partners(&self, image_id: usize, row: usize, col: usize) -> &[i32] {
        let index = self.index_maps[image_id][[row, col]];
        if index == NO_PARTNERS {
            return &[];
        }
        let list = &self.lists[image_id];
        let index = index as usize;
        let count = list[index] as usize;
        &list[index + 1..index + 1 + count]
    }
}
