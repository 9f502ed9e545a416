//! Binary codecs for the estimator's map and consistency-list files.
//!
//! Maps are stored as an ASCII header `{width}&{height}&{channels}&`
//! followed by little-endian f32 samples in (row, col, channel) order.
//! Consistency lists are plain little-endian i32 sequences.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use ndarray::{Array2, Array3};

use crate::error::Fuse3dError;
use crate::maps::{DepthMap, NormalMap};

const MAX_HEADER_DIGITS: usize = 32;

fn read_dim<R: Read>(reader: &mut R) -> Result<usize, Fuse3dError> {
    let mut digits = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        if byte[0] == b'&' {
            break;
        }
        if digits.len() >= MAX_HEADER_DIGITS {
            return Err(Fuse3dError::parser("unterminated map header field"));
        }
        digits.push(byte[0]);
    }
    std::str::from_utf8(&digits)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| Fuse3dError::parser("invalid map header field"))
}

fn read_samples<R: Read>(reader: &mut R, len: usize) -> Result<Vec<f32>, Fuse3dError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    if bytes.len() != len * 4 {
        return Err(Fuse3dError::parser(format!(
            "map payload holds {} bytes, expected {}",
            bytes.len(),
            len * 4
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn write_map<'a, P: AsRef<Path>>(
    path: P,
    width: usize,
    height: usize,
    channels: usize,
    samples: impl Iterator<Item = &'a f32>,
) -> Result<(), Fuse3dError> {
    let mut writer = BufWriter::new(File::create(path)?);
    write!(writer, "{}&{}&{}&", width, height, channels)?;
    for sample in samples {
        writer.write_all(&sample.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a depth map. The depth range metadata is not part of the file and
/// is recomputed from the valid (positive) samples.
pub fn read_depth_map<P: AsRef<Path>>(path: P) -> Result<DepthMap, Fuse3dError> {
    let mut reader = BufReader::new(File::open(path)?);
    let width = read_dim(&mut reader)?;
    let height = read_dim(&mut reader)?;
    let channels = read_dim(&mut reader)?;
    if channels != 1 {
        return Err(Fuse3dError::parser(format!(
            "depth maps have 1 channel, file has {}",
            channels
        )));
    }

    let samples = read_samples(&mut reader, width * height)?;
    let (depth_min, depth_max) = samples
        .iter()
        .filter(|depth| **depth > 0.0)
        .fold((f32::MAX, f32::MIN), |(min, max), depth| {
            (min.min(*depth), max.max(*depth))
        });

    let data = Array2::from_shape_vec((height, width), samples)
        .map_err(|err| Fuse3dError::parser(err.to_string()))?;
    Ok(DepthMap::new(
        data,
        if depth_min <= depth_max { depth_min } else { 0.0 },
        if depth_min <= depth_max { depth_max } else { 0.0 },
    ))
}

pub fn write_depth_map<P: AsRef<Path>>(path: P, map: &DepthMap) -> Result<(), Fuse3dError> {
    write_map(path, map.width(), map.height(), 1, map.data.iter())
}

pub fn read_normal_map<P: AsRef<Path>>(path: P) -> Result<NormalMap, Fuse3dError> {
    let mut reader = BufReader::new(File::open(path)?);
    let width = read_dim(&mut reader)?;
    let height = read_dim(&mut reader)?;
    let channels = read_dim(&mut reader)?;
    if channels != 3 {
        return Err(Fuse3dError::parser(format!(
            "normal maps have 3 channels, file has {}",
            channels
        )));
    }

    let samples = read_samples(&mut reader, width * height * 3)?;
    let data = Array3::from_shape_vec((height, width, 3), samples)
        .map_err(|err| Fuse3dError::parser(err.to_string()))?;
    Ok(NormalMap::new(data))
}

pub fn write_normal_map<P: AsRef<Path>>(path: P, map: &NormalMap) -> Result<(), Fuse3dError> {
    write_map(path, map.width(), map.height(), 3, map.data.iter())
}

/// Reads a flat consistency list: the whole file as little-endian i32.
pub fn read_consistency_blob<P: AsRef<Path>>(path: P) -> Result<Vec<i32>, Fuse3dError> {
    let mut bytes = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;
    if bytes.len() % 4 != 0 {
        return Err(Fuse3dError::parser(
            "consistency list length is not a multiple of 4 bytes",
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

pub fn write_consistency_blob<P: AsRef<Path>>(path: P, list: &[i32]) -> Result<(), Fuse3dError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for value in list {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector3;
    use ndarray::array;
    use std::io::Write as _;

    #[test]
    fn test_depth_map_codec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depth.bin");

        let map = DepthMap::new(array![[1.0, -1.0, 2.5], [0.0, 4.0, 3.0]], 0.0, 0.0);
        write_depth_map(&path, &map).unwrap();

        let loaded = read_depth_map(&path).unwrap();
        assert_eq!(loaded.width(), 3);
        assert_eq!(loaded.height(), 2);
        assert_abs_diff_eq!(loaded.get(0, 2), 2.5);
        assert_abs_diff_eq!(loaded.get(1, 0), 0.0);
        assert_abs_diff_eq!(loaded.depth_min, 1.0);
        assert_abs_diff_eq!(loaded.depth_max, 4.0);
    }

    #[test]
    fn test_normal_map_codec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("normal.bin");

        let mut map = NormalMap::zeros(2, 2);
        map.set_normal(0, 1, &Vector3::new(0.0, 0.6, 0.8));
        write_normal_map(&path, &map).unwrap();

        let loaded = read_normal_map(&path).unwrap();
        assert_abs_diff_eq!(loaded.normal(0, 1), Vector3::new(0.0, 0.6, 0.8), epsilon = 1e-6);
    }

    #[test]
    fn test_consistency_blob() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.bin");

        let list = vec![0, 0, 2, 1, 3, -1];
        write_consistency_blob(&path, &list).unwrap();
        assert_eq!(read_consistency_blob(&path).unwrap(), list);
    }

    #[test]
    fn test_malformed_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"not-a-map").unwrap();

        assert!(read_depth_map(&path).is_err());
    }

    #[test]
    fn test_truncated_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"2&2&1&").unwrap();
        file.write_all(&1.0f32.to_le_bytes()).unwrap();

        assert!(read_depth_map(&path).is_err());
    }
}
