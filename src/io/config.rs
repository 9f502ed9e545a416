use std::io::BufRead;
use std::path::Path;

use crate::error::Fuse3dError;

/// Reads the fusion configuration: one participating image name per
/// non-empty, non-comment line, kept in file order.
pub fn read_fusion_config<P: AsRef<Path>>(path: P) -> Result<Vec<String>, Fuse3dError> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let names = reader
        .lines()
        .filter_map(|line| line.ok())
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::read_fusion_config;
    use std::io::Write;

    #[test]
    fn test_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fusion.cfg");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "# participating images").unwrap();
        writeln!(file, "view0.png").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  view1.png  ").unwrap();
        writeln!(file, "# trailing comment").unwrap();

        let names = read_fusion_config(&path).unwrap();
        assert_eq!(names, vec!["view0.png", "view1.png"]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(read_fusion_config("does/not/exist.cfg").is_err());
    }
}
