//! Filesystem helpers for segment and output files

use std::io;
use std::path::{Path, PathBuf};

/// Path of segment `index` for the given base output path
///
/// `out/demo.mp4` becomes `out/demo.segment-0.mp4`. Segments always live next
/// to the output file so renames into place stay on one filesystem.
pub fn segment_path(base: &Path, index: usize) -> PathBuf {
    sibling_with_suffix(base, &format!("segment-{}", index))
}

/// Temporary sibling used while an output is being produced
pub fn partial_path(destination: &Path) -> PathBuf {
    sibling_with_suffix(destination, "partial")
}

/// `dir/stem.<suffix>.<ext>` next to `path`
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "recording".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{}.{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}.{}", stem, suffix),
    };
    path.with_file_name(name)
}

/// Remove a file, treating "already gone" as success
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Ensure the directory that will hold `path` exists
pub fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_path_keeps_extension() {
        let path = segment_path(Path::new("/tmp/out/demo.mp4"), 3);
        assert_eq!(path, PathBuf::from("/tmp/out/demo.segment-3.mp4"));
    }

    #[test]
    fn test_segment_path_without_extension() {
        let path = segment_path(Path::new("session"), 0);
        assert_eq!(path, PathBuf::from("session.segment-0"));
    }

    #[test]
    fn test_partial_path() {
        let path = partial_path(Path::new("/a/final.mov"));
        assert_eq!(path, PathBuf::from("/a/final.partial.mov"));
    }

    #[test]
    fn test_remove_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(remove_if_exists(&dir.path().join("missing.mp4")).is_ok());
    }
}
