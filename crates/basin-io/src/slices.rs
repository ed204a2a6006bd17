//! Slice file enumeration.
//!
//! A slice directory holds one 2D image per z index. Only regular files
//! count (symlinks are followed); the z order is the lexicographic order
//! of the full paths.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IoError, IoResult};

/// Regular files in `dir`, sorted by path.
///
/// # Errors
///
/// Returns [`IoError::Read`] if the directory cannot be listed.
pub fn list_slice_files<P: AsRef<Path>>(dir: P) -> IoResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let read_error = |source| IoError::Read {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_error)? {
        let path = entry.map_err(read_error)?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
