//! Label slice and metadata writing.

use std::fs;
use std::path::{Path, PathBuf};

use basin_export::{
    LabelEncoding, METADATA_FILENAME, RunMetadata, SliceNaming, encode_slice, slice_filename,
    to_metadata_json,
};
use basin_pipeline::Segmentation;
use log::info;

use crate::error::{IoError, IoResult};

fn create_dir(dir: &Path) -> IoResult<()> {
    fs::create_dir_all(dir).map_err(|source| IoError::Write {
        path: dir.to_path_buf(),
        source,
    })
}

fn write_file(path: PathBuf, bytes: &[u8]) -> IoResult<PathBuf> {
    match fs::write(&path, bytes) {
        Ok(()) => Ok(path),
        Err(source) => Err(IoError::Write { path, source }),
    }
}

/// Write every z slice of `segmentation` into `dir`, creating it if
/// needed. Returns the written paths in z order.
///
/// # Errors
///
/// Returns [`IoError::Export`] if a slice cannot be encoded and
/// [`IoError::Write`] if a file cannot be written.
pub fn write_segmentation<P: AsRef<Path>>(
    dir: P,
    segmentation: &Segmentation,
    naming: &SliceNaming,
    encoding: LabelEncoding,
) -> IoResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    create_dir(dir)?;
    let size_z = segmentation.dimensions().size_z;
    info!("writing {size_z} label slices to {}", dir.display());

    (0..size_z)
        .map(|z| {
            let bytes = encode_slice(segmentation, z, encoding, naming.format)?;
            write_file(dir.join(slice_filename(naming, z)), &bytes)
        })
        .collect()
}

/// Write the run metadata sidecar into `dir`.
///
/// # Errors
///
/// Returns [`IoError::Export`] if serialization fails and
/// [`IoError::Write`] if the file cannot be written.
pub fn write_metadata<P: AsRef<Path>>(dir: P, metadata: &RunMetadata) -> IoResult<PathBuf> {
    let dir = dir.as_ref();
    create_dir(dir)?;
    let json = to_metadata_json(metadata)?;
    write_file(dir.join(METADATA_FILENAME), json.as_bytes())
}
