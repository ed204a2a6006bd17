//! Error types for slice I/O.

use std::path::PathBuf;

use basin_export::ExportError;
use basin_pipeline::SegmentError;
use thiserror::Error;

/// Result type for slice I/O operations.
pub type IoResult<T> = Result<T, IoError>;

/// Errors that can occur while reading affinity slices or writing
/// label slices.
#[derive(Debug, Error)]
pub enum IoError {
    /// The three channel directories hold different numbers of files.
    #[error("directories contain different number of files (x: {x}, y: {y}, z: {z})")]
    MismatchedFileCounts {
        /// Files in the x directory.
        x: usize,
        /// Files in the y directory.
        y: usize,
        /// Files in the z directory.
        z: usize,
    },

    /// The channel directories hold no files.
    #[error("directories contain no files")]
    NoFiles,

    /// A slice has a different size than the first x slice.
    #[error(
        "slice {path} is {width}x{height}, expected {expected_width}x{expected_height}"
    )]
    SliceShape {
        /// Offending slice.
        path: PathBuf,
        /// Width of the first slice.
        expected_width: u32,
        /// Height of the first slice.
        expected_height: u32,
        /// Width of this slice.
        width: u32,
        /// Height of this slice.
        height: u32,
    },

    /// A file or directory could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A float TIFF slice could not be decoded.
    #[error("failed to decode float TIFF {path}: {source}")]
    TiffDecode {
        /// Path being decoded.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: tiff::TiffError,
    },

    /// A slice could not be decoded as an image.
    #[error("failed to decode {path}: {source}")]
    Decode {
        /// Path being decoded.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: image::ImageError,
    },

    /// A file or directory could not be written.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Path being written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Encoding output failed.
    #[error(transparent)]
    Export(#[from] ExportError),

    /// The slices do not form a valid affinity graph.
    #[error(transparent)]
    Segment(#[from] SegmentError),
}
