//! Affinity slice reading.
//!
//! An affinity graph on disk is three directories, one per axis channel.
//! File `k` (in sorted order) of each directory holds z slice `k` of that
//! channel: pixel `(x, y)` is the weight of the edge from voxel
//! `(x, y, k)` toward `+axis`.
//!
//! Single-channel float TIFFs (32- or 64-bit samples) are read with the
//! `tiff` crate and keep their raw values. Every other slice goes through
//! `image` and is converted to 32-bit float gray, which rescales 8-bit and
//! 16-bit integer samples to `[0, 1]`.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use basin_pipeline::{AXIS_COUNT, AffinityGraph, Axis, Dimensions, SegmentError};
use image::{ImageBuffer, Luma};
use log::{debug, info};
use tiff::decoder::{Decoder, DecodingResult};

use crate::error::{IoError, IoResult};
use crate::slices::list_slice_files;

type FloatSlice = ImageBuffer<Luma<f32>, Vec<f32>>;

/// The three channel directories of an affinity graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffinityDirs {
    /// Slices of the x-axis channel.
    pub x: PathBuf,
    /// Slices of the y-axis channel.
    pub y: PathBuf,
    /// Slices of the z-axis channel.
    pub z: PathBuf,
}

impl AffinityDirs {
    /// Group three channel directories.
    pub fn new(x: impl Into<PathBuf>, y: impl Into<PathBuf>, z: impl Into<PathBuf>) -> Self {
        Self {
            x: x.into(),
            y: y.into(),
            z: z.into(),
        }
    }

    /// The directory holding `axis`.
    #[must_use]
    pub fn channel(&self, axis: Axis) -> &Path {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }
}

/// Options for [`read_affinity_graph`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Read at most this many z slices. `None` reads them all.
    pub max_slices: Option<usize>,
}

/// Read an affinity graph from its three channel directories.
///
/// # Errors
///
/// - [`IoError::MismatchedFileCounts`] if the directories hold different
///   numbers of files.
/// - [`IoError::NoFiles`] if they hold none.
/// - [`IoError::Read`] or [`IoError::Decode`] if a slice cannot be loaded.
/// - [`IoError::SliceShape`] if a slice differs in size from the first.
/// - [`IoError::Segment`] if the volume cannot be addressed.
pub fn read_affinity_graph(dirs: &AffinityDirs, options: ReadOptions) -> IoResult<AffinityGraph> {
    let listings = Axis::ALL
        .iter()
        .map(|&axis| list_slice_files(dirs.channel(axis)))
        .collect::<IoResult<Vec<_>>>()?;
    let (x, y, z) = (listings[0].len(), listings[1].len(), listings[2].len());
    if x != y || x != z {
        return Err(IoError::MismatchedFileCounts { x, y, z });
    }
    if x == 0 {
        return Err(IoError::NoFiles);
    }
    let depth = options.max_slices.map_or(x, |max| max.min(x));
    if depth == 0 {
        return Err(IoError::NoFiles);
    }

    let first = load_slice(&listings[0][0])?;
    let (width, height) = first.dimensions();
    let size_z = u32::try_from(depth).map_err(|_| {
        SegmentError::ShapeMismatch(format!("{depth} slices exceed the addressable depth"))
    })?;
    let dimensions = Dimensions::new(width, height, size_z);
    info!("reading affinity graph of size {dimensions}");

    let slice_len = dimensions.slice_len();
    let mut channels: Vec<Vec<f32>> = (0..AXIS_COUNT)
        .map(|_| Vec::with_capacity(slice_len.saturating_mul(depth)))
        .collect();
    channels[0].extend_from_slice(first.as_raw());

    for k in 0..depth {
        for (axis, listing) in listings.iter().enumerate() {
            if axis == 0 && k == 0 {
                continue;
            }
            let path = &listing[k];
            let slice = load_slice(path)?;
            if slice.dimensions() != (width, height) {
                return Err(IoError::SliceShape {
                    path: path.clone(),
                    expected_width: width,
                    expected_height: height,
                    width: slice.width(),
                    height: slice.height(),
                });
            }
            channels[axis].extend_from_slice(slice.as_raw());
        }
        debug!("read slice {k} of {depth}");
    }

    Ok(AffinityGraph::from_channels(dimensions, channels)?)
}

fn load_slice(path: &Path) -> IoResult<FloatSlice> {
    let bytes = fs::read(path).map_err(|source| IoError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if is_tiff(&bytes)
        && let Some(slice) = decode_float_tiff(path, &bytes)?
    {
        return Ok(slice);
    }
    let image = image::load_from_memory(&bytes).map_err(|source| IoError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_luma32f())
}

fn is_tiff(bytes: &[u8]) -> bool {
    bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*")
}

/// Decode a single-channel float TIFF, or `None` for any other TIFF
/// layout so the caller can fall back to `image`.
#[allow(clippy::cast_possible_truncation)]
fn decode_float_tiff(path: &Path, bytes: &[u8]) -> IoResult<Option<FloatSlice>> {
    let tiff_error = |source| IoError::TiffDecode {
        path: path.to_path_buf(),
        source,
    };
    let mut decoder = Decoder::new(Cursor::new(bytes)).map_err(tiff_error)?;
    if !matches!(
        decoder.colortype().map_err(tiff_error)?,
        tiff::ColorType::Gray(32 | 64)
    ) {
        return Ok(None);
    }
    let (width, height) = decoder.dimensions().map_err(tiff_error)?;
    let pixels = match decoder.read_image().map_err(tiff_error)? {
        DecodingResult::F32(buf) => buf,
        DecodingResult::F64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        _ => return Ok(None),
    };
    Ok(FloatSlice::from_raw(width, height, pixels))
}
