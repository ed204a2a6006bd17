//! Run metadata sidecar.
//!
//! A JSON document written next to the label slices, carrying the full
//! configuration so a run can be reproduced from its output directory.

use basin_pipeline::{Dimensions, SegmentationConfig, SegmentationResult};
use serde::{Deserialize, Serialize};

use crate::error::ExportError;
use crate::slice::{LabelEncoding, SliceFormat};

/// File name of the metadata sidecar.
pub const METADATA_FILENAME: &str = "watershed_params.json";

/// Everything needed to interpret and reproduce a set of label slices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Producing tool and version.
    pub generator: String,
    /// Segmentation parameters.
    pub config: SegmentationConfig,
    /// Volume dimensions.
    pub dimensions: Dimensions,
    /// Segments from the watershed.
    pub num_segments: u32,
    /// Regions in the written labeling.
    pub num_regions: u32,
    /// Merges performed, or `None` when merging was disabled.
    pub merges: Option<usize>,
    /// Pixel encoding of the slices.
    pub encoding: LabelEncoding,
    /// Image container of the slices.
    pub format: SliceFormat,
    /// Slice file names in z order.
    pub slices: Vec<String>,
}

impl RunMetadata {
    /// Metadata for `result`, produced with `config`.
    #[must_use]
    pub fn new(
        config: &SegmentationConfig,
        result: &SegmentationResult,
        encoding: LabelEncoding,
        format: SliceFormat,
        slices: Vec<String>,
    ) -> Self {
        Self {
            generator: concat!("basin ", env!("CARGO_PKG_VERSION")).to_string(),
            config: config.clone(),
            dimensions: result.segmentation.dimensions(),
            num_segments: result.num_segments,
            num_regions: result.num_regions,
            merges: result.merges,
            encoding,
            format,
            slices,
        }
    }
}

/// Render `metadata` as pretty-printed JSON.
///
/// # Errors
///
/// Returns [`ExportError::Metadata`] if serialization fails.
pub fn to_metadata_json(metadata: &RunMetadata) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(metadata)?)
}
