//! Output file naming.
//!
//! Slices are named `watershed_<z>_<t_low>_<t_high>_<merge_threshold>_<min_size>.<ext>`
//! with `z` zero-padded to five digits and thresholds printed in their
//! shortest round-trip form (`0.3`, `1`), so a directory of slices
//! records the parameters that produced it.

use basin_pipeline::SegmentationConfig;

use crate::slice::SliceFormat;

/// File name prefix shared by every slice of a run.
pub const SLICE_PREFIX: &str = "watershed";

/// The run parameters embedded in slice file names.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceNaming {
    /// Low watershed threshold.
    pub t_low: f32,
    /// High watershed threshold.
    pub t_high: f32,
    /// Merge affinity threshold.
    pub merge_threshold: f32,
    /// Merge minimum region size.
    pub min_size: u64,
    /// Container format, which picks the extension.
    pub format: SliceFormat,
}

impl SliceNaming {
    /// Naming for a run of `config` written as `format`.
    #[must_use]
    pub const fn new(config: &SegmentationConfig, format: SliceFormat) -> Self {
        Self {
            t_low: config.t_low,
            t_high: config.t_high,
            merge_threshold: config.merge.affinity_threshold,
            min_size: config.merge.min_size,
            format,
        }
    }
}

/// File name of slice `z`.
#[must_use]
pub fn slice_filename(naming: &SliceNaming, z: u32) -> String {
    format!(
        "{SLICE_PREFIX}_{z:05}_{}_{}_{}_{}.{}",
        naming.t_low,
        naming.t_high,
        naming.merge_threshold,
        naming.min_size,
        naming.format.extension(),
    )
}
