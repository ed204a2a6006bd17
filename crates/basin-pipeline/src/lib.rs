//! basin-pipeline: affinity-graph segmentation (sans-IO).
//!
//! Segments a 3D volume into labeled regions through:
//! hysteresis watershed -> region graph -> size-driven region merging.
//!
//! This crate has **no I/O dependencies**. It operates on an in-memory
//! [`AffinityGraph`] and returns structured data. Reading affinity slices
//! and writing label slices live in `basin-io`.

pub mod affinity;
pub mod diagnostics;
pub mod merge;
pub mod pipeline;
pub mod region_graph;
pub mod segmentation;
pub mod types;
pub mod union_find;
pub mod watershed;

pub use affinity::{AXIS_COUNT, AffinityGraph, VoxelEdge};
pub use merge::{DynamicSizeThreshold, MergeOutcome, MergePolicy};
pub use pipeline::Pipeline;
pub use region_graph::{BoundaryAffinity, RegionGraph};
pub use segmentation::{Segmentation, UNASSIGNED};
pub use types::{
    Aggregation, Axis, Dimensions, MergeConfig, SegmentError, SegmentationConfig,
    SegmentationResult,
};
pub use watershed::{WatershedOutput, WatershedStats};

/// Run the full segmentation pipeline.
///
/// # Pipeline steps
///
/// 1. Validate the configuration
/// 2. Hysteresis watershed over every traversable voxel-edge
/// 3. Region graph construction with the configured aggregation
/// 4. Region merging (only when `config.merge.enabled`)
///
/// # Errors
///
/// Returns [`SegmentError::InvalidThreshold`] for a bad configuration,
/// [`SegmentError::EmptyVolume`] or [`SegmentError::VolumeTooLarge`] for
/// an unsupported volume, [`SegmentError::MalformedAffinity`] for a
/// non-finite weight on a traversable edge, and
/// [`SegmentError::LabelConsistencyViolation`] if an internal invariant
/// breaks.
pub fn process(
    affinity: &AffinityGraph,
    config: &SegmentationConfig,
) -> Result<SegmentationResult, SegmentError> {
    Ok(Pipeline::new(affinity, config.clone())
        .watershed()?
        .build_region_graph()?
        .merge()?
        .into_result())
}
