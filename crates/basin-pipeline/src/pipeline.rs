//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! ```rust
//! # use basin_pipeline::{AffinityGraph, Dimensions, Pipeline, SegmentationConfig, SegmentError};
//! # fn run() -> Result<(), SegmentError> {
//! let affinity = AffinityGraph::from_fn(Dimensions::new(4, 4, 2), |_, _, _, _| 0.9)?;
//! let result = Pipeline::new(&affinity, SegmentationConfig::default())
//!     .watershed()?
//!     .build_region_graph()?
//!     .merge()?
//!     .into_result();
//! assert_eq!(result.num_regions, 1);
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state,
//! carrying the configuration and every output later stages need. The
//! affinity graph is borrowed until the region graph exists; from then on
//! no stage reads raw affinities.
//!
//! The [`Stage`] enum offers the same sequence with type erasure, for
//! callers that want to loop over stages uniformly.

use crate::affinity::AffinityGraph;
use crate::diagnostics::StageMetrics;
use crate::merge::merge;
use crate::region_graph::RegionGraph;
use crate::segmentation::Segmentation;
use crate::types::{SegmentError, SegmentationConfig, SegmentationResult};
use crate::watershed::{WatershedStats, watershed_with_plateau};

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing.
#[must_use = "pipeline stages are consumed by advancing, call .watershed() to continue"]
pub struct Pending<'a> {
    config: SegmentationConfig,
    affinity: &'a AffinityGraph,
}

impl<'a> Pending<'a> {
    /// The input affinity graph.
    #[must_use]
    pub const fn affinity(&self) -> &'a AffinityGraph {
        self.affinity
    }

    /// The configuration driving this run.
    #[must_use]
    pub const fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    /// Validate the configuration and run the watershed.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidThreshold`] for a bad configuration
    /// and any error of
    /// [`watershed_with_plateau`](crate::watershed::watershed_with_plateau).
    pub fn watershed(self) -> Result<Segmented<'a>, SegmentError> {
        self.config.validate()?;
        let output = watershed_with_plateau(
            self.affinity,
            self.config.t_low,
            self.config.t_high,
            self.config.plateau_size_limit,
        )?;
        Ok(Segmented {
            config: self.config,
            affinity: self.affinity,
            segmentation: output.segmentation,
            region_sizes: output.region_sizes,
            num_segments: output.num_segments,
            stats: output.stats,
        })
    }
}

// ───────────────────────── Stage 1: Segmented ────────────────────────

/// Pipeline state after the watershed.
#[must_use = "pipeline stages are consumed by advancing, call .build_region_graph() to continue"]
pub struct Segmented<'a> {
    config: SegmentationConfig,
    affinity: &'a AffinityGraph,
    segmentation: Segmentation,
    region_sizes: Vec<u64>,
    num_segments: u32,
    stats: WatershedStats,
}

impl<'a> Segmented<'a> {
    /// The watershed labeling.
    #[must_use]
    pub const fn segmentation(&self) -> &Segmentation {
        &self.segmentation
    }

    /// Voxel count per segment label.
    #[must_use]
    pub fn region_sizes(&self) -> &[u64] {
        &self.region_sizes
    }

    /// Number of watershed segments.
    #[must_use]
    pub const fn num_segments(&self) -> u32 {
        self.num_segments
    }

    /// Edge counts from the watershed.
    #[must_use]
    pub const fn stats(&self) -> &WatershedStats {
        &self.stats
    }

    /// Build the region graph and advance to [`GraphBuilt`].
    ///
    /// # Errors
    ///
    /// Propagates [`RegionGraph::build`] errors.
    pub fn build_region_graph(self) -> Result<GraphBuilt, SegmentError> {
        let region_graph = RegionGraph::build(
            self.affinity,
            &self.segmentation,
            self.num_segments,
            self.config.aggregation,
        )?;
        Ok(GraphBuilt {
            config: self.config,
            segmentation: self.segmentation,
            region_sizes: self.region_sizes,
            num_segments: self.num_segments,
            region_graph,
        })
    }

    /// Metrics for this stage.
    #[must_use]
    pub const fn metrics(&self) -> StageMetrics {
        StageMetrics::Watershed {
            t_low: self.config.t_low,
            t_high: self.config.t_high,
            plateau_size_limit: self.config.plateau_size_limit,
            edge_count: self.stats.edge_count,
            unconditional_merges: self.stats.unconditional_merges,
            ordered_edges: self.stats.ordered_edges,
            ordered_merges: self.stats.ordered_merges,
            discarded_edges: self.stats.discarded_edges,
            plateau_refusals: self.stats.plateau_refusals,
            segment_count: self.num_segments,
        }
    }
}

// ───────────────────────── Stage 2: GraphBuilt ───────────────────────

/// Pipeline state after building the region graph.
#[must_use = "pipeline stages are consumed by advancing, call .merge() to continue"]
pub struct GraphBuilt {
    config: SegmentationConfig,
    segmentation: Segmentation,
    region_sizes: Vec<u64>,
    num_segments: u32,
    region_graph: RegionGraph,
}

impl GraphBuilt {
    /// The region graph over watershed segments.
    #[must_use]
    pub const fn region_graph(&self) -> &RegionGraph {
        &self.region_graph
    }

    /// The watershed labeling.
    #[must_use]
    pub const fn segmentation(&self) -> &Segmentation {
        &self.segmentation
    }

    /// Run the region merger when `config.merge.enabled`, otherwise pass
    /// the watershed labeling through unchanged.
    ///
    /// # Errors
    ///
    /// Propagates [`merge`](crate::merge::merge) errors.
    pub fn merge(self) -> Result<Merged, SegmentError> {
        let merge_config = self.config.merge;
        if !merge_config.enabled {
            log::debug!("region merging disabled");
            return Ok(Merged {
                config: self.config,
                segmentation: self.segmentation,
                region_sizes: self.region_sizes,
                num_segments: self.num_segments,
                num_regions: self.num_segments,
                region_graph: self.region_graph,
                summary: None,
            });
        }
        let regions_before = self.num_segments;
        let outcome = merge(
            self.segmentation,
            self.region_graph,
            self.region_sizes,
            &merge_config.policy(),
        )?;
        Ok(Merged {
            config: self.config,
            segmentation: outcome.segmentation,
            region_sizes: outcome.region_sizes,
            num_segments: self.num_segments,
            num_regions: outcome.num_regions,
            region_graph: outcome.region_graph,
            summary: Some(MergeSummary {
                merges: outcome.merges,
                passes: outcome.passes,
                regions_before,
            }),
        })
    }

    /// Metrics for this stage.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        StageMetrics::RegionGraph {
            aggregation: self.region_graph.aggregation(),
            node_count: self.region_graph.node_count(),
            edge_count: self.region_graph.edge_count(),
        }
    }
}

// ───────────────────────── Stage 3: Merged ───────────────────────────

/// Counts from a merge stage that actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MergeSummary {
    merges: usize,
    passes: usize,
    regions_before: u32,
}

/// Final pipeline state.
#[must_use = "call .into_result() to extract the SegmentationResult"]
pub struct Merged {
    config: SegmentationConfig,
    segmentation: Segmentation,
    region_sizes: Vec<u64>,
    num_segments: u32,
    num_regions: u32,
    region_graph: RegionGraph,
    summary: Option<MergeSummary>,
}

impl Merged {
    /// The final labeling.
    #[must_use]
    pub const fn segmentation(&self) -> &Segmentation {
        &self.segmentation
    }

    /// Region graph over the final labels.
    #[must_use]
    pub const fn region_graph(&self) -> &RegionGraph {
        &self.region_graph
    }

    /// Number of final regions.
    #[must_use]
    pub const fn num_regions(&self) -> u32 {
        self.num_regions
    }

    /// Number of merges, or `None` if merging was disabled.
    #[must_use]
    pub fn merges(&self) -> Option<usize> {
        self.summary.map(|s| s.merges)
    }

    /// Metrics for this stage, or `None` if merging was disabled.
    #[must_use]
    pub fn metrics(&self) -> Option<StageMetrics> {
        self.summary.map(|summary| StageMetrics::Merge {
            min_size: self.config.merge.min_size,
            affinity_threshold: self.config.merge.affinity_threshold,
            passes: summary.passes,
            merges: summary.merges,
            regions_before: summary.regions_before,
            regions_after: self.num_regions,
        })
    }

    /// Consume the pipeline and return the [`SegmentationResult`].
    pub fn into_result(self) -> SegmentationResult {
        SegmentationResult {
            segmentation: self.segmentation,
            region_sizes: self.region_sizes,
            num_segments: self.num_segments,
            num_regions: self.num_regions,
            merges: self.summary.map(|s| s.merges),
        }
    }
}

// ───────────────────────── Stage enum ────────────────────────────────

/// Total number of stages in the pipeline.
pub const STAGE_COUNT: usize = 4;

/// Type-erased pipeline state.
///
/// ```rust
/// # use basin_pipeline::{AffinityGraph, Dimensions, Pipeline, SegmentationConfig, SegmentError};
/// # use basin_pipeline::pipeline::Stage;
/// # fn run() -> Result<(), SegmentError> {
/// let affinity = AffinityGraph::from_fn(Dimensions::new(2, 2, 1), |_, _, _, _| 0.5)?;
/// let mut stage = Stage::from(Pipeline::new(&affinity, SegmentationConfig::default()));
/// while let Some(next) = stage.next()? {
///     println!("{} done", next.name());
///     stage = next;
/// }
/// # Ok(())
/// # }
/// ```
#[must_use]
pub enum Stage<'a> {
    /// Before the watershed.
    Pending(Pending<'a>),
    /// After the watershed.
    Segmented(Segmented<'a>),
    /// After region graph construction.
    GraphBuilt(GraphBuilt),
    /// After merging (final).
    Merged(Merged),
}

impl<'a> Stage<'a> {
    /// Short stage name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pending(_) => "source",
            Self::Segmented(_) => "watershed",
            Self::GraphBuilt(_) => "region_graph",
            Self::Merged(_) => "merge",
        }
    }

    /// Zero-based stage index.
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::Pending(_) => 0,
            Self::Segmented(_) => 1,
            Self::GraphBuilt(_) => 2,
            Self::Merged(_) => 3,
        }
    }

    /// Returns `true` for the final stage.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Merged(_))
    }

    /// Metrics of the work this stage has completed.
    #[must_use]
    pub fn metrics(&self) -> Option<StageMetrics> {
        match self {
            Self::Pending(_) => None,
            Self::Segmented(s) => Some(s.metrics()),
            Self::GraphBuilt(s) => Some(s.metrics()),
            Self::Merged(s) => s.metrics(),
        }
    }

    /// Advance one stage, or `Ok(None)` at the final stage.
    ///
    /// # Errors
    ///
    /// Propagates the error of the stage being run.
    pub fn next(self) -> Result<Option<Self>, SegmentError> {
        Ok(match self {
            Self::Pending(s) => Some(Self::Segmented(s.watershed()?)),
            Self::Segmented(s) => Some(Self::GraphBuilt(s.build_region_graph()?)),
            Self::GraphBuilt(s) => Some(Self::Merged(s.merge()?)),
            Self::Merged(_) => None,
        })
    }

    /// Run every remaining stage and return the result.
    ///
    /// # Errors
    ///
    /// Propagates the error of the first failing stage.
    pub fn complete(self) -> Result<SegmentationResult, SegmentError> {
        match self {
            Self::Pending(s) => s.watershed()?.build_region_graph()?.merge().map(Merged::into_result),
            Self::Segmented(s) => s.build_region_graph()?.merge().map(Merged::into_result),
            Self::GraphBuilt(s) => s.merge().map(Merged::into_result),
            Self::Merged(s) => Ok(s.into_result()),
        }
    }
}

impl<'a> From<Pending<'a>> for Stage<'a> {
    fn from(s: Pending<'a>) -> Self {
        Self::Pending(s)
    }
}

impl<'a> From<Segmented<'a>> for Stage<'a> {
    fn from(s: Segmented<'a>) -> Self {
        Self::Segmented(s)
    }
}

impl From<GraphBuilt> for Stage<'_> {
    fn from(s: GraphBuilt) -> Self {
        Self::GraphBuilt(s)
    }
}

impl From<Merged> for Stage<'_> {
    fn from(s: Merged) -> Self {
        Self::Merged(s)
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental segmentation pipeline.
///
/// Each stage method consumes the current state and returns the next,
/// making it a compile-time error to skip stages or call them out of
/// order.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline. No processing is performed until
    /// [`.watershed()`](Pending::watershed) is called.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(affinity: &AffinityGraph, config: SegmentationConfig) -> Pending<'_> {
        Pending { config, affinity }
    }
}
