//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! These diagnostics are permanent instrumentation for threshold tuning.
//! [`process_with_diagnostics`] collects them alongside the segmentation.
//!
//! The core never reads a clock itself. Callers inject a [`Clock`], so
//! tests can run with a fake one.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::affinity::AffinityGraph;
use crate::pipeline::Pipeline;
use crate::types::{Aggregation, Dimensions, SegmentError, SegmentationConfig, SegmentationResult};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of timestamps for stage timing.
pub trait Clock {
    /// Opaque timestamp.
    type Instant;

    /// The current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 1: watershed.
    pub watershed: StageDiagnostics,
    /// Stage 2: region graph construction.
    pub region_graph: StageDiagnostics,
    /// Stage 3: region merging (only when `config.merge.enabled`).
    pub merge: Option<StageDiagnostics>,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Watershed metrics.
    Watershed {
        /// Low threshold.
        t_low: f32,
        /// High threshold.
        t_high: f32,
        /// Plateau rule limit, if any.
        plateau_size_limit: Option<u64>,
        /// Traversable voxel-edges.
        edge_count: usize,
        /// Unconditional edges that joined two components.
        unconditional_merges: usize,
        /// Edges in `[t_low, t_high)`.
        ordered_edges: usize,
        /// Ordered edges that joined two components.
        ordered_merges: usize,
        /// Edges below `t_low`.
        discarded_edges: usize,
        /// Ordered edges refused by the plateau rule.
        plateau_refusals: usize,
        /// Segments produced.
        segment_count: u32,
    },
    /// Region graph metrics.
    RegionGraph {
        /// Edge aggregation rule.
        aggregation: Aggregation,
        /// Regions in the graph.
        node_count: usize,
        /// Region boundaries in the graph.
        edge_count: usize,
    },
    /// Region merging metrics.
    Merge {
        /// Policy minimum region size.
        min_size: u64,
        /// Policy affinity threshold.
        affinity_threshold: f32,
        /// Passes run.
        passes: usize,
        /// Regions retired.
        merges: usize,
        /// Regions before merging.
        regions_before: u32,
        /// Regions after merging.
        regions_after: u32,
    },
}

/// High-level summary counts for the entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Volume dimensions.
    pub dimensions: Dimensions,
    /// Total voxel count.
    pub voxel_count: u64,
    /// Segments from the watershed.
    pub segment_count: u32,
    /// Regions in the final labeling.
    pub final_region_count: u32,
    /// Voxel count of the largest final region.
    pub largest_region: u64,
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Segmentation Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Volume: {} ({} voxels)",
            self.summary.dimensions, self.summary.voxel_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<16} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let mut stages = vec![("Watershed", &self.watershed), ("Region Graph", &self.region_graph)];
        if let Some(ref merge) = self.merge {
            stages.push(("Merge", merge));
        }

        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<16} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Segments: {}  |  Final regions: {}  |  Largest region: {} voxels",
            self.summary.segment_count, self.summary.final_region_count, self.summary.largest_region,
        ));

        lines.join("\n")
    }
}

/// Run the full pipeline, timing each stage with `clock`.
///
/// # Errors
///
/// Propagates the error of the first failing stage.
pub fn process_with_diagnostics<C: Clock>(
    affinity: &AffinityGraph,
    config: &SegmentationConfig,
    clock: &C,
) -> Result<(SegmentationResult, PipelineDiagnostics), SegmentError> {
    let start = clock.now();

    let t = clock.now();
    let segmented = Pipeline::new(affinity, config.clone()).watershed()?;
    let watershed = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: segmented.metrics(),
    };

    let t = clock.now();
    let built = segmented.build_region_graph()?;
    let region_graph = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: built.metrics(),
    };

    let t = clock.now();
    let merged = built.merge()?;
    let merge_duration = clock.elapsed(&t);
    let merge = merged.metrics().map(|metrics| StageDiagnostics {
        duration: merge_duration,
        metrics,
    });

    let result = merged.into_result();
    let total_duration = clock.elapsed(&start);
    let dimensions = affinity.dimensions();
    let summary = PipelineSummary {
        dimensions,
        voxel_count: dimensions.voxel_count(),
        segment_count: result.num_segments,
        final_region_count: result.num_regions,
        largest_region: result.region_sizes.iter().copied().max().unwrap_or(0),
    };

    Ok((
        result,
        PipelineDiagnostics {
            watershed,
            region_graph,
            merge,
            total_duration,
            summary,
        },
    ))
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Watershed {
            t_low,
            t_high,
            edge_count,
            unconditional_merges,
            ordered_merges,
            discarded_edges,
            plateau_refusals,
            segment_count,
            ..
        } => {
            let mut details = format!(
                "t=[{t_low}, {t_high}) edges={edge_count} joins={unconditional_merges}+{ordered_merges} dropped={discarded_edges} -> {segment_count} segments"
            );
            if *plateau_refusals > 0 {
                details.push_str(&format!(" (refused {plateau_refusals})"));
            }
            details
        }
        StageMetrics::RegionGraph {
            aggregation,
            node_count,
            edge_count,
        } => format!("{aggregation} {node_count} nodes, {edge_count} edges"),
        StageMetrics::Merge {
            min_size,
            affinity_threshold,
            passes,
            merges,
            regions_before,
            regions_after,
        } => format!(
            "min_size={min_size} t_s={affinity_threshold} {regions_before}->{regions_after} regions ({merges} merges, {passes} passes)"
        ),
    }
}
