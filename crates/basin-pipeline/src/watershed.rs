//! Hysteresis watershed over a voxel affinity graph.
//!
//! Every traversable voxel-edge is classified against two thresholds:
//!
//! - `weight >= t_high`: the endpoints are joined unconditionally.
//! - `weight < t_low`: the edge is discarded.
//! - otherwise the edge is queued and, once every unconditional join is
//!   done, processed in descending weight order (ties by ascending voxel
//!   index, then ascending axis).
//!
//! Components are then labeled `1..=num_segments` in order of their
//! smallest voxel index.

use log::{debug, info};
use rayon::prelude::*;

use crate::affinity::AffinityGraph;
use crate::segmentation::{Segmentation, UNASSIGNED};
use crate::types::{Axis, SegmentError, validate_thresholds};
use crate::union_find::DisjointSet;

/// Largest voxel count the watershed accepts. Labels and union-find ids
/// are `u32`.
pub const MAX_VOXELS: u64 = u32::MAX as u64;

/// Edge counts gathered while running the watershed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatershedStats {
    /// Traversable voxel-edges in the volume.
    pub edge_count: usize,
    /// Edges at or above `t_high`.
    pub unconditional_edges: usize,
    /// Unconditional edges that joined two distinct components.
    pub unconditional_merges: usize,
    /// Edges in `[t_low, t_high)`.
    pub ordered_edges: usize,
    /// Ordered edges that joined two distinct components.
    pub ordered_merges: usize,
    /// Edges below `t_low`.
    pub discarded_edges: usize,
    /// Ordered edges refused by the plateau rule.
    pub plateau_refusals: usize,
}

/// Output of the watershed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatershedOutput {
    /// One label per voxel in `1..=num_segments`.
    pub segmentation: Segmentation,
    /// Voxel count per label; index `0` is always `0`.
    pub region_sizes: Vec<u64>,
    /// Number of segments.
    pub num_segments: u32,
    /// Edge counts.
    pub stats: WatershedStats,
}

/// A queued edge in `[t_low, t_high)`.
#[derive(Debug, Clone, Copy)]
struct OrderedEdge {
    weight: f32,
    voxel: u32,
    axis: Axis,
    neighbor: u32,
}

/// Run the watershed with plain descending-order union.
///
/// # Errors
///
/// See [`watershed_with_plateau`].
pub fn watershed(
    affinity: &AffinityGraph,
    t_low: f32,
    t_high: f32,
) -> Result<WatershedOutput, SegmentError> {
    watershed_with_plateau(affinity, t_low, t_high, None)
}

/// Run the watershed, optionally refusing ordered unions between two
/// components that both hold at least `plateau_size_limit` voxels.
///
/// Unconditional (`>= t_high`) unions ignore the plateau rule.
///
/// # Errors
///
/// - [`SegmentError::InvalidThreshold`] if a threshold is not finite or
///   `t_low > t_high`.
/// - [`SegmentError::EmptyVolume`] if the volume has no voxels.
/// - [`SegmentError::VolumeTooLarge`] if the volume has more than
///   [`MAX_VOXELS`] voxels.
/// - [`SegmentError::MalformedAffinity`] if a traversable edge carries a
///   non-finite weight.
#[allow(clippy::cast_possible_truncation)] // voxel indices fit in u32 after the MAX_VOXELS check
pub fn watershed_with_plateau(
    affinity: &AffinityGraph,
    t_low: f32,
    t_high: f32,
    plateau_size_limit: Option<u64>,
) -> Result<WatershedOutput, SegmentError> {
    validate_thresholds(t_low, t_high)?;
    let dimensions = affinity.dimensions();
    if dimensions.is_empty() {
        return Err(SegmentError::EmptyVolume);
    }
    if dimensions.voxel_count() > MAX_VOXELS {
        return Err(SegmentError::VolumeTooLarge {
            voxels: dimensions.voxel_count(),
            max: MAX_VOXELS,
        });
    }
    affinity.validate()?;

    info!("performing watershed on {dimensions} volume (t_low={t_low}, t_high={t_high})");

    let voxel_count = affinity.voxel_count();
    let mut sets = DisjointSet::new(voxel_count);
    let mut stats = WatershedStats::default();
    let mut ordered = Vec::new();

    for edge in affinity.edges() {
        stats.edge_count += 1;
        let voxel = edge.voxel as u32;
        let neighbor = edge.neighbor as u32;
        if edge.weight >= t_high {
            stats.unconditional_edges += 1;
            if sets.union(voxel, neighbor) {
                stats.unconditional_merges += 1;
            }
        } else if edge.weight >= t_low {
            ordered.push(OrderedEdge {
                weight: edge.weight,
                voxel,
                axis: edge.axis,
                neighbor,
            });
        } else {
            stats.discarded_edges += 1;
        }
    }
    stats.ordered_edges = ordered.len();

    // (weight, voxel, axis) is unique per edge, so the unstable sort is
    // deterministic.
    ordered.par_sort_unstable_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then(a.voxel.cmp(&b.voxel))
            .then(a.axis.cmp(&b.axis))
    });

    for edge in &ordered {
        let a = sets.find(edge.voxel);
        let b = sets.find(edge.neighbor);
        if a == b {
            continue;
        }
        if let Some(limit) = plateau_size_limit
            && sets.component_size(a) >= limit
            && sets.component_size(b) >= limit
        {
            stats.plateau_refusals += 1;
            continue;
        }
        sets.link_roots(a, b);
        stats.ordered_merges += 1;
    }

    debug!(
        "watershed edges: {} total, {} unconditional ({} merges), {} ordered ({} merges, {} plateau refusals), {} discarded",
        stats.edge_count,
        stats.unconditional_edges,
        stats.unconditional_merges,
        stats.ordered_edges,
        stats.ordered_merges,
        stats.plateau_refusals,
        stats.discarded_edges,
    );

    let mut root_labels = vec![UNASSIGNED; voxel_count];
    let mut labels = Vec::with_capacity(voxel_count);
    let mut region_sizes = vec![0u64];
    let mut num_segments = 0u32;
    for voxel in 0..voxel_count {
        let root = sets.find(voxel as u32) as usize;
        if root_labels[root] == UNASSIGNED {
            num_segments += 1;
            root_labels[root] = num_segments;
            region_sizes.push(0);
        }
        let label = root_labels[root];
        region_sizes[label as usize] += 1;
        labels.push(label);
    }

    info!("found {num_segments} segments");

    Ok(WatershedOutput {
        segmentation: Segmentation::new(dimensions, labels)?,
        region_sizes,
        num_segments,
        stats,
    })
}
