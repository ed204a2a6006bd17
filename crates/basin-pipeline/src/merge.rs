//! Size-driven region merging over the region graph.
//!
//! Small regions are folded into their strongest eligible neighbor until
//! a full pass finds nothing to merge. Eligibility is decided by a
//! [`MergePolicy`]: a region of `size` voxels may cross an edge of
//! aggregated affinity `a` iff `size < policy.size_threshold(a)`.

use std::cmp::Ordering;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::region_graph::RegionGraph;
use crate::segmentation::{Segmentation, UNASSIGNED};
use crate::types::SegmentError;

/// Decides how small a region must be to merge across an edge.
///
/// Implemented by [`DynamicSizeThreshold`] and by any `Fn(f32) -> u64`.
pub trait MergePolicy {
    /// Regions with fewer voxels than the returned value may merge
    /// across an edge of aggregated affinity `affinity`.
    fn size_threshold(&self, affinity: f32) -> u64;

    /// Whether a region of `size` voxels may merge across an edge of
    /// aggregated affinity `affinity`.
    fn allows(&self, size: u64, affinity: f32) -> bool {
        size < self.size_threshold(affinity)
    }

    /// Check the policy parameters before merging starts.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidThreshold`] for unusable parameters.
    fn validate(&self) -> Result<(), SegmentError> {
        Ok(())
    }
}

impl<F: Fn(f32) -> u64> MergePolicy for F {
    fn size_threshold(&self, affinity: f32) -> u64 {
        self(affinity)
    }
}

/// The default policy: regions smaller than `min_size` merge across
/// edges of affinity at least `affinity_threshold`; weaker edges never
/// carry a merge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DynamicSizeThreshold {
    /// Size below which a region is eligible.
    pub min_size: u64,
    /// Weakest edge a merge may cross.
    pub affinity_threshold: f32,
}

impl DynamicSizeThreshold {
    /// Create a policy.
    #[must_use]
    pub const fn new(min_size: u64, affinity_threshold: f32) -> Self {
        Self {
            min_size,
            affinity_threshold,
        }
    }
}

impl MergePolicy for DynamicSizeThreshold {
    fn size_threshold(&self, affinity: f32) -> u64 {
        if affinity >= self.affinity_threshold {
            self.min_size
        } else {
            0
        }
    }

    fn validate(&self) -> Result<(), SegmentError> {
        if self.affinity_threshold.is_finite() {
            Ok(())
        } else {
            Err(SegmentError::InvalidThreshold(format!(
                "merge affinity threshold must be finite, got {}",
                self.affinity_threshold
            )))
        }
    }
}

/// Output of [`merge`].
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Final labeling, dense in `1..=num_regions`.
    pub segmentation: Segmentation,
    /// Region graph over the final labels.
    pub region_graph: RegionGraph,
    /// Voxel count per final label; index `0` is `0`.
    pub region_sizes: Vec<u64>,
    /// Number of surviving regions.
    pub num_regions: u32,
    /// Number of regions retired.
    pub merges: usize,
    /// Passes run, including the final pass that merged nothing.
    pub passes: usize,
}

/// Merge undersized regions into their strongest eligible neighbor.
///
/// Each pass visits live regions in ascending `(size, label)` order. A
/// region still alive when visited picks, among the neighbors `policy`
/// allows at its current size, the one with the highest aggregated
/// affinity (ties to the lowest label), and is retired into it. The
/// survivor's size grows by the retired size and the retired region's
/// boundaries move to the survivor. Voxel labels are rewritten once per
/// pass. Passes repeat until one merges nothing; the surviving labels
/// are then compacted to `1..=num_regions` in their original order.
///
/// # Errors
///
/// Returns [`SegmentError::InvalidThreshold`] if `policy` rejects its own
/// parameters (a non-finite [`DynamicSizeThreshold::affinity_threshold`]).
/// Returns [`SegmentError::LabelConsistencyViolation`] if `region_sizes`
/// does not cover every graph label, if the live sizes do not sum to the
/// voxel count, or if the labeling references a retired region.
pub fn merge<P: MergePolicy>(
    mut segmentation: Segmentation,
    mut region_graph: RegionGraph,
    mut region_sizes: Vec<u64>,
    policy: &P,
) -> Result<MergeOutcome, SegmentError> {
    policy.validate()?;
    check_sizes(&segmentation, &region_graph, &region_sizes)?;
    let regions_before = region_graph.node_count();
    info!("merging regions ({regions_before} regions)");

    let mut remap: Vec<u32> = (0..).take(region_sizes.len()).collect();
    let mut merges = 0;
    let mut passes = 0;
    loop {
        passes += 1;
        let mut order = region_graph.regions();
        order.sort_by_key(|&label| (region_sizes[label as usize], label));

        let mut pass_merges = 0;
        for region in order {
            if !region_graph.contains_region(region) {
                continue;
            }
            let size = region_sizes[region as usize];
            let Some(target) = strongest_target(&region_graph, region, size, policy) else {
                continue;
            };
            region_graph.absorb(region, target)?;
            region_sizes[target as usize] += size;
            region_sizes[region as usize] = 0;
            remap[region as usize] = target;
            pass_merges += 1;
        }

        debug!("merge pass {passes}: {pass_merges} merges");
        if pass_merges == 0 {
            break;
        }
        merges += pass_merges;
        resolve(&mut remap);
        segmentation.relabel(&remap)?;
    }

    let survivors = region_graph.regions();
    let mut compact = vec![UNASSIGNED; region_sizes.len()];
    let mut compact_sizes = Vec::with_capacity(survivors.len() + 1);
    compact_sizes.push(0);
    for (new, &old) in (1u32..).zip(&survivors) {
        compact[old as usize] = new;
        compact_sizes.push(region_sizes[old as usize]);
    }
    segmentation.relabel(&compact)?;
    if segmentation.labels().contains(&UNASSIGNED) {
        return Err(SegmentError::LabelConsistencyViolation(
            "labeling references a retired region".to_string(),
        ));
    }
    let region_graph = region_graph.relabeled(&compact)?;
    let num_regions = u32::try_from(survivors.len()).map_err(|_| {
        SegmentError::LabelConsistencyViolation(format!(
            "{} regions exceed the label range",
            survivors.len()
        ))
    })?;

    info!("merged {merges} regions in {passes} passes, {num_regions} regions remain");

    Ok(MergeOutcome {
        segmentation,
        region_graph,
        region_sizes: compact_sizes,
        num_regions,
        merges,
        passes,
    })
}

/// The allowed neighbor of `region` with the highest affinity, ties to
/// the lowest label.
fn strongest_target<P: MergePolicy>(
    graph: &RegionGraph,
    region: u32,
    size: u64,
    policy: &P,
) -> Option<u32> {
    graph
        .neighbors(region)
        .filter(|&(_, affinity)| policy.allows(size, affinity))
        .max_by(|a, b| match a.1.total_cmp(&b.1) {
            Ordering::Equal => b.0.cmp(&a.0),
            order => order,
        })
        .map(|(label, _)| label)
}

/// Point every entry of `remap` directly at its surviving label.
fn resolve(remap: &mut [u32]) {
    for label in 0..remap.len() {
        let mut target = remap[label];
        while remap[target as usize] != target {
            target = remap[target as usize];
        }
        remap[label] = target;
    }
}

/// Validate that sizes cover the graph and account for every voxel.
fn check_sizes(
    segmentation: &Segmentation,
    graph: &RegionGraph,
    sizes: &[u64],
) -> Result<(), SegmentError> {
    let mut total = 0u64;
    for label in graph.regions() {
        let size = sizes.get(label as usize).ok_or_else(|| {
            SegmentError::LabelConsistencyViolation(format!(
                "region {label} has no size entry ({} entries)",
                sizes.len()
            ))
        })?;
        total += size;
    }
    let voxels = segmentation.dimensions().voxel_count();
    if total != voxels {
        return Err(SegmentError::LabelConsistencyViolation(format!(
            "region sizes sum to {total}, volume has {voxels} voxels"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::affinity::AffinityGraph;
    use crate::types::{Aggregation, Axis, Dimensions};
    use crate::watershed::watershed;

    fn line_graph(weights: &[f32], labels: Vec<u32>) -> (Segmentation, RegionGraph, Vec<u64>) {
        let dims = Dimensions::new(u32::try_from(labels.len()).unwrap(), 1, 1);
        let aff = AffinityGraph::from_fn(dims, |x, _, _, axis| {
            if axis == Axis::X && (x as usize) < weights.len() {
                weights[x as usize]
            } else {
                0.0
            }
        })
        .unwrap();
        let seg = Segmentation::new(dims, labels).unwrap();
        let num = seg.max_label();
        let graph = RegionGraph::build(&aff, &seg, num, Aggregation::Max).unwrap();
        let sizes = seg.region_sizes();
        (seg, graph, sizes)
    }

    #[test]
    fn dynamic_threshold_policy() {
        let policy = DynamicSizeThreshold::new(25, 0.1);
        assert_eq!(policy.size_threshold(0.1), 25);
        assert_eq!(policy.size_threshold(0.09), 0);
        assert!(policy.allows(24, 0.5));
        assert!(!policy.allows(25, 0.5));
        assert!(!policy.allows(1, 0.05));
    }

    #[test]
    fn non_finite_policy_threshold_is_rejected() {
        for threshold in [f32::NAN, f32::INFINITY] {
            let (seg, graph, sizes) = line_graph(&[0.9], vec![1, 2]);
            let result = merge(seg, graph, sizes, &DynamicSizeThreshold::new(5, threshold));
            assert!(matches!(result, Err(SegmentError::InvalidThreshold(_))));
        }
        assert!(DynamicSizeThreshold::new(5, 0.1).validate().is_ok());
    }

    #[test]
    fn closure_is_a_policy() {
        let policy = |affinity: f32| -> u64 { if affinity > 0.5 { 10 } else { 2 } };
        assert!(policy.allows(5, 0.6));
        assert!(!policy.allows(5, 0.4));
        assert!(policy.allows(1, 0.0));
    }

    #[test]
    fn two_pairs_merge_into_one_region() {
        let aff = AffinityGraph::from_fn(Dimensions::new(2, 2, 1), |x, y, _, axis| {
            match (x, y, axis) {
                (0, 0 | 1, Axis::X) => 0.9,
                (0, 0, Axis::Y) => 0.2,
                (1, 0, Axis::Y) => 0.1,
                _ => 0.0,
            }
        })
        .unwrap();
        let ws = watershed(&aff, 0.3, 0.8).unwrap();
        let graph =
            RegionGraph::build(&aff, &ws.segmentation, ws.num_segments, Aggregation::Max).unwrap();
        assert_eq!(graph.affinity(1, 2), Some(0.2));

        let out = merge(
            ws.segmentation,
            graph,
            ws.region_sizes,
            &DynamicSizeThreshold::new(3, 0.05),
        )
        .unwrap();
        assert_eq!(out.num_regions, 1);
        assert_eq!(out.merges, 1);
        assert_eq!(out.region_sizes, vec![0, 4]);
        assert_eq!(out.segmentation.labels(), &[1, 1, 1, 1]);
        assert_eq!(out.region_graph.edge_count(), 0);
    }

    #[test]
    fn weak_edges_block_merges() {
        let (seg, graph, sizes) = line_graph(&[0.05, 0.05], vec![1, 2, 3]);
        let out = merge(seg, graph, sizes, &DynamicSizeThreshold::new(10, 0.1)).unwrap();
        assert_eq!(out.num_regions, 3);
        assert_eq!(out.merges, 0);
        assert_eq!(out.passes, 1);
        assert_eq!(out.segmentation.labels(), &[1, 2, 3]);
    }

    #[test]
    fn target_is_strongest_neighbor() {
        // Region 2 (1 voxel) sits between 1 (0.3) and 3 (0.7).
        let (seg, graph, sizes) = line_graph(&[0.9, 0.3, 0.7, 0.9, 0.9], vec![1, 1, 2, 3, 3, 3]);
        let out = merge(seg, graph, sizes, &DynamicSizeThreshold::new(2, 0.1)).unwrap();
        assert_eq!(out.num_regions, 2);
        assert_eq!(out.segmentation.labels(), &[1, 1, 2, 2, 2, 2]);
        assert_eq!(out.region_sizes, vec![0, 2, 4]);
    }

    #[test]
    fn ties_go_to_lowest_label() {
        let (seg, graph, sizes) = line_graph(&[0.9, 0.5, 0.5, 0.9], vec![1, 1, 2, 3, 3]);
        let out = merge(seg, graph, sizes, &DynamicSizeThreshold::new(2, 0.1)).unwrap();
        assert_eq!(out.segmentation.labels(), &[1, 1, 1, 2, 2]);
    }

    #[test]
    fn smallest_region_is_visited_first() {
        // Sizes: 1 -> 2 voxels, 2 -> 1 voxel. Region 2 goes first and
        // merges into 1; region 1 has no neighbors left.
        let (seg, graph, sizes) = line_graph(&[0.0, 0.5], vec![1, 1, 2]);
        let out = merge(seg, graph, sizes, &DynamicSizeThreshold::new(5, 0.1)).unwrap();
        assert_eq!(out.num_regions, 1);
        assert_eq!(out.merges, 1);
        assert_eq!(out.passes, 2);
    }

    #[test]
    fn merges_chain_across_passes() {
        // Grown regions keep merging while still under min_size.
        let (seg, graph, sizes) = line_graph(&[0.5; 5], vec![1, 2, 3, 4, 5, 6]);
        let out = merge(seg, graph, sizes, &DynamicSizeThreshold::new(3, 0.1)).unwrap();
        assert!(out.region_sizes[1..].iter().all(|&size| size >= 3));
        assert_eq!(out.region_sizes.iter().sum::<u64>(), 6);
        assert_eq!(
            out.segmentation.region_sizes(),
            out.region_sizes,
            "sizes must match the relabeled volume"
        );
    }

    #[test]
    fn labels_are_compacted() {
        let (seg, graph, sizes) = line_graph(&[0.9, 0.0, 0.0], vec![1, 1, 2, 3]);
        // Every single-voxel region merges, whatever the affinity.
        let out = merge(seg, graph, sizes, &|_: f32| -> u64 { 2 }).unwrap();
        let max = out.segmentation.max_label();
        assert_eq!(max, out.num_regions);
        assert_eq!(out.region_graph.regions(), (1..=max).collect::<Vec<_>>());
    }

    #[test]
    fn merge_is_idempotent() {
        let (seg, graph, sizes) = line_graph(&[0.5, 0.2, 0.9, 0.4], vec![1, 2, 2, 3, 4]);
        let policy = DynamicSizeThreshold::new(2, 0.3);
        let first = merge(seg, graph, sizes, &policy).unwrap();
        let second = merge(
            first.segmentation.clone(),
            first.region_graph.clone(),
            first.region_sizes.clone(),
            &policy,
        )
        .unwrap();
        assert_eq!(second.merges, 0);
        assert_eq!(second.segmentation, first.segmentation);
        assert_eq!(second.region_sizes, first.region_sizes);
    }

    #[test]
    fn rejects_inconsistent_sizes() {
        let (seg, graph, _) = line_graph(&[0.5], vec![1, 2]);
        assert!(matches!(
            merge(seg.clone(), graph.clone(), vec![0, 1], &DynamicSizeThreshold::new(2, 0.1)),
            Err(SegmentError::LabelConsistencyViolation(_))
        ));
        assert!(matches!(
            merge(seg, graph, vec![0, 1, 5], &DynamicSizeThreshold::new(2, 0.1)),
            Err(SegmentError::LabelConsistencyViolation(_))
        ));
    }

    #[test]
    fn resolve_follows_chains() {
        let mut remap = vec![0, 2, 3, 3, 4];
        resolve(&mut remap);
        assert_eq!(remap, vec![0, 3, 3, 3, 4]);
    }
}
