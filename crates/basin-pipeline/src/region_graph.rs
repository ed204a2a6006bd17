//! Region adjacency graph derived from a segmentation.
//!
//! One node per live label, one undirected edge per pair of labels that
//! touch through at least one voxel-edge. Every edge keeps the max, sum
//! and count of the crossing voxel-edge weights so that either
//! [`Aggregation`] can be read off it, and so that two edges can be
//! folded together when the merger retires a region.

use log::{debug, info};
use petgraph::graphmap::UnGraphMap;
use rayon::prelude::*;

use crate::affinity::AffinityGraph;
use crate::segmentation::{Segmentation, UNASSIGNED};
use crate::types::{Aggregation, SegmentError};

/// Accumulated weights of every voxel-edge crossing one region boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryAffinity {
    /// Strongest crossing weight.
    pub max: f32,
    /// Sum of crossing weights.
    pub sum: f64,
    /// Number of crossing voxel-edges.
    pub count: u64,
}

impl BoundaryAffinity {
    /// A boundary crossed by a single voxel-edge.
    #[must_use]
    pub fn new(weight: f32) -> Self {
        Self {
            max: weight,
            sum: f64::from(weight),
            count: 1,
        }
    }

    /// Record one more crossing voxel-edge.
    pub fn add(&mut self, weight: f32) {
        self.max = self.max.max(weight);
        self.sum += f64::from(weight);
        self.count += 1;
    }

    /// Fold another boundary into this one.
    pub fn combine(&mut self, other: &Self) {
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.count += other.count;
    }

    /// Mean crossing weight.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn mean(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        (self.sum / self.count as f64) as f32
    }

    /// The single affinity this boundary reduces to under `aggregation`.
    #[must_use]
    pub fn value(&self, aggregation: Aggregation) -> f32 {
        match aggregation {
            Aggregation::Max => self.max,
            Aggregation::Mean => self.mean(),
        }
    }
}

/// Undirected graph over region labels with aggregated boundary
/// affinities.
///
/// Never holds self-edges or duplicate edges. Label `0` is never a node.
#[derive(Debug, Clone)]
pub struct RegionGraph {
    graph: UnGraphMap<u32, BoundaryAffinity>,
    aggregation: Aggregation,
}

impl RegionGraph {
    /// A graph with isolated nodes `1..=num_regions` and no edges.
    #[must_use]
    pub fn with_regions(num_regions: u32, aggregation: Aggregation) -> Self {
        let mut graph = UnGraphMap::with_capacity(num_regions as usize, 0);
        for label in 1..=num_regions {
            graph.add_node(label);
        }
        Self { graph, aggregation }
    }

    /// Build the region graph of `segmentation` in one pass over the
    /// voxel-edges of `affinity`.
    ///
    /// # Errors
    ///
    /// - [`SegmentError::ShapeMismatch`] if the two volumes differ in
    ///   shape.
    /// - [`SegmentError::LabelConsistencyViolation`] if a voxel carries
    ///   label `0` or a label above `num_segments`.
    pub fn build(
        affinity: &AffinityGraph,
        segmentation: &Segmentation,
        num_segments: u32,
        aggregation: Aggregation,
    ) -> Result<Self, SegmentError> {
        if affinity.dimensions() != segmentation.dimensions() {
            return Err(SegmentError::ShapeMismatch(format!(
                "affinity graph is {} but segmentation is {}",
                affinity.dimensions(),
                segmentation.dimensions()
            )));
        }
        let labels = segmentation.labels();
        if let Some(voxel) = labels
            .par_iter()
            .position_first(|&label| label == UNASSIGNED || label > num_segments)
        {
            let (x, y, z) = segmentation.dimensions().coords(voxel);
            return Err(SegmentError::LabelConsistencyViolation(format!(
                "voxel ({x}, {y}, {z}) has label {} outside 1..={num_segments}",
                labels[voxel]
            )));
        }

        info!("building region graph ({aggregation} aggregation)");

        let mut region_graph = Self::with_regions(num_segments, aggregation);
        for edge in affinity.edges() {
            let a = labels[edge.voxel];
            let b = labels[edge.neighbor];
            if a != b {
                region_graph.record(a, b, edge.weight);
            }
        }

        debug!(
            "region graph: {} nodes, {} edges",
            region_graph.node_count(),
            region_graph.edge_count()
        );
        Ok(region_graph)
    }

    /// Record one voxel-edge of weight `weight` between regions `a` and
    /// `b`. Ignored when `a == b`.
    pub fn record(&mut self, a: u32, b: u32, weight: f32) {
        if a == b {
            return;
        }
        if let Some(boundary) = self.graph.edge_weight_mut(a, b) {
            boundary.add(weight);
        } else {
            self.graph.add_edge(a, b, BoundaryAffinity::new(weight));
        }
    }

    /// Aggregation rule used by [`affinity`](Self::affinity).
    #[must_use]
    pub const fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    /// Number of live regions.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of region boundaries.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns `true` if `label` is a live region.
    #[must_use]
    pub fn contains_region(&self, label: u32) -> bool {
        self.graph.contains_node(label)
    }

    /// Aggregated affinity between `a` and `b`, or `None` if they do not
    /// touch.
    #[must_use]
    pub fn affinity(&self, a: u32, b: u32) -> Option<f32> {
        self.boundary(a, b)
            .map(|boundary| boundary.value(self.aggregation))
    }

    /// Raw boundary accumulator between `a` and `b`.
    #[must_use]
    pub fn boundary(&self, a: u32, b: u32) -> Option<&BoundaryAffinity> {
        self.graph.edge_weight(a, b)
    }

    /// Live region labels in ascending order.
    #[must_use]
    pub fn regions(&self) -> Vec<u32> {
        let mut regions: Vec<u32> = self.graph.nodes().collect();
        regions.sort_unstable();
        regions
    }

    /// Neighbors of `label` with their aggregated affinities.
    pub fn neighbors(&self, label: u32) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.graph
            .edges(label)
            .map(move |(_, neighbor, boundary)| (neighbor, boundary.value(self.aggregation)))
    }

    /// Every boundary as `(low, high, affinity)` with `low < high`,
    /// sorted by label pair.
    #[must_use]
    pub fn edges(&self) -> Vec<(u32, u32, f32)> {
        let mut edges: Vec<_> = self
            .graph
            .all_edges()
            .map(|(a, b, boundary)| (a.min(b), a.max(b), boundary.value(self.aggregation)))
            .collect();
        edges.sort_unstable_by_key(|&(a, b, _)| (a, b));
        edges
    }

    /// Retire `retired` into `survivor`: every boundary of `retired` is
    /// redirected to `survivor` and folded into any boundary `survivor`
    /// already has with the same neighbor. The boundary between the two
    /// disappears.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::LabelConsistencyViolation`] if either
    /// label is not a live region, or if they are equal.
    pub(crate) fn absorb(&mut self, retired: u32, survivor: u32) -> Result<(), SegmentError> {
        if retired == survivor
            || !self.graph.contains_node(retired)
            || !self.graph.contains_node(survivor)
        {
            return Err(SegmentError::LabelConsistencyViolation(format!(
                "cannot merge region {retired} into region {survivor}"
            )));
        }
        let moved: Vec<(u32, BoundaryAffinity)> = self
            .graph
            .edges(retired)
            .map(|(_, neighbor, boundary)| (neighbor, *boundary))
            .collect();
        self.graph.remove_node(retired);
        for (neighbor, boundary) in moved {
            if neighbor == survivor {
                continue;
            }
            if let Some(existing) = self.graph.edge_weight_mut(survivor, neighbor) {
                existing.combine(&boundary);
            } else {
                self.graph.add_edge(survivor, neighbor, boundary);
            }
        }
        Ok(())
    }

    /// A copy with every label `l` renamed to `table[l]`.
    ///
    /// Nodes are inserted in ascending new-label order.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::LabelConsistencyViolation`] if a live
    /// label has no entry in `table` or maps to `0`.
    pub(crate) fn relabeled(&self, table: &[u32]) -> Result<Self, SegmentError> {
        let lookup = |label: u32| -> Result<u32, SegmentError> {
            match table.get(label as usize) {
                Some(&new) if new != UNASSIGNED => Ok(new),
                _ => Err(SegmentError::LabelConsistencyViolation(format!(
                    "region graph label {label} has no replacement"
                ))),
            }
        };
        let mut nodes = self
            .regions()
            .into_iter()
            .map(lookup)
            .collect::<Result<Vec<_>, _>>()?;
        nodes.sort_unstable();
        nodes.dedup();

        let mut graph = UnGraphMap::with_capacity(nodes.len(), self.graph.edge_count());
        for node in nodes {
            graph.add_node(node);
        }
        let mut relabeled = Self {
            graph,
            aggregation: self.aggregation,
        };
        for (a, b, boundary) in self.graph.all_edges() {
            let (a, b) = (lookup(a)?, lookup(b)?);
            if a == b {
                continue;
            }
            if let Some(existing) = relabeled.graph.edge_weight_mut(a, b) {
                existing.combine(boundary);
            } else {
                relabeled.graph.add_edge(a, b, *boundary);
            }
        }
        Ok(relabeled)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::types::{Axis, Dimensions};
    use crate::watershed::watershed;

    /// 3x1x1 line with three singleton segments; edges 0.2 then 0.6.
    fn three_singletons() -> (AffinityGraph, Segmentation) {
        let dims = Dimensions::new(3, 1, 1);
        let aff = AffinityGraph::from_fn(dims, |x, _, _, axis| match (x, axis) {
            (0, Axis::X) => 0.2,
            (1, Axis::X) => 0.6,
            _ => 0.0,
        })
        .unwrap();
        let seg = Segmentation::new(dims, vec![1, 2, 3]).unwrap();
        (aff, seg)
    }

    #[test]
    fn boundary_affinity_accumulates() {
        let mut b = BoundaryAffinity::new(0.2);
        b.add(0.6);
        b.add(0.1);
        assert!((b.max - 0.6).abs() < f32::EPSILON);
        assert_eq!(b.count, 3);
        assert!((b.mean() - 0.3).abs() < 1e-6);
        assert!((b.value(Aggregation::Max) - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn boundary_affinity_combine() {
        let mut a = BoundaryAffinity::new(0.4);
        let mut b = BoundaryAffinity::new(0.8);
        b.add(0.0);
        a.combine(&b);
        assert!((a.max - 0.8).abs() < f32::EPSILON);
        assert_eq!(a.count, 3);
        assert!((a.mean() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn build_creates_one_node_per_label() {
        let (aff, seg) = three_singletons();
        let graph = RegionGraph::build(&aff, &seg, 3, Aggregation::Max).unwrap();
        assert_eq!(graph.regions(), vec![1, 2, 3]);
        assert_eq!(graph.edges(), vec![(1, 2, 0.2), (2, 3, 0.6)]);
        assert_eq!(graph.affinity(1, 3), None);
    }

    #[test]
    fn build_keeps_isolated_regions() {
        let dims = Dimensions::new(2, 1, 1);
        let aff = AffinityGraph::from_fn(dims, |_, _, _, _| 0.5).unwrap();
        let seg = Segmentation::new(dims, vec![1, 1]).unwrap();
        let graph = RegionGraph::build(&aff, &seg, 1, Aggregation::Max).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn build_aggregates_every_crossing_edge() {
        // 2x2x1 with the left column labeled 1 and the right column 2:
        // two x-edges cross, weights 0.2 and 0.6.
        let dims = Dimensions::new(2, 2, 1);
        let aff = AffinityGraph::from_fn(dims, |x, y, _, axis| match (x, y, axis) {
            (0, 0, Axis::X) => 0.2,
            (0, 1, Axis::X) => 0.6,
            _ => 0.9,
        })
        .unwrap();
        let seg = Segmentation::new(dims, vec![1, 2, 1, 2]).unwrap();

        let max = RegionGraph::build(&aff, &seg, 2, Aggregation::Max).unwrap();
        assert!((max.affinity(1, 2).unwrap() - 0.6).abs() < f32::EPSILON);
        let mean = RegionGraph::build(&aff, &seg, 2, Aggregation::Mean).unwrap();
        assert!((mean.affinity(2, 1).unwrap() - 0.4).abs() < 1e-6);
        assert_eq!(mean.boundary(1, 2).unwrap().count, 2);
    }

    #[test]
    fn build_from_watershed_output() {
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
        assert_eq!(graph.edges(), vec![(1, 2, 0.2)]);
    }

    #[test]
    fn build_rejects_shape_mismatch() {
        let (aff, _) = three_singletons();
        let seg = Segmentation::new(Dimensions::new(1, 3, 1), vec![1, 2, 3]).unwrap();
        assert!(matches!(
            RegionGraph::build(&aff, &seg, 3, Aggregation::Max),
            Err(SegmentError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn build_rejects_out_of_range_label() {
        let (aff, seg) = three_singletons();
        assert!(matches!(
            RegionGraph::build(&aff, &seg, 2, Aggregation::Max),
            Err(SegmentError::LabelConsistencyViolation(_))
        ));
        let zero = Segmentation::new(seg.dimensions(), vec![1, 0, 2]).unwrap();
        assert!(matches!(
            RegionGraph::build(&aff, &zero, 3, Aggregation::Max),
            Err(SegmentError::LabelConsistencyViolation(_))
        ));
    }

    #[test]
    fn record_ignores_self_edges() {
        let mut graph = RegionGraph::with_regions(2, Aggregation::Max);
        graph.record(1, 1, 0.9);
        assert_eq!(graph.edge_count(), 0);
        graph.record(2, 1, 0.3);
        graph.record(1, 2, 0.5);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.boundary(1, 2).unwrap().count, 2);
    }

    #[test]
    fn absorb_redirects_and_folds_edges() {
        // Triangle 1-2 (0.5), 1-3 (0.2), 2-3 (0.7), plus 2-4 (0.4).
        let mut graph = RegionGraph::with_regions(4, Aggregation::Max);
        graph.record(1, 2, 0.5);
        graph.record(1, 3, 0.2);
        graph.record(2, 3, 0.7);
        graph.record(2, 4, 0.4);

        graph.absorb(2, 1).unwrap();
        assert!(!graph.contains_region(2));
        assert_eq!(graph.regions(), vec![1, 3, 4]);
        assert_eq!(graph.edges(), vec![(1, 3, 0.7), (1, 4, 0.4)]);
        assert_eq!(graph.boundary(1, 3).unwrap().count, 2);
        assert_eq!(graph.affinity(1, 1), None);
    }

    #[test]
    fn absorb_rejects_dead_labels() {
        let mut graph = RegionGraph::with_regions(2, Aggregation::Max);
        assert!(graph.absorb(3, 1).is_err());
        assert!(graph.absorb(1, 1).is_err());
        graph.absorb(2, 1).unwrap();
        assert!(graph.absorb(2, 1).is_err());
    }

    #[test]
    fn relabeled_compacts_labels() {
        let mut graph = RegionGraph::with_regions(5, Aggregation::Mean);
        graph.record(2, 5, 0.4);
        graph.record(3, 5, 0.6);
        graph.absorb(1, 2).unwrap();
        graph.absorb(4, 3).unwrap();
        let table = [0, 0, 1, 2, 0, 3];
        let compact = graph.relabeled(&table).unwrap();
        assert_eq!(compact.regions(), vec![1, 2, 3]);
        assert_eq!(compact.aggregation(), Aggregation::Mean);
        assert_eq!(compact.edges(), vec![(1, 3, 0.4), (2, 3, 0.6)]);
    }

    #[test]
    fn relabeled_rejects_missing_entries() {
        let graph = RegionGraph::with_regions(3, Aggregation::Max);
        assert!(matches!(
            graph.relabeled(&[0, 1, 2]),
            Err(SegmentError::LabelConsistencyViolation(_))
        ));
        assert!(matches!(
            graph.relabeled(&[0, 1, 0, 2]),
            Err(SegmentError::LabelConsistencyViolation(_))
        ));
    }

    #[test]
    fn neighbors_report_aggregated_affinity() {
        let mut graph = RegionGraph::with_regions(3, Aggregation::Max);
        graph.record(1, 2, 0.3);
        graph.record(1, 3, 0.8);
        let mut neighbors: Vec<_> = graph.neighbors(1).collect();
        neighbors.sort_unstable_by_key(|&(label, _)| label);
        assert_eq!(neighbors, vec![(2, 0.3), (3, 0.8)]);
    }
}
