//! Voxel affinity graph: one weight per voxel per axis.
//!
//! Storage is a single `f32` buffer holding three contiguous channels
//! (x, y, z), each laid out in the column-major voxel order described on
//! [`Dimensions`]. The weight at `(x, y, z, axis)` is the affinity
//! between voxel `(x, y, z)` and its neighbor one step along `axis`.
//!
//! The last voxel along each axis has a weight slot but no neighbor.
//! Those slots are never read by [`AffinityGraph::edges`] or
//! [`AffinityGraph::validate`].

use rayon::prelude::*;

use crate::types::{Axis, Dimensions, SegmentError};

/// Number of affinity channels (one per axis).
pub const AXIS_COUNT: usize = 3;

/// A single traversable voxel-edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelEdge {
    /// Linear index of the source voxel.
    pub voxel: usize,
    /// Linear index of the neighbor one step along `axis`.
    pub neighbor: usize,
    /// Direction of the edge.
    pub axis: Axis,
    /// Affinity weight.
    pub weight: f32,
}

/// Immutable volumetric affinity graph.
#[derive(Debug, Clone, PartialEq)]
pub struct AffinityGraph {
    dimensions: Dimensions,
    weights: Vec<f32>,
}

impl AffinityGraph {
    /// Build an affinity graph from a flat buffer of `channels` channels.
    ///
    /// `weights` holds `channels` contiguous volumes in axis order. A
    /// zero-voxel shape is accepted here; the watershed rejects it.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::ShapeMismatch`] if `channels` is not 3 or
    /// the buffer length is not `3 * voxel_count`.
    pub fn from_raw(
        dimensions: Dimensions,
        channels: usize,
        weights: Vec<f32>,
    ) -> Result<Self, SegmentError> {
        if channels != AXIS_COUNT {
            return Err(SegmentError::ShapeMismatch(format!(
                "affinity graph needs {AXIS_COUNT} axis channels, got {channels}"
            )));
        }
        let expected = channel_len(dimensions)?
            .checked_mul(AXIS_COUNT)
            .ok_or_else(|| SegmentError::ShapeMismatch(format!("{dimensions} is too large")))?;
        if weights.len() != expected {
            return Err(SegmentError::ShapeMismatch(format!(
                "expected {expected} weights for a {dimensions} volume, got {}",
                weights.len()
            )));
        }
        Ok(Self {
            dimensions,
            weights,
        })
    }

    /// Build an affinity graph from one buffer per axis channel.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::ShapeMismatch`] if there are not exactly
    /// three channels or any channel length differs from the voxel count.
    pub fn from_channels(
        dimensions: Dimensions,
        channels: Vec<Vec<f32>>,
    ) -> Result<Self, SegmentError> {
        if channels.len() != AXIS_COUNT {
            return Err(SegmentError::ShapeMismatch(format!(
                "affinity graph needs {AXIS_COUNT} axis channels, got {}",
                channels.len()
            )));
        }
        let len = channel_len(dimensions)?;
        if let Some((axis, channel)) = channels.iter().enumerate().find(|(_, c)| c.len() != len) {
            return Err(SegmentError::ShapeMismatch(format!(
                "channel {axis} holds {} weights, expected {len} for a {dimensions} volume",
                channel.len()
            )));
        }
        let weights = channels.concat();
        Self::from_raw(dimensions, AXIS_COUNT, weights)
    }

    /// Build an affinity graph by evaluating `f(x, y, z, axis)` for every
    /// weight slot, boundary slots included.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::ShapeMismatch`] if the volume does not fit
    /// in memory addressing.
    pub fn from_fn(
        dimensions: Dimensions,
        mut f: impl FnMut(u32, u32, u32, Axis) -> f32,
    ) -> Result<Self, SegmentError> {
        let len = channel_len(dimensions)?;
        let mut weights = Vec::with_capacity(len * AXIS_COUNT);
        for axis in Axis::ALL {
            weights.extend((0..len).map(|voxel| {
                let (x, y, z) = dimensions.coords(voxel);
                f(x, y, z, axis)
            }));
        }
        Self::from_raw(dimensions, AXIS_COUNT, weights)
    }

    /// Volume dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Number of voxels.
    #[must_use]
    pub const fn voxel_count(&self) -> usize {
        self.weights.len() / AXIS_COUNT
    }

    /// The contiguous weights of one axis channel.
    #[must_use]
    pub fn channel(&self, axis: Axis) -> &[f32] {
        let len = self.voxel_count();
        let start = axis.index() * len;
        &self.weights[start..start + len]
    }

    /// Weight slot at `(x, y, z, axis)`, boundary slots included.
    #[must_use]
    pub fn weight(&self, x: u32, y: u32, z: u32, axis: Axis) -> Option<f32> {
        let voxel = self.dimensions.index(x, y, z)?;
        Some(self.channel(axis)[voxel])
    }

    /// The voxel-edge leaving `voxel` along `axis`, or `None` at the
    /// volume boundary.
    #[must_use]
    pub fn edge(&self, voxel: usize, axis: Axis) -> Option<VoxelEdge> {
        let neighbor = self.dimensions.neighbor(voxel, axis)?;
        Some(VoxelEdge {
            voxel,
            neighbor,
            axis,
            weight: self.weights[axis.index() * self.voxel_count() + voxel],
        })
    }

    /// Every traversable voxel-edge, ordered by voxel then axis.
    pub fn edges(&self) -> impl Iterator<Item = VoxelEdge> + '_ {
        (0..self.voxel_count())
            .flat_map(move |voxel| Axis::ALL.into_iter().filter_map(move |axis| self.edge(voxel, axis)))
    }

    /// Reject non-finite weights on traversable edges.
    ///
    /// Scans in parallel; the reported edge is the first offending one
    /// in voxel-then-axis order.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::MalformedAffinity`] naming the voxel, axis
    /// and value of the first non-finite weight.
    pub fn validate(&self) -> Result<(), SegmentError> {
        let bad = (0..self.voxel_count()).into_par_iter().find_map_first(|voxel| {
            Axis::ALL
                .into_iter()
                .filter_map(|axis| self.edge(voxel, axis))
                .find(|edge| !edge.weight.is_finite())
        });
        match bad {
            None => Ok(()),
            Some(edge) => {
                let (x, y, z) = self.dimensions.coords(edge.voxel);
                Err(SegmentError::MalformedAffinity {
                    x,
                    y,
                    z,
                    axis: edge.axis,
                    value: edge.weight,
                })
            }
        }
    }
}

/// Voxel count of `dimensions` as a buffer length.
fn channel_len(dimensions: Dimensions) -> Result<usize, SegmentError> {
    usize::try_from(dimensions.voxel_count())
        .map_err(|_| SegmentError::ShapeMismatch(format!("{dimensions} is too large")))
}
