//! Shared types for the basin segmentation pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::merge::DynamicSizeThreshold;
use crate::segmentation::Segmentation;

/// Volume dimensions in voxels.
///
/// Voxels are stored column-major: `x` varies fastest, then `y`, then
/// `z`. The linear index of `(x, y, z)` is `x + size_x * (y + size_y * z)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Extent along the x axis.
    pub size_x: u32,
    /// Extent along the y axis.
    pub size_y: u32,
    /// Extent along the z axis (number of slices).
    pub size_z: u32,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(size_x: u32, size_y: u32, size_z: u32) -> Self {
        Self {
            size_x,
            size_y,
            size_z,
        }
    }

    /// Total number of voxels.
    #[must_use]
    pub const fn voxel_count(self) -> u64 {
        self.size_x as u64 * self.size_y as u64 * self.size_z as u64
    }

    /// Number of voxels in one z slice.
    #[must_use]
    pub const fn slice_len(self) -> usize {
        self.size_x as usize * self.size_y as usize
    }

    /// Returns `true` if any extent is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.size_x == 0 || self.size_y == 0 || self.size_z == 0
    }

    /// Extent along `axis`.
    #[must_use]
    pub const fn extent(self, axis: Axis) -> u32 {
        match axis {
            Axis::X => self.size_x,
            Axis::Y => self.size_y,
            Axis::Z => self.size_z,
        }
    }

    /// Linear index of `(x, y, z)`, or `None` when out of bounds.
    #[must_use]
    pub const fn index(self, x: u32, y: u32, z: u32) -> Option<usize> {
        if x >= self.size_x || y >= self.size_y || z >= self.size_z {
            return None;
        }
        Some(x as usize + self.size_x as usize * (y as usize + self.size_y as usize * z as usize))
    }

    /// Coordinates `(x, y, z)` of a linear voxel index.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn coords(self, voxel: usize) -> (u32, u32, u32) {
        let sx = self.size_x as usize;
        let sy = self.size_y as usize;
        let x = voxel % sx;
        let y = (voxel / sx) % sy;
        let z = voxel / (sx * sy);
        (x as u32, y as u32, z as u32)
    }

    /// Linear index of the neighbor one step along `axis`, or `None`
    /// when `voxel` sits on the far boundary of that axis.
    ///
    /// Boundary affinity slots exist in storage but have no neighbor, so
    /// every traversal goes through this check.
    #[must_use]
    pub const fn neighbor(self, voxel: usize, axis: Axis) -> Option<usize> {
        let (x, y, z) = self.coords(voxel);
        match axis {
            Axis::X if x + 1 < self.size_x => Some(voxel + 1),
            Axis::Y if y + 1 < self.size_y => Some(voxel + self.size_x as usize),
            Axis::Z if z + 1 < self.size_z => Some(voxel + self.slice_len()),
            _ => None,
        }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.size_x, self.size_y, self.size_z)
    }
}

/// One of the three volume axes.
///
/// Each voxel carries one affinity per axis, toward its neighbor one step
/// in the positive direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Affinity toward `(x + 1, y, z)`.
    X,
    /// Affinity toward `(x, y + 1, z)`.
    Y,
    /// Affinity toward `(x, y, z + 1)`.
    Z,
}

impl Axis {
    /// All axes in channel order.
    pub const ALL: [Self; 3] = [Self::X, Self::Y, Self::Z];

    /// Channel index of this axis (`0`, `1`, or `2`).
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X => f.write_str("x"),
            Self::Y => f.write_str("y"),
            Self::Z => f.write_str("z"),
        }
    }
}

/// How the weights of all voxel-edges crossing between two regions are
/// reduced to the single affinity stored on their region-graph edge.
///
/// The same rule is used when the merger folds two edges into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Aggregation {
    /// Strongest crossing voxel-edge. Matches the watershed's notion of
    /// the easiest merge path between two regions.
    #[default]
    Max,
    /// Arithmetic mean over every crossing voxel-edge.
    Mean,
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Max => f.write_str("max"),
            Self::Mean => f.write_str("mean"),
        }
    }
}

/// Configuration for the region merging stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Whether [`process`](crate::process) runs the merger at all.
    ///
    /// Off by default: the stage is wired into the pipeline but only
    /// invoked on request. It stays callable directly via
    /// [`merge`](crate::merge::merge) regardless of this flag.
    pub enabled: bool,

    /// Regions with fewer voxels than this are candidates for elimination.
    pub min_size: u64,

    /// Minimum aggregated affinity an edge needs for a small region to
    /// merge across it.
    pub affinity_threshold: f32,
}

impl MergeConfig {
    /// Default minimum region size.
    pub const DEFAULT_MIN_SIZE: u64 = 25;
    /// Default merge affinity threshold.
    pub const DEFAULT_AFFINITY_THRESHOLD: f32 = 0.1;

    /// The size/affinity policy described by this configuration.
    #[must_use]
    pub const fn policy(&self) -> DynamicSizeThreshold {
        DynamicSizeThreshold::new(self.min_size, self.affinity_threshold)
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_size: Self::DEFAULT_MIN_SIZE,
            affinity_threshold: Self::DEFAULT_AFFINITY_THRESHOLD,
        }
    }
}

/// Configuration for the full segmentation pipeline.
///
/// Fields are public; call [`validate`](Self::validate) (the pipeline
/// does so before the first stage) to check the threshold invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationConfig {
    /// Voxel-edges weaker than this are never merged.
    pub t_low: f32,

    /// Voxel-edges at least this strong are merged unconditionally.
    pub t_high: f32,

    /// Optional plateau rule for the ordered watershed pass.
    ///
    /// When `Some(limit)`, an edge in `[t_low, t_high)` is not allowed to
    /// join two components that both already hold at least `limit`
    /// voxels. `None` merges every such edge.
    pub plateau_size_limit: Option<u64>,

    /// Region-graph edge aggregation rule.
    pub aggregation: Aggregation,

    /// Region merging stage settings.
    pub merge: MergeConfig,
}

impl SegmentationConfig {
    /// Default low threshold.
    pub const DEFAULT_T_LOW: f32 = 0.3;
    /// Default high threshold.
    pub const DEFAULT_T_HIGH: f32 = 0.8;

    /// Check threshold invariants.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidThreshold`] when either hysteresis
    /// threshold or the merge affinity threshold is not finite, or when
    /// `t_low > t_high`.
    pub fn validate(&self) -> Result<(), SegmentError> {
        validate_thresholds(self.t_low, self.t_high)?;
        if !self.merge.affinity_threshold.is_finite() {
            return Err(SegmentError::InvalidThreshold(format!(
                "merge affinity threshold must be finite, got {}",
                self.merge.affinity_threshold
            )));
        }
        Ok(())
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            t_low: Self::DEFAULT_T_LOW,
            t_high: Self::DEFAULT_T_HIGH,
            plateau_size_limit: None,
            aggregation: Aggregation::default(),
            merge: MergeConfig::default(),
        }
    }
}

/// Check the hysteresis threshold pair.
pub(crate) fn validate_thresholds(t_low: f32, t_high: f32) -> Result<(), SegmentError> {
    if !t_low.is_finite() || !t_high.is_finite() {
        return Err(SegmentError::InvalidThreshold(format!(
            "thresholds must be finite, got t_low={t_low} t_high={t_high}"
        )));
    }
    if t_low > t_high {
        return Err(SegmentError::InvalidThreshold(format!(
            "t_low ({t_low}) must not exceed t_high ({t_high})"
        )));
    }
    Ok(())
}

/// Result of running the full segmentation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentationResult {
    /// Final label per voxel, dense in `1..=num_regions`.
    pub segmentation: Segmentation,

    /// Voxel count per label; index `0` is always `0`.
    pub region_sizes: Vec<u64>,

    /// Number of segments the watershed produced.
    pub num_segments: u32,

    /// Number of regions in the final labeling.
    pub num_regions: u32,

    /// Number of merges performed, or `None` when the merge stage was
    /// disabled.
    pub merges: Option<usize>,
}

/// Errors that can occur during segmentation.
///
/// Every variant aborts the run; there is no partial-result mode.
///
/// Uses custom `Serialize`/`Deserialize` because the weight carried by
/// `MalformedAffinity` is non-finite, which JSON numbers cannot hold. The
/// weight is serialized as its `Display` string (`NaN`, `inf`, `-inf`).
#[derive(Debug, Clone, thiserror::Error)]
pub enum SegmentError {
    /// Affinity data does not have three channels, or buffer lengths
    /// disagree with the declared volume shape.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The volume has no voxels.
    #[error("volume contains no voxels")]
    EmptyVolume,

    /// The volume has more voxels than 32-bit labels can address.
    #[error("volume has {voxels} voxels, more than the supported {max}")]
    VolumeTooLarge {
        /// Voxel count of the rejected volume.
        voxels: u64,
        /// Largest supported voxel count.
        max: u64,
    },

    /// A threshold is non-finite or `t_low > t_high`.
    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),

    /// A traversable voxel-edge carries a non-finite weight.
    #[error("malformed affinity {value} at voxel ({x}, {y}, {z}) along {axis}")]
    MalformedAffinity {
        /// Voxel x coordinate.
        x: u32,
        /// Voxel y coordinate.
        y: u32,
        /// Voxel z coordinate.
        z: u32,
        /// Edge axis.
        axis: Axis,
        /// The offending weight.
        value: f32,
    },

    /// Internal invariant failure between labeling, sizes and region
    /// graph. Indicates a defect, not a user error.
    #[error("label consistency violation: {0}")]
    LabelConsistencyViolation(String),
}

/// Serde-compatible proxy for `SegmentError`.
#[derive(Serialize, Deserialize)]
enum SegmentErrorProxy {
    ShapeMismatch(String),
    EmptyVolume,
    VolumeTooLarge {
        voxels: u64,
        max: u64,
    },
    InvalidThreshold(String),
    MalformedAffinity {
        x: u32,
        y: u32,
        z: u32,
        axis: Axis,
        value: String,
    },
    LabelConsistencyViolation(String),
}

impl Serialize for SegmentError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = match self {
            Self::ShapeMismatch(s) => SegmentErrorProxy::ShapeMismatch(s.clone()),
            Self::EmptyVolume => SegmentErrorProxy::EmptyVolume,
            Self::VolumeTooLarge { voxels, max } => SegmentErrorProxy::VolumeTooLarge {
                voxels: *voxels,
                max: *max,
            },
            Self::InvalidThreshold(s) => SegmentErrorProxy::InvalidThreshold(s.clone()),
            Self::MalformedAffinity {
                x,
                y,
                z,
                axis,
                value,
            } => SegmentErrorProxy::MalformedAffinity {
                x: *x,
                y: *y,
                z: *z,
                axis: *axis,
                value: value.to_string(),
            },
            Self::LabelConsistencyViolation(s) => {
                SegmentErrorProxy::LabelConsistencyViolation(s.clone())
            }
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SegmentError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = SegmentErrorProxy::deserialize(deserializer)?;
        Ok(match proxy {
            SegmentErrorProxy::ShapeMismatch(s) => Self::ShapeMismatch(s),
            SegmentErrorProxy::EmptyVolume => Self::EmptyVolume,
            SegmentErrorProxy::VolumeTooLarge { voxels, max } => {
                Self::VolumeTooLarge { voxels, max }
            }
            SegmentErrorProxy::InvalidThreshold(s) => Self::InvalidThreshold(s),
            SegmentErrorProxy::MalformedAffinity {
                x,
                y,
                z,
                axis,
                value,
            } => Self::MalformedAffinity {
                x,
                y,
                z,
                axis,
                value: value.parse().map_err(|_| {
                    serde::de::Error::custom(format!("invalid affinity weight {value:?}"))
                })?,
            },
            SegmentErrorProxy::LabelConsistencyViolation(s) => Self::LabelConsistencyViolation(s),
        })
    }
}
