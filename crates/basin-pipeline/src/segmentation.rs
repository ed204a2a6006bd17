//! Per-voxel label volume.

use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, SegmentError};

/// Label reserved for "unassigned". Never present after the watershed.
pub const UNASSIGNED: u32 = 0;

/// A 3D array of region labels, one per voxel, in the column-major voxel
/// order described on [`Dimensions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segmentation {
    dimensions: Dimensions,
    labels: Vec<u32>,
}

impl Segmentation {
    /// Wrap an existing label buffer.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::ShapeMismatch`] if `labels.len()` differs
    /// from the voxel count of `dimensions`.
    pub fn new(dimensions: Dimensions, labels: Vec<u32>) -> Result<Self, SegmentError> {
        if u64::try_from(labels.len()).ok() != Some(dimensions.voxel_count()) {
            return Err(SegmentError::ShapeMismatch(format!(
                "expected {} labels for a {dimensions} volume, got {}",
                dimensions.voxel_count(),
                labels.len()
            )));
        }
        Ok(Self { dimensions, labels })
    }

    /// Volume dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// All labels in voxel order.
    #[must_use]
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Consumes the segmentation and returns the label buffer.
    #[must_use]
    pub fn into_labels(self) -> Vec<u32> {
        self.labels
    }

    /// Label at `(x, y, z)`, or `None` when out of bounds.
    #[must_use]
    pub fn label(&self, x: u32, y: u32, z: u32) -> Option<u32> {
        self.dimensions.index(x, y, z).map(|voxel| self.labels[voxel])
    }

    /// The labels of z slice `z`, row by row (`x` fastest).
    #[must_use]
    pub fn slice(&self, z: u32) -> Option<&[u32]> {
        if z >= self.dimensions.size_z {
            return None;
        }
        let len = self.dimensions.slice_len();
        let start = z as usize * len;
        Some(&self.labels[start..start + len])
    }

    /// Largest label present, or `0` for an all-unassigned volume.
    #[must_use]
    pub fn max_label(&self) -> u32 {
        self.labels.iter().copied().max().unwrap_or(UNASSIGNED)
    }

    /// Voxel count per label, indexed by label (index `0` counts
    /// unassigned voxels).
    #[must_use]
    pub fn region_sizes(&self) -> Vec<u64> {
        let mut sizes = vec![0u64; self.max_label() as usize + 1];
        for &label in &self.labels {
            sizes[label as usize] += 1;
        }
        sizes
    }

    /// Replace every label `l` with `table[l]`.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::LabelConsistencyViolation`] if a label has
    /// no entry in `table`.
    pub(crate) fn relabel(&mut self, table: &[u32]) -> Result<(), SegmentError> {
        for label in &mut self.labels {
            let current = *label;
            *label = *table.get(current as usize).ok_or_else(|| {
                SegmentError::LabelConsistencyViolation(format!(
                    "label {current} missing from a relabel table of {} entries",
                    table.len()
                ))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> Segmentation {
        // 2x2x2: bottom slice labels 1,1,2,2; top slice 3,3,3,3.
        Segmentation::new(Dimensions::new(2, 2, 2), vec![1, 1, 2, 2, 3, 3, 3, 3]).unwrap()
    }

    #[test]
    fn new_rejects_wrong_length() {
        let result = Segmentation::new(Dimensions::new(2, 2, 1), vec![1, 2, 3]);
        assert!(matches!(result, Err(SegmentError::ShapeMismatch(_))));
    }

    #[test]
    fn label_lookup() {
        let seg = sample();
        assert_eq!(seg.label(0, 1, 0), Some(2));
        assert_eq!(seg.label(1, 1, 1), Some(3));
        assert_eq!(seg.label(2, 0, 0), None);
    }

    #[test]
    fn slice_returns_contiguous_plane() {
        let seg = sample();
        assert_eq!(seg.slice(0), Some(&[1, 1, 2, 2][..]));
        assert_eq!(seg.slice(1), Some(&[3, 3, 3, 3][..]));
        assert_eq!(seg.slice(2), None);
    }

    #[test]
    fn region_sizes_counts_per_label() {
        assert_eq!(sample().region_sizes(), vec![0, 2, 2, 4]);
    }

    #[test]
    fn relabel_applies_table() {
        let mut seg = sample();
        seg.relabel(&[0, 1, 1, 2]).unwrap();
        assert_eq!(seg.labels(), &[1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn relabel_rejects_short_table() {
        let mut seg = sample();
        let result = seg.relabel(&[0, 1]);
        assert!(matches!(
            result,
            Err(SegmentError::LabelConsistencyViolation(_))
        ));
    }
}
