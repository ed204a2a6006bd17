//! Disjoint-set forest over voxel ids.
//!
//! An index arena: `parent[i]` is the parent id of element `i` and
//! `size[r]` is the element count of the component rooted at `r` (only
//! meaningful for roots). Finds use path halving; unions attach the
//! smaller component under the larger one.

/// Union-find over `u32` element ids with per-component sizes.
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<u32>,
    size: Vec<u64>,
}

impl DisjointSet {
    /// Create `n` singleton components with ids `0..n`.
    ///
    /// The caller guarantees `n <= u32::MAX as usize + 1`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).map(|i| i as u32).collect(),
            size: vec![1; n],
        }
    }

    /// Representative of the component containing `x`.
    pub fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    /// Element count of the component containing `x`.
    pub fn component_size(&mut self, x: u32) -> u64 {
        let root = self.find(x);
        self.size[root as usize]
    }

    /// Merge the components with roots `a` and `b` (both must already be
    /// roots) and return the surviving root.
    pub fn link_roots(&mut self, a: u32, b: u32) -> u32 {
        if a == b {
            return a;
        }
        let (big, small) = if self.size[a as usize] >= self.size[b as usize] {
            (a, b)
        } else {
            (b, a)
        };
        self.parent[small as usize] = big;
        self.size[big as usize] += self.size[small as usize];
        big
    }

    /// Merge the components containing `a` and `b`.
    ///
    /// Returns `true` if they were distinct.
    pub fn union(&mut self, a: u32, b: u32) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        self.link_roots(ra, rb);
        true
    }
}
