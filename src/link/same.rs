//! "Same" link: connects index `i` on one end with index `i` on the other.

use super::{flat_size, Edge, LinkEnd, LinkShape};

/// One edge per node pair at equal flat indices. Both components must have
/// identical shapes; the near shape deduces trivially from the far shape.
#[derive(Default)]
pub struct SameLink {
    dim0: Vec<usize>,
    dim1: Vec<usize>,
}

impl SameLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visit edges `i -> i` for `i` in `[start, stop)`.
    ///
    /// Progress equals the near node index, so any split point is a
    /// near-node boundary.
    #[inline]
    pub fn for_each_edge<F: FnMut(Edge)>(
        &self,
        _which_end: LinkEnd,
        mut f: F,
        start: u64,
        stop: u64,
    ) {
        for i in start..stop {
            let i = i as usize;
            f(Edge {
                near_node: i,
                near_edge: i,
                far_node: i,
                far_edge: i,
                info: 0,
            });
        }
    }
}

impl LinkShape for SameLink {
    fn identifier(&self) -> &'static str {
        "Same"
    }

    fn can_connect_dimensions(&self, dim0: &[usize], dim1: &[usize]) -> bool {
        dim0 == dim1
    }

    fn deduce_component_dimensions(&self, far: &[usize], _which_end: LinkEnd) -> Option<Vec<usize>> {
        Some(far.to_vec())
    }

    fn set_dimensions(&mut self, dim0: &[usize], dim1: &[usize]) {
        self.dim0 = dim0.to_vec();
        self.dim1 = dim1.to_vec();
    }

    fn link_end_size(&self, near: &[usize], _far: &[usize], _which_end: LinkEnd) -> Vec<usize> {
        let mut v = near.to_vec();
        v.push(1);
        v
    }

    fn max_progress(&self, _which_end: LinkEnd) -> u64 {
        flat_size(&self.dim0) as u64
    }

    fn next_progress_point(&self, _which_end: LinkEnd, requested: u64) -> u64 {
        requested
    }
}
