//! Dense link: every node on one end connects to every node on the other.

use super::{flat_size, Edge, LinkEnd, LinkShape};

/// Fully connected link.
///
/// For each near node, iteration runs over all far nodes in flat order.
/// One near node accounts for `F` progress units, `F` being the flat far
/// size, so progress splits snap up to whole multiples of `F`.
///
/// `info` is the far node's flat index, which makes it usable as a column
/// index into a weight matrix stored row-major on the near end.
#[derive(Default)]
pub struct DenseLink {
    dim0: Vec<usize>,
    dim1: Vec<usize>,
}

impl DenseLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn far_dims(&self, which_end: LinkEnd) -> &[usize] {
        match which_end {
            LinkEnd::Zero => &self.dim1,
            LinkEnd::One => &self.dim0,
        }
    }

    /// Visit every edge with progress in `[start, stop)`.
    ///
    /// The near edge index runs globally (`start`, `start+1`, ...) while
    /// the far edge index for near node `i`, far node `j` is `i + j*N`:
    /// the far end's slot layout is far-major.
    #[inline]
    pub fn for_each_edge<F: FnMut(Edge)>(&self, which_end: LinkEnd, mut f: F, start: u64, stop: u64) {
        let near_size = flat_size(match which_end {
            LinkEnd::Zero => &self.dim0,
            LinkEnd::One => &self.dim1,
        });
        let far_size = flat_size(self.far_dims(which_end));
        assert!(far_size > 0, "dense link iterated before dimensions were set");

        let mut near_edge = start as usize;
        for near in (start / far_size as u64)..(stop / far_size as u64) {
            let near = near as usize;
            let mut far_edge = near;
            for far in 0..far_size {
                f(Edge {
                    near_node: near,
                    near_edge,
                    far_node: far,
                    far_edge,
                    info: far,
                });
                near_edge += 1;
                far_edge += near_size;
            }
        }
    }
}

impl LinkShape for DenseLink {
    fn identifier(&self) -> &'static str {
        "Dense"
    }

    fn can_connect_dimensions(&self, _dim0: &[usize], _dim1: &[usize]) -> bool {
        true
    }

    fn deduce_component_dimensions(&self, _far: &[usize], _which_end: LinkEnd) -> Option<Vec<usize>> {
        None
    }

    fn set_dimensions(&mut self, dim0: &[usize], dim1: &[usize]) {
        self.dim0 = dim0.to_vec();
        self.dim1 = dim1.to_vec();
    }

    fn link_end_size(&self, near: &[usize], far: &[usize], _which_end: LinkEnd) -> Vec<usize> {
        let mut v = near.to_vec();
        v.push(flat_size(far));
        v
    }

    fn max_progress(&self, _which_end: LinkEnd) -> u64 {
        (flat_size(&self.dim0) * flat_size(&self.dim1)) as u64
    }

    fn next_progress_point(&self, which_end: LinkEnd, requested: u64) -> u64 {
        let far = flat_size(self.far_dims(which_end)) as u64;
        if requested == 0 {
            return far;
        }
        // Next whole near node at or past the request.
        ((requested - 1) / far) * far + far
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(d0: &[usize], d1: &[usize]) -> DenseLink {
        let mut l = DenseLink::new();
        l.set_dimensions(d0, d1);
        l
    }

    #[test]
    fn progress_snaps_to_whole_near_nodes() {
        let l = link(&[3], &[4]);
        // Iterating end 1: far size is 3.
        assert_eq!(l.next_progress_point(LinkEnd::One, 0), 3);
        assert_eq!(l.next_progress_point(LinkEnd::One, 1), 3);
        assert_eq!(l.next_progress_point(LinkEnd::One, 3), 3);
        assert_eq!(l.next_progress_point(LinkEnd::One, 4), 6);
        assert_eq!(l.max_progress(LinkEnd::One), 12);
    }

    #[test]
    fn edge_numbering_matches_layout() {
        let l = link(&[3], &[2]);
        let mut seen = Vec::new();
        l.for_each_edge(LinkEnd::Zero, |e| seen.push(e), 0, 6);
        // Near end 0 has 3 nodes, far end 1 has 2 nodes.
        assert_eq!(seen.len(), 6);
        assert_eq!(
            (seen[0].near_node, seen[0].far_node, seen[0].near_edge, seen[0].far_edge),
            (0, 0, 0, 0)
        );
        assert_eq!(
            (seen[1].near_node, seen[1].far_node, seen[1].near_edge, seen[1].far_edge),
            (0, 1, 1, 3)
        );
        assert_eq!(
            (seen[2].near_node, seen[2].far_node, seen[2].near_edge, seen[2].far_edge),
            (1, 0, 2, 1)
        );
        // info mirrors the far node index
        assert!(seen.iter().all(|e| e.info == e.far_node));
    }

    #[test]
    fn split_iteration_covers_everything_once() {
        let l = link(&[5], &[3]);
        let max = l.max_progress(LinkEnd::Zero);
        let mut whole = Vec::new();
        l.for_each_edge(LinkEnd::Zero, |e| whole.push((e.near_node, e.far_node)), 0, max);

        let p1 = l.next_progress_point(LinkEnd::Zero, 4);
        let p2 = l.next_progress_point(LinkEnd::Zero, p1 + 2).min(max);
        let mut parts = Vec::new();
        l.for_each_edge(LinkEnd::Zero, |e| parts.push((e.near_node, e.far_node)), 0, p1);
        l.for_each_edge(LinkEnd::Zero, |e| parts.push((e.near_node, e.far_node)), p1, p2);
        l.for_each_edge(LinkEnd::Zero, |e| parts.push((e.near_node, e.far_node)), p2, max);

        whole.sort_unstable();
        parts.sort_unstable();
        assert_eq!(whole, parts);
    }
}
