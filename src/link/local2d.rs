//! Locally connected 2D link.
//!
//! This link has the connectivity pattern of a convolution. With the
//! right kernels it covers convolutions, atrous convolutions, transpose
//! variants, locally connected 2D layers, and pooling.
//!
//! A filter rectangle of `filter_rows x filter_cols` cells moves over
//! end 0 in steps of `stride_rows`/`stride_cols`. Each placement connects
//! the covered end-0 cells with a single end-1 cell. `atrous_* > 1`
//! spreads the filter out:
//!
//! ```text
//!     atrous = 1:  xxx        atrous = 2:  x x x
//!                  xxx
//!                  xxx                     x x x
//!
//!                                          x x x
//! ```
//!
//! Components are `(rows, cols)` or `(rows, cols, depth)`; a missing depth
//! is 1. When a 2D cell at end 0 pairs with a 2D cell at end 1, all end-0
//! depth slices at that cell connect to all end-1 depth slices at the
//! paired cell.
//!
//! `info` values for an end-1 node run left-to-right, top-to-bottom within
//! the filter (`fr * filter_cols + fc`), so with a 3x3 filter:
//!
//! ```text
//!     0 1 2
//!     3 4 5
//!     6 7 8
//! ```
//!
//! The iteration works row by row and can split a job into sets of rows.
//! It is slower at the sides of each row, where bounds must be checked, so
//! long rows perform best: if one input dimension is much longer, make it
//! the columns dimension.

use super::{Edge, LinkEnd, LinkShape};

/// Padding flavors for the square-filter convenience constructor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Padding {
    /// With stride 1, end 1 has the same shape as end 0.
    Same,
    /// The filter is always fully contained within end 0.
    Valid,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Plane {
    rows: usize,
    cols: usize,
    depth: usize,
}

impl Plane {
    fn from_dims(dims: &[usize]) -> Plane {
        assert!(
            dims.len() == 2 || dims.len() == 3,
            "local-2D component must have 2 or 3 dimensions, got {}",
            dims.len()
        );
        Plane {
            rows: dims[0],
            cols: dims[1],
            depth: if dims.len() == 3 { dims[2] } else { 1 },
        }
    }
}

/// Filter geometry, readable for tests and diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub start_row: i64,
    pub start_col: i64,
    pub filter_rows: usize,
    pub filter_cols: usize,
    pub stride_rows: usize,
    pub stride_cols: usize,
    pub atrous_rows: usize,
    pub atrous_cols: usize,
    pub end0_rows: usize,
    pub end0_cols: usize,
    pub end0_depth: usize,
    pub end1_rows: usize,
    pub end1_cols: usize,
    pub end1_depth: usize,
}

/// Square-filter configuration retained for validation and deduction.
#[derive(Clone, Copy, Debug)]
struct SquareSpec {
    filter: usize,
    stride: usize,
    padding: Padding,
}

/// The locally connected 2D link.
///
/// Build the general form with [`Local2dLink::with_params`], or the
/// square-filter form with [`Local2dLink::square`] which also knows how to
/// validate and deduce component shapes for its padding mode.
pub struct Local2dLink {
    start_row: i64,
    start_col: i64,
    filter_rows: usize,
    filter_cols: usize,
    stride_rows: usize,
    stride_cols: usize,
    atrous_rows: usize,
    atrous_cols: usize,

    end0: Plane,
    end1: Plane,

    // cumulative_for_end[i] = edges attributable to the first i+1 rows of
    // that end. Whole-row totals only, so every recorded boundary is a
    // near-node boundary.
    cum_end0: Vec<u64>,
    cum_end1: Vec<u64>,

    square: Option<SquareSpec>,
    dirty: bool,
}

/// `a / b` rounded toward negative infinity. `b` must be positive.
#[inline]
pub(crate) fn div_floor(a: i64, b: i64) -> i64 {
    a.div_euclid(b)
}

/// `a / b` rounded toward positive infinity. `b` must be positive.
#[inline]
pub(crate) fn div_ceil(a: i64, b: i64) -> i64 {
    -(-a).div_euclid(b)
}

impl Local2dLink {
    /// General form: explicit filter placement.
    ///
    /// `start_row`/`start_col` locate the top-left filter cell for the
    /// end-1 cell (0, 0); negative values give padding.
    pub fn with_params(
        start_row: i64,
        start_col: i64,
        filter_rows: usize,
        filter_cols: usize,
        stride_rows: usize,
        stride_cols: usize,
        atrous_rows: usize,
        atrous_cols: usize,
    ) -> Self {
        assert!(filter_rows > 0 && filter_cols > 0, "filter must be non-empty");
        assert!(stride_rows > 0 && stride_cols > 0, "stride must be positive");
        assert!(atrous_rows > 0 && atrous_cols > 0, "atrous must be positive");
        Local2dLink {
            start_row,
            start_col,
            filter_rows,
            filter_cols,
            stride_rows,
            stride_cols,
            atrous_rows,
            atrous_cols,
            end0: Plane::default(),
            end1: Plane::default(),
            cum_end0: Vec::new(),
            cum_end1: Vec::new(),
            square: None,
            dirty: true,
        }
    }

    /// Square-filter form with a padding mode.
    ///
    /// `Padding::Same` places the filter so the output keeps the input
    /// shape at stride 1; `Padding::Valid` keeps the filter inside end 0.
    pub fn square(filter_size: usize, stride: usize, atrous: usize, padding: Padding) -> Self {
        let start = match padding {
            Padding::Same => -(((filter_size / 2) * stride) as i64),
            Padding::Valid => 0,
        };
        let mut link = Self::with_params(
            start,
            start,
            filter_size,
            filter_size,
            stride,
            stride,
            atrous,
            atrous,
        );
        link.square = Some(SquareSpec {
            filter: filter_size,
            stride,
            padding,
        });
        link
    }

    /// Current geometry, including component shapes.
    pub fn geometry(&self) -> Geometry {
        Geometry {
            start_row: self.start_row,
            start_col: self.start_col,
            filter_rows: self.filter_rows,
            filter_cols: self.filter_cols,
            stride_rows: self.stride_rows,
            stride_cols: self.stride_cols,
            atrous_rows: self.atrous_rows,
            atrous_cols: self.atrous_cols,
            end0_rows: self.end0.rows,
            end0_cols: self.end0.cols,
            end0_depth: self.end0.depth,
            end1_rows: self.end1.rows,
            end1_cols: self.end1.cols,
            end1_depth: self.end1.depth,
        }
    }

    /// The end-0 row touched by `(end1_row, filter_row)`, which may be out
    /// of bounds.
    #[inline]
    fn touched_end0_row(&self, end1_row: usize, filter_row: usize) -> i64 {
        end1_row as i64 * self.stride_rows as i64
            + filter_row as i64 * self.atrous_rows as i64
            + self.start_row
    }

    /// Run the kernel over every edge produced by one (end1 row, filter
    /// row) pair.
    ///
    /// The absolute edge index accounts for complete end-1 rows above this
    /// one and complete filter rows above this one, then advances per tap
    /// and depth pair; out-of-bounds taps still advance it so the
    /// numbering is stable under padding.
    fn row_row<F: FnMut(Edge)>(
        &self,
        filter_row: usize,
        end1_row: usize,
        f: &mut F,
        near_is_end1: bool,
    ) {
        let end0_row = self.touched_end0_row(end1_row, filter_row);
        if end0_row < 0 || end0_row >= self.end0.rows as i64 {
            return; // filter row is outside the end-0 rectangle
        }
        let end0_row = end0_row as usize;

        let d0 = self.end0.depth;
        let d1 = self.end1.depth;
        let info_start = filter_row * self.filter_cols;

        let end0_base_row = end0_row * self.end0.cols * d0;
        let end1_base_row = end1_row * self.end1.cols * d1;

        let mut edge_ix = end1_row
            * (self.end1.cols * self.filter_rows * self.filter_cols * d0 * d1)
            + filter_row * (self.end1.cols * self.filter_cols * d1 * d0);

        let col_span = (self.filter_cols * self.atrous_cols) as i64;
        let mut filter_left = self.start_col;

        for end1_col in 0..self.end1.cols {
            let mut info = info_start;
            let mut end0_col = filter_left;
            while end0_col < filter_left + col_span {
                if end0_col < 0 || end0_col >= self.end0.cols as i64 {
                    info += 1;
                    edge_ix += d0 * d1;
                    end0_col += self.atrous_cols as i64;
                    continue; // tap out of bounds
                }
                let end0_base = end0_base_row + end0_col as usize * d0;
                let end1_base = end1_base_row + end1_col * d1;
                for i in 0..d1 {
                    for j in 0..d0 {
                        let node0 = end0_base + j;
                        let node1 = end1_base + i;
                        let edge = if near_is_end1 {
                            Edge {
                                near_node: node1,
                                near_edge: edge_ix,
                                far_node: node0,
                                far_edge: edge_ix,
                                info,
                            }
                        } else {
                            Edge {
                                near_node: node0,
                                near_edge: edge_ix,
                                far_node: node1,
                                far_edge: edge_ix,
                                info,
                            }
                        };
                        f(edge);
                        edge_ix += 1;
                    }
                }
                info += 1;
                end0_col += self.atrous_cols as i64;
            }
            filter_left += self.stride_cols as i64;
        }
    }

    /// End-0 iteration: find the end-1 rows whose filter placements touch
    /// end-0 rows in `[end0_row_start, end0_row_end)` and run each
    /// touching (end1 row, filter row) pair.
    ///
    /// The lower bound subtracts `filter_rows * atrous_rows` rather than
    /// `(filter_rows - 1) * atrous_rows`, over-covering by at most one
    /// end-1 row; the in-range check on the touched row filters it out,
    /// so chained ranges emit no duplicates.
    fn row_finding<F: FnMut(Edge)>(&self, end0_row_start: usize, end0_row_end: usize, f: &mut F) {
        if self.end1.rows == 0 {
            return;
        }
        let stride = self.stride_rows as i64;

        let lo = div_floor(
            end0_row_start as i64
                - self.start_row
                - (self.filter_rows * self.atrous_rows) as i64,
            stride,
        );
        let end1_row_start = lo.clamp(0, self.end1.rows as i64 - 1) as usize;

        let hi = div_ceil(end0_row_end as i64 - self.start_row, stride);
        let end1_row_end = hi.clamp(0, self.end1.rows as i64) as usize;

        for end1_row in end1_row_start..end1_row_end {
            for filter_row in 0..self.filter_rows {
                let end0_row = self.touched_end0_row(end1_row, filter_row);
                if end0_row >= end0_row_start as i64 && end0_row < end0_row_end as i64 {
                    self.row_row(filter_row, end1_row, f, false);
                }
            }
        }
    }

    /// Recompute the cumulative row totals. Every (end1 row, filter row)
    /// pair with an in-bounds end-0 row contributes the same edge count,
    /// so it is counted once and reused.
    fn initialize(&mut self) {
        if !self.dirty {
            return;
        }
        if self.end1.rows == 0 || self.filter_rows == 0 {
            return; // incomplete configuration
        }
        let mut per_end0_row = vec![0u64; self.end0.rows];
        let mut per_end1_row = vec![0u64; self.end1.rows];
        let mut row_row_size = 0u64;

        for end1_row in 0..self.end1.rows {
            for filter_row in 0..self.filter_rows {
                let end0_row = self.touched_end0_row(end1_row, filter_row);
                if end0_row >= 0 && end0_row < self.end0.rows as i64 {
                    if row_row_size == 0 {
                        let mut count = 0u64;
                        self.row_row(filter_row, end1_row, &mut |_| count += 1, true);
                        row_row_size = count;
                    }
                    per_end0_row[end0_row as usize] += row_row_size;
                    per_end1_row[end1_row] += row_row_size;
                }
            }
        }

        let prefix = |v: &mut Vec<u64>| {
            let mut total = 0u64;
            for entry in v.iter_mut() {
                total += *entry;
                *entry = total;
            }
        };
        prefix(&mut per_end0_row);
        prefix(&mut per_end1_row);
        self.cum_end0 = per_end0_row;
        self.cum_end1 = per_end1_row;
        self.dirty = false;
    }

    fn cumulative(&self, which_end: LinkEnd) -> &[u64] {
        match which_end {
            LinkEnd::Zero => &self.cum_end0,
            LinkEnd::One => &self.cum_end1,
        }
    }

    /// Visit every edge of `which_end` with progress in `[start, stop)`.
    ///
    /// Both bounds must be whole-row boundaries as produced by
    /// [`LinkShape::next_progress_point`]; `stop` must not exceed
    /// `max_progress`.
    pub fn for_each_edge<F: FnMut(Edge)>(
        &self,
        which_end: LinkEnd,
        mut f: F,
        start: u64,
        stop: u64,
    ) {
        let cum = self.cumulative(which_end);
        assert!(!cum.is_empty(), "local-2D link iterated before dimensions were set");
        if start >= stop {
            return;
        }
        // First row with edges past `start`, one past the row covering `stop`.
        let row_start = cum.partition_point(|&v| v < start + 1);
        let row_end = (cum.partition_point(|&v| v < stop) + 1).min(cum.len());

        match which_end {
            LinkEnd::One => {
                for end1_row in row_start..row_end {
                    for filter_row in 0..self.filter_rows {
                        self.row_row(filter_row, end1_row, &mut f, true);
                    }
                }
            }
            LinkEnd::Zero => self.row_finding(row_start, row_end, &mut f),
        }
    }
}

impl LinkShape for Local2dLink {
    fn identifier(&self) -> &'static str {
        if self.square.is_some() {
            "Local2D"
        } else {
            "GeneralLocal2D"
        }
    }

    fn can_connect_dimensions(&self, dim0: &[usize], dim1: &[usize]) -> bool {
        if dim0.len() != 2 && dim0.len() != 3 {
            return false;
        }
        if dim1.len() != 2 && dim1.len() != 3 {
            return false;
        }
        let Some(sq) = self.square else {
            return true; // general form accepts any 2D/3D pairing
        };
        for axis in 0..2 {
            let d0 = dim0[axis];
            let d1 = dim1[axis];
            let expected = match sq.padding {
                Padding::Same => {
                    if d0 == 0 {
                        return false;
                    }
                    (d0 - 1) / sq.stride + 1
                }
                Padding::Valid => {
                    if d0 < sq.filter {
                        return false;
                    }
                    (d0 - sq.filter) / sq.stride + 1
                }
            };
            if expected != d1 {
                return false;
            }
        }
        true
    }

    fn deduce_component_dimensions(&self, far: &[usize], which_end: LinkEnd) -> Option<Vec<usize>> {
        let sq = self.square?;
        if far.len() != 2 && far.len() != 3 {
            return None;
        }
        // Output depth is assumed equal to input depth.
        let mut result = far.to_vec();
        match which_end {
            LinkEnd::One => {
                // far is end 0; deduce end 1.
                for axis in 0..2 {
                    result[axis] = match sq.padding {
                        Padding::Same => (far[axis].checked_sub(1)?) / sq.stride + 1,
                        Padding::Valid => (far[axis].checked_sub(sq.filter)?) / sq.stride + 1,
                    };
                }
            }
            LinkEnd::Zero => {
                // far is end 1; deduce end 0. Several shapes could work;
                // pick the smallest consistent one.
                for axis in 0..2 {
                    result[axis] = match sq.padding {
                        Padding::Same => (far[axis].checked_sub(1)?) * sq.stride + 1,
                        Padding::Valid => (far[axis].checked_sub(1)?) * sq.stride + sq.filter,
                    };
                }
            }
        }
        Some(result)
    }

    fn set_dimensions(&mut self, dim0: &[usize], dim1: &[usize]) {
        self.end0 = Plane::from_dims(dim0);
        self.end1 = Plane::from_dims(dim1);
        self.dirty = true;
        self.initialize();
    }

    fn link_end_size(&self, near: &[usize], far: &[usize], which_end: LinkEnd) -> Vec<usize> {
        let (dim1, dim0) = match which_end {
            LinkEnd::One => (near, far),
            LinkEnd::Zero => (far, near),
        };
        let d1 = if dim1.len() == 3 { dim1[2] } else { 1 };
        let d0 = if dim0.len() == 3 { dim0[2] } else { 1 };
        vec![dim1[0] * dim1[1] * d1 * d0 * self.filter_rows * self.filter_cols]
    }

    fn max_progress(&self, which_end: LinkEnd) -> u64 {
        let cum = self.cumulative(which_end);
        *cum.last().expect("local-2D link queried before dimensions were set")
    }

    fn next_progress_point(&self, which_end: LinkEnd, requested: u64) -> u64 {
        let cum = self.cumulative(which_end);
        if cum.is_empty() {
            return 0;
        }
        let ix = cum.partition_point(|&v| v < requested);
        if ix == cum.len() {
            *cum.last().unwrap()
        } else {
            cum[ix]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_division_rounding() {
        assert_eq!(div_floor(7, 2), 3);
        assert_eq!(div_floor(-7, 2), -4);
        assert_eq!(div_floor(-8, 2), -4);
        assert_eq!(div_ceil(7, 2), 4);
        assert_eq!(div_ceil(-7, 2), -3);
        assert_eq!(div_ceil(-8, 2), -4);
        assert_eq!(div_ceil(0, 3), 0);
        assert_eq!(div_floor(0, 3), 0);
    }

    fn same_3x3() -> Local2dLink {
        let mut l = Local2dLink::with_params(-1, -1, 3, 3, 1, 1, 1, 1);
        l.set_dimensions(&[3, 3], &[3, 3]);
        l
    }

    #[test]
    fn cumulative_totals_agree_between_ends() {
        let l = same_3x3();
        assert_eq!(l.max_progress(LinkEnd::Zero), l.max_progress(LinkEnd::One));
        // 3x3 image, 3x3 same-padded filter: center 9 taps minus the
        // out-of-bounds ones. Count by brute force from the iterator.
        let mut n = 0u64;
        let max = l.max_progress(LinkEnd::One);
        l.for_each_edge(LinkEnd::One, |_| n += 1, 0, max);
        assert_eq!(n, max);
    }

    #[test]
    fn next_progress_point_is_whole_row_boundary() {
        let l = same_3x3();
        let max = l.max_progress(LinkEnd::One);
        let mut prev = 0;
        for r in 0..=max {
            let p = l.next_progress_point(LinkEnd::One, r);
            assert!(p >= prev, "monotonic");
            assert_eq!(
                l.next_progress_point(LinkEnd::One, p),
                p,
                "idempotent at fixed point"
            );
            prev = p;
        }
    }

    #[test]
    fn edge_info_numbering_is_row_major_in_filter() {
        let l = same_3x3();
        let max = l.max_progress(LinkEnd::One);
        let mut infos = Vec::new();
        // Center node (1,1) sees every filter tap in order 0..9.
        l.for_each_edge(
            LinkEnd::One,
            |e| {
                if e.near_node == 4 {
                    infos.push(e.info);
                }
            },
            0,
            max,
        );
        assert_eq!(infos, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn geometric_relation_holds_for_every_edge() {
        let mut l = Local2dLink::with_params(-2, 1, 2, 3, 2, 1, 1, 2);
        l.set_dimensions(&[5, 6, 2], &[3, 4]);
        let g = l.geometry();
        let max = l.max_progress(LinkEnd::One);
        let mut count = 0usize;
        l.for_each_edge(
            LinkEnd::One,
            |e| {
                count += 1;
                let (r1, rem1) = (
                    e.near_node / (g.end1_cols * g.end1_depth),
                    e.near_node % (g.end1_cols * g.end1_depth),
                );
                let c1 = rem1 / g.end1_depth;
                let (r0, rem0) = (
                    e.far_node / (g.end0_cols * g.end0_depth),
                    e.far_node % (g.end0_cols * g.end0_depth),
                );
                let c0 = rem0 / g.end0_depth;
                let fr = e.info / g.filter_cols;
                let fc = e.info % g.filter_cols;
                assert_eq!(
                    r0 as i64,
                    r1 as i64 * g.stride_rows as i64
                        + fr as i64 * g.atrous_rows as i64
                        + g.start_row
                );
                assert_eq!(
                    c0 as i64,
                    c1 as i64 * g.stride_cols as i64
                        + fc as i64 * g.atrous_cols as i64
                        + g.start_col
                );
                assert!(r0 < g.end0_rows && c0 < g.end0_cols);
            },
            0,
            max,
        );
        assert_eq!(count as u64, max);
    }

    #[test]
    fn square_same_padding_validation_and_deduction() {
        let l = Local2dLink::square(3, 1, 1, Padding::Same);
        assert!(l.can_connect_dimensions(&[5, 5], &[5, 5]));
        assert!(!l.can_connect_dimensions(&[5, 5], &[4, 5]));
        assert_eq!(
            l.deduce_component_dimensions(&[5, 5], LinkEnd::One),
            Some(vec![5, 5])
        );

        let l2 = Local2dLink::square(3, 2, 1, Padding::Same);
        // (5 - 1) / 2 + 1 = 3
        assert!(l2.can_connect_dimensions(&[5, 5], &[3, 3]));
        assert_eq!(
            l2.deduce_component_dimensions(&[3, 3], LinkEnd::Zero),
            Some(vec![5, 5])
        );
    }

    #[test]
    fn square_valid_padding_validation_and_deduction() {
        let l = Local2dLink::square(3, 1, 1, Padding::Valid);
        // (5 - 3) / 1 + 1 = 3
        assert!(l.can_connect_dimensions(&[5, 5], &[3, 3]));
        assert!(!l.can_connect_dimensions(&[2, 2], &[1, 1]));
        assert_eq!(
            l.deduce_component_dimensions(&[5, 5], LinkEnd::One),
            Some(vec![3, 3])
        );
        assert_eq!(
            l.deduce_component_dimensions(&[3, 3], LinkEnd::Zero),
            Some(vec![5, 5])
        );
        // depth carries through untouched
        assert_eq!(
            l.deduce_component_dimensions(&[5, 5, 4], LinkEnd::One),
            Some(vec![3, 3, 4])
        );
    }

    #[test]
    fn end0_ranges_chain_without_duplicates() {
        // Conservative lower bound in row_finding must not re-emit edges
        // when ranges are chained.
        let mut l = Local2dLink::with_params(-1, -1, 3, 3, 1, 1, 1, 1);
        l.set_dimensions(&[4, 4], &[4, 4]);
        let max = l.max_progress(LinkEnd::Zero);

        let mut whole = Vec::new();
        l.for_each_edge(LinkEnd::Zero, |e| whole.push((e.near_node, e.far_node, e.info)), 0, max);

        let mut chained = Vec::new();
        let mut at = 0u64;
        while at < max {
            let next = l.next_progress_point(LinkEnd::Zero, at + 1).min(max);
            l.for_each_edge(
                LinkEnd::Zero,
                |e| chained.push((e.near_node, e.far_node, e.info)),
                at,
                next,
            );
            at = next;
        }

        whole.sort_unstable();
        chained.sort_unstable();
        assert_eq!(whole, chained);
    }
}
