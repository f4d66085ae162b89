//! Link iteration protocol.
//!
//! A *link* is an implicit set of edges between the nodes of two
//! components, described by an iteration pattern rather than explicit
//! storage. Each link end (end 0 or end 1) exposes the same contract to
//! the scheduler:
//!
//! - [`max_progress`](LinkShape::max_progress): an opaque total work
//!   count, roughly the number of edges attributable to that end.
//! - [`next_progress_point`](LinkShape::next_progress_point): the smallest
//!   progress value at or past a requested one where the iterator is
//!   willing to stop. This is the scheduler's only tool for splitting a
//!   job, and every value it returns falls on a **whole near-node
//!   boundary**; the near-node guarantee depends on it.
//! - `for_each_edge`: visit every edge whose progress lies in a half-open
//!   interval, calling the kernel with an [`Edge`] payload.
//!
//! # Near-node guarantee
//!
//! If a link supports partial execution it must only split on whole
//! near-node boundaries. Two chunks of the same job then never touch the
//! same near node, so kernels may mutate per-near-node state without
//! synchronization.
//!
//! # Dispatch
//!
//! The concrete link types live behind the [`LinkKind`] enum. Iteration is
//! generic over the kernel and dispatched at the variant arms, so the
//! compiler monomorphizes and inlines the kernel at every call site. Do
//! not pass function pointers as kernels; closures keep the inlining.

pub mod adjacency;
pub mod dense;
pub mod local2d;
pub mod same;

pub use adjacency::{AdjacencyLink, EdgeStore, SharedEdgeData};
pub use dense::DenseLink;
pub use local2d::{Local2dLink, Padding};
pub use same::SameLink;

use crate::error::LinkError;

/// One side of a link. Each end has its own per-edge data slot and its own
/// progress numbering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LinkEnd {
    Zero,
    One,
}

impl LinkEnd {
    /// The opposite end.
    #[inline]
    pub fn flip(self) -> LinkEnd {
        match self {
            LinkEnd::Zero => LinkEnd::One,
            LinkEnd::One => LinkEnd::Zero,
        }
    }

    /// 0 or 1, for error messages and array indexing.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            LinkEnd::Zero => 0,
            LinkEnd::One => 1,
        }
    }
}

/// Payload passed to a kernel for every visited edge.
///
/// `near` is the end currently being iterated; `far` is the opposite end.
/// `near_edge` / `far_edge` index that end's per-edge data slot. `info`
/// distinguishes, among a near node's incident edges, *which* edge is
/// being processed: the far node index for dense links, the filter tap
/// index for local-2D links, a running index for adjacency links.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub near_node: usize,
    pub near_edge: usize,
    pub far_node: usize,
    pub far_edge: usize,
    pub info: usize,
}

/// Shape capabilities every link type provides.
///
/// These are the non-generic operations; edge iteration itself is an
/// inherent method on each concrete type (and on [`LinkKind`]) so the
/// kernel stays a generic parameter.
pub trait LinkShape {
    /// Name of this link type, used in error messages and perf logs.
    fn identifier(&self) -> &'static str;

    /// Whether a component of shape `dim0` at end 0 can connect to a
    /// component of shape `dim1` at end 1.
    fn can_connect_dimensions(&self, dim0: &[usize], dim1: &[usize]) -> bool;

    /// Deduce the near component's shape from the far component's shape,
    /// if this link type can.
    fn deduce_component_dimensions(&self, far: &[usize], which_end: LinkEnd) -> Option<Vec<usize>>;

    /// Inform the link of the shapes of the components it connects.
    /// Precomputes whatever the progress protocol needs.
    fn set_dimensions(&mut self, dim0: &[usize], dim1: &[usize]);

    /// Shape of the per-edge data slot for the end holding the `near`
    /// component.
    fn link_end_size(&self, near: &[usize], far: &[usize], which_end: LinkEnd) -> Vec<usize>;

    /// Total progress at which iteration over `which_end` is complete.
    fn max_progress(&self, which_end: LinkEnd) -> u64;

    /// Smallest progress value `>= requested` at which the iterator is
    /// willing to stop. Always a whole near-node boundary; may exceed
    /// `max_progress` (callers clamp).
    fn next_progress_point(&self, which_end: LinkEnd, requested: u64) -> u64;
}

/// Tagged union of the concrete link types.
///
/// Shape capabilities delegate to the variant; [`LinkKind::for_each_edge`]
/// dispatches once and then runs the variant's monomorphized iteration.
pub enum LinkKind {
    Dense(DenseLink),
    Same(SameLink),
    Local2d(Local2dLink),
    Adjacency(AdjacencyLink),
}

macro_rules! delegate {
    ($self:ident, $link:ident => $body:expr) => {
        match $self {
            LinkKind::Dense($link) => $body,
            LinkKind::Same($link) => $body,
            LinkKind::Local2d($link) => $body,
            LinkKind::Adjacency($link) => $body,
        }
    };
}

impl LinkKind {
    /// Visit every edge of `which_end` whose progress lies in
    /// `[start, stop)`.
    #[inline]
    pub fn for_each_edge<F: FnMut(Edge)>(&self, which_end: LinkEnd, f: F, start: u64, stop: u64) {
        delegate!(self, l => l.for_each_edge(which_end, f, start, stop))
    }
}

impl LinkShape for LinkKind {
    fn identifier(&self) -> &'static str {
        delegate!(self, l => l.identifier())
    }

    fn can_connect_dimensions(&self, dim0: &[usize], dim1: &[usize]) -> bool {
        delegate!(self, l => l.can_connect_dimensions(dim0, dim1))
    }

    fn deduce_component_dimensions(&self, far: &[usize], which_end: LinkEnd) -> Option<Vec<usize>> {
        delegate!(self, l => l.deduce_component_dimensions(far, which_end))
    }

    fn set_dimensions(&mut self, dim0: &[usize], dim1: &[usize]) {
        delegate!(self, l => l.set_dimensions(dim0, dim1))
    }

    fn link_end_size(&self, near: &[usize], far: &[usize], which_end: LinkEnd) -> Vec<usize> {
        delegate!(self, l => l.link_end_size(near, far, which_end))
    }

    fn max_progress(&self, which_end: LinkEnd) -> u64 {
        delegate!(self, l => l.max_progress(which_end))
    }

    fn next_progress_point(&self, which_end: LinkEnd, requested: u64) -> u64 {
        delegate!(self, l => l.next_progress_point(which_end, requested))
    }
}

/// Validate a connection, producing the standard error on mismatch.
pub fn check_connection<L: LinkShape>(
    link: &L,
    dim0: &[usize],
    dim1: &[usize],
) -> Result<(), LinkError> {
    if link.can_connect_dimensions(dim0, dim1) {
        Ok(())
    } else {
        Err(LinkError::BadDimensions {
            link: link.identifier(),
            dim0: dim0.to_vec(),
            dim1: dim1.to_vec(),
        })
    }
}

/// Flat node count of a component shape.
#[inline]
pub(crate) fn flat_size(dims: &[usize]) -> usize {
    dims.iter().product()
}
