//! Concurrent execution core for iterating kernels over implicit edge sets.
//!
//! Networks of multi-dimensional node arrays ("components") are connected
//! by "links": implicit edge sets described by an iteration pattern
//! instead of explicit storage. User-supplied per-edge callbacks
//! ("kernels") run over those edges in parallel while the runtime
//! preserves a strict guarantee: no two kernel invocations with the same
//! near node ever run concurrently.
//!
//! Two subsystems make that work:
//!
//! - [`scheduler`]: one client thread, one scheduler thread, N worker
//!   threads. Batches of jobs are partitioned into adaptively sized
//!   chunks, balanced across workers, and separated by barriers; jobs
//!   touching the same component are serialized; partial kernel state is
//!   merged back through user combiners.
//! - [`link`]: the iteration protocol each link type implements so the
//!   scheduler can split its edge set on *near-node boundaries*: dense,
//!   same-index, locally connected 2D (strided/atrous), and adjacency-list
//!   links.
//!
//! Supporting pieces: [`perf_log`] records chunk timings and exports
//! Chrome Trace JSON (compiled in under the `perf-stats` feature), and
//! [`error`] carries the link layer's validation errors.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lattice_rs::link::{DenseLink, LinkEnd, LinkShape};
//! use lattice_rs::scheduler::{ComponentId, JobSpec, OpTypeId, Scheduler};
//!
//! let mut link = DenseLink::new();
//! link.set_dimensions(&[1024], &[256]);
//! let link = Arc::new(link);
//!
//! let sched = Scheduler::with_workers(4);
//! let max = link.max_progress(LinkEnd::One);
//! let iter_link = Arc::clone(&link);
//! let batch = sched.process_op(
//!     JobSpec::new("in->hidden", "edge-sum", OpTypeId(1), ComponentId(1), max),
//!     (),
//!     move |_kernel, start, end| {
//!         iter_link.for_each_edge(LinkEnd::One, |edge| { /* apply */ }, start, end);
//!     },
//!     move |requested| link.next_progress_point(LinkEnd::One, requested),
//!     None,
//! );
//! sched.finish_batch(batch);
//! ```

pub mod error;
pub mod link;
pub mod perf_log;
pub mod scheduler;

pub use error::LinkError;
pub use link::{Edge, LinkEnd, LinkKind, LinkShape};
pub use scheduler::{Combine, ComponentId, JobSpec, OpTypeId, Scheduler, SchedulerConfig};
