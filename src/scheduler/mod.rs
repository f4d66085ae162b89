//! Parallel job scheduler.
//!
//! # Overview
//!
//! A producer/consumer system with one client thread, one scheduler
//! thread, and N worker threads. Clients submit batches of jobs; the
//! scheduler partitions each batch into adaptively sized chunks aligned on
//! near-node boundaries, serializes jobs that share a component id, and
//! dispatches per-worker chunk lists separated by barriers.
//!
//! ```text
//!                  ┌────────────────────────────────────────────────┐
//!                  │                  Scheduler                     │
//!  ┌──────────┐    │  ┌───────────┐   plan   ┌─────────────────┐    │
//!  │  client  │───►│  │ batch     │─────────►│ barrier chain   │    │
//!  │  thread  │    │  │ queue     │          │ seq 1 → 2 → 3   │    │
//!  └────┬─────┘    │  └───────────┘          └───────┬─────────┘    │
//!       │          │        ▲                        │ publish      │
//!       │ finish   │        │ finalize     ┌─────────┴─────────┐    │
//!       ▼          │        │              ▼                   ▼    │
//!  ┌──────────┐    │  ┌───────────┐   ┌──────────┐ ... ┌──────────┐ │
//!  │completed │◄───│  │ timings → │   │ worker 0 │     │ worker N │ │
//!  │ condvar  │    │  │ estimates │◄──│ (chunks) │     │ (chunks) │ │
//!  └──────────┘    │  └───────────┘   └──────────┘     └──────────┘ │
//!                  └────────────────────────────────────────────────┘
//! ```
//!
//! # Module organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`core`] | Scheduler handle, scheduler thread, worker pool |
//! | `job` | Jobs, chunks, barriers, submission types |
//! | `planner` | Water-pouring partitioning of a batch into barriers |
//! | [`timing`] | Adaptive time/work conversion per operation type |
//! | [`metrics`] | Per-worker counters merged at shutdown |
//! | [`affinity`] | Best-effort 1:1 worker-to-core pinning |
//!
//! # Correctness invariants
//!
//! - Jobs sharing a component id never run concurrently.
//! - Chunk boundaries always land on near-node boundaries.
//! - Every chunk of barrier N, then every combiner of N, then any chunk
//!   of N+1: in that order, on every worker.
//! - Client batches complete in submission order.

pub mod affinity;
pub mod core;
pub(crate) mod job;
pub mod metrics;
pub(crate) mod planner;
pub mod timing;

pub use self::core::{Scheduler, SchedulerConfig};
pub use self::job::{Combine, ComponentId, JobSpec, OpTypeId};
pub use self::metrics::{MetricsSnapshot, WorkerMetricsLocal};
