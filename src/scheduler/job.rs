//! Jobs, chunks, and barriers: the scheduler's data model.
//!
//! A [`Job`] erases the submitter's kernel type behind three closures:
//!
//! - a *copier* that produces a task closure owning a fresh kernel copy,
//! - the link's *next-progress-point* function,
//! - a *combine-all* that folds every copy back into the original kernel.
//!
//! Kernel specialization stays local to the submitter; the scheduler only
//! sees progress arithmetic and opaque callables.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Identifies an operation type (a kernel/link-iteration combination) for
/// the adaptive time model. Typically a hash of the monomorphized
/// iteration, so equal ids mean comparable throughput.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OpTypeId(pub u64);

/// Identifies the near component of a job. Two jobs with equal ids may
/// touch the same per-node data and must never run concurrently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ComponentId(pub u32);

/// Submission parameters for one operation.
#[derive(Clone, Debug)]
pub struct JobSpec {
    /// Link name, for performance reporting.
    pub link_name: String,
    /// Kernel name, for performance reporting.
    pub kernel_name: String,
    pub op_type: OpTypeId,
    pub component: ComponentId,
    /// Number of progress units in the whole operation.
    pub max_progress: u64,
    /// When set, the job always runs as a single chunk.
    pub indivisible: bool,
    /// When set, the batch is complete and scheduling may begin.
    pub end_of_batch: bool,
    /// When set, the call blocks until the batch finishes. Implies
    /// `end_of_batch`.
    pub blocking: bool,
}

impl JobSpec {
    pub fn new(
        link_name: impl Into<String>,
        kernel_name: impl Into<String>,
        op_type: OpTypeId,
        component: ComponentId,
        max_progress: u64,
    ) -> Self {
        JobSpec {
            link_name: link_name.into(),
            kernel_name: kernel_name.into(),
            op_type,
            component,
            max_progress,
            indivisible: false,
            end_of_batch: true,
            blocking: false,
        }
    }

    pub fn indivisible(mut self) -> Self {
        self.indivisible = true;
        self
    }

    /// Keep the batch open for more jobs.
    pub fn more_to_come(mut self) -> Self {
        self.end_of_batch = false;
        self
    }

    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }
}

/// Merges kernel copies back into an original kernel after parallel
/// execution. The caller keeps a clone of `original` to read the result
/// once the batch finishes.
pub struct Combine<K> {
    pub(crate) original: Arc<Mutex<K>>,
    pub(crate) merge: Box<dyn Fn(&mut K, K) + Send>,
}

impl<K> Combine<K> {
    pub fn new(original: Arc<Mutex<K>>, merge: impl Fn(&mut K, K) + Send + 'static) -> Self {
        Combine {
            original,
            merge: Box::new(merge),
        }
    }
}

/// A task closure owning its kernel copy. Applies the kernel over a
/// progress interval `[start, end)`.
pub(crate) type TaskFn = Box<dyn FnOnce(u64, u64) + Send>;

/// The type-erased unit of submitted work.
pub(crate) struct Job {
    pub kernel_name: String,
    pub op_type: OpTypeId,
    pub component: ComponentId,
    /// Id handed back by the performance log at submission.
    pub op_log_id: usize,
    pub max_progress: u64,
    /// Progress already assigned to chunks.
    pub progress: u64,
    pub indivisible: bool,

    next_point: Box<dyn Fn(u64) -> u64 + Send>,
    copier: Box<dyn FnMut() -> TaskFn + Send>,
    combine_all: Box<dyn FnMut() + Send>,
}

impl Job {
    pub fn new(
        spec: &JobSpec,
        op_log_id: usize,
        next_point: Box<dyn Fn(u64) -> u64 + Send>,
        copier: Box<dyn FnMut() -> TaskFn + Send>,
        combine_all: Box<dyn FnMut() + Send>,
    ) -> Self {
        Job {
            kernel_name: spec.kernel_name.clone(),
            op_type: spec.op_type,
            component: spec.component,
            op_log_id,
            max_progress: spec.max_progress,
            progress: 0,
            indivisible: spec.indivisible,
            next_point,
            copier,
            combine_all,
        }
    }

    /// Progress not yet assigned to any chunk.
    #[inline]
    pub fn remaining(&self) -> u64 {
        self.max_progress - self.progress
    }

    /// Snap a requested progress level up to the link's next legal stop.
    #[inline]
    pub fn next_progress_point(&self, requested: u64) -> u64 {
        (self.next_point)(requested)
    }

    /// Produce a task closure with a fresh kernel copy.
    pub fn make_task(&mut self) -> TaskFn {
        (self.copier)()
    }

    /// Fold all kernel copies into the original kernel.
    pub fn run_combiners(&mut self) {
        (self.combine_all)()
    }
}

pub(crate) type SharedJob = Arc<Mutex<Job>>;

/// A contiguous progress interval of one job, owned by one worker.
pub(crate) struct JobChunk {
    pub task: TaskFn,
    pub start: u64,
    pub end: u64,
    pub op_type: OpTypeId,
    pub op_log_id: usize,
}

/// Timing record for an executed chunk, handed back to the scheduler for
/// the adaptive model and the performance log.
pub(crate) struct ChunkStats {
    pub op_type: OpTypeId,
    pub op_log_id: usize,
    pub units: u64,
    pub start: Instant,
    pub end: Instant,
}

/// One worker's chunk list within one barrier, plus the stats it reports
/// back. The worker takes `pending` when it starts the barrier and stores
/// `stats` when it finishes; after that it never touches the slot again.
#[derive(Default)]
pub(crate) struct WorkerBatch {
    pub pending: Vec<JobChunk>,
    pub stats: Vec<ChunkStats>,
}

/// A synchronization point. All workers meet here before the next
/// barrier's chunks start anywhere.
///
/// Barriers form a singly linked list; the scheduler appends at the tail
/// and finalizes at the head. Nodes are shared (`Arc`), so a barrier is
/// reclaimed exactly when the scheduler has finalized it and every worker
/// has advanced past it.
pub(crate) struct Barrier {
    pub sequence: u64,
    pub single_threaded: bool,
    /// Jobs fully covered by this barrier. Distinct component ids by
    /// construction.
    pub jobs: Vec<SharedJob>,
    pub slots: Vec<Mutex<WorkerBatch>>,

    /// Count of workers done with this barrier. Incremented under the
    /// submission mutex so the scheduler's condition-variable checks never
    /// miss the final increment.
    pub done_workers: AtomicUsize,
    /// Claim flag for single-threaded barriers.
    pub single_started: AtomicBool,
    /// Set by the scheduler thread once stats are recorded.
    pub finalized: AtomicBool,

    next: Mutex<Option<Arc<Barrier>>>,
}

impl Barrier {
    pub fn new(
        sequence: u64,
        single_threaded: bool,
        jobs: Vec<SharedJob>,
        mut pending: Vec<Vec<JobChunk>>,
        n_workers: usize,
    ) -> Self {
        pending.resize_with(n_workers, Vec::new);
        Barrier {
            sequence,
            single_threaded,
            jobs,
            slots: pending
                .into_iter()
                .map(|chunks| {
                    Mutex::new(WorkerBatch {
                        pending: chunks,
                        stats: Vec::new(),
                    })
                })
                .collect(),
            done_workers: AtomicUsize::new(0),
            single_started: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            next: Mutex::new(None),
        }
    }

    /// The pre-finished barrier every worker starts at.
    pub fn sentinel(n_workers: usize) -> Self {
        let barrier = Barrier::new(0, false, Vec::new(), Vec::new(), n_workers);
        barrier.done_workers.store(n_workers, Ordering::Relaxed);
        barrier
    }

    /// Whether every worker is done (or, for single-threaded barriers, the
    /// one executor is).
    pub fn finished(&self, n_workers: usize) -> bool {
        let done = self.done_workers.load(Ordering::Acquire);
        if self.single_threaded {
            done >= 1
        } else {
            done == n_workers
        }
    }

    pub fn next(&self) -> Option<Arc<Barrier>> {
        self.next.lock().unwrap().clone()
    }

    pub fn set_next(&self, next: Arc<Barrier>) {
        let mut slot = self.next.lock().unwrap();
        debug_assert!(slot.is_none(), "barrier already has a successor");
        *slot = Some(next);
    }

    /// Sever the forward link, for iterative teardown at shutdown.
    pub fn take_next(&self) -> Option<Arc<Barrier>> {
        self.next.lock().unwrap().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_job(component: u32, max_progress: u64) -> Job {
        Job::new(
            &JobSpec::new("l", "k", OpTypeId(1), ComponentId(component), max_progress),
            0,
            Box::new(|p| p),
            Box::new(|| Box::new(|_s, _e| {})),
            Box::new(|| {}),
        )
    }

    #[test]
    fn job_progress_accounting() {
        let mut job = dummy_job(0, 10);
        assert_eq!(job.remaining(), 10);
        job.progress = 4;
        assert_eq!(job.remaining(), 6);
        assert_eq!(job.next_progress_point(7), 7);
        let task = job.make_task();
        task(4, 10);
    }

    #[test]
    fn sentinel_is_finished_for_all_workers() {
        let b = Barrier::sentinel(4);
        assert!(b.finished(4));
        assert!(!b.finalized.load(Ordering::Relaxed));
        assert!(b.next().is_none());
    }

    #[test]
    fn single_threaded_barrier_finishes_at_one() {
        let b = Barrier::new(3, true, Vec::new(), Vec::new(), 4);
        assert!(!b.finished(4));
        b.done_workers.store(1, Ordering::Relaxed);
        assert!(b.finished(4));
    }

    #[test]
    fn barrier_chain_links_and_severs() {
        let a = Arc::new(Barrier::sentinel(1));
        let b = Arc::new(Barrier::new(1, false, Vec::new(), Vec::new(), 1));
        a.set_next(Arc::clone(&b));
        assert_eq!(a.next().unwrap().sequence, 1);
        assert_eq!(a.take_next().unwrap().sequence, 1);
        assert!(a.next().is_none());
    }
}
