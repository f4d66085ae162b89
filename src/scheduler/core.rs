//! The scheduler: one client-facing handle, one scheduler thread, N
//! workers.
//!
//! # How the pieces move
//!
//! The client thread submits jobs into a client batch through
//! [`Scheduler::process_op`]. A batch is a set of jobs that may run in any
//! order or simultaneously, except that two jobs with the same component
//! id must never overlap (the near-node guarantee).
//!
//! The scheduler thread waits for a complete batch, then splits it into
//! barriers: per-worker chunk lists of estimated equal duration (see
//! the planner module). One client batch may become several barriers when
//! component ids collide. Workers execute their chunk lists, meet at the
//! barrier, run combiners, and move straight on to the next barrier if one
//! is already published.
//!
//! The scheduler collects per-chunk timings from finished barriers to
//! sharpen its duration estimates, publishes completed client batch
//! numbers for [`Scheduler::finish_batch`], and reclaims old barriers and
//! batches.
//!
//! # Channels
//!
//! ```text
//!   client ──► submit channel (mutex + condvar, batch queue) ──► scheduler
//!   scheduler ──► worker channels (latest_sequence) ──► workers
//!   workers ──► worker channels (completed_sequence) ──► workers
//!   workers ──► submit condvar (barrier finished) ──► scheduler
//!   scheduler ──► completed channel (batch number) ──► client
//! ```
//!
//! Worker channels are cache-line padded; each worker sleeps on its own
//! condvar, so a broadcast wakes exactly the threads that care.
//!
//! # Shutdown
//!
//! Dropping the [`Scheduler`] sets the shutdown flag and joins the
//! scheduler thread, which broadcasts terminate to the workers and joins
//! them. Callers are expected to run [`Scheduler::finish_batches`] first;
//! submitting work during shutdown is unsupported.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use crossbeam_utils::CachePadded;

use super::affinity::pin_worker_best_effort;
use super::job::{
    Barrier, ChunkStats, Combine, Job, JobSpec, SharedJob, TaskFn,
};
use super::metrics::{MetricsSnapshot, WorkerMetricsLocal};
use super::planner::Planner;
use super::timing::TimeModel;
use crate::perf_log::{worker_thread, PerfLog, CLIENT_THREAD};

// ============================================================================
// Configuration
// ============================================================================

/// Scheduler configuration.
#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    /// Number of worker threads. Zero spawns nothing: every operation runs
    /// synchronously on the calling thread.
    pub workers: usize,

    /// Plan chunks identically on every run: ignore timing feedback and
    /// price every work unit at one microsecond. Chunk boundaries then
    /// depend only on the submitted jobs and `workers`.
    pub deterministic: bool,

    /// Batches estimated to finish faster than this run on a single
    /// worker, skipping the cross-worker synchronization.
    pub single_thread_threshold: Duration,

    /// Pin worker `w` to core `w` where the platform allows it.
    pub pin_workers: bool,

    /// Record instant events (combiner runs, broadcasts) per worker.
    /// Only meaningful with the `perf-stats` feature.
    pub log_instant_events: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            deterministic: false,
            single_thread_threshold: Duration::from_micros(30),
            pin_workers: false,
            log_instant_events: false,
        }
    }
}

// ============================================================================
// Shared state
// ============================================================================

/// A batch of jobs submitted by the client, scheduled as one unit.
struct ClientBatch {
    number: u64,
    jobs: Vec<SharedJob>,
    ready_to_schedule: bool,
    scheduled: bool,
}

/// Queue state behind the submission mutex.
struct SubmitState {
    batches: VecDeque<ClientBatch>,
    /// Highest batch number handed out. Batch numbers start at 1.
    client_batch_number: u64,
    shutdown: bool,
    /// Operation/chunk records. Written by the client at submission and
    /// by the scheduler at finalization, both under this mutex.
    op_log: PerfLog,
}

struct SubmitChannel {
    state: Mutex<SubmitState>,
    cv: Condvar,
}

/// Publishes completed client batch numbers to waiting clients.
struct CompletedChannel {
    num: Mutex<u64>,
    cv: Condvar,
}

/// Everything a worker needs to decide when to wake up.
struct WorkerSignal {
    terminate: bool,
    /// Highest barrier sequence the scheduler has published.
    latest_sequence: u64,
    /// Highest barrier sequence all workers have finished.
    completed_sequence: u64,
}

struct WorkerChannel {
    state: Mutex<WorkerSignal>,
    cv: Condvar,
}

impl WorkerChannel {
    fn new() -> Self {
        WorkerChannel {
            state: Mutex::new(WorkerSignal {
                terminate: false,
                latest_sequence: 0,
                completed_sequence: 0,
            }),
            cv: Condvar::new(),
        }
    }
}

struct Shared {
    n_workers: usize,
    submit: SubmitChannel,
    completed: CompletedChannel,
    channels: Vec<CachePadded<WorkerChannel>>,
    /// Instant events recorded by each worker, merged by `merge_log`.
    worker_instants: Vec<CachePadded<Mutex<Vec<(Instant, &'static str)>>>>,
    /// Aggregated worker metrics, filled in at shutdown.
    metrics: Mutex<MetricsSnapshot>,
}

impl Shared {
    /// Tell every worker a new barrier is published.
    fn broadcast_latest(&self, latest: u64) {
        for chan in &self.channels {
            let mut sig = chan.state.lock().expect("worker channel poisoned");
            sig.latest_sequence = sig.latest_sequence.max(latest);
            drop(sig);
            chan.cv.notify_all();
        }
    }

    /// Tell every worker a barrier is complete. Returns true iff the
    /// notifying worker's channel already has a later barrier published,
    /// so it can skip its own wait.
    fn broadcast_completed(&self, completed: u64, notifier: usize) -> bool {
        let mut ready = false;
        for (w, chan) in self.channels.iter().enumerate() {
            let mut sig = chan.state.lock().expect("worker channel poisoned");
            sig.completed_sequence = sig.completed_sequence.max(completed);
            if w == notifier {
                ready = sig.latest_sequence > completed;
            }
            drop(sig);
            chan.cv.notify_all();
        }
        ready
    }

    fn broadcast_terminate(&self) {
        for chan in &self.channels {
            chan.state.lock().expect("worker channel poisoned").terminate = true;
            chan.cv.notify_all();
        }
    }

    fn log_worker_instant(&self, worker: usize, name: &'static str, enabled: bool) {
        if cfg!(feature = "perf-stats") && enabled {
            self.worker_instants[worker]
                .lock()
                .expect("worker instant log poisoned")
                .push((Instant::now(), name));
        }
    }
}

// ============================================================================
// Scheduler (client-facing handle)
// ============================================================================

/// The parallel job scheduler.
///
/// Construct with [`Scheduler::new`] or [`Scheduler::with_workers`];
/// submit operations with [`Scheduler::process_op`]; wait with
/// [`Scheduler::finish_batch`] / [`Scheduler::finish_batches`]. Dropping
/// the scheduler shuts the pool down.
pub struct Scheduler {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(cfg: SchedulerConfig) -> Self {
        let shared = Arc::new(Shared {
            n_workers: cfg.workers,
            submit: SubmitChannel {
                state: Mutex::new(SubmitState {
                    batches: VecDeque::new(),
                    client_batch_number: 0,
                    shutdown: false,
                    op_log: PerfLog::new(),
                }),
                cv: Condvar::new(),
            },
            completed: CompletedChannel {
                num: Mutex::new(0),
                cv: Condvar::new(),
            },
            channels: (0..cfg.workers).map(|_| CachePadded::new(WorkerChannel::new())).collect(),
            worker_instants: (0..cfg.workers)
                .map(|_| CachePadded::new(Mutex::new(Vec::new())))
                .collect(),
            metrics: Mutex::new(MetricsSnapshot::default()),
        });

        let thread = (cfg.workers > 0).then(|| {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("lattice-sched".to_string())
                .spawn(move || SchedLoop::new(shared, cfg).run())
                .expect("failed to spawn scheduler thread")
        });

        Scheduler { shared, thread }
    }

    /// Scheduler with `workers` threads and default knobs.
    pub fn with_workers(workers: usize) -> Self {
        Scheduler::new(SchedulerConfig {
            workers,
            ..SchedulerConfig::default()
        })
    }

    pub fn n_workers(&self) -> usize {
        self.shared.n_workers
    }

    /// Submit an operation.
    ///
    /// The scheduler divides the operation into variable-sized chunks and
    /// load-balances them across workers. Each chunk gets its own clone of
    /// `kernel`; `iterate` drives that clone over the chunk's progress
    /// interval. When the batch is done, `combiner` (if given) folds every
    /// clone back into its original so the caller can read the result.
    ///
    /// `next_point` must snap a requested progress level up to the link's
    /// next legal stop; it is how chunk boundaries stay on whole near
    /// nodes.
    ///
    /// With zero workers the operation runs synchronously here and the
    /// returned batch number is 0. Otherwise the number can be passed to
    /// [`Scheduler::finish_batch`].
    pub fn process_op<K, I, P>(
        &self,
        spec: JobSpec,
        kernel: K,
        iterate: I,
        next_point: P,
        combiner: Option<Combine<K>>,
    ) -> u64
    where
        K: Clone + Send + 'static,
        I: Fn(&mut K, u64, u64) + Send + Sync + 'static,
        P: Fn(u64) -> u64 + Send + 'static,
    {
        if self.shared.n_workers == 0 {
            return self.run_synchronously(spec, kernel, iterate, combiner);
        }

        let end_of_batch = spec.end_of_batch || spec.blocking;
        let blocking = spec.blocking;

        let batch_number = {
            let mut state = self.shared.submit.state.lock().expect("submit channel poisoned");
            assert!(!state.shutdown, "process_op after shutdown began");

            let op_log_id = state.op_log.op_start(
                &spec.link_name,
                &spec.kernel_name,
                spec.max_progress,
                spec.max_progress,
            );
            state.op_log.log_kernels(spec.max_progress);

            let needs_new_batch = state
                .batches
                .back()
                .map_or(true, |b| b.ready_to_schedule);
            if needs_new_batch {
                state.client_batch_number += 1;
                let number = state.client_batch_number;
                state.batches.push_back(ClientBatch {
                    number,
                    jobs: Vec::new(),
                    ready_to_schedule: false,
                    scheduled: false,
                });
            }

            let job = build_job(&spec, op_log_id, kernel, iterate, next_point, combiner);
            let batch = state.batches.back_mut().expect("batch just ensured");
            batch.jobs.push(Arc::new(Mutex::new(job)));
            if end_of_batch {
                batch.ready_to_schedule = true;
            }
            batch.number
        };

        if end_of_batch {
            self.shared.submit.cv.notify_all();
        }
        if blocking {
            self.finish_batches();
        }
        batch_number
    }

    /// Zero-worker fast path: run the whole operation on this thread.
    fn run_synchronously<K, I>(
        &self,
        spec: JobSpec,
        kernel: K,
        iterate: I,
        combiner: Option<Combine<K>>,
    ) -> u64
    where
        K: Clone + Send + 'static,
        I: Fn(&mut K, u64, u64) + Send + Sync + 'static,
    {
        let op_log_id = {
            let mut state = self.shared.submit.state.lock().expect("submit channel poisoned");
            state.op_log.log_kernels(spec.max_progress);
            state.op_log.op_start(
                &spec.link_name,
                &spec.kernel_name,
                spec.max_progress,
                spec.max_progress,
            )
        };

        let start = Instant::now();
        let mut k = kernel;
        iterate(&mut k, 0, spec.max_progress);
        if let Some(c) = combiner {
            let mut original = c.original.lock().expect("combiner target poisoned");
            (c.merge)(&mut original, k);
        }
        let end = Instant::now();

        let mut state = self.shared.submit.state.lock().expect("submit channel poisoned");
        state
            .op_log
            .log_chunk(op_log_id, spec.max_progress, start, end, CLIENT_THREAD);
        0
    }

    /// Block until batch `number` has completed.
    pub fn finish_batch(&self, number: u64) {
        if self.shared.n_workers == 0 {
            return;
        }
        let mut num = self.shared.completed.num.lock().expect("completed channel poisoned");
        while *num < number {
            num = self.shared.completed.cv.wait(num).expect("completed channel poisoned");
        }
    }

    /// Block until every batch submitted so far has completed.
    pub fn finish_batches(&self) {
        let latest = self
            .shared
            .submit
            .state
            .lock()
            .expect("submit channel poisoned")
            .client_batch_number;
        self.finish_batch(latest);
    }

    /// Force-close the pending batch so scheduling can begin without
    /// another submission. Returns false when there is no open batch.
    pub fn end_of_batch(&self) -> bool {
        let closed = {
            let mut state = self.shared.submit.state.lock().expect("submit channel poisoned");
            match state.batches.back_mut() {
                Some(batch) if !batch.ready_to_schedule => {
                    batch.ready_to_schedule = true;
                    true
                }
                _ => false,
            }
        };
        if closed {
            self.shared.submit.cv.notify_all();
        }
        closed
    }

    /// Copy the scheduler's performance records into `dest`. Waits for all
    /// batches first so nothing is mid-flight.
    pub fn merge_log(&self, dest: &mut PerfLog) {
        self.finish_batches();
        let state = self.shared.submit.state.lock().expect("submit channel poisoned");
        dest.merge(&state.op_log);
        drop(state);
        for (w, instants) in self.shared.worker_instants.iter().enumerate() {
            for &(at, name) in instants.lock().expect("worker instant log poisoned").iter() {
                dest.log_instant(at, name, worker_thread(w));
            }
        }
    }

    /// Shut the pool down and return the aggregated worker metrics.
    pub fn shutdown(mut self) -> MetricsSnapshot {
        self.join_scheduler();
        *self.shared.metrics.lock().expect("metrics poisoned")
    }

    fn join_scheduler(&mut self) {
        if let Some(handle) = self.thread.take() {
            self.shared
                .submit
                .state
                .lock()
                .expect("submit channel poisoned")
                .shutdown = true;
            self.shared.submit.cv.notify_all();
            handle.join().expect("scheduler thread panicked");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.join_scheduler();
    }
}

/// Erase the submitter's kernel type into a [`Job`].
///
/// Each task produced by the copier clones the prototype kernel, drives
/// `iterate` with it over the task's interval, and (when a combiner
/// exists) parks the used copy in a shared bin. `combine_all` drains the
/// bin into the original kernel.
fn build_job<K, I, P>(
    spec: &JobSpec,
    op_log_id: usize,
    kernel: K,
    iterate: I,
    next_point: P,
    combiner: Option<Combine<K>>,
) -> Job
where
    K: Clone + Send + 'static,
    I: Fn(&mut K, u64, u64) + Send + Sync + 'static,
    P: Fn(u64) -> u64 + Send + 'static,
{
    let prototype = kernel;
    let iterate = Arc::new(iterate);
    let copies: Arc<Mutex<Vec<K>>> = Arc::new(Mutex::new(Vec::new()));
    let keep_copies = combiner.is_some();

    let copier: Box<dyn FnMut() -> TaskFn + Send> = {
        let copies = Arc::clone(&copies);
        Box::new(move || -> TaskFn {
            let mut k = prototype.clone();
            let iterate = Arc::clone(&iterate);
            let bin = keep_copies.then(|| Arc::clone(&copies));
            Box::new(move |start: u64, end: u64| {
                iterate(&mut k, start, end);
                if let Some(bin) = bin {
                    bin.lock().expect("kernel copy bin poisoned").push(k);
                }
            })
        })
    };

    let combine_all: Box<dyn FnMut() + Send> = match combiner {
        Some(c) => Box::new(move || {
            let mut original = c.original.lock().expect("combiner target poisoned");
            for copy in copies.lock().expect("kernel copy bin poisoned").drain(..) {
                (c.merge)(&mut original, copy);
            }
        }),
        None => Box::new(|| {}),
    };

    Job::new(spec, op_log_id, Box::new(next_point), copier, combine_all)
}

// ============================================================================
// Scheduler thread
// ============================================================================

/// State owned by the scheduler thread alone.
struct SchedLoop {
    shared: Arc<Shared>,
    cfg: SchedulerConfig,
    model: TimeModel,
    /// Highest barrier sequence planned so far.
    sequence: u64,
    /// When the barrier with a mapped sequence finalizes, the mapped
    /// client batch is done.
    sequence_client_map: AHashMap<u64, u64>,
    first_barrier: Arc<Barrier>,
    last_barrier: Arc<Barrier>,
    /// The barrier the scheduler will finalize next.
    sched_barrier: Arc<Barrier>,
}

impl SchedLoop {
    fn new(shared: Arc<Shared>, cfg: SchedulerConfig) -> Self {
        let sentinel = Arc::new(Barrier::sentinel(cfg.workers));
        SchedLoop {
            shared,
            cfg,
            model: TimeModel::new(cfg.deterministic),
            sequence: 0,
            sequence_client_map: AHashMap::new(),
            first_barrier: Arc::clone(&sentinel),
            last_barrier: Arc::clone(&sentinel),
            sched_barrier: sentinel,
        }
    }

    fn run(mut self) {
        let n = self.cfg.workers;
        let mut workers = Vec::with_capacity(n);
        for w in 0..n {
            let shared = Arc::clone(&self.shared);
            let start = Arc::clone(&self.first_barrier);
            let pin = self.cfg.pin_workers;
            let instants = self.cfg.log_instant_events;
            workers.push(
                thread::Builder::new()
                    .name(format!("lattice-worker-{w}"))
                    .spawn(move || {
                        if pin {
                            pin_worker_best_effort(w);
                        }
                        work_loop(w, shared, start, instants)
                    })
                    .expect("failed to spawn worker thread"),
            );
        }

        loop {
            let mut found: Option<(u64, Vec<SharedJob>)> = None;
            let shutdown;
            {
                let mut state = self.shared.submit.state.lock().expect("submit channel poisoned");
                loop {
                    if state.shutdown {
                        break;
                    }
                    if let Some(batch) = state
                        .batches
                        .iter()
                        .find(|b| b.ready_to_schedule && !b.scheduled)
                    {
                        found = Some((batch.number, batch.jobs.clone()));
                        break;
                    }
                    if !self.sched_barrier.finalized.load(Ordering::Acquire)
                        && self.sched_barrier.finished(n)
                    {
                        // done_workers only grows, so re-reading it later
                        // without the lock is fine
                        break;
                    }
                    state = self
                        .shared
                        .submit
                        .cv
                        .wait(state)
                        .expect("submit channel poisoned");
                }
                shutdown = state.shutdown;
            }

            if !self.sched_barrier.finalized.load(Ordering::Acquire)
                && self.sched_barrier.finished(n)
            {
                self.finalize_barrier();
                self.sched_barrier.finalized.store(true, Ordering::Release);
                if let Some(next) = self.sched_barrier.next() {
                    self.sched_barrier = next;
                }
            }

            if shutdown {
                break;
            }
            let Some((batch_number, jobs)) = found else {
                continue;
            };

            self.plan_batch(batch_number, &jobs);

            let mut state = self.shared.submit.state.lock().expect("submit channel poisoned");
            if let Some(batch) = state.batches.iter_mut().find(|b| b.number == batch_number) {
                batch.scheduled = true;
            }
        }

        self.shared.broadcast_terminate();
        let mut snapshot = MetricsSnapshot::default();
        for handle in workers {
            let m = handle.join().expect("worker thread panicked");
            snapshot.merge_worker(&m);
        }
        *self.shared.metrics.lock().expect("metrics poisoned") = snapshot;
        self.final_cleanup();
    }

    /// Plan a client batch into barriers, link and publish them, and map
    /// the last barrier's sequence to the batch number.
    fn plan_batch(&mut self, batch_number: u64, jobs: &[SharedJob]) {
        let planned = Planner {
            model: &mut self.model,
            n_workers: self.cfg.workers,
            single_thread_threshold: self.cfg.single_thread_threshold,
        }
        .plan_all_stages(jobs.to_vec());

        for pb in planned {
            self.sequence += 1;
            let barrier = Arc::new(Barrier::new(
                self.sequence,
                pb.single_threaded,
                pb.jobs,
                pb.slots,
                self.cfg.workers,
            ));
            self.last_barrier.set_next(Arc::clone(&barrier));
            self.last_barrier = barrier;
            self.shared.broadcast_latest(self.sequence);
        }

        for job in jobs {
            let job = job.lock().expect("job poisoned");
            assert_eq!(
                job.progress, job.max_progress,
                "planning must cover job '{}' completely",
                job.kernel_name
            );
        }

        if self.sched_barrier.finalized.load(Ordering::Acquire) {
            if let Some(next) = self.sched_barrier.next() {
                self.sched_barrier = next;
            }
        }

        self.sequence_client_map.insert(self.sequence, batch_number);
    }

    /// Collect timings from the finished barrier, publish the completed
    /// client batch if this barrier ends one, and reclaim what nothing
    /// needs anymore.
    fn finalize_barrier(&mut self) {
        let barrier = Arc::clone(&self.sched_barrier);
        {
            // lock order: submit state, then the slot; workers only lock
            // slots of barriers the scheduler is not finalizing yet
            let mut state = self.shared.submit.state.lock().expect("submit channel poisoned");
            for (w, slot) in barrier.slots.iter().enumerate() {
                let mut batch = slot.lock().expect("worker slot poisoned");
                for s in batch.stats.drain(..) {
                    self.model
                        .track_op(s.op_type, s.end.duration_since(s.start), s.units);
                    state
                        .op_log
                        .log_chunk(s.op_log_id, s.units, s.start, s.end, worker_thread(w));
                }
            }
        }

        if let Some(client) = self.sequence_client_map.remove(&barrier.sequence) {
            let mut num = self.shared.completed.num.lock().expect("completed channel poisoned");
            debug_assert!(*num <= client);
            *num = client;
            drop(num);
            self.shared.completed.cv.notify_all();
        }

        self.cleanup();
    }

    /// Drop our references to barriers before `sched_barrier`; each one is
    /// freed as the last worker moves past it. Erase client batches whose
    /// number is at or below the completed mark.
    fn cleanup(&mut self) {
        self.first_barrier = Arc::clone(&self.sched_barrier);

        let completed = *self.shared.completed.num.lock().expect("completed channel poisoned");
        let mut state = self.shared.submit.state.lock().expect("submit channel poisoned");
        state.batches.retain(|b| b.number > completed);
    }

    /// Sever the barrier chain link by link so the final drop never
    /// recurses through a long chain.
    fn final_cleanup(&mut self) {
        let mut barrier = Arc::clone(&self.first_barrier);
        while let Some(next) = barrier.take_next() {
            barrier = next;
        }
    }
}

// ============================================================================
// Worker loop
// ============================================================================

/// Block until every worker has passed `barrier` and a successor is
/// published, then return the successor. Returns `None` on terminate.
fn wait_for_next_barrier(
    worker: usize,
    shared: &Shared,
    barrier: &Arc<Barrier>,
) -> Option<Arc<Barrier>> {
    let chan = &shared.channels[worker];
    let mut sig = chan.state.lock().expect("worker channel poisoned");
    loop {
        if sig.terminate {
            return None;
        }
        if sig.completed_sequence >= barrier.sequence && sig.latest_sequence > barrier.sequence {
            drop(sig);
            return Some(
                barrier
                    .next()
                    .expect("a published later sequence implies a successor"),
            );
        }
        sig = chan.cv.wait(sig).expect("worker channel poisoned");
    }
}

fn work_loop(
    worker: usize,
    shared: Arc<Shared>,
    start: Arc<Barrier>,
    log_instants: bool,
) -> WorkerMetricsLocal {
    let mut metrics = WorkerMetricsLocal::default();
    let mut barrier = start;
    // set when this worker just notified completion and the next barrier
    // is already published, skipping the channel wait
    let mut skip_wait = false;

    loop {
        if skip_wait {
            barrier = barrier.next().expect("skip_wait implies a successor");
            skip_wait = false;
        } else {
            match wait_for_next_barrier(worker, &shared, &barrier) {
                Some(next) => barrier = next,
                None => break,
            }
        }

        if !barrier.single_threaded {
            let chunks = {
                let mut slot = barrier.slots[worker].lock().expect("worker slot poisoned");
                std::mem::take(&mut slot.pending)
            };
            let mut stats = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                let started = Instant::now();
                (chunk.task)(chunk.start, chunk.end);
                let ended = Instant::now();
                metrics.chunks_executed += 1;
                stats.push(ChunkStats {
                    op_type: chunk.op_type,
                    op_log_id: chunk.op_log_id,
                    units: chunk.end - chunk.start,
                    start: started,
                    end: ended,
                });
            }
            barrier.slots[worker].lock().expect("worker slot poisoned").stats = stats;

            let guard = shared.submit.state.lock().expect("submit channel poisoned");
            shared.log_worker_instant(worker, "acquired-scheduler-lock", log_instants);
            let done = barrier.done_workers.fetch_add(1, Ordering::AcqRel) + 1;
            if done == shared.n_workers {
                // last one through runs every combiner, still holding the
                // submission lock so the scheduler cannot finalize early
                for job in &barrier.jobs {
                    job.lock().expect("job poisoned").run_combiners();
                }
                metrics.combiner_passes += 1;
                shared.log_worker_instant(worker, "ran-combiners", log_instants);
                drop(guard);
                skip_wait = shared.broadcast_completed(barrier.sequence, worker);
                shared.submit.cv.notify_all();
                shared.log_worker_instant(worker, "broadcast-completed", log_instants);
            } else {
                drop(guard);
            }
            metrics.barriers_completed += 1;
        }

        if barrier.single_threaded && !barrier.single_started.load(Ordering::Acquire) {
            let claimed = {
                let _guard = shared.submit.state.lock().expect("submit channel poisoned");
                if barrier.single_started.load(Ordering::Relaxed) {
                    false
                } else {
                    barrier.single_started.store(true, Ordering::Relaxed);
                    true
                }
            };
            if claimed {
                let mut stats = Vec::with_capacity(barrier.jobs.len());
                for job in &barrier.jobs {
                    let (task, max_progress, op_type, op_log_id) = {
                        let mut j = job.lock().expect("job poisoned");
                        (j.make_task(), j.max_progress, j.op_type, j.op_log_id)
                    };
                    let started = Instant::now();
                    task(0, max_progress);
                    job.lock().expect("job poisoned").run_combiners();
                    let ended = Instant::now();
                    metrics.chunks_executed += 1;
                    stats.push(ChunkStats {
                        op_type,
                        op_log_id,
                        units: max_progress,
                        start: started,
                        end: ended,
                    });
                }
                barrier.slots[worker].lock().expect("worker slot poisoned").stats = stats;
                metrics.single_threaded_runs += 1;

                skip_wait = shared.broadcast_completed(barrier.sequence, worker);
                {
                    let _guard = shared.submit.state.lock().expect("submit channel poisoned");
                    barrier.done_workers.store(1, Ordering::Release);
                }
                shared.submit.cv.notify_all();
            }
        }
    }
    metrics
}
