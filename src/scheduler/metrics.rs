//! Per-worker counters, merged after the pool shuts down.
//!
//! Hot-path updates are plain integer ops on a worker-local struct; no
//! atomics, no sharing. The struct is cache-line aligned so that workers
//! holding theirs in contiguous memory never false-share. Aggregation
//! happens once, when the scheduler joins the pool.

/// Counters owned by one worker thread.
#[derive(Clone, Copy, Debug, Default)]
#[repr(align(64))]
pub struct WorkerMetricsLocal {
    /// Chunks executed, including single-threaded whole-job runs.
    pub chunks_executed: u64,
    /// Multi-threaded barriers this worker participated in.
    pub barriers_completed: u64,
    /// Times this worker was the one to run a barrier's combiners.
    pub combiner_passes: u64,
    /// Single-threaded barriers this worker claimed and executed.
    pub single_threaded_runs: u64,
}

/// Aggregated view across all workers.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsSnapshot {
    pub chunks_executed: u64,
    pub barriers_completed: u64,
    pub combiner_passes: u64,
    pub single_threaded_runs: u64,
    pub workers: usize,
}

impl MetricsSnapshot {
    /// Fold one worker's counters into the snapshot.
    pub fn merge_worker(&mut self, m: &WorkerMetricsLocal) {
        self.chunks_executed += m.chunks_executed;
        self.barriers_completed += m.barriers_completed;
        self.combiner_passes += m.combiner_passes;
        self.single_threaded_runs += m.single_threaded_runs;
        self.workers += 1;
    }
}
