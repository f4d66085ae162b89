//! Barrier planning: splitting a client batch into balanced chunk lists.
//!
//! The metaphor is pouring water. Each job is a bucket whose volume is its
//! estimated duration; a barrier is a trough with one column per worker.
//! [`Planner::pour_water`] fills the columns to a common level
//! (`total / n_workers`), splitting a bucket mid-pour when a column fills
//! up. Split points come from the job's next-progress-point function, so
//! they always land on near-node boundaries.
//!
//! Two rules bound the estimate error:
//!
//! - the last worker takes everything left, so a barrier always covers its
//!   jobs completely;
//! - a batch whose total estimate is below the single-thread threshold is
//!   routed to one worker, since cross-worker synchronization would cost
//!   more than it buys.
//!
//! Jobs sharing a component id may race on per-node data, so
//! [`Planner::select_water`] never puts two of them in the same barrier;
//! the leftovers wait for the next round.

use std::time::Duration;

use ahash::AHashSet;

use super::job::{Job, JobChunk, SharedJob};
use super::timing::TimeModel;

/// A planned barrier, not yet linked into the barrier chain.
pub(crate) struct PlannedBarrier {
    pub single_threaded: bool,
    pub jobs: Vec<SharedJob>,
    /// Per-worker chunk lists. Empty for single-threaded barriers, whose
    /// executor builds its tasks itself.
    pub slots: Vec<Vec<JobChunk>>,
}

/// Stateless planning pass over one client batch.
pub(crate) struct Planner<'a> {
    pub model: &'a mut TimeModel,
    pub n_workers: usize,
    pub single_thread_threshold: Duration,
}

impl Planner<'_> {
    /// Split a client batch into one or more barriers covering every job
    /// completely.
    pub fn plan_all_stages(&mut self, mut jobs: Vec<SharedJob>) -> Vec<PlannedBarrier> {
        for job in &jobs {
            self.model.ensure_entry(job.lock().expect("job poisoned").op_type);
        }

        let mut barriers = Vec::new();
        while !jobs.is_empty() {
            let (water, total) = self.select_water(&mut jobs);
            if total < self.single_thread_threshold {
                barriers.push(self.single_threaded_schedule(water));
            } else {
                barriers.push(self.pour_water(water, total));
            }
        }
        barriers
    }

    /// Pick a maximal prefix-greedy subset with distinct component ids,
    /// removing it from `jobs`. Returns the subset and its total estimated
    /// duration.
    fn select_water(&mut self, jobs: &mut Vec<SharedJob>) -> (Vec<SharedJob>, Duration) {
        let mut component_ids = AHashSet::new();
        let mut water = Vec::new();
        let mut total = Duration::ZERO;

        let mut i = 0;
        while i < jobs.len() {
            let (component, op_type, max_progress) = {
                let job = jobs[i].lock().expect("job poisoned");
                (job.component, job.op_type, job.max_progress)
            };
            if component_ids.insert(component) {
                total += self.model.estimate_time(op_type, max_progress);
                water.push(jobs.remove(i));
            } else {
                i += 1;
            }
        }
        (water, total)
    }

    /// All jobs go to whichever worker claims the barrier first; chunk
    /// tasks are built by the executor. Progress is marked fully assigned
    /// here, since the barrier covers each job end to end.
    fn single_threaded_schedule(&mut self, water: Vec<SharedJob>) -> PlannedBarrier {
        for job in &water {
            let mut job = job.lock().expect("job poisoned");
            job.progress = job.max_progress;
        }
        PlannedBarrier {
            single_threaded: true,
            jobs: water,
            slots: Vec::new(),
        }
    }

    /// Distribute the water across worker columns of roughly equal
    /// estimated height.
    fn pour_water(&mut self, water: Vec<SharedJob>, total: Duration) -> PlannedBarrier {
        let mut slots: Vec<Vec<JobChunk>> = (0..self.n_workers).map(|_| Vec::new()).collect();
        let water_level = total / self.n_workers as u32;

        let mut bucket = 0usize;
        for (i, column_chunks) in slots.iter_mut().enumerate() {
            let mut column = Duration::ZERO;
            while bucket < water.len() {
                let mut job = water[bucket].lock().expect("job poisoned");
                let estimate = self.model.estimate_time(job.op_type, job.remaining());
                let new_height = column + estimate;
                if new_height < water_level || i == self.n_workers - 1 {
                    // pour the whole bucket; the last worker takes all
                    // remaining jobs regardless of level
                    column = new_height;
                    self.assign_job(&mut job, column_chunks, Duration::ZERO);
                    bucket += 1;
                } else {
                    // pour as much of the bucket as fits
                    let available = water_level - column;
                    column += self.assign_job(&mut job, column_chunks, available);
                    if job.progress == job.max_progress {
                        bucket += 1;
                    }
                    break;
                }
            }
        }
        debug_assert_eq!(bucket, water.len(), "last worker must drain every bucket");

        PlannedBarrier {
            single_threaded: false,
            jobs: water,
            slots,
        }
    }

    /// Cut one chunk off `job` aiming at `desired` duration (zero means
    /// the whole remainder) and append it to `chunks`. Returns the
    /// estimated duration of what was actually assigned, which can exceed
    /// `desired` because the endpoint snaps up to a near-node boundary.
    fn assign_job(
        &mut self,
        job: &mut Job,
        chunks: &mut Vec<JobChunk>,
        desired: Duration,
    ) -> Duration {
        let assigned = if job.indivisible || desired.is_zero() {
            job.remaining()
        } else {
            let units = self.model.estimate_ops(job.op_type, desired);
            let snapped = job.next_progress_point(job.progress + units) - job.progress;
            snapped.min(job.remaining())
        };

        let start = job.progress;
        let end = start + assigned;
        chunks.push(JobChunk {
            task: job.make_task(),
            start,
            end,
            op_type: job.op_type,
            op_log_id: job.op_log_id,
        });
        job.progress = end;
        self.model.estimate_time(job.op_type, assigned)
    }
}
