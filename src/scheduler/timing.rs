//! Adaptive per-operation throughput model.
//!
//! The scheduler plans chunk sizes in time units but assigns them in work
//! units, so it needs a conversion in both directions. Each operation type
//! (a kernel/link-iteration combination, identified by [`OpTypeId`]) gets
//! a running total of observed time and work; the ratio is cached after
//! every update.
//!
//! In deterministic mode the model is bypassed entirely: both conversions
//! behave as though one work unit costs exactly one microsecond and
//! observations are discarded. Planning then depends only on the submitted
//! jobs and the worker count, which makes chunk boundaries reproducible
//! across runs.

use std::time::Duration;

use ahash::AHashMap;

use super::job::OpTypeId;

/// Total time and work observed for one operation type.
///
/// `total_ops` starts at 1 so the ratio is defined before the first
/// observation.
#[derive(Clone, Copy, Debug)]
struct Throughput {
    total_time: Duration,
    total_ops: u64,
    per_op_us: f64,
}

impl Default for Throughput {
    fn default() -> Self {
        Throughput {
            total_time: Duration::ZERO,
            total_ops: 1,
            per_op_us: 1.0,
        }
    }
}

/// Time/work conversion keyed by operation type.
pub struct TimeModel {
    deterministic: bool,
    by_op: AHashMap<OpTypeId, Throughput>,
}

impl TimeModel {
    pub fn new(deterministic: bool) -> Self {
        TimeModel {
            deterministic,
            by_op: AHashMap::new(),
        }
    }

    /// Insert a default entry for a not-yet-seen operation type. Called
    /// before planning so estimates never hit a missing key.
    pub fn ensure_entry(&mut self, op: OpTypeId) {
        self.by_op.entry(op).or_default();
    }

    /// Record an executed chunk: `ops` work units took `elapsed`.
    pub fn track_op(&mut self, op: OpTypeId, elapsed: Duration, ops: u64) {
        if self.deterministic {
            return;
        }
        let tracker = self
            .by_op
            .get_mut(&op)
            .expect("operation type must be registered before tracking");
        tracker.total_time += elapsed;
        tracker.total_ops += ops;
        if tracker.total_ops > 0 {
            tracker.per_op_us =
                tracker.total_time.as_secs_f64() * 1e6 / tracker.total_ops as f64;
        }
    }

    /// Expected duration of `ops` work units.
    pub fn estimate_time(&self, op: OpTypeId, ops: u64) -> Duration {
        if self.deterministic {
            return Duration::from_micros(ops);
        }
        let tracker = self
            .by_op
            .get(&op)
            .expect("operation type must be registered before estimating");
        Duration::from_micros((tracker.per_op_us * ops as f64) as u64)
    }

    /// Work units expected to fit in `time`. Never returns 0.
    pub fn estimate_ops(&self, op: OpTypeId, time: Duration) -> u64 {
        let micros = time.as_secs_f64() * 1e6;
        let estimate = if self.deterministic {
            micros
        } else {
            let tracker = self
                .by_op
                .get(&op)
                .expect("operation type must be registered before estimating");
            micros / tracker.per_op_us
        };
        (estimate as u64).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OP: OpTypeId = OpTypeId(7);

    #[test]
    fn cold_entry_assumes_one_microsecond_per_op() {
        let mut model = TimeModel::new(false);
        model.ensure_entry(OP);
        assert_eq!(model.estimate_time(OP, 50), Duration::from_micros(50));
        assert_eq!(model.estimate_ops(OP, Duration::from_micros(50)), 50);
    }

    #[test]
    fn tracking_updates_the_ratio() {
        let mut model = TimeModel::new(false);
        model.ensure_entry(OP);
        // 1000 ops in 4 ms: 4 us per op (the +1 initial op barely shifts it)
        model.track_op(OP, Duration::from_millis(4), 1000);
        let est = model.estimate_time(OP, 500);
        assert!(est > Duration::from_micros(1900) && est < Duration::from_micros(2100));
        let ops = model.estimate_ops(OP, Duration::from_millis(2));
        assert!((450..=550).contains(&ops));
    }

    #[test]
    fn estimate_ops_never_returns_zero() {
        let mut model = TimeModel::new(false);
        model.ensure_entry(OP);
        model.track_op(OP, Duration::from_millis(10), 1);
        assert_eq!(model.estimate_ops(OP, Duration::from_nanos(1)), 1);
    }

    #[test]
    fn deterministic_mode_ignores_observations() {
        let mut model = TimeModel::new(true);
        model.ensure_entry(OP);
        model.track_op(OP, Duration::from_secs(10), 1);
        assert_eq!(model.estimate_time(OP, 30), Duration::from_micros(30));
        assert_eq!(model.estimate_ops(OP, Duration::from_micros(30)), 30);
    }
}
