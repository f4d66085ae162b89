//! Performance logging.
//!
//! Tracks operation start/end times per chunk, organized by kernel and
//! link identifier, so traces can be exported and inspected after a run.
//!
//! Recording is compiled in only under the `perf-stats` feature; without
//! it every recording call is a no-op and only the always-on kernel tally
//! survives. A logger belongs to one thread: the scheduler, each worker,
//! and the client each write their own and merge at the end, so the hot
//! path never synchronizes.
//!
//! # Trace export
//!
//! [`PerfLog::dump`] writes a Chrome Trace Event JSON array: every chunk
//! becomes a `"ph": "B"` / `"ph": "E"` pair with `pid` 0, `tid` set to the
//! recording thread's number, and `ts` in microseconds since the logger
//! was created. Instant events emit `"ph": "i"`. Load the file with a
//! Chrome Trace viewer (chrome://tracing).

use std::io::{self, Write};
use std::time::Instant;

/// Thread number used for records written by the client thread.
pub const CLIENT_THREAD: usize = 0;
/// Thread number used for records written by the scheduler thread.
pub const SCHED_THREAD: usize = 1;

/// Thread number used for records written by worker `w`.
#[inline]
pub fn worker_thread(w: usize) -> usize {
    w + 2
}

#[derive(Clone, Debug)]
struct ChunkRecord {
    /// Amount of the operation's max progress this chunk accounts for.
    progress: u64,
    start: Instant,
    end: Instant,
    thread: usize,
}

#[derive(Clone, Debug)]
struct OpRecord {
    link_name: String,
    kernel_name: String,
    #[allow(dead_code)]
    max_progress: u64,
    #[allow(dead_code)]
    num_edges: u64,
    chunks: Vec<ChunkRecord>,
}

#[derive(Clone, Debug)]
struct InstantEvent {
    name: &'static str,
    at: Instant,
    thread: usize,
}

/// A per-thread performance log.
pub struct PerfLog {
    origin: Instant,
    total_kernels: u64,
    ops: Vec<OpRecord>,
    instants: Vec<InstantEvent>,
}

impl Default for PerfLog {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfLog {
    pub fn new() -> Self {
        PerfLog {
            origin: Instant::now(),
            total_kernels: 0,
            ops: Vec::new(),
            instants: Vec::new(),
        }
    }

    /// Count kernels executed. Always recorded, feature or not, so release
    /// builds can still report a throughput summary.
    #[inline]
    pub fn log_kernels(&mut self, num_kernels: u64) {
        self.total_kernels += num_kernels;
    }

    /// Kernels counted so far.
    pub fn total_kernels(&self) -> u64 {
        self.total_kernels
    }

    /// Log the start of an operation. The returned id is passed to
    /// [`PerfLog::log_chunk`] for every chunk of the operation.
    ///
    /// `num_edges` is the link's edge count when known; callers pass the
    /// max progress as an approximation otherwise.
    #[inline]
    pub fn op_start(
        &mut self,
        link_name: &str,
        kernel_name: &str,
        max_progress: u64,
        num_edges: u64,
    ) -> usize {
        #[cfg(feature = "perf-stats")]
        {
            let id = self.ops.len();
            self.ops.push(OpRecord {
                link_name: link_name.to_string(),
                kernel_name: kernel_name.to_string(),
                max_progress,
                num_edges,
                chunks: Vec::new(),
            });
            id
        }
        #[cfg(not(feature = "perf-stats"))]
        {
            let _ = (link_name, kernel_name, max_progress, num_edges);
            0
        }
    }

    /// Log a chunk whose start and end times are both known.
    #[inline]
    pub fn log_chunk(&mut self, op_id: usize, progress: u64, start: Instant, end: Instant, thread: usize) {
        #[cfg(feature = "perf-stats")]
        {
            self.ops[op_id].chunks.push(ChunkRecord {
                progress,
                start,
                end,
                thread,
            });
        }
        #[cfg(not(feature = "perf-stats"))]
        {
            let _ = (op_id, progress, start, end, thread);
        }
    }

    /// Log an instant event.
    #[inline]
    pub fn log_instant(&mut self, at: Instant, name: &'static str, thread: usize) {
        #[cfg(feature = "perf-stats")]
        {
            self.instants.push(InstantEvent { name, at, thread });
        }
        #[cfg(not(feature = "perf-stats"))]
        {
            let _ = (at, name, thread);
        }
    }

    /// Fold another logger's records into this one. The other logger keeps
    /// its records; timestamps stay absolute so merged records render on
    /// this logger's timeline.
    pub fn merge(&mut self, other: &PerfLog) {
        self.ops.extend(other.ops.iter().cloned());
        self.instants.extend(other.instants.iter().cloned());
        self.total_kernels += other.total_kernels;
    }

    fn micros_since_origin(&self, t: Instant) -> f64 {
        t.saturating_duration_since(self.origin).as_secs_f64() * 1e6
    }

    /// Write the trace as a Chrome Trace Event JSON array.
    pub fn dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(b"[")?;
        let mut first = true;
        let sep = |out: &mut W, first: &mut bool| -> io::Result<()> {
            if !*first {
                out.write_all(b",\n")?;
            }
            *first = false;
            Ok(())
        };

        for op in &self.ops {
            for chunk in &op.chunks {
                let mut name = String::new();
                name.push_str(&op.kernel_name);
                name.push('@');
                name.push_str(&op.link_name);
                name.push(':');
                name.push_str(&chunk.progress.to_string());

                sep(out, &mut first)?;
                write_event(out, &name, "op", "B", chunk.thread, self.micros_since_origin(chunk.start))?;
                sep(out, &mut first)?;
                write_event(out, &name, "op", "E", chunk.thread, self.micros_since_origin(chunk.end))?;
            }
        }
        for event in &self.instants {
            sep(out, &mut first)?;
            write_event(out, event.name, "broadcast", "i", event.thread, self.micros_since_origin(event.at))?;
        }
        out.write_all(b"]")
    }

    /// One-line throughput summary.
    pub fn summary(&self) -> String {
        let elapsed_ms = self.origin.elapsed().as_secs_f64() * 1e3;
        let per_second = if elapsed_ms > 0.0 {
            self.total_kernels as f64 / elapsed_ms * 1e3
        } else {
            0.0
        };
        format!(
            "Executed {} kernels in {:.4} ms ({:.1} kernels per second)",
            self.total_kernels, elapsed_ms, per_second
        )
    }
}

fn write_event<W: Write>(
    out: &mut W,
    name: &str,
    cat: &str,
    ph: &str,
    tid: usize,
    ts: f64,
) -> io::Result<()> {
    out.write_all(b"{\"name\": \"")?;
    write_json_str(out, name)?;
    write!(out, "\", \"cat\": \"{cat}\", \"ph\": \"{ph}\", \"pid\": 0, \"tid\": {tid}, \"ts\": {ts:.3}}}")
}

/// JSON string escaping for event names.
fn write_json_str<W: Write>(out: &mut W, s: &str) -> io::Result<()> {
    for c in s.chars() {
        match c {
            '"' => out.write_all(b"\\\"")?,
            '\\' => out.write_all(b"\\\\")?,
            '\n' => out.write_all(b"\\n")?,
            '\r' => out.write_all(b"\\r")?,
            '\t' => out.write_all(b"\\t")?,
            c if (c as u32) < 0x20 => write!(out, "\\u{:04x}", c as u32)?,
            c => write!(out, "{c}")?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_tally_is_always_on() {
        let mut log = PerfLog::new();
        log.log_kernels(100);
        log.log_kernels(50);
        assert_eq!(log.total_kernels(), 150);
        assert!(log.summary().contains("150 kernels"));
    }

    #[test]
    fn merge_adds_kernel_counts() {
        let mut a = PerfLog::new();
        let mut b = PerfLog::new();
        a.log_kernels(3);
        b.log_kernels(4);
        a.merge(&b);
        assert_eq!(a.total_kernels(), 7);
    }

    #[test]
    fn dump_is_a_json_array() {
        let log = PerfLog::new();
        let mut buf = Vec::new();
        log.dump(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with('['));
        assert!(text.ends_with(']'));
    }

    #[cfg(feature = "perf-stats")]
    #[test]
    fn chunks_emit_begin_end_pairs() {
        let mut log = PerfLog::new();
        let op = log.op_start("Dense3", "EdgeSum", 12, 12);
        let t0 = Instant::now();
        let t1 = Instant::now();
        log.log_chunk(op, 12, t0, t1, worker_thread(0));
        log.log_instant(t1, "combine", SCHED_THREAD);

        let mut buf = Vec::new();
        log.dump(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\"ph\": \"B\""));
        assert!(text.contains("\"ph\": \"E\""));
        assert!(text.contains("\"ph\": \"i\""));
        assert!(text.contains("EdgeSum@Dense3:12"));
        assert!(text.contains("\"tid\": 2"));
    }

    #[cfg(feature = "perf-stats")]
    #[test]
    fn names_are_json_escaped() {
        let mut log = PerfLog::new();
        let op = log.op_start("l\"ink", "k\\ernel", 1, 1);
        let t = Instant::now();
        log.log_chunk(op, 1, t, t, CLIENT_THREAD);
        let mut buf = Vec::new();
        log.dump(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("k\\\\ernel@l\\\"ink:1"));
    }
}
