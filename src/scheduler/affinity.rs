//! Best-effort CPU pinning for worker threads.
//!
//! Pinning workers 1:1 to cores removes variance from core migration and
//! heterogeneous-core scheduling. It is strictly best-effort: on platforms
//! without per-thread affinity, or when the process's allowed CPU set
//! excludes the requested core (cgroups, containers), pinning fails and
//! the worker runs unpinned.

use std::io;

/// Pin the current thread to a specific CPU core.
///
/// # Errors
///
/// Fails when the platform does not support per-thread affinity or the
/// core is outside the process's allowed set.
#[cfg(target_os = "linux")]
pub fn pin_current_thread_to_core(core: usize) -> io::Result<()> {
    // cpu_set_t is a fixed-size bitmask; indices past it are UB to set
    let capacity = std::mem::size_of::<libc::cpu_set_t>() * 8;
    if core >= capacity {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("core index {core} exceeds cpu_set_t capacity {capacity}"),
        ));
    }
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        let rc = libc::pthread_setaffinity_np(
            libc::pthread_self(),
            std::mem::size_of::<libc::cpu_set_t>(),
            &set,
        );
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
    }
    Ok(())
}

/// Per-thread affinity is not exposed on this platform.
#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread_to_core(_core: usize) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "per-thread CPU affinity is not supported on this platform",
    ))
}

/// Pin worker `w` to core `w`, warning instead of failing.
///
/// Workers beyond the machine's parallelism are left unpinned.
pub fn pin_worker_best_effort(worker: usize) {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(0);
    if worker >= cores {
        return;
    }
    if let Err(e) = pin_current_thread_to_core(worker) {
        if e.kind() != io::ErrorKind::Unsupported {
            eprintln!("WARN: failed to pin worker {worker} to core {worker}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinning_current_thread_is_best_effort() {
        // Either it works or it reports a clean error; never panics.
        let _ = pin_current_thread_to_core(0);
        pin_worker_best_effort(0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn absurd_core_index_is_rejected() {
        let err = pin_current_thread_to_core(1 << 20).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
