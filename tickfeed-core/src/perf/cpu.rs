//! CPU affinity and scheduling for the ingestion thread
//!
//! Pinning keeps the thread's receive buffers and cache records warm in one
//! core's caches; real-time priority keeps it from being preempted between
//! a readiness notification and the drain.

use anyhow::{bail, Result};
use core_affinity::CoreId;
use tracing::{info, warn};

/// Pin the current thread to `core`
///
/// ```no_run
/// use tickfeed_core::perf::cpu::pin_to_core;
/// pin_to_core(2).expect("core 2 not available");
/// ```
pub fn pin_to_core(core: usize) -> Result<()> {
    let available = num_cores();
    if core >= available {
        bail!("Core {} out of range ({} cores available)", core, available);
    }

    if core_affinity::set_for_current(CoreId { id: core }) {
        info!(core, "Pinned thread to CPU core");
        Ok(())
    } else {
        bail!("Failed to pin thread to core {}", core)
    }
}

/// Switch the current thread to `SCHED_FIFO` at `priority`
///
/// Needs `CAP_SYS_NICE` or root.
#[cfg(target_os = "linux")]
pub fn set_realtime_priority(priority: i32) -> Result<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };

    // SAFETY: pid 0 targets the calling thread and `param` outlives the call
    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if rc == 0 {
        info!(priority, "Set thread scheduling to SCHED_FIFO");
        Ok(())
    } else {
        bail!(
            "Failed to set SCHED_FIFO:{} ({}); needs CAP_SYS_NICE or root",
            priority,
            std::io::Error::last_os_error()
        )
    }
}

#[cfg(not(target_os = "linux"))]
pub fn set_realtime_priority(_priority: i32) -> Result<()> {
    warn!("Real-time priority not supported on this platform");
    Ok(())
}

/// Number of cores the process may run on
pub fn num_cores() -> usize {
    core_affinity::get_core_ids()
        .map(|ids| ids.len())
        .unwrap_or(1)
}

/// Pin to `core`, then raise priority if asked; a priority failure is only logged
pub fn optimize_ingest_thread(core: usize, realtime_priority: Option<i32>) -> Result<()> {
    pin_to_core(core)?;

    if let Some(priority) = realtime_priority {
        if let Err(e) = set_realtime_priority(priority) {
            warn!(error = %e, "Continuing without real-time priority");
        }
    }
    Ok(())
}
