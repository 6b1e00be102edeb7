//! Process memory headroom checks.
//!
//! Large binary transfers are gated on a sampled view of the process's
//! resident set size against a configured budget. The check is a
//! point-in-time read, not continuous monitoring, so a gating decision
//! can be stale by the time the payload actually moves; the absolute
//! write ceiling in the store client is the invariant that holds
//! regardless.

use std::sync::atomic::{AtomicBool, Ordering};

/// Sampled memory-headroom signal consulted before large transfers.
pub trait MemoryMonitor: Send + Sync + 'static {
    /// Whether the process currently has room for a large payload.
    fn has_headroom(&self) -> bool;
}

/// Monitor backed by the process's own RSS counter.
///
/// A budget of 0 means unlimited, as with the storage size caps. When
/// RSS cannot be read (non-Linux platforms, procfs missing), the
/// monitor reports headroom; the gate is an approximation, not a hard
/// guarantee.
#[derive(Debug)]
pub struct ProcessMemoryMonitor {
    budget_bytes: u64,
}

impl ProcessMemoryMonitor {
    pub fn new(budget_bytes: u64) -> Self {
        Self { budget_bytes }
    }

    /// Resident set size in bytes, if the platform exposes it.
    #[cfg(target_os = "linux")]
    pub fn rss_bytes() -> Option<u64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_rss(&status)
    }

    /// Resident set size in bytes, if the platform exposes it.
    #[cfg(not(target_os = "linux"))]
    pub fn rss_bytes() -> Option<u64> {
        None
    }
}

impl MemoryMonitor for ProcessMemoryMonitor {
    fn has_headroom(&self) -> bool {
        if self.budget_bytes == 0 {
            return true;
        }
        match Self::rss_bytes() {
            Some(rss) => rss < self.budget_bytes,
            None => true,
        }
    }
}

/// Parse the `VmRSS:` line of `/proc/self/status` (value is in kB).
fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line
        .split_whitespace()
        .nth(1)
        .and_then(|v| v.parse().ok())?;
    Some(kb * 1024)
}

/// A monitor with a fixed answer, switchable at runtime. Used by tests
/// and by hosts that feed an external health signal.
#[derive(Debug)]
pub struct StaticMemoryMonitor {
    headroom: AtomicBool,
}

impl StaticMemoryMonitor {
    pub fn new(headroom: bool) -> Self {
        Self {
            headroom: AtomicBool::new(headroom),
        }
    }

    pub fn set_headroom(&self, headroom: bool) {
        self.headroom.store(headroom, Ordering::SeqCst);
    }
}

impl MemoryMonitor for StaticMemoryMonitor {
    fn has_headroom(&self) -> bool {
        self.headroom.load(Ordering::SeqCst)
    }
}

// -- Tests --------------------------------------------------------------------
