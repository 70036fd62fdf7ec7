//! Runtime statistics and the memory probe capability.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Periodic runtime statistics for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Completed encoder windows so far
    pub encoded_window_count: usize,
    /// Total audio fed into the session, in seconds
    pub total_audio_seconds: f64,
    /// Tokens emitted per second over the most recent decode pass
    pub tokens_per_second: f64,
    /// Decode seconds per audio second covered by the most recent pass
    pub real_time_factor: f64,
    /// Peak process memory observed, in gigabytes
    pub peak_memory_gb: f64,
}

/// Capability for reading peak memory use.
///
/// Injected at session construction so statistics never depend on
/// process-global state.
pub trait MemoryProbe: Send + Sync {
    /// Peak memory in gigabytes observed so far.
    fn peak_memory_gb(&self) -> f64;

    /// Probe name for logging.
    fn name(&self) -> &'static str {
        "memory-probe"
    }
}

/// Probe that always reports zero. The default when no probe is supplied.
#[derive(Debug, Default)]
pub struct NullMemoryProbe;

impl MemoryProbe for NullMemoryProbe {
    fn peak_memory_gb(&self) -> f64 {
        0.0
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

/// Probe that tracks the current process's resident set size via `sysinfo`
/// and reports the maximum it has seen.
pub struct ProcessMemoryProbe {
    system: Mutex<sysinfo::System>,
    pid: sysinfo::Pid,
    peak_bytes: AtomicU64,
}

impl ProcessMemoryProbe {
    /// Create a probe for the current process. Returns `None` when the pid
    /// cannot be determined on this platform.
    pub fn new() -> Option<Self> {
        let pid = sysinfo::get_current_pid().ok()?;
        Some(Self {
            system: Mutex::new(sysinfo::System::new()),
            pid,
            peak_bytes: AtomicU64::new(0),
        })
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn peak_memory_gb(&self) -> f64 {
        if let Ok(mut system) = self.system.lock() {
            system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[self.pid]), true);
            if let Some(process) = system.process(self.pid) {
                self.peak_bytes.fetch_max(process.memory(), Ordering::Relaxed);
            }
        }
        self.peak_bytes.load(Ordering::Relaxed) as f64 / 1e9
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_probe_reports_zero() {
        assert_eq!(NullMemoryProbe.peak_memory_gb(), 0.0);
        assert_eq!(NullMemoryProbe.name(), "null");
    }

    #[test]
    fn test_process_probe_is_monotone() {
        let probe = match ProcessMemoryProbe::new() {
            Some(probe) => probe,
            None => return,
        };
        let first = probe.peak_memory_gb();
        let second = probe.peak_memory_gb();
        assert!(second >= first);
        assert!(first >= 0.0);
    }

    #[test]
    fn test_stats_serde_roundtrip() {
        let stats = SessionStats {
            encoded_window_count: 3,
            total_audio_seconds: 12.5,
            tokens_per_second: 40.0,
            real_time_factor: 0.2,
            peak_memory_gb: 1.5,
        };
        let json = serde_json::to_string(&stats).unwrap();
        let back: SessionStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }
}
