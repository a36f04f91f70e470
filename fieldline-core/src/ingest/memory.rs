//! Soft memory ceiling enforcement between chunks.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{Pid, System};

/// Reports the resident memory of the current process.
pub trait MemoryProbe: Send + Sync {
    /// Resident set size in bytes, or `None` when unavailable.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Probe backed by `sysinfo`.
pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn resident_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| process.memory())
    }
}

/// What the guard did after a chunk boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAction {
    /// Below the ceiling, or no ceiling configured.
    Within,
    /// Above the ceiling; buffers were reclaimed and usage dropped back within the margin.
    Reclaimed,
    /// Still above `ceiling × (1 + margin)` after reclamation; slept for the backoff.
    BackedOff,
}

/// Checks resident memory against a soft ceiling.
pub struct MemoryGuard {
    ceiling: u64,
    margin: f64,
    backoff: Duration,
    probe: Arc<dyn MemoryProbe>,
}

impl MemoryGuard {
    pub fn new(ceiling: u64, margin: f64, backoff: Duration, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            ceiling,
            margin,
            backoff,
            probe,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Run the check, calling `reclaim` when over the ceiling.
    pub fn check(&self, reclaim: impl FnOnce()) -> MemoryAction {
        if self.ceiling == 0 {
            return MemoryAction::Within;
        }
        let Some(used) = self.probe.resident_bytes() else {
            return MemoryAction::Within;
        };
        if used <= self.ceiling {
            return MemoryAction::Within;
        }

        reclaim();
        let limit = (self.ceiling as f64 * (1.0 + self.margin)) as u64;
        let after = self.probe.resident_bytes().unwrap_or(used);
        if after <= limit {
            tracing::debug!(used, after, ceiling = self.ceiling, "Reclaimed buffers");
            return MemoryAction::Reclaimed;
        }

        tracing::warn!(
            used = after,
            ceiling = self.ceiling,
            backoff_ms = self.backoff.as_millis() as u64,
            "Memory ceiling exceeded; backing off"
        );
        std::thread::sleep(self.backoff);
        MemoryAction::BackedOff
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Probe returning a scripted sequence of readings, repeating the last.
    pub(crate) struct ScriptedProbe {
        readings: Vec<u64>,
        next: AtomicUsize,
    }

    impl ScriptedProbe {
        pub(crate) fn new(readings: Vec<u64>) -> Self {
            Self {
                readings,
                next: AtomicUsize::new(0),
            }
        }
    }

    impl MemoryProbe for ScriptedProbe {
        fn resident_bytes(&self) -> Option<u64> {
            let idx = self.next.fetch_add(1, Ordering::SeqCst);
            self.readings
                .get(idx)
                .or_else(|| self.readings.last())
                .copied()
        }
    }

    fn guard(readings: Vec<u64>) -> MemoryGuard {
        MemoryGuard::new(
            1_000,
            0.1,
            Duration::from_millis(1),
            Arc::new(ScriptedProbe::new(readings)),
        )
    }

    #[test]
    fn test_within_ceiling() {
        let mut reclaimed = false;
        assert_eq!(guard(vec![500]).check(|| reclaimed = true), MemoryAction::Within);
        assert!(!reclaimed);
    }

    #[test]
    fn test_reclaim_within_margin() {
        let mut reclaimed = false;
        let action = guard(vec![1_500, 1_050]).check(|| reclaimed = true);
        assert_eq!(action, MemoryAction::Reclaimed);
        assert!(reclaimed);
    }

    #[test]
    fn test_backoff_when_still_over_margin() {
        assert_eq!(guard(vec![1_500, 1_400]).check(|| {}), MemoryAction::BackedOff);
    }

    #[test]
    fn test_zero_ceiling_disables() {
        let guard = MemoryGuard::new(
            0,
            0.1,
            Duration::from_millis(1),
            Arc::new(ScriptedProbe::new(vec![u64::MAX])),
        );
        assert_eq!(guard.check(|| {}), MemoryAction::Within);
    }

    #[test]
    fn test_sysinfo_probe_reports_something() {
        let probe = SysinfoProbe::new();
        if let Some(bytes) = probe.resident_bytes() {
            assert!(bytes > 0);
        }
    }
}
