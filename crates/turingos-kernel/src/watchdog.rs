//! [`Watchdog`] – per-process progress monitor.
//!
//! The scheduler calls [`Watchdog::tick`] once per turn a process takes and
//! [`Watchdog::heartbeat`] whenever that turn completes a successful world op.
//! A process whose last heartbeat is more than its budget of ticks ago is
//! *stalled*; the scheduler raises `sys://trap/watchdog_nmi` for it.
//!
//! Time is measured in ticks, not wall-clock time, so the same run always
//! trips the watchdog at the same turn.

use std::collections::HashMap;

use turingos_types::Pid;

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Health state reported for a single process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessHealth {
    /// A world op succeeded within the last `budget` ticks.
    Healthy,
    /// No successful world op for `budget` ticks or more.
    Stalled,
}

// ────────────────────────────────────────────────────────────────────────────
// Internal entry
// ────────────────────────────────────────────────────────────────────────────

struct ProcessEntry {
    ticks_since_heartbeat: u32,
    budget: u32,
}

// ────────────────────────────────────────────────────────────────────────────
// Watchdog
// ────────────────────────────────────────────────────────────────────────────

/// # Example
///
/// ```
/// use turingos_kernel::watchdog::{ProcessHealth, Watchdog};
/// use turingos_types::Pid;
///
/// let mut wd = Watchdog::new();
/// wd.register(Pid(1), 2);
/// wd.tick(Pid(1));
/// assert_eq!(wd.health(Pid(1)), ProcessHealth::Healthy);
/// wd.tick(Pid(1));
/// assert_eq!(wd.health(Pid(1)), ProcessHealth::Stalled);
/// wd.heartbeat(Pid(1));
/// assert_eq!(wd.health(Pid(1)), ProcessHealth::Healthy);
/// ```
#[derive(Default)]
pub struct Watchdog {
    processes: HashMap<Pid, ProcessEntry>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pid` with a budget of `budget` ticks.
    ///
    /// Re-registering resets the counter.  A budget of zero disables the
    /// watchdog for that process.
    pub fn register(&mut self, pid: Pid, budget: u32) {
        self.processes.insert(
            pid,
            ProcessEntry {
                ticks_since_heartbeat: 0,
                budget,
            },
        );
    }

    /// Count one tick for `pid`.  No-op for unregistered processes.
    pub fn tick(&mut self, pid: Pid) {
        if let Some(entry) = self.processes.get_mut(&pid) {
            entry.ticks_since_heartbeat = entry.ticks_since_heartbeat.saturating_add(1);
        }
    }

    /// Record progress for `pid`, resetting its counter.
    pub fn heartbeat(&mut self, pid: Pid) {
        if let Some(entry) = self.processes.get_mut(&pid) {
            entry.ticks_since_heartbeat = 0;
        }
    }

    /// Unregistered processes are reported [`ProcessHealth::Healthy`]: the
    /// watchdog only judges what it watches.
    pub fn health(&self, pid: Pid) -> ProcessHealth {
        match self.processes.get(&pid) {
            Some(entry) if entry.budget > 0 && entry.ticks_since_heartbeat >= entry.budget => {
                ProcessHealth::Stalled
            }
            _ => ProcessHealth::Healthy,
        }
    }

    pub fn ticks_since_heartbeat(&self, pid: Pid) -> Option<u32> {
        self.processes.get(&pid).map(|e| e.ticks_since_heartbeat)
    }

    /// All stalled pids, ascending.
    pub fn check_all(&self) -> Vec<Pid> {
        let mut stalled: Vec<Pid> = self
            .processes
            .keys()
            .copied()
            .filter(|pid| self.health(*pid) == ProcessHealth::Stalled)
            .collect();
        stalled.sort();
        stalled
    }

    pub fn unregister(&mut self, pid: Pid) {
        self.processes.remove(&pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_process_is_healthy() {
        let mut wd = Watchdog::new();
        wd.register(Pid(1), 3);
        assert_eq!(wd.health(Pid(1)), ProcessHealth::Healthy);
    }

    #[test]
    fn heartbeat_resets_counter() {
        let mut wd = Watchdog::new();
        wd.register(Pid(1), 2);
        wd.tick(Pid(1));
        wd.heartbeat(Pid(1));
        wd.tick(Pid(1));
        assert_eq!(wd.health(Pid(1)), ProcessHealth::Healthy);
        assert_eq!(wd.ticks_since_heartbeat(Pid(1)), Some(1));
    }

    #[test]
    fn check_all_lists_only_stalled() {
        let mut wd = Watchdog::new();
        wd.register(Pid(1), 1);
        wd.register(Pid(2), 10);
        wd.tick(Pid(1));
        wd.tick(Pid(2));
        assert_eq!(wd.check_all(), vec![Pid(1)]);
    }

    #[test]
    fn zero_budget_never_stalls() {
        let mut wd = Watchdog::new();
        wd.register(Pid(4), 0);
        for _ in 0..100 {
            wd.tick(Pid(4));
        }
        assert_eq!(wd.health(Pid(4)), ProcessHealth::Healthy);
    }

    #[test]
    fn unknown_pids_are_ignored() {
        let mut wd = Watchdog::new();
        wd.tick(Pid(9));
        wd.heartbeat(Pid(9));
        assert_eq!(wd.health(Pid(9)), ProcessHealth::Healthy);
        assert_eq!(wd.ticks_since_heartbeat(Pid(9)), None);
    }

    #[test]
    fn unregister_and_reregister() {
        let mut wd = Watchdog::new();
        wd.register(Pid(1), 1);
        wd.tick(Pid(1));
        assert_eq!(wd.health(Pid(1)), ProcessHealth::Stalled);
        wd.register(Pid(1), 1);
        assert_eq!(wd.health(Pid(1)), ProcessHealth::Healthy);
        wd.unregister(Pid(1));
        assert!(wd.check_all().is_empty());
    }
}
