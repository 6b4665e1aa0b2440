//! [`LoopGuard`] – identical-transition detector behind `l1_cache_hit`.
//!
//! Each raw oracle transition is reduced to a 64-bit fingerprint of its
//! canonical JSON.  The guard keeps the last `threshold` fingerprints; when
//! they are all equal the process is replaying the same answer and the
//! scheduler raises `sys://trap/l1_cache_hit`.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use turingos_runtime::loop_guard::LoopGuard;
//! use turingos_types::Transition;
//!
//! let t = Transition::world("retry", json!({"op": "SYS_EXEC", "cmd": "make"}));
//! let mut guard = LoopGuard::new(3);
//! assert!(!guard.record_transition(&t));
//! assert!(!guard.record_transition(&t));
//! assert!(guard.record_transition(&t));
//! guard.reset();
//! assert!(!guard.record_transition(&t));
//! ```

use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use turingos_types::Transition;

#[derive(Debug, Clone)]
pub struct LoopGuard {
    threshold: usize,
    history: VecDeque<u64>,
}

impl LoopGuard {
    /// A `threshold` of 0 disables detection.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            history: VecDeque::with_capacity(threshold),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Record one fingerprint; `true` once the window is full of equal ones.
    pub fn record(&mut self, fingerprint: u64) -> bool {
        if self.threshold == 0 {
            return false;
        }
        self.history.push_back(fingerprint);
        while self.history.len() > self.threshold {
            self.history.pop_front();
        }
        self.is_stuck()
    }

    pub fn record_transition(&mut self, transition: &Transition) -> bool {
        self.record(fingerprint(transition))
    }

    pub fn is_stuck(&self) -> bool {
        if self.threshold == 0 || self.history.len() < self.threshold {
            return false;
        }
        let first = self.history[0];
        self.history.iter().all(|f| *f == first)
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

/// Hash of the transition's serialized form.  `serde_json` maps keep keys
/// sorted, so key order in the oracle's text does not matter.
pub fn fingerprint(transition: &Transition) -> u64 {
    let canonical = serde_json::to_string(transition).unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exec(cmd: &str) -> Transition {
        Transition::world("q", json!({"op": "SYS_EXEC", "cmd": cmd}))
    }

    #[test]
    fn varied_transitions_never_trip() {
        let mut guard = LoopGuard::new(3);
        assert!(!guard.record_transition(&exec("a")));
        assert!(!guard.record_transition(&exec("b")));
        assert!(!guard.record_transition(&exec("a")));
    }

    #[test]
    fn window_slides() {
        let mut guard = LoopGuard::new(3);
        guard.record_transition(&exec("a"));
        guard.record_transition(&exec("b"));
        guard.record_transition(&exec("c"));
        guard.record_transition(&exec("c"));
        assert!(guard.record_transition(&exec("c")));
        // Still stuck on the next repeat.
        assert!(guard.record_transition(&exec("c")));
    }

    #[test]
    fn key_order_does_not_change_fingerprint() {
        let a: Transition =
            serde_json::from_str(r#"{"q_next":"q","world_op":{"op":"SYS_EXEC","cmd":"ls"}}"#).unwrap();
        let b: Transition =
            serde_json::from_str(r#"{"world_op":{"cmd":"ls","op":"SYS_EXEC"},"q_next":"q"}"#).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&exec("pwd")));
    }

    #[test]
    fn zero_threshold_disables() {
        let mut guard = LoopGuard::new(0);
        for _ in 0..5 {
            assert!(!guard.record(7));
        }
    }
}
