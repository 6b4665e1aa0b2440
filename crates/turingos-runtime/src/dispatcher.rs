//! [`DispatcherOracle`] – two oracle lanes behind one [`Oracle`].
//!
//! Lane `E` handles routine context; lane `P` handles recovery (traps,
//! blocked states, rejected halts).  Routing per call:
//!
//! 1. Classify `q + s`: any trap marker prefers `P`, otherwise `E`.
//! 2. If the preferred lane's health is below `health_floor` and the other
//!    lane beats it by at least `health_margin`, take the other lane.
//! 3. If `E` fails, retry the same call on `P` (never the reverse).
//!
//! Health per lane is `(successes + 1) / (attempts + 2)` minus a penalty of
//! `0.1` per consecutive failure, capped at `0.3`.  Every call leaves exactly
//! one [`RouteTrace`], drained by the tick engine into the journal.

use async_trait::async_trait;
use tracing::{debug, info, warn};
use turingos_kernel::abi::peek_opcode;
use turingos_middleware::EventBus;
use turingos_types::{Event, EventPayload, InstructionClass, Lane, RouteReason, RouteTrace, Transition};

use crate::oracle::{CollapseOptions, Oracle, OracleError};

/// Substrings of `q + s` that mark recovery context.
pub const TRAP_MARKERS: [&str; 6] = [
    "sys://trap/",
    "[TRAP]",
    "BLOCKED",
    "[HALT_REJECTED]",
    "[FATAL]",
    "PANIC",
];

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneHealth {
    pub attempts: u32,
    pub successes: u32,
    pub consecutive_failures: u32,
}

impl LaneHealth {
    pub fn score(&self) -> f64 {
        let base = f64::from(self.successes + 1) / f64::from(self.attempts + 2);
        let penalty = (0.1 * f64::from(self.consecutive_failures)).min(0.3);
        base - penalty
    }

    fn record(&mut self, ok: bool) {
        self.attempts += 1;
        if ok {
            self.successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
    }
}

/// Owned per dispatcher; lanes never share health across dispatchers.
#[derive(Debug, Clone, Default)]
pub struct HealthTracker {
    p: LaneHealth,
    e: LaneHealth,
}

impl HealthTracker {
    pub fn lane(&self, lane: Lane) -> &LaneHealth {
        match lane {
            Lane::P => &self.p,
            Lane::E => &self.e,
        }
    }

    pub fn score(&self, lane: Lane) -> f64 {
        self.lane(lane).score()
    }

    pub fn record(&mut self, lane: Lane, ok: bool) {
        match lane {
            Lane::P => self.p.record(ok),
            Lane::E => self.e.record(ok),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────────────────

pub fn is_trap_context(q: &str, s: &str) -> bool {
    TRAP_MARKERS.iter().any(|m| q.contains(m) || s.contains(m))
}

/// Guess the class of the next instruction from context alone.
pub fn predict_class(q: &str, s: &str) -> InstructionClass {
    if s.contains("[HALT_REJECTED]") {
        InstructionClass::Write
    } else if s.contains("[PAGE_TABLE_SUMMARY]") || is_trap_context(q, s) {
        InstructionClass::Navigate
    } else {
        let upper = q.to_uppercase();
        if upper.contains("HALT") || upper.contains("DONE") {
            InstructionClass::Halt
        } else {
            InstructionClass::Exec
        }
    }
}

/// Class of the world slot a transition carries, without validating it.
pub fn actual_class(transition: &Transition) -> InstructionClass {
    let world = if transition.is_vliw() {
        transition.world_op.as_ref()
    } else {
        transition.a_t.as_ref()
    };
    match world.filter(|v| !v.is_null()) {
        Some(raw) => peek_opcode(raw)
            .map(InstructionClass::of)
            .unwrap_or(InstructionClass::Unknown),
        None => InstructionClass::Mind,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatcherConfig {
    pub health_floor: f64,
    pub health_margin: f64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            health_floor: 0.45,
            health_margin: 0.15,
        }
    }
}

pub struct DispatcherOracle {
    planner: Box<dyn Oracle>,
    routine: Box<dyn Oracle>,
    health: HealthTracker,
    config: DispatcherConfig,
    traces: Vec<RouteTrace>,
    bus: Option<EventBus>,
}

impl DispatcherOracle {
    /// `planner` serves lane `P`, `routine` serves lane `E`.
    pub fn new(planner: Box<dyn Oracle>, routine: Box<dyn Oracle>, config: DispatcherConfig) -> Self {
        Self {
            planner,
            routine,
            health: HealthTracker::default(),
            config,
            traces: Vec::new(),
            bus: None,
        }
    }

    /// Also publish every trace on `bus` ([`Topic::Routing`][turingos_middleware::Topic]).
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    fn oracle(&mut self, lane: Lane) -> &mut Box<dyn Oracle> {
        match lane {
            Lane::P => &mut self.planner,
            Lane::E => &mut self.routine,
        }
    }

    fn choose(&self, preferred: Lane) -> (Lane, RouteReason) {
        let base_reason = match preferred {
            Lane::P => RouteReason::TrapContext,
            Lane::E => RouteReason::Routine,
        };
        let own = self.health.score(preferred);
        let other = self.health.score(preferred.other());
        if own < self.config.health_floor && other - own >= self.config.health_margin {
            (preferred.other(), RouteReason::HealthFallback)
        } else {
            (preferred, base_reason)
        }
    }

    fn record_trace(&mut self, trace: RouteTrace) {
        debug!(lane = %trace.lane, reason = ?trace.reason, ok = trace.ok, "route recorded");
        if let Some(bus) = &self.bus {
            let event = Event::new("turingos-runtime::dispatcher", EventPayload::Route(trace.clone()));
            let _ = bus.publish(event);
        }
        self.traces.push(trace);
    }
}

#[async_trait]
impl Oracle for DispatcherOracle {
    async fn collapse(
        &mut self,
        discipline: &str,
        q: &str,
        s: &str,
        options: &CollapseOptions,
    ) -> Result<Transition, OracleError> {
        let preferred = if is_trap_context(q, s) { Lane::P } else { Lane::E };
        let (lane, reason) = self.choose(preferred);
        let mut trace = RouteTrace {
            lane,
            preferred,
            reason,
            predicted_class: predict_class(q, s),
            actual_class: None,
            health_p: self.health.score(Lane::P),
            health_e: self.health.score(Lane::E),
            failover_from: None,
            ok: false,
            error: None,
        };

        let first = self.oracle(lane).collapse(discipline, q, s, options).await;
        self.health.record(lane, first.is_ok());
        let result = match first {
            Ok(transition) => Ok(transition),
            Err(err) if lane == Lane::E => {
                warn!(error = %err, "routine lane failed; failing over to recovery lane");
                trace.lane = Lane::P;
                trace.reason = RouteReason::Failover;
                trace.failover_from = Some(Lane::E);
                let second = self.oracle(Lane::P).collapse(discipline, q, s, options).await;
                self.health.record(Lane::P, second.is_ok());
                second.map_err(|e| OracleError::AllLanesFailed(format!("E: {err}; P: {e}")))
            }
            Err(err) => Err(err),
        };

        match &result {
            Ok(transition) => {
                trace.ok = true;
                trace.actual_class = Some(actual_class(transition));
            }
            Err(err) => {
                info!(lane = %trace.lane, error = %err, "dispatcher call failed");
                trace.error = Some(err.to_string());
            }
        }
        self.record_trace(trace);
        result
    }

    fn drain_traces(&mut self) -> Vec<RouteTrace> {
        std::mem::take(&mut self.traces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ScriptedOracle;
    use serde_json::json;
    use turingos_middleware::Topic;

    fn write_transition() -> Transition {
        Transition::world("wrote", json!({"op": "SYS_WRITE", "payload": "x"}))
    }

    fn boxed(script: Vec<Result<Transition, OracleError>>) -> Box<dyn Oracle> {
        Box::new(ScriptedOracle::new(script))
    }

    #[test]
    fn fresh_lane_health_is_one_half() {
        let tracker = HealthTracker::default();
        assert_eq!(tracker.score(Lane::P), 0.5);
        assert_eq!(tracker.score(Lane::E), 0.5);
    }

    #[test]
    fn failure_penalty_is_capped() {
        let mut health = LaneHealth::default();
        for _ in 0..6 {
            health.record(false);
        }
        // 1/8 - 0.3
        assert!((health.score() - (0.125 - 0.3)).abs() < 1e-9);
        health.record(true);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[test]
    fn classification() {
        assert!(is_trap_context("q", "[TRAP] sys://trap/cpu_fault"));
        assert!(is_trap_context("task BLOCKED", ""));
        assert!(!is_trap_context("scan", "[DIR] ."));
        assert_eq!(predict_class("q", "[HALT_REJECTED] exit_code=1"), InstructionClass::Write);
        assert_eq!(predict_class("q", "[PAGE_TABLE_SUMMARY]"), InstructionClass::Navigate);
        assert_eq!(predict_class("all done", "[DIR] ."), InstructionClass::Halt);
        assert_eq!(predict_class("build it", "[DIR] ."), InstructionClass::Exec);
    }

    #[test]
    fn actual_class_reads_world_slot() {
        assert_eq!(actual_class(&write_transition()), InstructionClass::Write);
        let legacy = Transition {
            q_next: "q".into(),
            a_t: Some(json!({"op": "SYS_PUSH", "task": "t"})),
            ..Transition::default()
        };
        assert_eq!(actual_class(&legacy), InstructionClass::Mind);
        let bogus = Transition::world("q", json!({"op": "SYS_FLY"}));
        assert_eq!(actual_class(&bogus), InstructionClass::Unknown);
    }

    #[tokio::test]
    async fn routine_failure_fails_over_to_recovery_lane() {
        let mut dispatcher = DispatcherOracle::new(
            boxed(vec![Ok(write_transition())]),
            boxed(vec![Err(OracleError::Transport("503".into()))]),
            DispatcherConfig::default(),
        );
        let t = dispatcher
            .collapse("", "build it", "[DIR] .", &CollapseOptions::default())
            .await
            .unwrap();
        assert_eq!(t.q_next, "wrote");

        let traces = dispatcher.drain_traces();
        assert_eq!(traces.len(), 1);
        let trace = &traces[0];
        assert_eq!(trace.preferred, Lane::E);
        assert_eq!(trace.lane, Lane::P);
        assert_eq!(trace.reason, RouteReason::Failover);
        assert_eq!(trace.failover_from, Some(Lane::E));
        assert_eq!(trace.actual_class, Some(InstructionClass::Write));
        assert!(trace.ok);
        assert!(trace.journal_line().contains("\"failover_from\":\"E\""));
        assert!(dispatcher.drain_traces().is_empty());
    }

    #[tokio::test]
    async fn recovery_lane_never_fails_over() {
        let mut dispatcher = DispatcherOracle::new(
            boxed(vec![Err(OracleError::Transport("down".into()))]),
            boxed(vec![Ok(write_transition())]),
            DispatcherConfig::default(),
        );
        let err = dispatcher
            .collapse("", "q", "[TRAP] sys://trap/page_fault", &CollapseOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::Transport(_)));
        let trace = &dispatcher.drain_traces()[0];
        assert_eq!(trace.lane, Lane::P);
        assert_eq!(trace.reason, RouteReason::TrapContext);
        assert!(!trace.ok);
        assert!(trace.failover_from.is_none());
        assert_eq!(dispatcher.health().lane(Lane::E).attempts, 0);
    }

    #[tokio::test]
    async fn both_lanes_failing_is_reported() {
        let mut dispatcher = DispatcherOracle::new(
            boxed(vec![Err(OracleError::Transport("p".into()))]),
            boxed(vec![Err(OracleError::Transport("e".into()))]),
            DispatcherConfig::default(),
        );
        let err = dispatcher
            .collapse("", "q", "s", &CollapseOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::AllLanesFailed(_)));
        let trace = &dispatcher.drain_traces()[0];
        assert_eq!(trace.failover_from, Some(Lane::E));
        assert!(trace.error.is_some());
    }

    #[tokio::test]
    async fn unhealthy_preferred_lane_falls_back() {
        let mut dispatcher = DispatcherOracle::new(
            boxed(vec![Ok(write_transition()), Ok(write_transition())]),
            boxed(vec![Err(OracleError::Transport("e".into()))]),
            DispatcherConfig::default(),
        );
        let opts = CollapseOptions::default();
        dispatcher.collapse("", "q", "s", &opts).await.unwrap();
        // E is now 1/3 - 0.1, P is 2/3.
        dispatcher.collapse("", "q", "s", &opts).await.unwrap();
        let traces = dispatcher.drain_traces();
        assert_eq!(traces[1].preferred, Lane::E);
        assert_eq!(traces[1].lane, Lane::P);
        assert_eq!(traces[1].reason, RouteReason::HealthFallback);
        assert!(traces[1].health_e < traces[1].health_p);
    }

    #[tokio::test]
    async fn traces_reach_the_routing_topic() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Routing);
        let mut dispatcher = DispatcherOracle::new(
            boxed(vec![]),
            boxed(vec![Ok(write_transition())]),
            DispatcherConfig::default(),
        )
        .with_bus(bus);
        dispatcher
            .collapse("", "q", "s", &CollapseOptions::default())
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event.payload, EventPayload::Route(RouteTrace { lane: Lane::E, .. })));
    }
}
