//! Route traces emitted by the dual-lane dispatcher.

use serde::{Deserialize, Serialize};

use crate::syscall::{OpClass, Opcode};

/// One of the two oracle back-ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lane {
    /// Recovery / planner lane.
    P,
    /// Routine / worker lane.
    E,
}

impl Lane {
    pub fn other(&self) -> Lane {
        match self {
            Lane::P => Lane::E,
            Lane::E => Lane::P,
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lane::P => f.write_str("P"),
            Lane::E => f.write_str("E"),
        }
    }
}

/// Why a lane was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    /// Routine context, routine lane.
    Routine,
    /// Trap or blocked context, recovery lane.
    TrapContext,
    /// Preferred lane unhealthy, alternate taken.
    HealthFallback,
    /// Routine lane failed during this call, recovery lane answered.
    Failover,
}

/// Coarse class of the instruction a transition carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionClass {
    /// Only mind ops, or nothing at all.
    Mind,
    Write,
    Navigate,
    Exec,
    Halt,
    Unknown,
}

impl InstructionClass {
    pub fn of(opcode: Opcode) -> Self {
        match opcode {
            Opcode::Write => InstructionClass::Write,
            Opcode::Goto | Opcode::GitLog => InstructionClass::Navigate,
            Opcode::Exec => InstructionClass::Exec,
            Opcode::Halt => InstructionClass::Halt,
            op if op.class() == OpClass::Mind => InstructionClass::Mind,
            _ => InstructionClass::Unknown,
        }
    }
}

/// Audit record of a single dispatcher decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTrace {
    /// Lane whose answer (or final error) was used.
    pub lane: Lane,
    pub preferred: Lane,
    pub reason: RouteReason,
    pub predicted_class: InstructionClass,
    /// `None` when no lane produced a transition.
    pub actual_class: Option<InstructionClass>,
    pub health_p: f64,
    pub health_e: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failover_from: Option<Lane>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RouteTrace {
    pub fn journal_line(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("[ROUTE] {json}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failover_from_serializes_as_lane_letter() {
        let trace = RouteTrace {
            lane: Lane::P,
            preferred: Lane::E,
            reason: RouteReason::Failover,
            predicted_class: InstructionClass::Exec,
            actual_class: Some(InstructionClass::Write),
            health_p: 0.5,
            health_e: 0.3,
            failover_from: Some(Lane::E),
            ok: true,
            error: None,
        };
        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json["failover_from"], "E");
        assert_eq!(json["reason"], "failover");
        assert!(trace.journal_line().starts_with("[ROUTE] {"));
    }

    #[test]
    fn instruction_class_mapping() {
        assert_eq!(InstructionClass::of(Opcode::GitLog), InstructionClass::Navigate);
        assert_eq!(InstructionClass::of(Opcode::Pop), InstructionClass::Mind);
        assert_eq!(Lane::E.other(), Lane::P);
    }
}
