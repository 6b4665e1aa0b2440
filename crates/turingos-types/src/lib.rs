//! `turingos-types` – shared vocabulary of the TuringOS agent kernel.
//!
//! - [`syscall`] – the closed instruction set ([`Syscall`], [`Opcode`]).
//! - [`transition`] – raw oracle output for one tick ([`Transition`]).
//! - [`process`] – PCB states, roles, registers and [`TrapFrame`]s.
//! - [`pointer`] – the manifold pointer grammar ([`Pointer`]).
//! - [`route`] – dual-lane dispatcher audit records ([`RouteTrace`]).
//!
//! The [`Event`] envelope and the crate-spanning [`TuringError`] live here so
//! every other crate can publish to the bus without depending on the runtime.

pub mod pointer;
pub mod process;
pub mod route;
pub mod syscall;
pub mod transition;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use pointer::{Access, Pointer, PointerError};
pub use process::{Pid, ProcessState, Registers, Role, TRAP_PREFIX, TrapFrame, TrapKind};
pub use route::{InstructionClass, Lane, RouteReason, RouteTrace};
pub use syscall::{GitLogQuery, OpClass, Opcode, Syscall, TargetPos, TaskStatus};
pub use transition::Transition;

/// Unified event wrapper for the kernel event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"turingos-runtime::scheduler"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the kernel event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    ProcessSpawned {
        pid: Pid,
        ppid: Option<Pid>,
        role: Role,
    },
    StateChanged {
        pid: Pid,
        from: ProcessState,
        to: ProcessState,
    },
    Trap {
        pid: Pid,
        frame: TrapFrame,
    },
    Route(RouteTrace),
    MapFanOut {
        parent: Pid,
        children: Vec<Pid>,
    },
    ReduceJoin {
        parent: Pid,
        joined: Vec<Pid>,
    },
    HaltVerdict {
        pid: Pid,
        passed: bool,
        feedback: String,
    },
    /// One line that was engraved into the journal.
    JournalLine(String),
}

/// Global error type spanning protocol, oracle, environment and journal failures.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum TuringError {
    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Oracle failure: {0}")]
    Oracle(String),

    #[error("Environment fault on {pointer}: {details}")]
    Environment { pointer: String, details: String },

    #[error("Journal failure: {0}")]
    Journal(String),

    #[error("No such process: {0}")]
    NoSuchProcess(Pid),

    #[error("Event bus channel error: {0}")]
    Channel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "turingos-runtime::scheduler",
            EventPayload::MapFanOut {
                parent: Pid(1),
                children: vec![Pid(2), Pid(3)],
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(back.source, "turingos-runtime::scheduler");
    }

    #[test]
    fn turing_error_display() {
        let err = TuringError::Environment {
            pointer: "notes.md".into(),
            details: "EACCES".into(),
        };
        assert!(err.to_string().contains("notes.md"));
        assert!(TuringError::NoSuchProcess(Pid(9)).to_string().contains('9'));
    }
}
