//! [`KernelGate`] – single interception point between the oracle and the
//! manifold.
//!
//! Before a [`Transition`] produced by an oracle is executed by the tick
//! engine, it must pass through [`KernelGate::admit`].  This method enforces
//! **two independent checks** in order:
//!
//! 1. **ABI normalization** ([`decode_transition`]): every syscall slot must
//!    be a well-formed instance of a known opcode, with exactly its canonical
//!    fields.  Failures surface as [`GateError::Abi`].
//!
//! 2. **Contextual rules** ([`TransitionVerifier`]): the decoded transition
//!    must satisfy every registered rule given the caller's data pointer and
//!    role.  The first violated rule surfaces as [`GateError::Gate`].
//!
//! Only when both checks pass does the caller receive a
//! [`DecodedTransition`] it may execute.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use turingos_kernel::{AbiProfile, GateContext, KernelGate};
//! use turingos_types::{Role, Transition};
//!
//! let gate = KernelGate::new(AbiProfile::Scheduler);
//! let ctx = GateContext { d: "notes.md", role: Role::Planner };
//!
//! let ok = Transition::world("read", json!({ "op": "SYS_GOTO", "pointer": "a.txt" }));
//! assert!(gate.admit(&ctx, &ok).is_ok());
//!
//! let bad = Transition::world("peek", json!({ "op": "SYS_GOTO", "pointer": "sys://trap/x" }));
//! assert!(gate.admit(&ctx, &bad).is_err());
//! ```

use thiserror::Error;
use tracing::debug;
use turingos_types::Transition;

use crate::abi::{AbiProfile, AbiRejection, DecodedTransition, decode_transition};
use crate::transition_verifier::{GateContext, GateViolation, TransitionVerifier};

/// Why a transition was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("ABI rejection {0}")]
    Abi(#[from] AbiRejection),
    #[error("{0}")]
    Gate(#[from] GateViolation),
}

impl GateError {
    /// Short machine tag for journals, e.g. `MUTEX_VIOLATION` or
    /// `lane_discipline`.
    pub fn tag(&self) -> String {
        match self {
            GateError::Abi(rejection) => rejection.code.as_str().to_string(),
            GateError::Gate(violation) => violation.rule.clone(),
        }
    }
}

pub struct KernelGate {
    profile: AbiProfile,
    verifier: TransitionVerifier,
}

impl KernelGate {
    /// Gate with the built-in rule set.
    pub fn new(profile: AbiProfile) -> Self {
        Self::with_verifier(profile, TransitionVerifier::with_default_rules())
    }

    pub fn with_verifier(profile: AbiProfile, verifier: TransitionVerifier) -> Self {
        Self { profile, verifier }
    }

    pub fn profile(&self) -> AbiProfile {
        self.profile
    }

    /// Normalize and verify `transition` for a process in `ctx`.
    ///
    /// # Errors
    ///
    /// - [`GateError::Abi`] – a syscall slot failed normalization.
    /// - [`GateError::Gate`] – a contextual rule was violated.
    pub fn admit(
        &self,
        ctx: &GateContext<'_>,
        transition: &Transition,
    ) -> Result<DecodedTransition, GateError> {
        let decoded = decode_transition(transition, self.profile)?;
        self.verifier.verify(ctx, &decoded)?;
        debug!(
            mind_ops = decoded.mind_ops.len(),
            world_op = ?decoded.world_op.as_ref().map(|op| op.opcode()),
            "transition admitted"
        );
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::RejectCode;
    use serde_json::json;
    use turingos_types::{Role, Syscall};

    fn ctx(role: Role) -> GateContext<'static> {
        GateContext { d: "notes.md", role }
    }

    #[test]
    fn abi_check_runs_before_rules() {
        let gate = KernelGate::new(AbiProfile::Scheduler);
        // Both an ABI problem and a trap jump: the ABI wins.
        let t = Transition::world(
            "x",
            json!({ "op": "SYS_GOTO", "pointer": "sys://trap/a", "cmd": "ls" }),
        );
        match gate.admit(&ctx(Role::Planner), &t) {
            Err(GateError::Abi(rejection)) => assert_eq!(rejection.code, RejectCode::MutexViolation),
            other => panic!("expected ABI rejection, got {other:?}"),
        }
    }

    #[test]
    fn map_reduce_requires_scheduler_profile() {
        let t = Transition {
            q_next: "split".into(),
            mind_ops: Some(vec![json!({ "op": "SYS_MAP_REDUCE", "tasks": ["a"] })]),
            ..Transition::default()
        };
        let base = KernelGate::new(AbiProfile::Base);
        assert!(matches!(base.admit(&ctx(Role::Planner), &t), Err(GateError::Abi(_))));

        let sched = KernelGate::new(AbiProfile::Scheduler);
        let decoded = sched.admit(&ctx(Role::Planner), &t).unwrap();
        assert!(matches!(decoded.mind_ops[0], Syscall::MapReduce { .. }));
        assert_eq!(
            sched.admit(&ctx(Role::Worker), &t).unwrap_err().tag(),
            "planner_only_fan_out"
        );
    }

    #[test]
    fn legacy_halt_is_admitted_as_world_op() {
        let gate = KernelGate::new(AbiProfile::Base);
        let t = Transition {
            q_next: "done".into(),
            a_t: Some(json!({ "op": "SYS_HALT" })),
            ..Transition::default()
        };
        let decoded = gate.admit(&ctx(Role::Planner), &t).unwrap();
        assert_eq!(decoded.world_op, Some(Syscall::Halt));
    }

    #[test]
    fn error_tags() {
        let gate = KernelGate::new(AbiProfile::Base);
        let t = Transition::world("x", json!([]));
        assert_eq!(gate.admit(&ctx(Role::Planner), &t).unwrap_err().tag(), "INVALID_ROOT");
    }
}
