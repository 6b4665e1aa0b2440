//! [`TransitionVerifier`] – rule engine run over every decoded transition.
//!
//! The ABI guarantees each syscall is well formed in isolation.  The rules
//! here check what a syscall is allowed to do *in context*: which slot it sits
//! in, which pointer a write lands on, and which role issued it.  Every
//! registered [`TransitionRule`] is evaluated in order; the first violation
//! rejects the whole transition.
//!
//! Built-in rules:
//! - [`LaneDisciplineRule`] – mind opcodes only in `mind_ops`, world opcodes
//!   only in `world_op`.
//! - [`WritablePointerRule`] – `SYS_WRITE` must land on a file, a handle or
//!   the call-stack register.
//! - [`TrapPointerRule`] – no jumps or writes into `sys://trap/`.
//! - [`PlannerOnlyFanOutRule`] – only planners may issue `SYS_MAP_REDUCE`.

use serde::Serialize;
use thiserror::Error;
use turingos_types::{OpClass, Pointer, Role, Syscall, TRAP_PREFIX};

use crate::abi::DecodedTransition;

/// Process context a transition is checked against.
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    /// Current data pointer.
    pub d: &'a str,
    pub role: Role,
}

/// A rule failure.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("gate rule `{rule}` violated: {details}")]
pub struct GateViolation {
    pub rule: String,
    pub details: String,
}

impl GateViolation {
    pub fn new(rule: &str, details: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            details: details.into(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single invariant a decoded transition must satisfy.
pub trait TransitionRule: Send + Sync {
    /// Name used in violation messages and the journal.
    fn name(&self) -> &str;

    fn check(
        &self,
        ctx: &GateContext<'_>,
        transition: &DecodedTransition,
    ) -> Result<(), GateViolation>;
}

// ────────────────────────────────────────────────────────────────────────────
// TransitionVerifier
// ────────────────────────────────────────────────────────────────────────────

/// # Example
///
/// ```
/// use turingos_kernel::abi::DecodedTransition;
/// use turingos_kernel::transition_verifier::{GateContext, TransitionVerifier};
/// use turingos_types::{Role, Syscall};
///
/// let verifier = TransitionVerifier::with_default_rules();
/// let ctx = GateContext { d: "notes.md", role: Role::Worker };
///
/// let fan_out = DecodedTransition {
///     thought: None,
///     q_next: "split".into(),
///     mind_ops: vec![Syscall::MapReduce { tasks: vec!["a".into()] }],
///     world_op: None,
/// };
/// assert!(verifier.verify(&ctx, &fan_out).is_err());
/// ```
#[derive(Default)]
pub struct TransitionVerifier {
    rules: Vec<Box<dyn TransitionRule>>,
}

impl TransitionVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// The four built-in rules in their canonical order.
    pub fn with_default_rules() -> Self {
        let mut verifier = Self::new();
        verifier.add_rule(Box::new(LaneDisciplineRule));
        verifier.add_rule(Box::new(TrapPointerRule));
        verifier.add_rule(Box::new(WritablePointerRule));
        verifier.add_rule(Box::new(PlannerOnlyFanOutRule));
        verifier
    }

    /// Register a new [`TransitionRule`].  Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn TransitionRule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn verify(
        &self,
        ctx: &GateContext<'_>,
        transition: &DecodedTransition,
    ) -> Result<(), GateViolation> {
        for rule in &self.rules {
            rule.check(ctx, transition)?;
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

pub struct LaneDisciplineRule;

impl TransitionRule for LaneDisciplineRule {
    fn name(&self) -> &str {
        "lane_discipline"
    }

    fn check(
        &self,
        _ctx: &GateContext<'_>,
        transition: &DecodedTransition,
    ) -> Result<(), GateViolation> {
        for (i, op) in transition.mind_ops.iter().enumerate() {
            if op.class() != OpClass::Mind {
                return Err(GateViolation::new(
                    self.name(),
                    format!("mind_ops[{i}] carries world opcode {}", op.opcode()),
                ));
            }
        }
        if let Some(op) = &transition.world_op {
            if op.class() != OpClass::World {
                return Err(GateViolation::new(
                    self.name(),
                    format!("world_op carries mind opcode {}", op.opcode()),
                ));
            }
        }
        Ok(())
    }
}

pub struct WritablePointerRule;

impl TransitionRule for WritablePointerRule {
    fn name(&self) -> &str {
        "writable_pointer"
    }

    fn check(
        &self,
        ctx: &GateContext<'_>,
        transition: &DecodedTransition,
    ) -> Result<(), GateViolation> {
        let Some(Syscall::Write { semantic_cap, .. }) = &transition.world_op else {
            return Ok(());
        };
        let target = semantic_cap.as_deref().unwrap_or(ctx.d);
        match Pointer::parse(target) {
            Ok(pointer) if pointer.is_writable() => Ok(()),
            Ok(_) => Err(GateViolation::new(
                self.name(),
                format!("SYS_WRITE target `{target}` is not writable"),
            )),
            Err(e) => Err(GateViolation::new(
                self.name(),
                format!("SYS_WRITE target `{target}` is invalid: {e}"),
            )),
        }
    }
}

pub struct TrapPointerRule;

impl TransitionRule for TrapPointerRule {
    fn name(&self) -> &str {
        "trap_pointer"
    }

    fn check(
        &self,
        _ctx: &GateContext<'_>,
        transition: &DecodedTransition,
    ) -> Result<(), GateViolation> {
        let target = match &transition.world_op {
            Some(Syscall::Goto { pointer }) => pointer.as_str(),
            Some(Syscall::Write {
                semantic_cap: Some(cap),
                ..
            }) => cap.as_str(),
            _ => return Ok(()),
        };
        if target.trim().starts_with(TRAP_PREFIX) {
            return Err(GateViolation::new(
                self.name(),
                format!("`{target}` is kernel-owned"),
            ));
        }
        Ok(())
    }
}

pub struct PlannerOnlyFanOutRule;

impl TransitionRule for PlannerOnlyFanOutRule {
    fn name(&self) -> &str {
        "planner_only_fan_out"
    }

    fn check(
        &self,
        ctx: &GateContext<'_>,
        transition: &DecodedTransition,
    ) -> Result<(), GateViolation> {
        let fans_out = transition
            .mind_ops
            .iter()
            .any(|op| matches!(op, Syscall::MapReduce { .. }));
        if fans_out && ctx.role != Role::Planner {
            return Err(GateViolation::new(
                self.name(),
                format!("{} may not issue SYS_MAP_REDUCE", ctx.role),
            ));
        }
        Ok(())
    }
}
