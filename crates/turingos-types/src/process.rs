//! Process identity, lifecycle states and trap frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Process identifier. Allocated by the scheduler starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(pub u32);

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// PCB lifecycle.
///
/// `Ready -> Running -> {Blocked <-> Running} -> PendingHalt -> Terminated`,
/// with `Killed` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    Ready,
    Running,
    Blocked,
    PendingHalt,
    Terminated,
    Killed,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Terminated | ProcessState::Killed)
    }

    /// Eligible to be picked for a turn.
    pub fn is_runnable(&self) -> bool {
        matches!(self, ProcessState::Ready | ProcessState::Running)
    }

    /// Whether the lifecycle graph allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ProcessState) -> bool {
        use ProcessState::*;
        match (self, next) {
            (Terminated | Killed, _) => false,
            (_, Killed) => true,
            (Ready, Running) => true,
            (Running, Blocked | PendingHalt | Ready) => true,
            (Blocked, Running | Ready) => true,
            (PendingHalt, Terminated | Running) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Ready => "READY",
            ProcessState::Running => "RUNNING",
            ProcessState::Blocked => "BLOCKED",
            ProcessState::PendingHalt => "PENDING_HALT",
            ProcessState::Terminated => "TERMINATED",
            ProcessState::Killed => "KILLED",
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Planner,
    Worker,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Planner => f.write_str("PLANNER"),
            Role::Worker => f.write_str("WORKER"),
        }
    }
}

/// The two machine registers of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    /// Control state.
    pub q: String,
    /// Data pointer into the manifold.
    pub d: String,
}

impl Registers {
    pub fn new(q: impl Into<String>, d: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            d: d.into(),
        }
    }
}

/// Prefix shared by every trap pointer.
pub const TRAP_PREFIX: &str = "sys://trap/";

/// Closed set of abnormal runtime conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrapKind {
    /// Oracle failure, malformed output or protocol violation.
    CpuFault,
    /// Manifold failure while executing a world op.
    PageFault,
    /// Too many consecutive mind-only ticks.
    Thrashing,
    /// A recovery action was applied.
    PanicReset,
    /// The panic reset budget ran out.
    UnrecoverableLoop,
    /// No successful world op within the watchdog window.
    WatchdogNmi,
    /// The oracle produced the identical transition repeatedly.
    L1CacheHit,
}

impl TrapKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrapKind::CpuFault => "cpu_fault",
            TrapKind::PageFault => "page_fault",
            TrapKind::Thrashing => "thrashing",
            TrapKind::PanicReset => "panic_reset",
            TrapKind::UnrecoverableLoop => "unrecoverable_loop",
            TrapKind::WatchdogNmi => "watchdog_nmi",
            TrapKind::L1CacheHit => "l1_cache_hit",
        }
    }

    /// `sys://trap/<kind>`.
    pub fn base(&self) -> String {
        format!("{TRAP_PREFIX}{}", self.as_str())
    }
}

/// Structured record of one trap and the recovery state at the time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrapFrame {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub kind: TrapKind,
    /// Always `sys://trap/<kind>`.
    pub trap_base: String,
    /// The data pointer the process held when the trap fired.
    pub trap_pointer: String,
    pub details: String,
    pub panic_reset_count: u32,
}

impl TrapFrame {
    pub fn new(
        seq: u64,
        kind: TrapKind,
        trap_pointer: impl Into<String>,
        details: impl Into<String>,
        panic_reset_count: u32,
    ) -> Self {
        Self {
            seq,
            ts: Utc::now(),
            kind,
            trap_base: kind.base(),
            trap_pointer: trap_pointer.into(),
            details: details.into(),
            panic_reset_count,
        }
    }

    /// Text block shown to the oracle on the next tick.
    pub fn render(&self) -> String {
        format!(
            "[TRAP] {} seq={} pointer={} panic_resets={}\n[TRAP_DETAILS] {}",
            self.trap_base, self.seq, self.trap_pointer, self.panic_reset_count, self.details
        )
    }

    /// Single-line form for the journal.
    pub fn journal_line(&self) -> String {
        format!(
            "[TRAP] seq={} base={} pointer={} panic_reset_count={} details={}",
            self.seq,
            self.trap_base,
            self.trap_pointer,
            self.panic_reset_count,
            self.details.replace('\n', " | ")
        )
    }
}
