//! [`TickEngine`] – one observe → decide → validate → execute → record step.
//!
//! Each [`TickEngine::tick`]:
//!
//! 1. **Observe** – `s = manifold.observe(d)`.  Manifold errors become a
//!    `[MANIFOLD_FAULT]` observation rather than a failure.  The task stack
//!    line, contract notes and pending feedback are appended.
//! 2. **Decide** – `oracle.collapse(discipline, q, s, {temperature})`,
//!    bounded by `oracle_timeout`.  An oracle error or timeout raises
//!    `sys://trap/cpu_fault`.
//! 3. **Validate** – the [`KernelGate`] normalizes every syscall slot and
//!    runs the transition rules.  Any rejection discards the whole
//!    transition as a `cpu_fault` and is reported as a protocol violation.
//! 4. **Mind ops** – applied atomically to the caller's [`TaskStack`];
//!    `SYS_MAP_REDUCE` is handed back as a fan-out request.
//! 5. **World op** – at most one.  Manifold failures raise
//!    `sys://trap/page_fault`.
//! 6. **Record** – route traces, traps and a `[TICK]` line are engraved.
//!
//! The engine never changes process state; the scheduler reads the
//! [`TickReport`] and decides.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use turingos_journal::{Journal, TaskStack};
use turingos_kernel::{AbiProfile, GateContext, KernelGate};
use turingos_manifold::Manifold;
use turingos_middleware::EventBus;
use turingos_types::{
    Event, EventPayload, Opcode, Pid, Pointer, Registers, Role, Syscall, Transition, TrapFrame,
    TrapKind, TuringError,
};

use crate::contract::{ExecutionContract, OpenContract};
use crate::oracle::{CollapseOptions, Oracle, OracleError};

/// System prompt used when none is configured.
pub const DEFAULT_DISCIPLINE: &str = "\
You are the control unit of a tape machine. Each turn you see your control \
state q and an observation s of the resource your data pointer d addresses. \
Answer with one JSON object: {\"thought\": str, \"q_next\": str, \
\"mind_ops\": [syscall...], \"world_op\": syscall|null}.
Mind ops manage your task stack: SYS_PUSH{task}, SYS_EDIT{task}, \
SYS_MOVE{task_id?, target_pos?, status?}, SYS_POP{}, and for planners \
SYS_MAP_REDUCE{tasks[]} to fan work out to worker processes.
The world op is at most one of: SYS_WRITE{payload, semantic_cap?}, \
SYS_GOTO{pointer}, SYS_EXEC{cmd}, SYS_GIT_LOG{path?, limit?, ref?, grep?, since?}, \
SYS_HALT{}.
Every syscall object carries its opcode in \"op\" and exactly the fields listed.";

#[derive(Debug, Clone)]
pub struct TickEngineConfig {
    /// System prompt handed to the oracle on every tick.
    pub discipline: String,
    pub profile: AbiProfile,
    /// Upper bound on one oracle call, retries and failover included.
    pub oracle_timeout: Duration,
}

impl Default for TickEngineConfig {
    fn default() -> Self {
        Self {
            discipline: DEFAULT_DISCIPLINE.to_string(),
            profile: AbiProfile::Scheduler,
            oracle_timeout: Duration::from_secs(120),
        }
    }
}

/// What the engine needs to know about the process it is ticking.
#[derive(Debug, Clone, Copy)]
pub struct TickInput<'a> {
    pub pid: Pid,
    pub role: Role,
    pub registers: &'a Registers,
    pub temperature: f64,
    pub panic_reset_count: u32,
    /// Pending feedback lines, shown once.
    pub feedback: &'a [String],
}

/// Outcome of one tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub q_next: String,
    pub d_next: String,
    /// The raw oracle answer, when there was one.
    pub transition: Option<Transition>,
    pub trap: Option<TrapFrame>,
    /// Gate rule name or ABI reject code, when the transition was refused.
    pub violation: Option<String>,
    /// The oracle did not answer within `oracle_timeout`.
    pub oracle_timed_out: bool,
    pub mind_notes: Vec<String>,
    pub world_op: Option<Opcode>,
    pub world_op_ok: bool,
    pub halt_requested: bool,
    /// Tasks from `SYS_MAP_REDUCE`, in order.
    pub fan_out: Option<Vec<String>>,
    /// Lines to show the process on its next tick.
    pub feedback: Vec<String>,
}

impl TickReport {
    fn unchanged(registers: &Registers) -> Self {
        Self {
            q_next: registers.q.clone(),
            d_next: registers.d.clone(),
            ..Self::default()
        }
    }

    /// No trap and a world op that succeeded.
    pub fn is_clean(&self) -> bool {
        self.trap.is_none() && self.world_op_ok
    }

    /// Neither a world op nor a trap: the process only shuffled its stack.
    pub fn is_mind_only(&self) -> bool {
        self.trap.is_none() && self.world_op.is_none()
    }
}

pub struct TickEngine {
    manifold: Manifold,
    journal: Journal,
    oracle: Box<dyn Oracle>,
    gate: KernelGate,
    contract: Arc<dyn ExecutionContract>,
    config: TickEngineConfig,
    bus: Option<EventBus>,
    trap_seq: u64,
}

impl TickEngine {
    pub fn new(
        manifold: Manifold,
        journal: Journal,
        oracle: Box<dyn Oracle>,
        config: TickEngineConfig,
    ) -> Self {
        Self {
            manifold,
            journal,
            oracle,
            gate: KernelGate::new(config.profile),
            contract: Arc::new(OpenContract),
            config,
            bus: None,
            trap_seq: 0,
        }
    }

    pub fn with_contract(mut self, contract: Arc<dyn ExecutionContract>) -> Self {
        self.contract = contract;
        self
    }

    /// Replace the gate, e.g. one built with extra transition rules.
    pub fn with_gate(mut self, gate: KernelGate) -> Self {
        self.gate = gate;
        self
    }

    /// Publish trap frames on `bus`.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn manifold(&self) -> &Manifold {
        &self.manifold
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn engrave(&mut self, entry: &str) -> Result<(), TuringError> {
        self.journal
            .engrave(entry)
            .map(|_| ())
            .map_err(|e| TuringError::Journal(e.to_string()))
    }

    pub fn mark_replay(&mut self, tick_seq: u64) -> Result<(), TuringError> {
        self.journal
            .mark_replay(tick_seq)
            .map(|_| ())
            .map_err(|e| TuringError::Journal(e.to_string()))
    }

    /// Build, journal and publish a trap frame with the next sequence number.
    pub fn raise(
        &mut self,
        pid: Pid,
        kind: TrapKind,
        pointer: &str,
        details: impl Into<String>,
        panic_reset_count: u32,
    ) -> Result<TrapFrame, TuringError> {
        self.trap_seq += 1;
        let frame = TrapFrame::new(self.trap_seq, kind, pointer, details, panic_reset_count);
        warn!(pid = %pid, trap = kind.as_str(), pointer, "trap raised");
        self.engrave(&with_pid(&frame.journal_line(), "[TRAP]", pid))?;
        if let Some(bus) = &self.bus {
            let event = Event::new(
                "turingos-runtime::tick_engine",
                EventPayload::Trap {
                    pid,
                    frame: frame.clone(),
                },
            );
            let _ = bus.publish(event);
        }
        Ok(frame)
    }

    /// Run one tick for the process described by `input`.
    ///
    /// # Errors
    ///
    /// Only journal failures are returned; every other failure is reported
    /// inside the [`TickReport`].
    #[instrument(
        name = "tick",
        skip_all,
        fields(pid = %input.pid, role = %input.role, d = %input.registers.d)
    )]
    pub async fn tick(
        &mut self,
        input: TickInput<'_>,
        stack: &mut TaskStack,
    ) -> Result<TickReport, TuringError> {
        let TickInput {
            pid,
            role,
            registers,
            temperature,
            panic_reset_count,
            feedback,
        } = input;
        let q = registers.q.as_str();
        let d = registers.d.as_str();
        let mut report = TickReport::unchanged(registers);

        // ── Observe ─────────────────────────────────────────────────────────
        let mut s = match self.manifold.observe(d).await {
            Ok(slice) => slice,
            Err(err) => {
                debug!(pid = %pid, pointer = d, error = %err, "observation failed");
                format!("[MANIFOLD_FAULT] pointer={d} error={err}")
            }
        };
        s.push('\n');
        s.push_str(&stack.render());
        for line in self.contract_notes().await.iter().chain(feedback) {
            s.push('\n');
            s.push_str(line);
        }

        // ── Decide ──────────────────────────────────────────────────────────
        let options = CollapseOptions { temperature };
        let limit = self.config.oracle_timeout;
        let collapse = self.oracle.collapse(&self.config.discipline, q, &s, &options);
        let collapsed = match tokio::time::timeout(limit, collapse).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout(limit.as_millis() as u64)),
        };
        for trace in self.oracle.drain_traces() {
            self.engrave(&with_pid(&trace.journal_line(), "[ROUTE]", pid))?;
        }
        let transition = match collapsed {
            Ok(transition) => transition,
            Err(err) => {
                report.oracle_timed_out = matches!(err, OracleError::Timeout(_));
                let frame = self.raise(pid, TrapKind::CpuFault, d, format!("oracle: {err}"), panic_reset_count)?;
                report.trap = Some(frame);
                self.record(pid, registers, &report)?;
                return Ok(report);
            }
        };
        if let Some(thought) = transition.thought.as_deref().filter(|t| !t.trim().is_empty()) {
            self.engrave(&format!("[THOUGHT] pid={pid} {thought}"))?;
        }
        report.transition = Some(transition.clone());

        // ── Validate ────────────────────────────────────────────────────────
        let ctx = GateContext { d, role };
        let decoded = match self.gate.admit(&ctx, &transition) {
            Ok(decoded) => decoded,
            Err(err) => {
                report.violation = Some(err.tag());
                let frame = self.raise(pid, TrapKind::CpuFault, d, format!("rejected: {err}"), panic_reset_count)?;
                report.trap = Some(frame);
                self.record(pid, registers, &report)?;
                return Ok(report);
            }
        };

        // ── Mind ops ────────────────────────────────────────────────────────
        match stack.apply(&decoded.mind_ops) {
            Ok(notes) => report.mind_notes = notes,
            Err(err) => {
                let frame = self.raise(pid, TrapKind::CpuFault, d, format!("mind_ops: {err}"), panic_reset_count)?;
                report.trap = Some(frame);
                self.record(pid, registers, &report)?;
                return Ok(report);
            }
        }
        let tasks: Vec<String> = decoded
            .mind_ops
            .iter()
            .filter_map(|op| match op {
                Syscall::MapReduce { tasks } => Some(tasks.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        if !tasks.is_empty() {
            report.fan_out = Some(tasks);
        }
        report.q_next = decoded.q_next.clone();

        // ── World op ────────────────────────────────────────────────────────
        if let Some(op) = &decoded.world_op {
            report.world_op = Some(op.opcode());
            self.execute_world(pid, role, d, op, panic_reset_count, &mut report)
                .await?;
        }

        self.record(pid, registers, &report)?;
        Ok(report)
    }

    async fn execute_world(
        &mut self,
        pid: Pid,
        role: Role,
        d: &str,
        op: &Syscall,
        panic_reset_count: u32,
        report: &mut TickReport,
    ) -> Result<(), TuringError> {
        match op {
            Syscall::Write {
                payload,
                semantic_cap,
            } => {
                let target = semantic_cap.as_deref().map(str::trim).unwrap_or(d);
                match self.manifold.interfere(target, payload).await {
                    Ok(()) => report.world_op_ok = true,
                    Err(err) => {
                        let frame = self.raise(pid, TrapKind::PageFault, target, err.to_string(), panic_reset_count)?;
                        report.trap = Some(frame);
                    }
                }
            }
            Syscall::Goto { pointer } => self.jump(pid, pointer.trim(), panic_reset_count, report)?,
            Syscall::GitLog(query) => self.jump(pid, &query.to_pointer(), panic_reset_count, report)?,
            Syscall::Exec { cmd } => {
                report.d_next = format!("$ {}", cmd.trim());
                report.world_op_ok = true;
            }
            Syscall::Halt => self.request_halt(pid, role, report).await,
            // The gate keeps mind ops out of the world slot.
            Syscall::Push { .. }
            | Syscall::Edit { .. }
            | Syscall::Move { .. }
            | Syscall::Pop
            | Syscall::MapReduce { .. } => {}
        }
        Ok(())
    }

    fn jump(
        &mut self,
        pid: Pid,
        target: &str,
        panic_reset_count: u32,
        report: &mut TickReport,
    ) -> Result<(), TuringError> {
        match Pointer::parse(target) {
            Ok(_) => {
                report.d_next = target.to_string();
                report.world_op_ok = true;
            }
            Err(err) => {
                let frame = self.raise(pid, TrapKind::PageFault, target, err.to_string(), panic_reset_count)?;
                report.trap = Some(frame);
            }
        }
        Ok(())
    }

    /// Planners must satisfy the execution contract before a halt is even
    /// requested; workers halt straight away.
    async fn request_halt(&mut self, pid: Pid, role: Role, report: &mut TickReport) {
        if role == Role::Worker {
            report.halt_requested = true;
            report.world_op_ok = true;
            return;
        }
        match self.contract.check_halt().await {
            Ok(verdict) if verdict.ok => {
                report.halt_requested = true;
                report.world_op_ok = true;
            }
            Ok(verdict) => {
                info!(pid = %pid, "halt refused by execution contract");
                let mut message = format!(
                    "[HALT_REJECTED] {}",
                    verdict.feedback.unwrap_or_else(|| "contract not satisfied".into())
                );
                if let Ok(Some(hint)) = self.contract.next_required_file_hint().await {
                    message.push_str(&format!("\n[NEXT_REQUIRED_FILE] {hint}"));
                }
                report.feedback.push(message);
            }
            Err(err) => {
                warn!(pid = %pid, error = %err, "execution contract check failed");
                report
                    .feedback
                    .push(format!("[HALT_REJECTED] contract error: {err}"));
            }
        }
    }

    /// Progress lines the contract wants the oracle to see.
    async fn contract_notes(&self) -> Vec<String> {
        let mut notes = Vec::new();
        match self.contract.check_progress().await {
            Ok(verdict) => notes.extend(verdict.feedback),
            Err(err) => warn!(error = %err, "contract progress check failed"),
        }
        match self.contract.check_next_required_step_ready().await {
            Ok(verdict) if !verdict.ok => notes.extend(verdict.feedback),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "contract readiness check failed"),
        }
        if let Ok(Some(step)) = self.contract.next_required_step().await {
            notes.push(format!("[NEXT_STEP] {step}"));
        }
        if let Some(path) = self.contract.progress_path().await {
            notes.push(format!("[PROGRESS_FILE] {path}"));
        }
        notes
    }

    fn record(&mut self, pid: Pid, registers: &Registers, report: &TickReport) -> Result<(), TuringError> {
        let line = format!(
            "[TICK] pid={pid} q={} d={} -> q_next={} d_next={} mind_ops={} world_op={} ok={} trap={}",
            registers.q,
            registers.d,
            report.q_next,
            report.d_next,
            report.mind_notes.len(),
            report.world_op.map(|op| op.as_str()).unwrap_or("none"),
            report.world_op_ok,
            report.trap.as_ref().map(|t| t.kind.as_str()).unwrap_or("none"),
        );
        debug!(pid = %pid, world_op_ok = report.world_op_ok, "tick recorded");
        self.engrave(&line)
    }
}

/// `[TAG] rest` -> `[TAG] pid=<pid> rest`.
fn with_pid(line: &str, tag: &str, pid: Pid) -> String {
    line.replacen(tag, &format!("{tag} pid={pid}"), 1)
}
