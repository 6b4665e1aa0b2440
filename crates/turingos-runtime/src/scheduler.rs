//! [`Scheduler`] – cooperative round-robin over agent processes.
//!
//! The scheduler owns every [`Pcb`] and gives one tick per turn to the next
//! runnable process.  Around each tick it applies the kernel's containment
//! policy:
//!
//! - **Map-reduce.**  A planner's `SYS_MAP_REDUCE` spawns one worker per
//!   task and blocks the planner until every child is `TERMINATED` or
//!   `KILLED`; the children's outputs are then delivered as `[REDUCE]`
//!   feedback.
//! - **Halt arbitration.**  A halting planner (and a halting worker when
//!   `verify_worker_halts` is set) runs the [`HaltVerifier`]; a failure puts
//!   it back to work with `[HALT_REJECTED]` feedback.
//! - **Anomaly containment.**  Protocol violations, oracle timeouts,
//!   thrashing, repeated trap kinds, identical transitions and anomalous
//!   worker outputs each raise one red flag (at most one per tick).  A clean tick clears them; reaching
//!   `red_flag_threshold` kills the process.
//! - **Panic resets.**  Every trap triggers one recovery action.  Running
//!   past `panic_reset_budget` escalates to `unrecoverable_loop` and kills.
//!
//! Parents never force-kill their children, and a child that outlives its
//! parent simply finishes on its own.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{Instrument, debug, info, info_span, warn};
use turingos_journal::TaskStack;
use turingos_kernel::{HaltVerifier, ProcessHealth, Watchdog};
use turingos_middleware::EventBus;
use turingos_types::{
    Event, EventPayload, Pid, ProcessState, Registers, Role, TrapFrame, TrapKind, TuringError,
};

use crate::loop_guard::LoopGuard;
use crate::pricing;
use crate::tick_engine::{TickEngine, TickInput, TickReport};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Red flags that kill a process.
    pub red_flag_threshold: u32,
    /// Consecutive mind-only ticks that raise `thrashing`.
    pub thrash_threshold: u32,
    /// Consecutive traps of one kind that raise a red flag.
    pub repeated_trap_threshold: u32,
    /// Recovery actions allowed before `unrecoverable_loop`.
    pub panic_reset_budget: u32,
    /// Turns without a successful world op before `watchdog_nmi`; 0 disables.
    pub watchdog_ticks: u32,
    /// Identical consecutive transitions that raise `l1_cache_hit`; 0 disables.
    pub l1_threshold: usize,
    pub verify_worker_halts: bool,
    pub base_temperature: f64,
    pub max_temperature: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            red_flag_threshold: 3,
            thrash_threshold: 4,
            repeated_trap_threshold: 3,
            panic_reset_budget: 5,
            watchdog_ticks: 12,
            l1_threshold: 3,
            verify_worker_halts: false,
            base_temperature: 0.2,
            max_temperature: 1.0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Process control block
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Pcb {
    pub pid: Pid,
    pub ppid: Option<Pid>,
    pub state: ProcessState,
    pub role: Role,
    pub temperature: f64,
    pub price: f64,
    pub red_flags: u32,
    pub registers: Registers,
    /// `q0`, used for pricing.
    pub task: String,
    /// `d0`, where a watchdog reset sends the pointer back.
    pub home: String,
    pub wait_pids: Vec<Pid>,
    pub mailbox: Vec<String>,
    pub exit_output: Option<String>,
    pub task_stack: TaskStack,
    pub feedback: Vec<String>,
    pub panic_reset_count: u32,
    pub last_trap: Option<TrapFrame>,
    pub ticks: u64,
    trap_streak: u32,
    mind_only_streak: u32,
    loop_guard: LoopGuard,
}

/// Outcome of [`Scheduler::run_until_idle`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub turns: u64,
    pub terminated: Vec<Pid>,
    pub killed: Vec<Pid>,
    /// Still alive when the run stopped.
    pub unfinished: Vec<Pid>,
    /// The root's accumulated price (its own plus every priced child's).
    pub root_price: f64,
    pub root_output: Option<String>,
    /// Stopped by the shutdown flag rather than by running out of work.
    pub interrupted: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

pub struct Scheduler {
    engine: TickEngine,
    halt_verifier: HaltVerifier,
    config: SchedulerConfig,
    processes: BTreeMap<Pid, Pcb>,
    run_queue: VecDeque<Pid>,
    next_pid: u32,
    watchdog: Watchdog,
    bus: Option<EventBus>,
    turns: u64,
    root: Option<Pid>,
    shutdown: Option<Arc<AtomicBool>>,
}

impl Scheduler {
    pub fn new(engine: TickEngine, halt_verifier: HaltVerifier, config: SchedulerConfig) -> Self {
        Self {
            engine,
            halt_verifier,
            config,
            processes: BTreeMap::new(),
            run_queue: VecDeque::new(),
            next_pid: 0,
            watchdog: Watchdog::new(),
            bus: None,
            turns: 0,
            root: None,
            shutdown: None,
        }
    }

    /// Publish lifecycle events on `bus`.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Stop [`run_until_idle`][Self::run_until_idle] between turns once `flag` is set.
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn engine(&self) -> &TickEngine {
        &self.engine
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn pcb(&self, pid: Pid) -> Option<&Pcb> {
        self.processes.get(&pid)
    }

    pub fn processes(&self) -> impl Iterator<Item = &Pcb> {
        self.processes.values()
    }

    pub fn turns(&self) -> u64 {
        self.turns
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Spawn the root planner.
    pub fn spawn_root(&mut self, q0: &str, d0: &str) -> Result<Pid, TuringError> {
        let pid = self.spawn(None, Role::Planner, q0, d0)?;
        self.root = Some(pid);
        Ok(pid)
    }

    fn spawn(&mut self, ppid: Option<Pid>, role: Role, q0: &str, d0: &str) -> Result<Pid, TuringError> {
        self.next_pid += 1;
        let pid = Pid(self.next_pid);
        let pcb = Pcb {
            pid,
            ppid,
            state: ProcessState::Ready,
            role,
            temperature: self.config.base_temperature,
            price: 0.0,
            red_flags: 0,
            registers: Registers::new(q0, d0),
            task: q0.to_string(),
            home: d0.to_string(),
            wait_pids: Vec::new(),
            mailbox: Vec::new(),
            exit_output: None,
            task_stack: TaskStack::new(),
            feedback: Vec::new(),
            panic_reset_count: 0,
            last_trap: None,
            ticks: 0,
            trap_streak: 0,
            mind_only_streak: 0,
            loop_guard: LoopGuard::new(self.config.l1_threshold),
        };
        self.processes.insert(pid, pcb);
        self.watchdog.register(pid, self.config.watchdog_ticks);
        self.run_queue.push_back(pid);

        let parent = ppid.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
        info!(pid = %pid, ppid = %parent, role = %role, "process spawned");
        self.engine
            .engrave(&format!("[SPAWN] pid={pid} ppid={parent} role={role} q0={q0} d0={d0}"))?;
        self.publish(EventPayload::ProcessSpawned { pid, ppid, role });
        Ok(pid)
    }

    fn pcb_mut(&mut self, pid: Pid) -> Result<&mut Pcb, TuringError> {
        self.processes
            .get_mut(&pid)
            .ok_or(TuringError::NoSuchProcess(pid))
    }

    fn set_state(&mut self, pid: Pid, next: ProcessState) -> Result<(), TuringError> {
        let pcb = self.pcb_mut(pid)?;
        let from = pcb.state;
        if from == next {
            return Ok(());
        }
        if !from.can_transition_to(next) {
            return Err(TuringError::Protocol(format!(
                "illegal state change {from} -> {next} for pid {pid}"
            )));
        }
        pcb.state = next;
        debug!(pid = %pid, from = %from, to = %next, "state changed");
        self.engine
            .engrave(&format!("[STATE] pid={pid} {from} -> {next}"))?;
        self.publish(EventPayload::StateChanged { pid, from, to: next });
        Ok(())
    }

    fn publish(&self, payload: EventPayload) {
        if let Some(bus) = &self.bus {
            let _ = bus.publish(Event::new("turingos-runtime::scheduler", payload));
        }
    }

    // ── Turns ───────────────────────────────────────────────────────────────

    /// Give one turn to the next runnable process.  `None` when nothing is
    /// runnable.
    pub async fn step(&mut self) -> Result<Option<Pid>, TuringError> {
        let Some(pid) = self.next_runnable() else {
            return Ok(None);
        };
        let span = info_span!("turn", pid = %pid, turn = self.turns + 1);
        self.turn(pid).instrument(span).await?;
        self.turns += 1;
        Ok(Some(pid))
    }

    /// Step until nothing is runnable, `max_turns` turns have passed or the
    /// shutdown flag is set; then engrave a replay marker.
    pub async fn run_until_idle(&mut self, max_turns: u64) -> Result<RunSummary, TuringError> {
        let mut interrupted = false;
        let mut taken = 0;
        while taken < max_turns {
            if self
                .shutdown
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::SeqCst))
            {
                warn!(turns = self.turns, "shutdown requested; stopping between turns");
                interrupted = true;
                break;
            }
            if self.step().await?.is_none() {
                break;
            }
            taken += 1;
        }
        self.engine.mark_replay(self.turns)?;
        let summary = self.summary(interrupted);
        info!(
            turns = summary.turns,
            terminated = summary.terminated.len(),
            killed = summary.killed.len(),
            unfinished = summary.unfinished.len(),
            "run finished"
        );
        Ok(summary)
    }

    fn summary(&self, interrupted: bool) -> RunSummary {
        let pids_in = |pred: fn(&ProcessState) -> bool| -> Vec<Pid> {
            self.processes
                .values()
                .filter(|p| pred(&p.state))
                .map(|p| p.pid)
                .collect()
        };
        let root = self.root.and_then(|pid| self.processes.get(&pid));
        RunSummary {
            turns: self.turns,
            terminated: pids_in(|s| *s == ProcessState::Terminated),
            killed: pids_in(|s| *s == ProcessState::Killed),
            unfinished: pids_in(|s| !s.is_terminal()),
            root_price: root.map(|p| p.price).unwrap_or(0.0),
            root_output: root.and_then(|p| p.exit_output.clone()),
            interrupted,
        }
    }

    fn next_runnable(&mut self) -> Option<Pid> {
        while let Some(pid) = self.run_queue.pop_front() {
            if self.processes.get(&pid).is_some_and(|p| p.state.is_runnable()) {
                return Some(pid);
            }
        }
        None
    }

    async fn turn(&mut self, pid: Pid) -> Result<(), TuringError> {
        self.set_state(pid, ProcessState::Running)?;

        // ── Tick ────────────────────────────────────────────────────────────
        let pcb = self
            .processes
            .get_mut(&pid)
            .ok_or(TuringError::NoSuchProcess(pid))?;
        let registers = pcb.registers.clone();
        let feedback = std::mem::take(&mut pcb.feedback);
        let input = TickInput {
            pid,
            role: pcb.role,
            registers: &registers,
            temperature: pcb.temperature,
            panic_reset_count: pcb.panic_reset_count,
            feedback: &feedback,
        };
        let report = self.engine.tick(input, &mut pcb.task_stack).await?;

        pcb.registers = Registers::new(report.q_next.clone(), report.d_next.clone());
        pcb.ticks += 1;
        pcb.feedback.extend(report.feedback.iter().cloned());
        self.watchdog.tick(pid);
        if report.world_op_ok {
            self.watchdog.heartbeat(pid);
        }

        // ── Containment ─────────────────────────────────────────────────────
        let (trap, red_flag) = self.assess(pid, &registers.d, &report)?;
        let pcb = self.pcb_mut(pid)?;
        if report.is_clean() && trap.is_none() {
            pcb.red_flags = 0;
            pcb.panic_reset_count = 0;
            pcb.trap_streak = 0;
        }
        if let Some(reason) = red_flag {
            if self.red_flag(pid, &reason)? {
                return Ok(());
            }
        }
        if let Some(frame) = trap {
            if !self.recover(pid, &frame)? {
                return Ok(());
            }
        }

        // ── Scheduling effects ──────────────────────────────────────────────
        if let Some(tasks) = report.fan_out {
            if report.halt_requested {
                self.pcb_mut(pid)?
                    .feedback
                    .push("[HALT_DEFERRED] halt ignored while fanning out; halt after the reduce".into());
            }
            return self.fan_out(pid, &tasks, &report.d_next);
        }
        if report.halt_requested {
            return self.arbitrate_halt(pid).await;
        }
        self.requeue(pid)
    }

    /// Back to `READY` at the tail of the run queue.
    fn requeue(&mut self, pid: Pid) -> Result<(), TuringError> {
        self.set_state(pid, ProcessState::Ready)?;
        self.run_queue.push_back(pid);
        Ok(())
    }

    /// Detect scheduler-level traps and pick this tick's red flag, if any.
    fn assess(
        &mut self,
        pid: Pid,
        d: &str,
        report: &TickReport,
    ) -> Result<(Option<TrapFrame>, Option<String>), TuringError> {
        let stalled = self.watchdog.health(pid) == ProcessHealth::Stalled;
        if stalled {
            self.watchdog.heartbeat(pid);
        }
        let thrash_threshold = self.config.thrash_threshold;
        let repeated_trap_threshold = self.config.repeated_trap_threshold;
        let pcb = self
            .processes
            .get_mut(&pid)
            .ok_or(TuringError::NoSuchProcess(pid))?;
        let prc = pcb.panic_reset_count;

        let mut trap = report.trap.clone();
        let mut red_flag = report
            .violation
            .as_ref()
            .map(|v| format!("protocol_violation:{v}"));
        if report.oracle_timed_out {
            red_flag.get_or_insert_with(|| "oracle_timeout".into());
        }

        let looping = report
            .transition
            .as_ref()
            .is_some_and(|t| pcb.loop_guard.record_transition(t));
        if looping {
            pcb.loop_guard.reset();
            if trap.is_none() {
                let details = format!("{} identical transitions in a row", pcb.loop_guard.threshold());
                trap = Some(self.engine.raise(pid, TrapKind::L1CacheHit, d, details, prc)?);
            }
            red_flag.get_or_insert_with(|| "l1_cache_hit".into());
        }

        if report.is_mind_only() && report.fan_out.is_none() {
            pcb.mind_only_streak += 1;
        } else {
            pcb.mind_only_streak = 0;
        }
        if thrash_threshold > 0 && pcb.mind_only_streak >= thrash_threshold {
            pcb.mind_only_streak = 0;
            if trap.is_none() {
                let details = format!("{thrash_threshold} consecutive mind-only ticks");
                trap = Some(self.engine.raise(pid, TrapKind::Thrashing, d, details, prc)?);
            }
            red_flag.get_or_insert_with(|| "thrashing".into());
        }

        if stalled && trap.is_none() {
            let details = format!("no successful world op in {} turns", self.config.watchdog_ticks);
            trap = Some(self.engine.raise(pid, TrapKind::WatchdogNmi, d, details, prc)?);
        }

        if let Some(frame) = &trap {
            let same_kind = pcb.last_trap.as_ref().is_some_and(|t| t.kind == frame.kind);
            pcb.trap_streak = if same_kind { pcb.trap_streak + 1 } else { 1 };
            pcb.last_trap = Some(frame.clone());
            if repeated_trap_threshold > 0 && pcb.trap_streak >= repeated_trap_threshold {
                red_flag.get_or_insert_with(|| format!("repeated_trap:{}", frame.kind.as_str()));
            }
        }
        Ok((trap, red_flag))
    }

    /// Add one red flag.  Returns `true` if the process was killed.
    fn red_flag(&mut self, pid: Pid, reason: &str) -> Result<bool, TuringError> {
        let threshold = self.config.red_flag_threshold;
        let pcb = self.pcb_mut(pid)?;
        pcb.red_flags += 1;
        let count = pcb.red_flags;
        warn!(pid = %pid, reason, red_flags = count, "red flag");
        self.engine.engrave(&format!(
            "[RED_FLAG] pid={pid} reason={reason} red_flags={count}/{threshold}"
        ))?;
        if count >= threshold {
            self.kill(pid, &format!("red_flags={count}/{threshold}"))?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Apply one recovery action for `frame`.  Returns `false` if the budget
    /// ran out and the process was killed instead.
    fn recover(&mut self, pid: Pid, frame: &TrapFrame) -> Result<bool, TuringError> {
        let budget = self.config.panic_reset_budget;
        let max_temperature = self.config.max_temperature;
        let pcb = self
            .processes
            .get_mut(&pid)
            .ok_or(TuringError::NoSuchProcess(pid))?;
        pcb.panic_reset_count += 1;
        let count = pcb.panic_reset_count;
        if count > budget {
            let d = pcb.registers.d.clone();
            let details = format!("panic reset budget {budget} exhausted at {}", frame.trap_base);
            self.engine
                .raise(pid, TrapKind::UnrecoverableLoop, &d, details, count)?;
            self.kill(pid, "unrecoverable_loop")?;
            return Ok(false);
        }

        let action = match frame.kind {
            TrapKind::CpuFault | TrapKind::Thrashing => {
                pcb.temperature = (pcb.temperature + 0.1).min(max_temperature);
                "temperature+0.1"
            }
            TrapKind::L1CacheHit => {
                pcb.temperature = (pcb.temperature + 0.2).min(max_temperature);
                "temperature+0.2"
            }
            TrapKind::WatchdogNmi => {
                pcb.registers.d = pcb.home.clone();
                "pointer_reset"
            }
            TrapKind::PageFault | TrapKind::PanicReset | TrapKind::UnrecoverableLoop => "feedback",
        };
        pcb.feedback.push(frame.render());
        pcb.feedback.push(recovery_hint(frame.kind, &pcb.home));
        let d = pcb.registers.d.clone();
        let details = format!("recovery={action} for {}", frame.trap_base);
        self.engine
            .raise(pid, TrapKind::PanicReset, &d, details, count)?;
        Ok(true)
    }

    fn kill(&mut self, pid: Pid, reason: &str) -> Result<(), TuringError> {
        self.set_state(pid, ProcessState::Killed)?;
        self.pcb_mut(pid)?.exit_output = Some(format!("[KILLED] {reason}"));
        self.watchdog.unregister(pid);
        warn!(pid = %pid, reason, "process killed");
        self.engine.engrave(&format!("[KILL] pid={pid} reason={reason}"))?;
        self.on_exit(pid)
    }

    // ── Map-reduce ──────────────────────────────────────────────────────────

    fn fan_out(&mut self, pid: Pid, tasks: &[String], d0: &str) -> Result<(), TuringError> {
        let mut children = Vec::with_capacity(tasks.len());
        for task in tasks {
            children.push(self.spawn(Some(pid), Role::Worker, task, d0)?);
        }
        self.pcb_mut(pid)?.wait_pids = children.clone();
        self.set_state(pid, ProcessState::Blocked)?;
        info!(parent = %pid, children = children.len(), "map fan-out");
        self.engine.engrave(&format!(
            "[MAP] parent={pid} children={} tasks={}",
            pid_list(&children),
            tasks.len()
        ))?;
        self.publish(EventPayload::MapFanOut {
            parent: pid,
            children,
        });
        Ok(())
    }

    /// Called once per process when it becomes terminal.
    fn on_exit(&mut self, pid: Pid) -> Result<(), TuringError> {
        let pcb = self.pcb_mut(pid)?;
        let (ppid, state, role) = (pcb.ppid, pcb.state, pcb.role);
        let output = pcb.exit_output.clone().unwrap_or_default();
        let task = pcb.task.clone();
        let ticks = pcb.ticks;

        if state == ProcessState::Terminated && role == Role::Worker {
            let quote = pricing::quote(&task, &output, ticks);
            self.pcb_mut(pid)?.price += quote.price;
            self.engine.engrave(&format!(
                "[PRICE] pid={pid} price={:.2} chars={} ticks={} anomaly={}",
                quote.price,
                quote.chars,
                quote.ticks,
                quote.anomaly.unwrap_or("none")
            ))?;
            if let Some(parent) = ppid.and_then(|p| self.processes.get_mut(&p)) {
                parent.price += quote.price;
            }
            if let (Some(anomaly), Some(parent)) = (quote.anomaly, ppid) {
                let alive = self.processes.get(&parent).is_some_and(|p| !p.state.is_terminal());
                if alive {
                    self.red_flag(parent, &format!("anomalous_output:{anomaly}:pid={pid}"))?;
                }
            }
        }

        let Some(ppid) = ppid else {
            return Ok(());
        };
        let Some(parent) = self.processes.get_mut(&ppid) else {
            return Ok(());
        };
        parent.mailbox.push(format!(
            "[CHILD pid={pid} state={state} task={task}] {output}"
        ));
        if parent.state != ProcessState::Blocked || !parent.wait_pids.contains(&pid) {
            return Ok(());
        }
        let waiting = parent.wait_pids.clone();
        let all_done = waiting.iter().all(|child| {
            self.processes
                .get(child)
                .is_none_or(|c| c.state.is_terminal())
        });
        if all_done {
            self.reduce(ppid)?;
        }
        Ok(())
    }

    fn reduce(&mut self, pid: Pid) -> Result<(), TuringError> {
        let pcb = self.pcb_mut(pid)?;
        let joined = std::mem::take(&mut pcb.wait_pids);
        let mail = std::mem::take(&mut pcb.mailbox);
        pcb.feedback.push(format!(
            "[REDUCE] joined={}\n{}",
            pid_list(&joined),
            mail.join("\n")
        ));
        info!(parent = %pid, joined = joined.len(), "reduce join");
        self.engine
            .engrave(&format!("[REDUCE] parent={pid} joined={}", pid_list(&joined)))?;
        self.publish(EventPayload::ReduceJoin {
            parent: pid,
            joined,
        });
        self.watchdog.heartbeat(pid);
        self.requeue(pid)
    }

    // ── Halt ────────────────────────────────────────────────────────────────

    async fn arbitrate_halt(&mut self, pid: Pid) -> Result<(), TuringError> {
        self.set_state(pid, ProcessState::PendingHalt)?;
        let role = self.pcb_mut(pid)?.role;
        if role == Role::Planner || self.config.verify_worker_halts {
            let verdict = self.halt_verifier.verify().await;
            self.engine.engrave(&format!(
                "[HALT_VERDICT] pid={pid} passed={} exit_code={} command={}",
                verdict.passed,
                verdict
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".into()),
                verdict.command.as_deref().unwrap_or("-")
            ))?;
            self.publish(EventPayload::HaltVerdict {
                pid,
                passed: verdict.passed,
                feedback: verdict.feedback.clone(),
            });
            if !verdict.passed {
                info!(pid = %pid, "halt rejected");
                self.engine.engrave(&format!("[HALT_REJECTED] pid={pid}"))?;
                self.set_state(pid, ProcessState::Running)?;
                self.pcb_mut(pid)?
                    .feedback
                    .push(format!("[HALT_REJECTED] {}", verdict.feedback));
                return self.requeue(pid);
            }
        }

        self.set_state(pid, ProcessState::Terminated)?;
        let pcb = self.pcb_mut(pid)?;
        let output = pcb.registers.q.clone();
        pcb.exit_output = Some(output.clone());
        self.watchdog.unregister(pid);
        info!(pid = %pid, "process terminated");
        self.engine
            .engrave(&format!("[EXIT] pid={pid} output={output}"))?;
        self.on_exit(pid)
    }
}

fn recovery_hint(kind: TrapKind, home: &str) -> String {
    match kind {
        TrapKind::CpuFault => {
            "[RECOVERY] your last answer was rejected; emit one valid Transition JSON object".into()
        }
        TrapKind::PageFault => {
            "[RECOVERY] the world op failed; pick a different pointer or payload".into()
        }
        TrapKind::Thrashing => {
            "[RECOVERY] mind-only ticks are not progress; issue a world op".into()
        }
        TrapKind::L1CacheHit => {
            "[RECOVERY] you repeated the same transition; change approach".into()
        }
        TrapKind::WatchdogNmi => format!("[RECOVERY] no progress; pointer reset to {home}"),
        TrapKind::PanicReset | TrapKind::UnrecoverableLoop => "[RECOVERY] reassess the task".into(),
    }
}

fn pid_list(pids: &[Pid]) -> String {
    let ids: Vec<String> = pids.iter().map(Pid::to_string).collect();
    format!("[{}]", ids.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{DispatcherConfig, DispatcherOracle};
    use crate::oracle::{Oracle, OracleError, ScriptedOracle, StallingOracle};
    use std::time::Duration;
    use crate::tick_engine::TickEngineConfig;
    use serde_json::json;
    use tempfile::TempDir;
    use turingos_journal::Journal;
    use turingos_manifold::{Manifold, ManifoldConfig};
    use turingos_types::Transition;

    fn scheduler(dir: &TempDir, oracle: Box<dyn Oracle>, halt_cmd: Option<&str>, config: SchedulerConfig) -> Scheduler {
        let manifold = Manifold::open(ManifoldConfig::for_workspace(dir.path())).unwrap();
        let engine = TickEngine::new(manifold, Journal::in_memory(), oracle, TickEngineConfig::default());
        let verifier = HaltVerifier::new(dir.path()).with_initializer(halt_cmd.map(String::from));
        Scheduler::new(engine, verifier, config)
    }

    fn journal(s: &Scheduler) -> String {
        s.engine().journal().lines().unwrap().join("\n")
    }

    fn halt(q: &str) -> Result<Transition, OracleError> {
        Ok(Transition::world(q, json!({"op": "SYS_HALT"})))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn premature_halt_is_rejected_then_accepted_after_map_reduce() {
        let dir = TempDir::new().unwrap();
        let oracle = ScriptedOracle::from_fn(|q, s| {
            if q == "plan" {
                if s.contains("[REDUCE]") {
                    return halt("plan");
                }
                if s.contains("[HALT_REJECTED]") {
                    return Ok(Transition {
                        q_next: "plan".into(),
                        mind_ops: Some(vec![json!({
                            "op": "SYS_MAP_REDUCE",
                            "tasks": ["write result.txt", "write proof.txt"]
                        })]),
                        ..Transition::default()
                    });
                }
                return halt("plan");
            }
            if let Some(file) = q.strip_prefix("write ") {
                return Ok(Transition::world(
                    format!("{file} written with the answer"),
                    json!({"op": "SYS_WRITE", "payload": "42", "semantic_cap": file}),
                ));
            }
            halt(q)
        });
        let mut s = scheduler(
            &dir,
            Box::new(oracle),
            Some("test -f result.txt && test -f proof.txt"),
            SchedulerConfig::default(),
        );
        let root = s.spawn_root("plan", ".").unwrap();
        let summary = s.run_until_idle(50).await.unwrap();

        assert_eq!(summary.turns, 7);
        assert_eq!(summary.terminated, vec![Pid(1), Pid(2), Pid(3)]);
        assert!(summary.killed.is_empty() && summary.unfinished.is_empty());
        assert_eq!(summary.root_output.as_deref(), Some("plan"));
        assert!(summary.root_price > 2.0);

        let pcb = s.pcb(root).unwrap();
        assert_eq!(pcb.state, ProcessState::Terminated);
        assert_eq!(pcb.red_flags, 0);
        assert!(dir.path().join("result.txt").exists());
        assert!(dir.path().join("proof.txt").exists());
        assert_eq!(
            s.pcb(Pid(2)).unwrap().exit_output.as_deref(),
            Some("result.txt written with the answer")
        );

        let log = journal(&s);
        let rejected = log.find("[HALT_REJECTED] pid=1").unwrap();
        let mapped = log.find("[MAP] parent=1 children=[2, 3] tasks=2").unwrap();
        let reduced = log.find("[REDUCE] parent=1 joined=[2, 3]").unwrap();
        let passed = log.find("[HALT_VERDICT] pid=1 passed=true").unwrap();
        assert!(rejected < mapped && mapped < reduced && reduced < passed);
        assert!(log.contains("[PRICE] pid=2"));

        let cursor = s.engine().journal().read_replay_cursor().unwrap().unwrap();
        assert_eq!(cursor.tick_seq, 7);
        s.engine().journal().verify_chain().unwrap();
    }

    #[tokio::test]
    async fn dispatcher_failover_is_journaled() {
        let dir = TempDir::new().unwrap();
        let recovery = ScriptedOracle::from_fn(|q, _| {
            if q == "start" {
                Ok(Transition::world(
                    "wrote notes",
                    json!({"op": "SYS_WRITE", "payload": "n", "semantic_cap": "notes.md"}),
                ))
            } else {
                halt("finished")
            }
        });
        let routine = ScriptedOracle::from_fn(|_, _| Err(OracleError::Transport("503".into())));
        let dispatcher = DispatcherOracle::new(Box::new(recovery), Box::new(routine), DispatcherConfig::default());
        let mut s = scheduler(&dir, Box::new(dispatcher), None, SchedulerConfig::default());
        s.spawn_root("start", ".").unwrap();
        let summary = s.run_until_idle(10).await.unwrap();

        assert_eq!(summary.terminated, vec![Pid(1)]);
        let log = journal(&s);
        assert!(log.contains("[ROUTE] pid=1 {"));
        assert!(log.contains("\"failover_from\":\"E\""));
        assert!(log.contains("\"reason\":\"health_fallback\""));
        assert!(log.contains("[NO_HALT_STANDARD]") || log.contains("passed=true"));
    }

    #[tokio::test]
    async fn repeated_violations_kill_with_three_red_flags() {
        let dir = TempDir::new().unwrap();
        let oracle = ScriptedOracle::from_fn(|_, _| {
            Ok(Transition::world(
                "q",
                json!({"op": "SYS_GOTO", "pointer": "a.txt", "cmd": "ls"}),
            ))
        });
        let mut s = scheduler(&dir, Box::new(oracle), None, SchedulerConfig::default());
        let root = s.spawn_root("q", ".").unwrap();
        let summary = s.run_until_idle(20).await.unwrap();

        assert_eq!(summary.turns, 3);
        assert_eq!(summary.killed, vec![root]);
        let pcb = s.pcb(root).unwrap();
        assert_eq!(pcb.state, ProcessState::Killed);
        assert_eq!(pcb.exit_output.as_deref(), Some("[KILLED] red_flags=3/3"));
        let log = journal(&s);
        assert!(log.contains("[RED_FLAG] pid=1 reason=protocol_violation:MUTEX_VIOLATION red_flags=1/3"));
        assert!(log.contains("[KILL] pid=1 reason=red_flags=3/3"));
        // Two recoveries ran before the kill.
        assert_eq!(pcb.panic_reset_count, 2);
        assert!((pcb.temperature - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn exhausted_panic_budget_is_unrecoverable() {
        let dir = TempDir::new().unwrap();
        let oracle = ScriptedOracle::from_fn(|_, _| Err(OracleError::Transport("down".into())));
        let config = SchedulerConfig {
            panic_reset_budget: 2,
            repeated_trap_threshold: 0,
            ..SchedulerConfig::default()
        };
        let mut s = scheduler(&dir, Box::new(oracle), None, config);
        let root = s.spawn_root("q", ".").unwrap();
        s.run_until_idle(20).await.unwrap();

        let pcb = s.pcb(root).unwrap();
        assert_eq!(pcb.state, ProcessState::Killed);
        assert_eq!(pcb.exit_output.as_deref(), Some("[KILLED] unrecoverable_loop"));
        let log = journal(&s);
        assert_eq!(log.matches("base=sys://trap/panic_reset").count(), 2);
        assert!(log.contains("base=sys://trap/unrecoverable_loop"));
    }

    fn pusher() -> ScriptedOracle {
        let mut i = 0;
        ScriptedOracle::from_fn(move |_, _| {
            i += 1;
            Ok(Transition {
                q_next: "thinking".into(),
                mind_ops: Some(vec![json!({"op": "SYS_PUSH", "task": format!("idea {i}")})]),
                ..Transition::default()
            })
        })
    }

    #[tokio::test]
    async fn mind_only_ticks_thrash() {
        let dir = TempDir::new().unwrap();
        let mut s = scheduler(&dir, Box::new(pusher()), None, SchedulerConfig::default());
        let root = s.spawn_root("q", ".").unwrap();
        s.run_until_idle(4).await.unwrap();

        let pcb = s.pcb(root).unwrap();
        assert_eq!(pcb.red_flags, 1);
        assert_eq!(pcb.last_trap.as_ref().unwrap().kind, TrapKind::Thrashing);
        assert!((pcb.temperature - 0.3).abs() < 1e-9);
        assert!(pcb.feedback.iter().any(|f| f.starts_with("[TRAP] sys://trap/thrashing")));
        assert_eq!(pcb.task_stack.len(), 4);
    }

    #[tokio::test]
    async fn stalled_process_gets_watchdog_nmi_and_pointer_reset() {
        let dir = TempDir::new().unwrap();
        let mut calls = 0;
        let oracle = ScriptedOracle::from_fn(move |_, _| {
            calls += 1;
            if calls == 1 {
                Ok(Transition::world("q", json!({"op": "SYS_EXEC", "cmd": "true"})))
            } else {
                Ok(Transition {
                    q_next: "q".into(),
                    mind_ops: Some(vec![json!({"op": "SYS_PUSH", "task": format!("t{calls}")})]),
                    ..Transition::default()
                })
            }
        });
        let config = SchedulerConfig {
            watchdog_ticks: 2,
            thrash_threshold: 10,
            ..SchedulerConfig::default()
        };
        let mut s = scheduler(&dir, Box::new(oracle), None, config);
        let root = s.spawn_root("q", "home.txt").unwrap();
        s.run_until_idle(3).await.unwrap();

        let pcb = s.pcb(root).unwrap();
        assert_eq!(pcb.last_trap.as_ref().unwrap().kind, TrapKind::WatchdogNmi);
        assert_eq!(pcb.registers.d, "home.txt");
        assert!(journal(&s).contains("base=sys://trap/watchdog_nmi"));
    }

    #[tokio::test]
    async fn identical_transitions_hit_l1() {
        let dir = TempDir::new().unwrap();
        let oracle = ScriptedOracle::from_fn(|_, _| {
            Ok(Transition::world("again", json!({"op": "SYS_GOTO", "pointer": "."})))
        });
        let mut s = scheduler(&dir, Box::new(oracle), None, SchedulerConfig::default());
        let root = s.spawn_root("q", ".").unwrap();
        s.run_until_idle(3).await.unwrap();

        let pcb = s.pcb(root).unwrap();
        assert_eq!(pcb.red_flags, 1);
        assert_eq!(pcb.last_trap.as_ref().unwrap().kind, TrapKind::L1CacheHit);
        assert!((pcb.temperature - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn worker_fan_out_is_a_protocol_violation() {
        let dir = TempDir::new().unwrap();
        let oracle = ScriptedOracle::from_fn(|q, _| {
            let tasks = if q == "plan" { vec!["sub"] } else { vec!["subsub"] };
            Ok(Transition {
                q_next: q.to_string(),
                mind_ops: Some(vec![json!({"op": "SYS_MAP_REDUCE", "tasks": tasks})]),
                ..Transition::default()
            })
        });
        let mut s = scheduler(&dir, Box::new(oracle), None, SchedulerConfig::default());
        s.spawn_root("plan", ".").unwrap();
        s.step().await.unwrap();
        assert_eq!(s.pcb(Pid(1)).unwrap().state, ProcessState::Blocked);
        s.step().await.unwrap();
        assert_eq!(s.pcb(Pid(2)).unwrap().red_flags, 1);
        assert!(s.pcb(Pid(3)).is_none());
        assert!(journal(&s).contains("protocol_violation:planner_only_fan_out"));
    }

    #[tokio::test]
    async fn killed_children_still_unblock_the_parent() {
        let dir = TempDir::new().unwrap();
        let oracle = ScriptedOracle::from_fn(|q, s| match q {
            "plan" if s.contains("[REDUCE]") => halt("plan"),
            "plan" => Ok(Transition {
                q_next: "plan".into(),
                mind_ops: Some(vec![json!({"op": "SYS_MAP_REDUCE", "tasks": ["doomed"]})]),
                ..Transition::default()
            }),
            _ => Ok(Transition::world(
                "x",
                json!({"op": "SYS_GOTO", "pointer": "a.txt", "cmd": "ls"}),
            )),
        });
        let mut s = scheduler(&dir, Box::new(oracle), None, SchedulerConfig::default());
        s.spawn_root("plan", ".").unwrap();
        let summary = s.run_until_idle(20).await.unwrap();

        assert_eq!(summary.killed, vec![Pid(2)]);
        assert_eq!(summary.terminated, vec![Pid(1)]);
        let log = journal(&s);
        assert!(log.contains("[REDUCE] parent=1 joined=[2]"));
        assert!(!log.contains("[PRICE] pid=2"));
    }

    #[tokio::test]
    async fn anomalous_worker_output_flags_the_parent() {
        let dir = TempDir::new().unwrap();
        let oracle = ScriptedOracle::from_fn(|q, s| match q {
            "plan" if s.contains("[REDUCE]") => halt("plan"),
            "plan" => Ok(Transition {
                q_next: "plan".into(),
                mind_ops: Some(vec![json!({"op": "SYS_MAP_REDUCE", "tasks": ["summarize the repo"]})]),
                ..Transition::default()
            }),
            _ => halt("ok"),
        });
        let mut s = scheduler(&dir, Box::new(oracle), None, SchedulerConfig::default());
        s.spawn_root("plan", ".").unwrap();
        s.run_until_idle(3).await.unwrap();

        let log = journal(&s);
        assert!(log.contains("[PRICE] pid=2 price=1.30 chars=2 ticks=1 anomaly=too_short"));
        assert!(log.contains("[RED_FLAG] pid=1 reason=anomalous_output:too_short:pid=2 red_flags=1/3"));
    }

    #[tokio::test]
    async fn oracle_timeout_is_flagged_and_the_process_carries_on() {
        let dir = TempDir::new().unwrap();
        let oracle = StallingOracle {
            stalls: 1,
            inner: ScriptedOracle::new(vec![halt("done")]),
        };
        let manifold = Manifold::open(ManifoldConfig::for_workspace(dir.path())).unwrap();
        let config = TickEngineConfig {
            oracle_timeout: Duration::from_millis(50),
            ..TickEngineConfig::default()
        };
        let engine = TickEngine::new(manifold, Journal::in_memory(), Box::new(oracle), config);
        let mut s = Scheduler::new(engine, HaltVerifier::new(dir.path()), SchedulerConfig::default());
        let root = s.spawn_root("q", ".").unwrap();

        s.step().await.unwrap();
        let pcb = s.pcb(root).unwrap();
        assert_eq!(pcb.state, ProcessState::Ready);
        assert_eq!(pcb.red_flags, 1);
        assert_eq!(pcb.panic_reset_count, 1);
        assert_eq!(pcb.last_trap.as_ref().unwrap().kind, TrapKind::CpuFault);
        let log = journal(&s);
        assert!(log.contains("[TRAP] pid=1 seq=1 base=sys://trap/cpu_fault"));
        assert!(log.contains("oracle timed out after 50 ms"));
        assert!(log.contains("[RED_FLAG] pid=1 reason=oracle_timeout red_flags=1/3"));

        let summary = s.run_until_idle(5).await.unwrap();
        assert_eq!(summary.terminated, vec![root]);
        assert_eq!(summary.root_output.as_deref(), Some("done"));
        assert_eq!(s.pcb(root).unwrap().red_flags, 0);
    }

    #[tokio::test]
    async fn process_returns_to_ready_between_turns() {
        let dir = TempDir::new().unwrap();
        let mut s = scheduler(&dir, Box::new(pusher()), None, SchedulerConfig::default());
        let root = s.spawn_root("q", ".").unwrap();
        s.step().await.unwrap();

        assert_eq!(s.pcb(root).unwrap().state, ProcessState::Ready);
        let log = journal(&s);
        let running = log.find("[STATE] pid=1 READY -> RUNNING").unwrap();
        let ready = log.find("[STATE] pid=1 RUNNING -> READY").unwrap();
        assert!(running < ready);
    }

    #[tokio::test]
    async fn shutdown_flag_stops_between_turns() {
        let dir = TempDir::new().unwrap();
        let flag = Arc::new(AtomicBool::new(true));
        let mut s = scheduler(&dir, Box::new(pusher()), None, SchedulerConfig::default())
            .with_shutdown_flag(Arc::clone(&flag));
        s.spawn_root("q", ".").unwrap();
        let summary = s.run_until_idle(10).await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.turns, 0);
        assert_eq!(summary.unfinished, vec![Pid(1)]);
    }

    #[tokio::test]
    async fn lifecycle_events_reach_the_bus() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let mut s = scheduler(&dir, Box::new(ScriptedOracle::new(vec![halt("done")])), None, SchedulerConfig::default())
            .with_bus(bus);
        s.spawn_root("q", ".").unwrap();
        s.run_until_idle(5).await.unwrap();

        let mut saw_spawn = false;
        let mut saw_verdict = false;
        while let Ok(event) = rx.try_recv() {
            match event.payload {
                EventPayload::ProcessSpawned { pid, .. } => saw_spawn = pid == Pid(1),
                EventPayload::HaltVerdict { passed, .. } => saw_verdict = passed,
                _ => {}
            }
        }
        assert!(saw_spawn && saw_verdict);
    }
}
