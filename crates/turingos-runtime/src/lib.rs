//! `turingos-runtime` – The tick loop and its scheduler
//!
//! Where the "thinking" happens: an oracle collapses `(q, s)` into a
//! transition, the kernel gate decides what that transition may do, and the
//! scheduler decides who ticks next.
//!
//! # Modules
//!
//! - [`oracle`] – the [`Oracle`] trait every model backend implements, plus
//!   [`ScriptedOracle`][oracle::ScriptedOracle] for deterministic runs.
//! - [`llm_driver`] – [`LlmOracle`][llm_driver::LlmOracle]: an
//!   OpenAI-compatible HTTP client.
//!   [`STABILITY_GUIDELINES`][llm_driver::STABILITY_GUIDELINES] are injected
//!   into every system message and the
//!   [`Transition`][turingos_types::Transition] JSON Schema is sent via
//!   `response_format`.
//! - [`dispatcher`] – [`DispatcherOracle`][dispatcher::DispatcherOracle]:
//!   routes each call to the recovery (P) or routine (E) lane by context and
//!   lane health, with one-way E→P failover.
//! - [`contract`] – [`ExecutionContract`][contract::ExecutionContract]:
//!   run-level halt preconditions and progress hints.
//! - [`tick_engine`] – [`TickEngine`]: one observe → collapse → gate →
//!   execute → journal cycle.
//! - [`scheduler`] – [`Scheduler`]: round-robin over processes with
//!   map-reduce, halt arbitration, red flags and panic resets.
//! - [`loop_guard`] – [`LoopGuard`]: detects identical consecutive
//!   transitions.
//! - [`pricing`] – deterministic scoring of worker outputs.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with an optional OTLP span exporter.
//!
//! # Kernel gating
//!
//! Every transition an oracle produces **must** pass through
//! [`KernelGate::admit`] before anything in it executes.  [`KernelGate`] is
//! re-exported here so callers wiring a [`TickEngine`] need no direct
//! dependency on `turingos-kernel`.

pub mod contract;
pub mod dispatcher;
pub mod llm_driver;
pub mod loop_guard;
pub mod oracle;
pub mod pricing;
pub mod scheduler;
pub mod telemetry;
pub mod tick_engine;

pub use contract::{ContractVerdict, ExecutionContract, OpenContract, RequiredFilesContract};
pub use dispatcher::{DispatcherConfig, DispatcherOracle};
pub use llm_driver::{ChatMessage, ChatRole, LlmError, LlmOracle, STABILITY_GUIDELINES};
pub use loop_guard::LoopGuard;
pub use oracle::{CollapseOptions, Oracle, OracleError, ScriptedOracle};
pub use scheduler::{Pcb, RunSummary, Scheduler, SchedulerConfig};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use tick_engine::{TickEngine, TickEngineConfig, TickInput, TickReport};

pub use turingos_kernel::{HaltVerifier, KernelGate};
