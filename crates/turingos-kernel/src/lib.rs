//! `turingos-kernel` – Protocol enforcement & arbitration
//!
//! The kernel does not think; it decides what an oracle's answer is allowed
//! to do and whether a process may stop.
//!
//! # Modules
//!
//! - [`abi`] – strict, fail-closed syscall normalization
//!   ([`normalize`][abi::normalize], [`decode_transition`][abi::decode_transition]).
//! - [`transition_verifier`] – [`TransitionVerifier`]: a rule engine checking
//!   each decoded transition against its process context.
//! - [`kernel_gate`] – [`KernelGate`]: the single interception point the tick
//!   engine passes every transition through before executing it.
//! - [`watchdog`] – [`Watchdog`]: tick-based progress monitor raising
//!   `watchdog_nmi` for stalled processes.
//! - [`shell`] – bounded subprocess execution.
//! - [`halt_verifier`] – [`HaltVerifier`]: runs the locked acceptance command.

pub mod abi;
pub mod halt_verifier;
pub mod kernel_gate;
pub mod shell;
pub mod transition_verifier;
pub mod watchdog;

pub use abi::{AbiProfile, AbiRejection, DecodedTransition, RejectCode};
pub use halt_verifier::{HaltVerdict, HaltVerifier};
pub use kernel_gate::{GateError, KernelGate};
pub use transition_verifier::{
    GateContext, GateViolation, LaneDisciplineRule, PlannerOnlyFanOutRule, TransitionRule,
    TransitionVerifier, TrapPointerRule, WritablePointerRule,
};
pub use watchdog::{ProcessHealth, Watchdog};
