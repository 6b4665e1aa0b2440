//! `turingos-manifold` – the pointer-addressed resource space.
//!
//! - [`manifold`] – [`Manifold`]: `observe` / `interfere` over every pointer form.
//! - [`workspace`] – confined file reads and writes.
//! - [`paging`] – deterministic pagination of oversized observations.
//! - [`capability`] – persisted `vfd://` handles with `r` / `rw` access.
//! - [`callstack`] – the `sys://callstack` register.
//! - [`git`] – `sys://git/log` argument building and rendering.
//! - [`chaos`] – seeded fault injection.

pub mod callstack;
pub mod capability;
pub mod chaos;
pub mod error;
pub mod git;
pub mod manifold;
pub mod paging;
pub mod workspace;

pub use chaos::ChaosConfig;
pub use error::ManifoldError;
pub use manifold::{KERNEL_DIR, Manifold, ManifoldConfig};
