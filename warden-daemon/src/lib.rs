//! warden: a process supervisor.
//!
//! The crate is organised leaf-first:
//! - [`sync`]: cancellable lock, condition, signal and the scope tree that
//!   interrupts them;
//! - [`execution`]: one run attempt of a service and its
//!   Down/Running/Stopped/Killed state machine;
//! - [`orchestrator`]: per-service drive loops, restart policy, master
//!   semantics and coordinated shutdown.
//!
//! [`config`], [`access`] and [`user`] are the collaborators the core consumes.

pub mod access;
pub mod config;
pub mod errors;
pub mod execution;
pub mod orchestrator;
pub mod sync;
pub mod user;

/// Exit code reported when the master never produced one.
pub const MASTER_FAILURE_EXIT_CODE: i32 = 1;
