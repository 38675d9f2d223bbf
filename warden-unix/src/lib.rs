//! Low-level Unix helpers used by the warden supervisor.
//!
//! Everything that needs `unsafe` or raw `libc` calls lives here so the
//! daemon crate can stay free of it.

#[cfg(unix)]
pub mod groups;
#[cfg(unix)]
pub mod process;
#[cfg(unix)]
pub mod signals;
