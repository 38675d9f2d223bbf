//! Test utilities for the warden workspace
//!
//! Builders for service configurations, marker files written by the spawned
//! shell commands, a supervisor harness and bounded polling helpers.

pub mod helpers;

pub use helpers::config_builder::{TestConfigBuilder, TestServiceBuilder};
pub use helpers::harness::TestSupervisor;
pub use helpers::marker_files::MarkerFileHelper;
pub use helpers::wait_utils::{wait_for_running, wait_for_status, wait_for_unregistered, WaitError};
