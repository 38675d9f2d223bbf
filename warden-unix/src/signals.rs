//! Signal names and delivery.

use std::str::FromStr;

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

/// Parse a signal given as `SIGTERM`, `TERM`, `term` or `15`.
pub fn parse_signal(name: &str) -> Option<Signal> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    if let Ok(number) = name.parse::<i32>() {
        return Signal::try_from(number).ok();
    }
    let upper = name.to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{}", upper)
    };
    Signal::from_str(&full).ok()
}

/// Like [`parse_signal`], returning the raw signal number.
pub fn parse_signal_name(name: &str) -> Option<i32> {
    parse_signal(name).map(|s| s as i32)
}

/// Deliver `signal` to every process in the group led by `pgid`.
pub fn send_to_group(pgid: u32, signal: Signal) -> Result<(), Errno> {
    killpg(Pid::from_raw(pgid as i32), signal)
}

/// Deliver `signal` to a single process.
pub fn send_to_process(pid: u32, signal: Signal) -> Result<(), Errno> {
    kill(Pid::from_raw(pid as i32), signal)
}

/// Whether a process with this PID currently exists (checked with signal 0).
pub fn is_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}
