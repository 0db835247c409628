//! Console session controller: hosts the emulator launch command in a PTY and
//! exposes the expect/send primitives the rest of the harness is built on.
//!
//! Only this module touches the PTY file descriptor. Callers get a narrow
//! surface: [`ConsoleSession::spawn`], [`ConsoleSession::read_until_marker`],
//! [`ConsoleSession::write_line`], [`ConsoleSession::is_alive`],
//! [`ConsoleSession::terminate`] and [`ConsoleSession::kill`].

mod console;
mod io;
mod pty;
pub mod shutdown;

#[cfg(test)]
mod tests;

use anyhow::{bail, Context, Result};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub use console::ConsoleSession;
pub use shutdown::{ShutdownOutcome, ShutdownSequencer};

/// Why a `read_until_marker` call returned without a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// The marker did not show up before the deadline.
    Timeout,
    /// The console stream closed (every process holding the PTY exited).
    EndOfStream,
    /// The operator asked the harness to stop.
    Interrupted,
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Timeout => write!(f, "timed out waiting for the readiness marker"),
            ReadError::EndOfStream => write!(f, "console stream ended"),
            ReadError::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl std::error::Error for ReadError {}

/// Fatal outcomes of [`ConsoleSession::spawn`]; no test case runs after one of these.
#[derive(Debug)]
pub enum BootFailure {
    /// The launch command could not be started.
    Spawn(anyhow::Error),
    /// The readiness marker was not seen within the boot timeout.
    Timeout(Duration),
    /// The process stream ended before the marker appeared.
    UnexpectedTermination,
    /// An interrupt arrived while waiting for boot.
    Interrupted,
}

impl fmt::Display for BootFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootFailure::Spawn(err) => write!(f, "failed to start launch command: {err:#}"),
            BootFailure::Timeout(timeout) => write!(
                f,
                "readiness marker not seen within {}s of launch",
                timeout.as_secs()
            ),
            BootFailure::UnexpectedTermination => {
                write!(f, "emulator process ended before the system booted")
            }
            BootFailure::Interrupted => write!(f, "interrupted while waiting for boot"),
        }
    }
}

impl std::error::Error for BootFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BootFailure::Spawn(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// Escalation timings for [`ShutdownSequencer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownPlan {
    /// Line sent to request a clean halt.
    pub command: String,
    /// How long to wait for the console to close after `command`.
    pub grace: Duration,
    /// Wait after SIGTERM before escalating to SIGKILL.
    pub term_wait: Duration,
    /// Wait after SIGKILL before giving up on confirming exit.
    pub kill_wait: Duration,
}

impl Default for ShutdownPlan {
    fn default() -> Self {
        Self {
            command: "shutdown".to_string(),
            grace: Duration::from_secs(10),
            term_wait: Duration::from_secs(2),
            kill_wait: Duration::from_secs(1),
        }
    }
}

/// Everything needed to launch and boot one console session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub term: String,
    pub marker: String,
    pub boot_timeout: Duration,
    pub shutdown: ShutdownPlan,
}

impl SessionOptions {
    /// Split a shell-style launch command (`make run`, `qemu-system-riscv64 -nographic ...`).
    pub fn from_launch_command(launch: &str, marker: &str) -> Result<Self> {
        let mut words = shell_words::split(launch)
            .with_context(|| format!("invalid launch command: {launch}"))?;
        if words.is_empty() {
            bail!("launch command is empty");
        }
        if marker.is_empty() {
            bail!("readiness marker is empty");
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
            working_dir: PathBuf::from("."),
            term: "xterm-256color".to_string(),
            marker: marker.to_string(),
            boot_timeout: Duration::from_secs(60),
            shutdown: ShutdownPlan::default(),
        })
    }
}
