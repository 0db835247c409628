//! Command-line parsing and validation helpers.

#[cfg(test)]
mod tests;
mod validation;

use crate::suite::SuiteMode;
use clap::Parser;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_LAUNCH_COMMAND: &str = "make run";
pub const DEFAULT_MARKER: &str = "elinOS>";
pub const DEFAULT_SHUTDOWN_COMMAND: &str = "shutdown";

/// CLI options for the elinOS console harness.
#[derive(Debug, Parser, Clone)]
#[command(
    name = "elinos-harness",
    about = "Boot elinOS under an emulator and check its console commands",
    author,
    version
)]
pub struct HarnessConfig {
    /// Seconds to wait for each command's prompt to come back
    #[arg(long = "timeout", value_name = "SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Seconds to wait for the first readiness marker after launch
    #[arg(long = "boot-timeout", value_name = "SECS", default_value_t = 60)]
    pub boot_timeout_secs: u64,

    /// Command that boots the system (split shell-style, no shell involved)
    #[arg(
        long = "launch",
        env = "ELINOS_LAUNCH",
        default_value = DEFAULT_LAUNCH_COMMAND
    )]
    pub launch: String,

    /// Working directory for the launch command
    #[arg(long = "workdir", default_value = ".")]
    pub workdir: PathBuf,

    /// Prompt text that means the console is ready for input
    #[arg(long = "marker", default_value = DEFAULT_MARKER)]
    pub marker: String,

    /// Console command that asks the system to halt
    #[arg(long = "shutdown-command", default_value = DEFAULT_SHUTDOWN_COMMAND)]
    pub shutdown_command: String,

    /// Seconds to wait for a graceful halt before signalling the emulator
    #[arg(long = "shutdown-grace", value_name = "SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,

    /// Pause between cases (milliseconds)
    #[arg(long = "settle-ms", value_name = "MS", default_value_t = 1000)]
    pub settle_ms: u64,

    /// Built-in case table to run
    #[arg(long = "mode", value_enum, default_value_t = SuiteMode::Full)]
    pub mode: SuiteMode,

    /// YAML/JSON case file used instead of the built-in table
    #[arg(long = "cases", value_name = "PATH")]
    pub cases: Option<PathBuf>,

    /// Ad-hoc command for verify mode
    #[arg(long = "command", value_name = "TEXT")]
    pub command: Option<String>,

    /// Text the ad-hoc command's output must contain
    #[arg(long = "expect", value_name = "TEXT")]
    pub expect: Option<String>,

    /// Remove ANSI escape sequences from output before matching
    #[arg(long = "strip-ansi", default_value_t = false)]
    pub strip_ansi: bool,

    /// TERM value exported to the launch command
    #[arg(long = "term", default_value_t = default_term())]
    pub term_value: String,

    /// Write a JSON report of every case to this path
    #[arg(long = "report-json", value_name = "PATH")]
    pub report_json: Option<PathBuf>,

    /// Enable debug and trace logging to temp files
    #[arg(long = "logs", env = "ELINOS_HARNESS_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(
        long = "no-logs",
        env = "ELINOS_HARNESS_NO_LOGS",
        default_value_t = false
    )]
    pub no_logs: bool,

    /// Allow logging captured console output (debug log only)
    #[arg(
        long = "log-content",
        env = "ELINOS_HARNESS_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,
}

fn default_term() -> String {
    env::var("TERM").unwrap_or_else(|_| "xterm-256color".to_string())
}
