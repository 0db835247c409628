use super::HarnessConfig;
use crate::session::{SessionOptions, ShutdownPlan};
use crate::suite::{load_cases, validate_cases, SuiteMode, TestCase, MAX_TIMEOUT_SECS};
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::time::Duration;

const MAX_SHUTDOWN_GRACE_SECS: u64 = 300;
const MAX_SETTLE_MS: u64 = 60_000;

impl HarnessConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize paths.
    pub fn validate(&mut self) -> Result<()> {
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
            bail!(
                "--timeout must be between 1 and {MAX_TIMEOUT_SECS} seconds, got {}",
                self.timeout_secs
            );
        }
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.boot_timeout_secs) {
            bail!(
                "--boot-timeout must be between 1 and {MAX_TIMEOUT_SECS} seconds, got {}",
                self.boot_timeout_secs
            );
        }
        if !(1..=MAX_SHUTDOWN_GRACE_SECS).contains(&self.shutdown_grace_secs) {
            bail!(
                "--shutdown-grace must be between 1 and {MAX_SHUTDOWN_GRACE_SECS} seconds, got {}",
                self.shutdown_grace_secs
            );
        }
        if self.settle_ms > MAX_SETTLE_MS {
            bail!(
                "--settle-ms must be between 0 and {MAX_SETTLE_MS}, got {}",
                self.settle_ms
            );
        }

        ensure_single_line(&self.marker, "--marker")?;
        ensure_single_line(&self.shutdown_command, "--shutdown-command")?;
        if self.term_value.trim().is_empty() {
            bail!("--term must not be empty");
        }

        // Fail on a malformed launch command before anything is spawned.
        SessionOptions::from_launch_command(&self.launch, &self.marker)?;

        self.workdir = self.workdir.canonicalize().with_context(|| {
            format!("failed to canonicalize --workdir '{}'", self.workdir.display())
        })?;
        if !self.workdir.is_dir() {
            bail!("--workdir '{}' is not a directory", self.workdir.display());
        }

        if self.expect.is_some() && self.command.is_none() {
            bail!("--expect requires --command");
        }
        if let Some(command) = &self.command {
            if self.mode != SuiteMode::Verify {
                bail!("--command is only valid with --mode verify");
            }
            if self.cases.is_some() {
                bail!("--command cannot be combined with --cases");
            }
            if self.report_json.is_some() {
                bail!("--report-json needs a suite run and cannot be combined with --command");
            }
            ensure_single_line(command, "--command")?;
            if self.expect.as_deref() == Some("") {
                bail!("--expect must not be empty");
            }
        }

        Ok(())
    }

    /// Launch settings for the console session.
    pub fn session_options(&self) -> Result<SessionOptions> {
        let mut options = SessionOptions::from_launch_command(&self.launch, &self.marker)?;
        options.working_dir = self.workdir.clone();
        options.term = self.term_value.clone();
        options.boot_timeout = self.boot_timeout();
        options.shutdown = ShutdownPlan {
            command: self.shutdown_command.clone(),
            grace: Duration::from_secs(self.shutdown_grace_secs),
            ..ShutdownPlan::default()
        };
        Ok(options)
    }

    /// The case table for this run: `--cases` when given, the built-in table otherwise.
    pub fn load_suite(&self) -> Result<Vec<TestCase>> {
        let cases = match &self.cases {
            Some(path) => load_cases(path)?,
            None => self.mode.cases(),
        };
        validate_cases(&cases, &self.marker)?;
        Ok(cases)
    }

    /// Label used in the banner and the JSON report.
    pub fn suite_label(&self) -> &'static str {
        if self.cases.is_some() {
            "custom"
        } else {
            self.mode.label()
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

fn ensure_single_line(value: &str, flag: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{flag} must not be empty");
    }
    if value.contains(['\n', '\r']) {
        bail!("{flag} must be a single line");
    }
    Ok(())
}
