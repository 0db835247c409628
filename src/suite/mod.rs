//! Ordered test cases and the runner that drives them through one console session.

mod cases;
mod file;


use crate::driver::{CommandDriver, CommandResult};
use crate::report;
use crate::session::ConsoleSession;
use crate::signals::CancelToken;
use anyhow::{bail, Result};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

pub use cases::{full_suite, quick_suite, verification_case, SuiteMode};
pub use file::load_cases;

const SETTLE_POLL: Duration = Duration::from_millis(50);
/// Upper bound for any single command or boot wait, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// One command and what its reply must contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub command: String,
    /// `None` passes as soon as the prompt comes back.
    pub expected: Option<String>,
    /// `None` uses the runner's default timeout.
    pub timeout: Option<Duration>,
}

impl TestCase {
    pub fn new(command: &str, expected: Option<&str>) -> Self {
        Self {
            command: command.to_string(),
            expected: expected.map(str::to_string),
            timeout: None,
        }
    }

    pub fn expecting(command: &str, expected: &str) -> Self {
        Self::new(command, Some(expected))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Reject tables that could never be graded meaningfully.
pub fn validate_cases(cases: &[TestCase], marker: &str) -> Result<()> {
    if cases.is_empty() {
        bail!("test suite has no cases");
    }
    for (idx, case) in cases.iter().enumerate() {
        let n = idx + 1;
        if case.command.contains(['\n', '\r']) {
            bail!("case {n}: command must be a single line");
        }
        match case.expected.as_deref() {
            Some("") => bail!("case {n} ({}): expected text is empty", case.command),
            Some(expected) if expected == marker => bail!(
                "case {n} ({}): expected text equals the readiness marker {marker:?}",
                case.command
            ),
            _ => {}
        }
        if let Some(timeout) = case.timeout {
            if timeout.is_zero() || timeout > Duration::from_secs(MAX_TIMEOUT_SECS) {
                bail!(
                    "case {n} ({}): timeout must be between 1 and {MAX_TIMEOUT_SECS} seconds",
                    case.command
                );
            }
        }
    }
    Ok(())
}

/// Returned when an operator interrupt stops the suite early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "test run interrupted")
    }
}

impl std::error::Error for Interrupted {}

/// Tally of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SuiteSummary {
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CommandResult>,
}

impl SuiteSummary {
    pub fn from_results(results: Vec<CommandResult>) -> Self {
        let passed = results.iter().filter(|r| r.matched).count();
        Self {
            passed,
            failed: results.len() - passed,
            results,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed
    }

    /// Percentage of passing cases; `None` when nothing ran.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        Some(self.passed as f64 / total as f64 * 100.0)
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Executes cases in declared order against one session.
#[derive(Debug, Clone)]
pub struct SuiteRunner {
    driver: CommandDriver,
    default_timeout: Duration,
    settle_delay: Duration,
    cancel: CancelToken,
}

impl SuiteRunner {
    pub fn new(
        driver: CommandDriver,
        default_timeout: Duration,
        settle_delay: Duration,
        cancel: CancelToken,
    ) -> Self {
        Self {
            driver,
            default_timeout,
            settle_delay,
            cancel,
        }
    }

    /// Run every case, in order, even after failures. Only an interrupt stops early.
    pub fn run_all(
        &self,
        session: &mut ConsoleSession,
        cases: &[TestCase],
        out: &mut dyn Write,
    ) -> Result<SuiteSummary> {
        let total = cases.len();
        let mut results = Vec::with_capacity(total);
        for (idx, case) in cases.iter().enumerate() {
            if idx > 0 && !self.settle() {
                return Err(Interrupted.into());
            }
            report::case_header(out, idx + 1, total, &case.command)?;
            let result = self.run_case(session, case, out)?;
            tracing::info!(
                index = idx + 1,
                total,
                command = %result.command,
                passed = result.matched,
                timed_out = result.timed_out,
                session_ended = result.session_ended,
                elapsed_ms = result.elapsed_ms,
                "test case finished"
            );
            results.push(result);
        }
        Ok(SuiteSummary::from_results(results))
    }

    /// Ad-hoc check of a single command, without suite bookkeeping.
    pub fn run_single(
        &self,
        session: &mut ConsoleSession,
        command: &str,
        expected: Option<&str>,
        timeout: Duration,
        out: &mut dyn Write,
    ) -> Result<bool> {
        let case = TestCase {
            command: command.to_string(),
            expected: expected.map(str::to_string),
            timeout: Some(timeout),
        };
        let result = self.run_case(session, &case, out)?;
        Ok(result.matched)
    }

    fn run_case(
        &self,
        session: &mut ConsoleSession,
        case: &TestCase,
        out: &mut dyn Write,
    ) -> Result<CommandResult> {
        report::sending(out, &case.command)?;
        let timeout = case.timeout.unwrap_or(self.default_timeout);
        let result = self
            .driver
            .execute(session, &case.command, timeout)
            .with_expectation(case.expected.as_deref());
        if result.interrupted {
            return Err(Interrupted.into());
        }
        report::case_outcome(out, &result, case.expected.as_deref())?;
        Ok(result)
    }

    /// Give the target time to settle; false if interrupted while waiting.
    fn settle(&self) -> bool {
        let deadline = Instant::now().checked_add(self.settle_delay);
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            let remaining = match deadline {
                Some(deadline) if now >= deadline => return true,
                Some(deadline) => deadline - now,
                None => SETTLE_POLL,
            };
            thread::sleep(remaining.min(SETTLE_POLL));
        }
    }
}
