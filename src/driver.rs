//! One expect cycle: send a command line, collect output up to the next prompt.

use crate::matcher::{decode_output, output_contains};
use crate::session::{ConsoleSession, ReadError};
use crate::{log_debug, log_debug_content};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Outcome of one command. Built once by [`CommandDriver::execute`] and graded
/// by [`CommandResult::with_expectation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub command: String,
    pub output: String,
    pub matched: bool,
    pub timed_out: bool,
    pub session_ended: bool,
    pub interrupted: bool,
    pub elapsed_ms: u64,
}

impl CommandResult {
    fn new(command: &str, elapsed: Duration) -> Self {
        Self {
            command: command.to_string(),
            output: String::new(),
            matched: false,
            timed_out: false,
            session_ended: false,
            interrupted: false,
            elapsed_ms: elapsed.as_millis().min(u128::from(u64::MAX)) as u64,
        }
    }

    /// Whether the readiness marker came back for this command.
    pub fn reached_marker(&self) -> bool {
        !self.timed_out && !self.session_ended && !self.interrupted
    }

    /// Apply the matching policy: with no expectation, reaching the marker is
    /// enough; otherwise the exact substring must appear in the output.
    pub fn with_expectation(self, expected: Option<&str>) -> Self {
        let matched = self.reached_marker()
            && expected.map_or(true, |needle| output_contains(&self.output, needle));
        Self { matched, ..self }
    }
}

/// Issues commands through a [`ConsoleSession`] and turns replies into results.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandDriver {
    strip_ansi: bool,
}

impl CommandDriver {
    pub fn new(strip_ansi: bool) -> Self {
        Self { strip_ansi }
    }

    pub fn execute(
        &self,
        session: &mut ConsoleSession,
        command: &str,
        timeout: Duration,
    ) -> CommandResult {
        let start = Instant::now();
        if let Err(err) = session.write_line(command) {
            log_debug(&format!("failed to send {command:?}: {err:#}"));
            return CommandResult {
                session_ended: true,
                ..CommandResult::new(command, start.elapsed())
            };
        }

        match session.read_until_marker(timeout) {
            Ok(captured) => {
                let output = decode_output(&captured, self.strip_ansi);
                log_debug_content(&format!("output for {command:?}: {output}"));
                CommandResult {
                    output,
                    matched: true,
                    ..CommandResult::new(command, start.elapsed())
                }
            }
            Err(ReadError::Timeout) => {
                log_debug(&format!("timeout after {timeout:?} waiting on {command:?}"));
                CommandResult {
                    timed_out: true,
                    ..CommandResult::new(command, start.elapsed())
                }
            }
            Err(ReadError::EndOfStream) => CommandResult {
                session_ended: true,
                ..CommandResult::new(command, start.elapsed())
            },
            Err(ReadError::Interrupted) => CommandResult {
                interrupted: true,
                ..CommandResult::new(command, start.elapsed())
            },
        }
    }
}
