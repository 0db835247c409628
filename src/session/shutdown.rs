//! Escalating shutdown: halt command, then SIGTERM, then SIGKILL.

use super::{ConsoleSession, ShutdownPlan};
use crate::log_debug;

/// How a cleanup pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Nothing to do: the process was already gone.
    AlreadyExited,
    /// The target honoured the shutdown command.
    Graceful,
    /// SIGTERM was enough.
    Terminated,
    /// SIGKILL was required.
    Killed,
    /// Every step ran but exit could not be confirmed in time.
    Unconfirmed,
}

/// Runs the escalation described by a [`ShutdownPlan`]. Never fails: each
/// failed step falls through to the next, harsher one.
#[derive(Debug, Clone)]
pub struct ShutdownSequencer {
    plan: ShutdownPlan,
}

impl ShutdownSequencer {
    pub fn new(plan: ShutdownPlan) -> Self {
        Self { plan }
    }

    pub fn cleanup(&self, session: &mut ConsoleSession) -> ShutdownOutcome {
        let outcome = self.run(session);
        tracing::info!(outcome = ?outcome, "console session cleanup finished");
        outcome
    }

    fn run(&self, session: &mut ConsoleSession) -> ShutdownOutcome {
        if !session.is_alive() {
            // A crashed target closes the console right away; a brief drain tells
            // that apart from an emulator that outlived its launcher.
            if session.stream_closed() || session.wait_for_end_of_stream(self.plan.kill_wait) {
                return ShutdownOutcome::AlreadyExited;
            }
            return self.stop_orphaned(session);
        }

        if self.request_halt(session) {
            return ShutdownOutcome::Graceful;
        }

        log_debug("graceful shutdown failed; sending SIGTERM");
        session.terminate();
        if session.wait_for_exit(self.plan.term_wait) {
            return ShutdownOutcome::Terminated;
        }

        log_debug("session still alive after SIGTERM; sending SIGKILL");
        session.kill();
        if session.wait_for_exit(self.plan.kill_wait) {
            ShutdownOutcome::Killed
        } else {
            log_debug("session exit not confirmed after SIGKILL");
            ShutdownOutcome::Unconfirmed
        }
    }

    /// The launcher was reaped but something in its process group (usually the
    /// emulator) still holds the console. Escalate on end of stream instead of
    /// child exit, since there is no child left to wait for.
    fn stop_orphaned(&self, session: &mut ConsoleSession) -> ShutdownOutcome {
        log_debug("launcher exited but console still open");
        if self.request_halt(session) {
            return ShutdownOutcome::Graceful;
        }

        session.terminate();
        if session.wait_for_end_of_stream(self.plan.term_wait) {
            return ShutdownOutcome::Terminated;
        }

        log_debug("console still open after SIGTERM; sending SIGKILL");
        session.kill();
        if session.wait_for_end_of_stream(self.plan.kill_wait) {
            ShutdownOutcome::Killed
        } else {
            log_debug("console still open after SIGKILL");
            ShutdownOutcome::Unconfirmed
        }
    }

    /// Send the halt command once and wait for the console to close.
    fn request_halt(&self, session: &mut ConsoleSession) -> bool {
        if session.shutdown_requests() > 0 {
            return false;
        }
        session.record_shutdown_request();
        if let Err(err) = session.write_line(&self.plan.command) {
            log_debug(&format!("failed to send shutdown command: {err:#}"));
            return false;
        }
        if !session.wait_for_end_of_stream(self.plan.grace) {
            log_debug(&format!(
                "console still open {:?} after shutdown command",
                self.plan.grace
            ));
            return false;
        }
        session.wait_for_exit(self.plan.kill_wait)
    }
}
