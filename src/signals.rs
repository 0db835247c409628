//! Operator interruption (Ctrl-C, SIGTERM from CI, hangup) as a polled cancel flag.

use crate::log_debug;
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set by the signal handler; only atomic stores happen inside the handler.
static INTERRUPT_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_interrupt(_: libc::c_int) {
    INTERRUPT_RECEIVED.store(true, Ordering::SeqCst);
}

/// Shared cancellation flag checked by every bounded wait.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    follow_signals: bool,
}

impl CancelToken {
    /// A token that only trips when [`CancelToken::cancel`] is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also trips once an interrupt signal has been delivered.
    pub fn from_signals() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            follow_signals: true,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || (self.follow_signals && INTERRUPT_RECEIVED.load(Ordering::SeqCst))
    }
}

/// Install handlers for SIGINT, SIGTERM and SIGHUP.
pub fn install_interrupt_handlers() -> Result<()> {
    for signo in [libc::SIGINT, libc::SIGTERM, libc::SIGHUP] {
        unsafe {
            // SAFETY: handle_interrupt only performs an atomic store, which is async-signal-safe.
            let handler = handle_interrupt as *const () as libc::sighandler_t;
            if libc::signal(signo, handler) == libc::SIG_ERR {
                log_debug(&format!("failed to install handler for signal {signo}"));
                return Err(anyhow!("failed to install handler for signal {signo}"));
            }
        }
    }
    Ok(())
}
