use crate::matcher::find_marker;
use crate::signals::CancelToken;
use crate::{log_debug, log_debug_content};
use anyhow::{Context, Result};
use crossbeam_channel::{bounded, never, Receiver, RecvTimeoutError};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::io::{spawn_reader_thread, write_all};
use super::pty::{
    close_fd, poll_child, set_nonblocking, signal_group, spawn_pty_child, LaunchSpec,
};
use super::shutdown::ShutdownSequencer;
use super::{BootFailure, ReadError, SessionOptions, ShutdownPlan};

/// Upper bound on a single wait slice, so cancellation is noticed promptly.
const READ_POLL_SLICE: Duration = Duration::from_millis(100);
/// Output kept while no marker shows up; older bytes are discarded first.
pub(super) const MAX_PENDING_BYTES: usize = 4 * 1024 * 1024;
const OUTPUT_CHANNEL_CAPACITY: usize = 256;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A live console session: the launched process, its PTY and the unread output.
///
/// Dropping the session runs the [`ShutdownSequencer`], so every path that
/// obtained a session (success, error, interrupt, panic) shuts the emulator down.
pub struct ConsoleSession {
    master_fd: RawFd,
    /// Child pid; set to -1 once the child has been reaped.
    child_pid: i32,
    /// Process group created by the child's `setsid()`; outlives the reap.
    pgid: i32,
    output_rx: Receiver<Vec<u8>>,
    output_thread: Option<thread::JoinHandle<()>>,
    reader_stop: Arc<AtomicBool>,
    pending: Vec<u8>,
    marker: Vec<u8>,
    stream_closed: bool,
    cancel: CancelToken,
    shutdown: ShutdownPlan,
    shutdown_requests: usize,
    boot_output: Vec<u8>,
}

impl ConsoleSession {
    /// Launch the emulator and block until the readiness marker appears.
    ///
    /// On failure the partially started session is dropped before returning,
    /// which shuts the process down.
    pub fn spawn(options: &SessionOptions, cancel: CancelToken) -> Result<Self, BootFailure> {
        let mut session = Self::start(options, cancel).map_err(BootFailure::Spawn)?;
        log_debug(&format!(
            "console session started: pid={} cmd={} {:?}",
            session.child_pid, options.program, options.args
        ));
        match session.read_until_marker(options.boot_timeout) {
            Ok(boot_output) => {
                log_debug_content(&format!(
                    "boot output: {}",
                    String::from_utf8_lossy(&boot_output)
                ));
                session.boot_output = boot_output;
                Ok(session)
            }
            Err(ReadError::Timeout) => Err(BootFailure::Timeout(options.boot_timeout)),
            Err(ReadError::EndOfStream) => Err(BootFailure::UnexpectedTermination),
            Err(ReadError::Interrupted) => Err(BootFailure::Interrupted),
        }
    }

    fn start(options: &SessionOptions, cancel: CancelToken) -> Result<Self> {
        let working_dir = options.working_dir.to_string_lossy();
        let launch = LaunchSpec::new(&options.program, &options.args, &working_dir, &options.term)?;

        // SAFETY: launch holds valid CStrings; spawn_pty_child returns an fd we now own.
        let (master_fd, child_pid) = unsafe { spawn_pty_child(&launch)? };
        // SAFETY: master_fd was just returned by openpty and is open.
        if let Err(err) = unsafe { set_nonblocking(master_fd) } {
            // SAFETY: master_fd is ours; the child is signalled and reaped below.
            unsafe { close_fd(master_fd) };
            signal_group(child_pid, libc::SIGKILL);
            let _ = poll_child(child_pid);
            return Err(err);
        }

        let (tx, rx) = bounded(OUTPUT_CHANNEL_CAPACITY);
        let reader_stop = Arc::new(AtomicBool::new(false));
        let output_thread = match spawn_reader_thread(master_fd, tx, Arc::clone(&reader_stop)) {
            Ok(handle) => handle,
            Err(err) => {
                // SAFETY: as above.
                unsafe { close_fd(master_fd) };
                signal_group(child_pid, libc::SIGKILL);
                let _ = poll_child(child_pid);
                return Err(err).context("failed to start console reader thread");
            }
        };

        Ok(Self {
            master_fd,
            child_pid,
            pgid: child_pid,
            output_rx: rx,
            output_thread: Some(output_thread),
            reader_stop,
            pending: Vec::new(),
            marker: options.marker.as_bytes().to_vec(),
            stream_closed: false,
            cancel,
            shutdown: options.shutdown.clone(),
            shutdown_requests: 0,
            boot_output: Vec::new(),
        })
    }

    /// Block until the marker appears, returning everything before it.
    ///
    /// The marker itself is consumed; bytes after it stay buffered for the next
    /// call. Buffered output is always searched first, so a marker that arrived
    /// just before the console closed is still reported as a match.
    pub fn read_until_marker(&mut self, timeout: Duration) -> Result<Vec<u8>, ReadError> {
        let deadline = deadline_after(timeout);
        // Bytes before this offset were already searched; the overlap keeps a
        // marker split across chunks findable.
        let mut scan_from = 0;
        loop {
            let window = self.pending.get(scan_from..).unwrap_or(&[]);
            if let Some(offset) = find_marker(window, &self.marker) {
                let idx = scan_from + offset;
                let captured = self.pending[..idx].to_vec();
                self.pending.drain(..idx + self.marker.len());
                return Ok(captured);
            }
            scan_from = self
                .pending
                .len()
                .saturating_sub(self.marker.len().saturating_sub(1));
            if self.stream_closed {
                return Err(ReadError::EndOfStream);
            }
            if self.cancel.is_cancelled() {
                return Err(ReadError::Interrupted);
            }
            let Some(slice) = remaining_slice(deadline) else {
                return Err(ReadError::Timeout);
            };
            match self.output_rx.recv_timeout(slice) {
                Ok(chunk) => {
                    let mut dropped = self.buffer_chunk(chunk);
                    while let Ok(chunk) = self.output_rx.try_recv() {
                        dropped += self.buffer_chunk(chunk);
                    }
                    scan_from = scan_from.saturating_sub(dropped);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log_debug("console stream closed");
                    self.stream_closed = true;
                }
            }
        }
    }

    /// Write `text` plus a line terminator. Does not wait for any response.
    pub fn write_line(&mut self, text: &str) -> Result<()> {
        if self.master_fd < 0 {
            anyhow::bail!("console is closed");
        }
        let mut line = Vec::with_capacity(text.len() + 1);
        line.extend_from_slice(text.as_bytes());
        line.push(b'\n');
        write_all(self.master_fd, &line)
    }

    /// Non-blocking liveness check; reaps the child once it has exited.
    pub fn is_alive(&mut self) -> bool {
        match poll_child(self.child_pid) {
            Some(false) => true,
            Some(true) => {
                log_debug(&format!("console child {} exited", self.child_pid));
                self.child_pid = -1;
                false
            }
            None => false,
        }
    }

    /// Ask the emulator's process group to stop (SIGTERM).
    pub fn terminate(&mut self) -> bool {
        signal_group(self.pgid, libc::SIGTERM)
    }

    /// Force the emulator's process group down (SIGKILL).
    pub fn kill(&mut self) -> bool {
        signal_group(self.pgid, libc::SIGKILL)
    }

    /// Poll until the child exits or `timeout` elapses; never blocks past it.
    pub fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);
        loop {
            if !self.is_alive() {
                return true;
            }
            let Some(slice) = remaining_slice(deadline) else {
                return false;
            };
            thread::sleep(slice.min(EXIT_POLL_INTERVAL));
        }
    }

    /// Drain output until the console closes or `timeout` elapses.
    pub fn wait_for_end_of_stream(&mut self, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);
        while !self.stream_closed {
            let Some(slice) = remaining_slice(deadline) else {
                return false;
            };
            match self.output_rx.recv_timeout(slice) {
                Ok(chunk) => {
                    self.buffer_chunk(chunk);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.stream_closed = true,
            }
        }
        true
    }

    /// Whether the console stream has reported end of stream.
    pub fn stream_closed(&self) -> bool {
        self.stream_closed
    }

    /// Output printed before the first readiness marker.
    pub fn boot_output(&self) -> &[u8] {
        &self.boot_output
    }

    /// Number of graceful shutdown commands sent to this session.
    pub fn shutdown_requests(&self) -> usize {
        self.shutdown_requests
    }

    pub fn shutdown_plan(&self) -> &ShutdownPlan {
        &self.shutdown
    }

    /// Run the shutdown sequence now instead of at drop; repeat calls are no-ops.
    pub fn cleanup(&mut self) -> super::ShutdownOutcome {
        let sequencer = ShutdownSequencer::new(self.shutdown.clone());
        sequencer.cleanup(self)
    }

    pub(super) fn record_shutdown_request(&mut self) {
        self.shutdown_requests = self.shutdown_requests.saturating_add(1);
    }

    /// Append a chunk, returning how many of the oldest bytes were discarded.
    fn buffer_chunk(&mut self, chunk: Vec<u8>) -> usize {
        self.pending.extend_from_slice(&chunk);
        if self.pending.len() <= MAX_PENDING_BYTES {
            return 0;
        }
        let excess = self.pending.len() - MAX_PENDING_BYTES;
        self.pending.drain(..excess);
        excess
    }

    /// Stop the reader thread so the fd can be closed without another session
    /// inheriting a reader on a reused descriptor number.
    pub(super) fn stop_reader(&mut self) {
        self.reader_stop.store(true, Ordering::SeqCst);
        // Dropping the receiver unblocks a reader stuck on a full channel.
        self.output_rx = never();
        if let Some(handle) = self.output_thread.take() {
            if handle.join().is_err() {
                log_debug("console reader thread panicked");
            }
        }
    }

    #[cfg(test)]
    pub(super) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub(super) fn reader_running(&self) -> bool {
        self.output_thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

/// `None` when `timeout` is too large to represent; such waits never expire.
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Next wait slice before `deadline`, or `None` once it has passed.
fn remaining_slice(deadline: Option<Instant>) -> Option<Duration> {
    let Some(deadline) = deadline else {
        return Some(READ_POLL_SLICE);
    };
    let now = Instant::now();
    if now >= deadline {
        return None;
    }
    Some((deadline - now).min(READ_POLL_SLICE))
}

impl Drop for ConsoleSession {
    fn drop(&mut self) {
        let outcome = self.cleanup();
        log_debug(&format!("console session dropped: {outcome:?}"));
        self.stop_reader();
        // SAFETY: master_fd came from openpty and is closed exactly once here,
        // after the reader thread has exited.
        unsafe { close_fd(self.master_fd) };
        self.master_fd = -1;
    }
}
