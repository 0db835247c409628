use crate::log_debug;
use anyhow::{anyhow, Result};
use crossbeam_channel::Sender;
use std::io::{self, ErrorKind};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const READ_CHUNK_BYTES: usize = 4096;
/// A child that stops draining its input must not wedge the harness.
const WRITE_STALL_LIMIT: Duration = Duration::from_secs(5);

pub(super) fn should_retry_io_error(err: &io::Error) -> bool {
    err.kind() == ErrorKind::Interrupted || err.kind() == ErrorKind::WouldBlock
}

/// Continuously read from the PTY master and forward chunks to the session.
///
/// The thread exits when the console closes (EOF, or EIO once every slave
/// handle is gone), when the session drops its receiver, or when `stop` is set.
/// Dropping the sender is what the session observes as end of stream.
pub(super) fn spawn_reader_thread(
    master_fd: RawFd,
    tx: Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("console-reader".to_string())
        .spawn(move || reader_loop(master_fd, tx, &stop))
}

fn reader_loop(master_fd: RawFd, tx: Sender<Vec<u8>>, stop: &AtomicBool) {
    let mut buffer = [0u8; READ_CHUNK_BYTES];
    loop {
        // Checked before every read so the fd is never touched after the
        // session asks the reader to stop.
        if stop.load(Ordering::SeqCst) {
            break;
        }
        // SAFETY: buffer is a valid writable region of buffer.len() bytes.
        let n = unsafe {
            libc::read(
                master_fd,
                buffer.as_mut_ptr() as *mut libc::c_void,
                buffer.len(),
            )
        };
        if n > 0 {
            let data = buffer.get(..n as usize).unwrap_or(&[]).to_vec();
            if tx.send(data).is_err() {
                break;
            }
            continue;
        }
        if n == 0 {
            break;
        }
        let err = io::Error::last_os_error();
        if should_retry_io_error(&err) {
            thread::sleep(Duration::from_millis(10));
            continue;
        }
        // EIO is how Linux reports a hung-up PTY; anything else is logged.
        if err.raw_os_error() != Some(libc::EIO) {
            log_debug(&format!("console read error: {err}"));
        }
        break;
    }
}

/// Write the entire buffer to the PTY master, retrying short writes.
pub(super) fn write_all(fd: RawFd, mut data: &[u8]) -> Result<()> {
    let mut stalled_since: Option<Instant> = None;
    while !data.is_empty() {
        // SAFETY: data points to data.len() initialized bytes.
        let written = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
        if written < 0 {
            let err = io::Error::last_os_error();
            if should_retry_io_error(&err) {
                let since = *stalled_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= WRITE_STALL_LIMIT {
                    return Err(anyhow!("console input stalled for {WRITE_STALL_LIMIT:?}"));
                }
                thread::sleep(Duration::from_millis(1));
                continue;
            }
            return Err(anyhow!("write to console failed: {err}"));
        }
        if written == 0 {
            return Err(anyhow!("write to console returned 0"));
        }
        stalled_since = None;
        let written = written as usize;
        data = data.get(written..).unwrap_or(&[]);
    }
    Ok(())
}
