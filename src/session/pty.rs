//! Pseudo-terminal plumbing: fork/exec the launch command on a fresh PTY.
//!
//! The target OS console expects a terminal (QEMU `-nographic` puts its stdio
//! into raw mode), so the launch command gets a real PTY rather than pipes.

use crate::log_debug;
use anyhow::{anyhow, Context, Result};
use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;

/// Console geometry handed to the child. Serial consoles ignore it, but
/// `make` wrappers and QEMU query it on startup.
const PTY_ROWS: u16 = 24;
const PTY_COLS: u16 = 80;

/// Argument vectors converted to C strings before forking.
pub(super) struct LaunchSpec {
    argv: Vec<CString>,
    working_dir: CString,
    term_value: CString,
}

impl LaunchSpec {
    pub(super) fn new(
        program: &str,
        args: &[String],
        working_dir: &str,
        term_value: &str,
    ) -> Result<Self> {
        let working_dir = CString::new(working_dir)
            .with_context(|| format!("working directory contains NUL byte: {working_dir}"))?;
        let term_value = CString::new(term_value)
            .with_context(|| format!("TERM value contains NUL byte: {term_value}"))?;
        let mut argv: Vec<CString> = Vec::with_capacity(args.len() + 1);
        argv.push(
            CString::new(program)
                .with_context(|| format!("launch program contains NUL byte: {program}"))?,
        );
        for arg in args {
            argv.push(
                CString::new(arg.as_str())
                    .with_context(|| format!("launch arg contains NUL byte: {arg}"))?,
            );
        }
        Ok(Self {
            argv,
            working_dir,
            term_value,
        })
    }
}

/// Forks and execs the launch command under a new PTY, returning `(master_fd, pid)`.
///
/// # Safety
///
/// Performs raw PTY allocation and `fork()`. The caller owns the returned file
/// descriptor and must close it. The child never returns from this function: it
/// either execs or calls `_exit(127)`.
pub(super) unsafe fn spawn_pty_child(launch: &LaunchSpec) -> Result<(RawFd, i32)> {
    let mut master_fd: RawFd = -1;
    let mut slave_fd: RawFd = -1;

    // SAFETY: libc::winsize is a plain C struct; zeroed is a valid baseline.
    let mut winsize: libc::winsize = mem::zeroed();
    winsize.ws_row = PTY_ROWS;
    winsize.ws_col = PTY_COLS;

    // Everything the child touches is prepared before fork so the child does not
    // allocate while another thread might hold the allocator lock.
    let mut argv_ptrs: Vec<*const libc::c_char> = launch.argv.iter().map(|s| s.as_ptr()).collect();
    argv_ptrs.push(ptr::null());
    let term_key = c"TERM";

    #[allow(clippy::unnecessary_mut_passed)]
    // SAFETY: openpty expects valid pointers for master/slave/winsize; we pass stack locals.
    if libc::openpty(
        &mut master_fd,
        &mut slave_fd,
        ptr::null_mut(),
        ptr::null_mut(),
        &mut winsize,
    ) != 0
    {
        return Err(errno_error("openpty failed"));
    }

    let pid = libc::fork();
    if pid < 0 {
        close_fd(master_fd);
        close_fd(slave_fd);
        return Err(errno_error("fork failed"));
    }

    if pid == 0 {
        close_fd(master_fd);
        child_exec(slave_fd, &argv_ptrs, &launch.working_dir, term_key, &launch.term_value);
    }

    close_fd(slave_fd);
    Ok((master_fd, pid))
}

/// Child-side setup after fork: new session, PTY as controlling terminal, exec.
///
/// # Safety
///
/// Must only run in the child after `fork()`. Never returns.
unsafe fn child_exec(
    slave_fd: RawFd,
    argv: &[*const libc::c_char],
    working_dir: &CString,
    term_key: &std::ffi::CStr,
    term_value: &CString,
) -> ! {
    let fail = |message: &str| -> ! {
        // SAFETY: write is async-signal-safe and stderr is the PTY slave here.
        let _ = libc::write(
            libc::STDERR_FILENO,
            message.as_ptr() as *const libc::c_void,
            message.len(),
        );
        libc::_exit(127);
    };

    // A fresh session makes the child a process-group leader, so shutdown can
    // signal the whole group (make -> qemu) at once.
    if libc::setsid() == -1 {
        fail("elinos-harness: setsid failed\n");
    }
    if libc::ioctl(slave_fd, libc::TIOCSCTTY as libc::c_ulong, 0) == -1 {
        fail("elinos-harness: ioctl(TIOCSCTTY) failed\n");
    }
    if libc::dup2(slave_fd, libc::STDIN_FILENO) < 0
        || libc::dup2(slave_fd, libc::STDOUT_FILENO) < 0
        || libc::dup2(slave_fd, libc::STDERR_FILENO) < 0
    {
        fail("elinos-harness: dup2 failed\n");
    }
    if slave_fd > libc::STDERR_FILENO {
        close_fd(slave_fd);
    }
    if libc::chdir(working_dir.as_ptr()) != 0 {
        fail("elinos-harness: chdir failed\n");
    }
    if libc::setenv(term_key.as_ptr(), term_value.as_ptr(), 1) != 0 {
        fail("elinos-harness: setenv(TERM) failed\n");
    }

    libc::execvp(argv[0], argv.as_ptr());
    fail("elinos-harness: execvp failed\n");
}

/// Configure the PTY master for non-blocking reads.
///
/// # Safety
///
/// `fd` must be a valid, open file descriptor.
pub(super) unsafe fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = libc::fcntl(fd, libc::F_GETFL, 0);
    if flags < 0 {
        return Err(errno_error("fcntl(F_GETFL) failed"));
    }
    if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
        return Err(errno_error("fcntl(F_SETFL) failed"));
    }
    Ok(())
}

pub(super) fn errno_error(context: &str) -> anyhow::Error {
    anyhow!("{context}: {}", io::Error::last_os_error())
}

/// Close a file descriptor while ignoring errors.
///
/// # Safety
///
/// `fd` must be a valid, open file descriptor (or negative to ignore).
pub(super) unsafe fn close_fd(fd: RawFd) {
    if fd >= 0 {
        let _ = libc::close(fd);
    }
}

/// Non-blocking reap. `Some(true)` once the child has exited (or is not ours),
/// `Some(false)` while it runs, `None` for an already-reaped pid.
pub(super) fn poll_child(child_pid: i32) -> Option<bool> {
    if child_pid <= 0 {
        return None;
    }
    let mut status = 0;
    // SAFETY: child_pid is owned by the session; WNOHANG never blocks.
    let ret = unsafe { libc::waitpid(child_pid, &mut status, libc::WNOHANG) };
    if ret == 0 {
        return Some(false);
    }
    if ret < 0 {
        log_debug(&format!(
            "waitpid({child_pid}) failed: {}",
            io::Error::last_os_error()
        ));
    }
    Some(true)
}

/// Deliver `signo` to the process group led by `pgid`, falling back to the pid.
pub(super) fn signal_group(pgid: i32, signo: libc::c_int) -> bool {
    if pgid <= 0 {
        return false;
    }
    // SAFETY: pgid is the group created by setsid() in the child we spawned.
    if unsafe { libc::kill(-pgid, signo) } == 0 {
        return true;
    }
    let group_err = io::Error::last_os_error();
    // SAFETY: same pid as above, addressed directly.
    if unsafe { libc::kill(pgid, signo) } == 0 {
        return true;
    }
    log_debug(&format!(
        "signal {signo} to session {pgid} failed: {group_err}; direct: {}",
        io::Error::last_os_error()
    ));
    false
}
