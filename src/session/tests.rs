use super::*;
use crate::signals::CancelToken;
use std::fs;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

fn fixture_path() -> String {
    format!(
        "{}/tests/fixtures/fake_elinos.sh",
        env!("CARGO_MANIFEST_DIR")
    )
}

fn quick_plan() -> ShutdownPlan {
    ShutdownPlan {
        command: "shutdown".to_string(),
        grace: Duration::from_millis(1500),
        term_wait: Duration::from_millis(1500),
        kill_wait: Duration::from_millis(1500),
    }
}

fn fixture_options(extra: &[&str]) -> SessionOptions {
    let mut options = SessionOptions::from_launch_command("sh", "elinOS>").unwrap();
    options.args.push(fixture_path());
    options.args.extend(extra.iter().map(|s| s.to_string()));
    options.boot_timeout = Duration::from_secs(10);
    options.shutdown = quick_plan();
    options
}

fn shell_options(script: &str, marker: &str) -> SessionOptions {
    let mut options = SessionOptions::from_launch_command("sh -c placeholder", marker).unwrap();
    options.args = vec!["-c".to_string(), script.to_string()];
    options.boot_timeout = Duration::from_secs(5);
    options.shutdown = ShutdownPlan {
        grace: Duration::from_millis(300),
        ..quick_plan()
    };
    options
}

fn spawn_fixture(extra: &[&str]) -> ConsoleSession {
    ConsoleSession::spawn(&fixture_options(extra), CancelToken::new()).expect("fixture boots")
}

fn unique_temp_path(label: &str) -> std::path::PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "elinos_harness_{label}_{}_{nanos}",
        std::process::id()
    ))
}

fn process_exists(pid: i32) -> bool {
    // SAFETY: signal 0 only checks for existence/permission.
    unsafe { libc::kill(pid, 0) == 0 }
}

fn read_pid_file(path: &std::path::Path) -> i32 {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(text) = fs::read_to_string(path) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        assert!(Instant::now() < deadline, "pid file never written");
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn from_launch_command_splits_shell_words() {
    let options = SessionOptions::from_launch_command(
        "qemu-system-riscv64 -machine virt -append 'console=ttyS0 quiet'",
        "elinOS>",
    )
    .unwrap();
    assert_eq!(options.program, "qemu-system-riscv64");
    assert_eq!(
        options.args,
        vec!["-machine", "virt", "-append", "console=ttyS0 quiet"]
    );
    assert_eq!(options.marker, "elinOS>");
}

#[test]
fn from_launch_command_rejects_bad_input() {
    assert!(SessionOptions::from_launch_command("   ", "elinOS>").is_err());
    assert!(SessionOptions::from_launch_command("make 'run", "elinOS>").is_err());
    assert!(SessionOptions::from_launch_command("make run", "").is_err());
}

#[test]
fn spawn_waits_for_marker_and_keeps_boot_output() {
    let mut session = spawn_fixture(&[]);
    let boot = String::from_utf8_lossy(session.boot_output()).to_string();
    assert!(boot.contains("elinOS kernel starting"), "boot output: {boot:?}");
    assert!(!boot.contains("elinOS>"));
    assert!(session.is_alive());
}

#[test]
fn read_until_marker_returns_command_output() {
    let mut session = spawn_fixture(&[]);
    session.write_line("version").unwrap();
    let out = session.read_until_marker(Duration::from_secs(5)).unwrap();
    let text = String::from_utf8_lossy(&out);
    assert!(text.contains("elinOS v0.1.0"), "output: {text:?}");
    assert!(!text.contains("elinOS>"));
}

#[test]
fn marker_is_consumed_and_remainder_stays_buffered() {
    let options = shell_options("printf 'boot READY one READY two READY'; exec sleep 5", "READY");
    let mut session = ConsoleSession::spawn(&options, CancelToken::new()).unwrap();
    assert_eq!(session.boot_output(), b"boot ");
    assert_eq!(
        session.read_until_marker(Duration::from_secs(2)).unwrap(),
        b" one "
    );
    assert_eq!(
        session.read_until_marker(Duration::from_secs(2)).unwrap(),
        b" two "
    );
    assert_eq!(session.pending_len(), 0);
}

#[test]
fn read_until_marker_times_out_without_marker() {
    let mut session = spawn_fixture(&[]);
    session.write_line("hang").unwrap();
    let start = Instant::now();
    let result = session.read_until_marker(Duration::from_millis(300));
    assert_eq!(result, Err(ReadError::Timeout));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(session.is_alive());
}

#[test]
fn session_recovers_after_timeout() {
    let mut session = spawn_fixture(&[]);
    session.write_line("hang").unwrap();
    assert_eq!(
        session.read_until_marker(Duration::from_millis(200)),
        Err(ReadError::Timeout)
    );
    session.write_line("version").unwrap();
    let out = session.read_until_marker(Duration::from_secs(5)).unwrap();
    assert!(String::from_utf8_lossy(&out).contains("elinOS v0.1.0"));
}

#[test]
fn read_until_marker_reports_end_of_stream() {
    let mut session = spawn_fixture(&[]);
    session.write_line("crash").unwrap();
    assert_eq!(
        session.read_until_marker(Duration::from_secs(5)),
        Err(ReadError::EndOfStream)
    );
    assert!(session.stream_closed());
    assert!(session.wait_for_exit(Duration::from_secs(2)));
    assert!(!session.is_alive());
}

#[test]
fn read_until_marker_honours_cancellation() {
    let cancel = CancelToken::new();
    let mut session = ConsoleSession::spawn(&fixture_options(&[]), cancel.clone()).unwrap();
    session.write_line("hang").unwrap();
    cancel.cancel();
    let start = Instant::now();
    assert_eq!(
        session.read_until_marker(Duration::from_secs(30)),
        Err(ReadError::Interrupted)
    );
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn spawn_reports_boot_timeout() {
    let mut options = fixture_options(&["--silent-boot"]);
    options.boot_timeout = Duration::from_millis(300);
    let start = Instant::now();
    let err = ConsoleSession::spawn(&options, CancelToken::new()).err().unwrap();
    assert!(matches!(err, BootFailure::Timeout(_)), "got {err:?}");
    // Boot wait plus the shutdown escalation for the silent child.
    assert!(start.elapsed() < Duration::from_secs(8));
}

#[test]
fn spawn_reports_unexpected_termination() {
    let options = shell_options("echo goodbye", "elinOS>");
    let err = ConsoleSession::spawn(&options, CancelToken::new()).err().unwrap();
    assert!(matches!(err, BootFailure::UnexpectedTermination), "got {err:?}");
}

#[test]
fn spawn_of_missing_program_ends_stream() {
    let mut options =
        SessionOptions::from_launch_command("/nonexistent/elinos-emulator", "elinOS>").unwrap();
    options.boot_timeout = Duration::from_secs(5);
    let err = ConsoleSession::spawn(&options, CancelToken::new()).err().unwrap();
    assert!(matches!(err, BootFailure::UnexpectedTermination), "got {err:?}");
}

#[test]
fn spawn_rejects_nul_bytes() {
    let mut options = fixture_options(&[]);
    options.program = "sh\0".to_string();
    let err = ConsoleSession::spawn(&options, CancelToken::new()).err().unwrap();
    assert!(matches!(err, BootFailure::Spawn(_)), "got {err:?}");
}

#[test]
fn spawn_reports_interruption_during_boot() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = ConsoleSession::spawn(&fixture_options(&["--silent-boot"]), cancel)
        .err()
        .unwrap();
    assert!(matches!(err, BootFailure::Interrupted), "got {err:?}");
}

#[test]
fn boot_failure_messages_are_descriptive() {
    let timeout = BootFailure::Timeout(Duration::from_secs(60));
    assert!(timeout.to_string().contains("60s"));
    assert!(BootFailure::UnexpectedTermination
        .to_string()
        .contains("ended before"));
}

#[test]
fn cleanup_is_graceful_when_target_honours_shutdown() {
    let mut session = spawn_fixture(&[]);
    assert_eq!(session.cleanup(), ShutdownOutcome::Graceful);
    assert_eq!(session.shutdown_requests(), 1);
    assert!(!session.is_alive());
}

#[test]
fn cleanup_is_idempotent() {
    let mut session = spawn_fixture(&[]);
    assert_eq!(session.cleanup(), ShutdownOutcome::Graceful);
    assert_eq!(session.cleanup(), ShutdownOutcome::AlreadyExited);
    assert_eq!(session.cleanup(), ShutdownOutcome::AlreadyExited);
    assert_eq!(session.shutdown_requests(), 1);
}

#[test]
fn cleanup_escalates_to_sigterm() {
    let mut session = spawn_fixture(&["--ignore-shutdown"]);
    assert_eq!(session.cleanup(), ShutdownOutcome::Terminated);
    assert!(!session.is_alive());
}

#[test]
fn cleanup_escalates_to_sigkill() {
    let mut session = spawn_fixture(&["--ignore-shutdown", "--ignore-term"]);
    assert_eq!(session.cleanup(), ShutdownOutcome::Killed);
    assert!(!session.is_alive());
    assert_eq!(session.shutdown_requests(), 1);
}

#[test]
fn cleanup_after_crash_sends_no_shutdown_command() {
    let mut session = spawn_fixture(&[]);
    session.write_line("crash").unwrap();
    assert!(session.wait_for_exit(Duration::from_secs(5)));
    assert_eq!(session.cleanup(), ShutdownOutcome::AlreadyExited);
    assert_eq!(session.shutdown_requests(), 0);
}

#[test]
fn drop_shuts_the_target_down() {
    let pid_file = unique_temp_path("drop_pid");
    let pid_arg = pid_file.to_string_lossy().to_string();
    let session = spawn_fixture(&["--ignore-shutdown", "--pid-file", &pid_arg]);
    let pid = read_pid_file(&pid_file);
    assert!(process_exists(pid));
    drop(session);
    assert!(!process_exists(pid));
    let _ = fs::remove_file(&pid_file);
}

#[test]
fn terminate_and_kill_primitives_stop_the_child() {
    let mut session = spawn_fixture(&[]);
    assert!(session.terminate());
    assert!(session.wait_for_exit(Duration::from_secs(2)));

    let mut stubborn = spawn_fixture(&["--ignore-term"]);
    stubborn.terminate();
    assert!(!stubborn.wait_for_exit(Duration::from_millis(300)));
    assert!(stubborn.kill());
    assert!(stubborn.wait_for_exit(Duration::from_secs(2)));
}

#[test]
fn oversized_timeouts_wait_without_overflowing() {
    let mut session = spawn_fixture(&[]);
    session.write_line("version").unwrap();
    let out = session.read_until_marker(Duration::MAX).unwrap();
    assert!(String::from_utf8_lossy(&out).contains("elinOS v0.1.0"));

    session.write_line("crash").unwrap();
    assert!(session.wait_for_end_of_stream(Duration::MAX));
    assert!(session.wait_for_exit(Duration::MAX));
}

#[test]
fn pending_output_is_capped_keeping_the_newest_bytes() {
    let mut options = shell_options(
        "dd if=/dev/zero bs=1000 count=4300 2>/dev/null | tr '\\000' a; printf 'TAIL READY'; exec sleep 5",
        "READY",
    );
    options.boot_timeout = Duration::from_secs(30);
    let session = ConsoleSession::spawn(&options, CancelToken::new()).unwrap();
    let boot = session.boot_output();
    assert!(boot.len() <= super::console::MAX_PENDING_BYTES);
    assert!(boot.len() > 1_000_000);
    assert!(boot.ends_with(b"aaaaTAIL "));
    assert!(boot.iter().all(|&b| b == b'a' || b"TAIL ".contains(&b)));
}

#[test]
fn marker_split_across_reads_is_found() {
    let options = shell_options("printf 'boot REA'; sleep 0.3; printf 'DY rest'; exec sleep 5", "READY");
    let mut session = ConsoleSession::spawn(&options, CancelToken::new()).unwrap();
    assert_eq!(session.boot_output(), b"boot ");
    assert_eq!(
        session.read_until_marker(Duration::from_millis(300)),
        Err(ReadError::Timeout)
    );
    assert_eq!(session.pending_len(), b" rest".len());
}

#[test]
fn reader_thread_stops_while_console_is_live() {
    let mut session = spawn_fixture(&[]);
    assert!(session.reader_running());
    session.stop_reader();
    assert!(!session.reader_running());
    assert!(session.is_alive());
    drop(session);
}

#[test]
fn back_to_back_sessions_keep_their_own_output() {
    for _ in 0..3 {
        let mut session = spawn_fixture(&[]);
        let boot = String::from_utf8_lossy(session.boot_output()).to_string();
        assert!(boot.contains("elinOS kernel starting"), "boot output: {boot:?}");
        session.write_line("version").unwrap();
        let out = session.read_until_marker(Duration::from_secs(5)).unwrap();
        assert!(String::from_utf8_lossy(&out).contains("elinOS v0.1.0"));
        drop(session);
    }
}

#[test]
fn cleanup_halts_console_that_outlived_its_launcher() {
    let script = "exec 3<&0; \
        ( trap '' HUP; exec 0<&3 3<&-; \
          while IFS= read -r line; do [ \"$line\" = shutdown ] && exit 0; done ) & \
        printf 'boot READY'";
    let mut options = shell_options(script, "READY");
    options.shutdown.grace = Duration::from_secs(3);
    let mut session = ConsoleSession::spawn(&options, CancelToken::new()).unwrap();
    assert!(session.wait_for_exit(Duration::from_secs(3)));
    assert!(!session.stream_closed());

    assert_eq!(session.cleanup(), ShutdownOutcome::Graceful);
    assert_eq!(session.shutdown_requests(), 1);
    assert!(session.stream_closed());
}
