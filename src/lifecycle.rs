//! Session setup, teardown, and exit status mapping.

use crate::config::SupervisorConfig;
use crate::io::is_tty;
use crate::pty_session::{read_winsize, PtySession};
use crate::relay::{Relay, RelayEndpoints, RelayExit};
use crate::terminal::{terminal_size, RawModeGuard, SignalPipe};
use anyhow::Result;
use std::io;

/// Exit code for a bad command line or a supervisor that failed to start.
pub const USAGE_EXIT_CODE: i32 = 1;

/// Map a `waitpid` status to a shell-style exit code: the child's own code,
/// or 128 plus the signal that killed it.
pub fn exit_code_from_status(status: libc::c_int) -> i32 {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        128 + libc::WTERMSIG(status)
    } else {
        1
    }
}

/// Block until `pid` terminates and return its exit code.
///
/// A child that was already reaped counts as a clean exit.
pub fn wait_for_child(pid: libc::pid_t) -> i32 {
    loop {
        let mut status: libc::c_int = 0;
        let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
        if rc == pid {
            return exit_code_from_status(status);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::ECHILD) => {
                tracing::debug!(pid, "child was already reaped");
                return 0;
            }
            _ => {
                tracing::debug!(pid, error = %err, "waitpid failed");
                return 1;
            }
        }
    }
}

/// Run `command args...` under supervision on the process's own stdio and
/// return the exit code the supervisor should exit with.
pub fn run_session(config: &SupervisorConfig, command: &str, args: &[String]) -> Result<i32> {
    let stdin_fd = libc::STDIN_FILENO;
    let stdout_fd = libc::STDOUT_FILENO;
    let interactive = is_tty(stdin_fd);
    tracing::debug!(interactive, triggers = ?config.trigger_phrases, "starting session");

    let initial_size = if interactive {
        read_winsize(stdout_fd).or_else(terminal_size)
    } else {
        None
    };

    let mut raw_mode = RawModeGuard::engage(stdin_fd)?;
    let signals = SignalPipe::install()?;
    let session = PtySession::spawn(command, args, initial_size)?;

    let endpoints = RelayEndpoints {
        input_fd: Some(stdin_fd),
        output_fd: stdout_fd,
        winsize_fd: interactive.then_some(stdout_fd),
    };
    let outcome = Relay::new(&session, config, endpoints)
        .with_signals(&signals)
        .run();
    raw_mode.restore();

    if let RelayExit::PollFailed(err) = &outcome.exit {
        tracing::debug!(error = %err, "relay stopped early");
    }

    // Closing the master hangs up a child that is somehow still running.
    let pid = session.child_pid();
    drop(session);
    let code = wait_for_child(pid);
    tracing::debug!(pid, code, accepts = outcome.accepts, "child exited");
    drop(signals);
    Ok(code)
}
