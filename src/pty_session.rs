//! Child process attached to a freshly allocated pseudo-terminal.

use crate::io::{close_fd, set_nonblocking, write_some};
use anyhow::{anyhow, Context, Result};
use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;

/// Exit status of a child whose command could not be executed.
pub const EXEC_FAILED_STATUS: libc::c_int = 127;

/// Owns the pty master and the pid of the child running on the other side.
///
/// Dropping the session closes the master; reaping the child is left to
/// [`crate::lifecycle::wait_for_child`].
#[derive(Debug)]
pub struct PtySession {
    master_fd: RawFd,
    child_pid: libc::pid_t,
}

impl PtySession {
    /// Fork `command args...` onto a new pty, sized to `winsize` when given.
    pub fn spawn(command: &str, args: &[String], winsize: Option<(u16, u16)>) -> Result<Self> {
        // Build argv before forking; the child may only make async-signal-safe calls.
        let argv = build_argv(command, args)?;
        let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|a| a.as_ptr()).collect();
        argv_ptrs.push(ptr::null());
        let exec_failed_msg = format!("auto-accept: failed to exec {command}\r\n");

        let mut master_fd: RawFd = -1;
        let mut slave_fd: RawFd = -1;
        let mut ws: libc::winsize = unsafe { mem::zeroed() };
        let ws_ptr = match winsize {
            Some((rows, cols)) if rows > 0 && cols > 0 => {
                ws.ws_row = rows;
                ws.ws_col = cols;
                &mut ws as *mut libc::winsize
            }
            _ => ptr::null_mut(),
        };
        let rc = unsafe {
            libc::openpty(
                &mut master_fd,
                &mut slave_fd,
                ptr::null_mut(),
                ptr::null_mut(),
                ws_ptr,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error()).context("openpty failed");
        }

        let pid = unsafe { libc::fork() };
        if pid < 0 {
            let err = io::Error::last_os_error();
            close_fd(master_fd);
            close_fd(slave_fd);
            return Err(err).context("fork failed");
        }

        if pid == 0 {
            unsafe {
                exec_child(master_fd, slave_fd, &argv_ptrs, exec_failed_msg.as_bytes());
            }
        }

        close_fd(slave_fd);
        if let Err(err) = unsafe { set_nonblocking(master_fd) } {
            tracing::debug!(error = %err, "failed to set pty master non-blocking");
        }
        tracing::debug!(command, ?args, pid, "spawned child on pty");
        Ok(Self {
            master_fd,
            child_pid: pid,
        })
    }

    pub fn master_fd(&self) -> RawFd {
        self.master_fd
    }

    pub fn child_pid(&self) -> libc::pid_t {
        self.child_pid
    }

    /// Offer bytes to the child's terminal input without blocking. Returns how
    /// many were accepted; zero means the pty is full for now.
    pub fn try_send(&self, bytes: &[u8]) -> io::Result<usize> {
        write_some(self.master_fd, bytes)
    }

    pub fn set_winsize(&self, rows: u16, cols: u16) -> Result<()> {
        if rows == 0 || cols == 0 {
            return Err(anyhow!("invalid window size {rows}x{cols}"));
        }
        let mut ws: libc::winsize = unsafe { mem::zeroed() };
        ws.ws_row = rows;
        ws.ws_col = cols;
        let rc = unsafe { libc::ioctl(self.master_fd, libc::TIOCSWINSZ, &ws) };
        if rc != 0 {
            return Err(io::Error::last_os_error()).context("TIOCSWINSZ failed");
        }
        Ok(())
    }

    #[cfg(test)]
    fn winsize(&self) -> Option<(u16, u16)> {
        read_winsize(self.master_fd)
    }

    /// Copy the window size of `from_fd` (the real terminal) onto the pty.
    pub fn sync_winsize_from(&self, from_fd: RawFd) -> Result<()> {
        let (rows, cols) = read_winsize(from_fd)
            .ok_or_else(|| anyhow!("no window size available on fd {from_fd}"))?;
        self.set_winsize(rows, cols)
    }

    /// Deliver `signal` to the child. A child that already exited is not an error.
    pub fn signal_child(&self, signal: libc::c_int) -> Result<()> {
        let rc = unsafe { libc::kill(self.child_pid, signal) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(());
            }
            return Err(err).with_context(|| format!("kill({}, {signal}) failed", self.child_pid));
        }
        Ok(())
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        close_fd(self.master_fd);
    }
}

/// (rows, cols) of the terminal behind `fd`, if it has a usable size.
pub fn read_winsize(fd: RawFd) -> Option<(u16, u16)> {
    let mut ws: libc::winsize = unsafe { mem::zeroed() };
    let rc = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws) };
    if rc != 0 || ws.ws_row == 0 || ws.ws_col == 0 {
        return None;
    }
    Some((ws.ws_row, ws.ws_col))
}

fn build_argv(command: &str, args: &[String]) -> Result<Vec<CString>> {
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(CString::new(command).with_context(|| format!("invalid command: {command:?}"))?);
    for arg in args {
        argv.push(CString::new(arg.as_str()).with_context(|| format!("invalid argument: {arg:?}"))?);
    }
    Ok(argv)
}

/// Runs in the forked child. Never returns.
unsafe fn exec_child(
    master_fd: RawFd,
    slave_fd: RawFd,
    argv: &[*const libc::c_char],
    exec_failed_msg: &[u8],
) -> ! {
    libc::close(master_fd);
    libc::setsid();
    libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0);
    libc::dup2(slave_fd, libc::STDIN_FILENO);
    libc::dup2(slave_fd, libc::STDOUT_FILENO);
    libc::dup2(slave_fd, libc::STDERR_FILENO);
    if slave_fd > libc::STDERR_FILENO {
        libc::close(slave_fd);
    }
    // The Rust runtime ignores SIGPIPE, and ignored dispositions survive exec.
    libc::signal(libc::SIGPIPE, libc::SIG_DFL);

    libc::execvp(argv[0], argv.as_ptr());

    libc::write(
        libc::STDERR_FILENO,
        exec_failed_msg.as_ptr() as *const libc::c_void,
        exec_failed_msg.len(),
    );
    libc::_exit(EXEC_FAILED_STATUS);
}
