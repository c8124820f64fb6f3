//! Real-terminal state: raw mode save/restore and signal delivery.

use crate::io::{close_fd, is_tty, set_nonblocking};
use anyhow::{anyhow, Context, Result};
use crossterm::terminal::size as crossterm_size;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

/// Write end of the active signal pipe, or -1 when none is installed.
static SIGNAL_PIPE_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

/// Signals routed through the pipe; anything else keeps its default handling.
pub const FORWARDED_SIGNALS: [libc::c_int; 2] = [libc::SIGWINCH, libc::SIGINT];

extern "C" fn handle_forwarded_signal(signal: libc::c_int) {
    let fd = SIGNAL_PIPE_WRITE_FD.load(Ordering::SeqCst);
    if fd < 0 {
        return;
    }
    let byte = signal as u8;
    unsafe {
        let saved_errno = *errno_location();
        libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        *errno_location() = saved_errno;
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__errno_location()
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__error()
}

/// Puts the terminal behind `fd` into raw mode and puts it back exactly once,
/// either through [`RawModeGuard::restore`] or on drop (including unwinding).
pub struct RawModeGuard {
    fd: RawFd,
    original: Option<libc::termios>,
}

impl RawModeGuard {
    /// Save the current mode and switch to raw. A non-tty `fd` yields an
    /// inert guard that never touches terminal settings.
    pub fn engage(fd: RawFd) -> Result<Self> {
        if !is_tty(fd) {
            return Ok(Self { fd, original: None });
        }
        let mut original: libc::termios = unsafe { mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut original) } != 0 {
            return Err(io::Error::last_os_error()).context("tcgetattr failed");
        }
        let mut raw = original;
        unsafe { libc::cfmakeraw(&mut raw) };
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } != 0 {
            return Err(io::Error::last_os_error()).context("tcsetattr(raw) failed");
        }
        Ok(Self {
            fd,
            original: Some(original),
        })
    }

    /// Whether a mode was saved (and so will be restored).
    pub fn is_active(&self) -> bool {
        self.original.is_some()
    }

    pub fn restore(&mut self) {
        let Some(original) = self.original.take() else {
            return;
        };
        if unsafe { libc::tcsetattr(self.fd, libc::TCSADRAIN, &original) } != 0 {
            tracing::debug!(error = %io::Error::last_os_error(), "failed to restore terminal mode");
        }
    }
}

impl std::fmt::Debug for RawModeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawModeGuard")
            .field("fd", &self.fd)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Self-pipe turning asynchronous signals into readable bytes, so resize and
/// interrupt handling runs inside the poll loop like any other input.
#[derive(Debug)]
pub struct SignalPipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl SignalPipe {
    /// Create the pipe and route [`FORWARDED_SIGNALS`] into it. Only one pipe
    /// can be installed at a time.
    pub fn install() -> Result<Self> {
        let mut fds = [0; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error()).context("failed to create signal pipe");
        }
        let [read_fd, write_fd] = fds;
        let configured = fds.iter().try_for_each(|&fd| unsafe {
            set_nonblocking(fd)?;
            libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
            Ok::<(), io::Error>(())
        });
        if let Err(err) = configured {
            close_fd(read_fd);
            close_fd(write_fd);
            return Err(err).context("failed to configure signal pipe");
        }
        if SIGNAL_PIPE_WRITE_FD
            .compare_exchange(-1, write_fd, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            close_fd(read_fd);
            close_fd(write_fd);
            return Err(anyhow!("a signal pipe is already installed"));
        }
        let pipe = Self { read_fd, write_fd };
        for signal in FORWARDED_SIGNALS {
            let handler = handle_forwarded_signal as *const () as libc::sighandler_t;
            if unsafe { libc::signal(signal, handler) } == libc::SIG_ERR {
                return Err(anyhow!("failed to install handler for signal {signal}"));
            }
        }
        tracing::debug!("signal pipe installed");
        Ok(pipe)
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Pending signal numbers, oldest first.
    pub fn drain(&self) -> Vec<libc::c_int> {
        let mut signals = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if n <= 0 {
                break;
            }
            signals.extend(buf[..n as usize].iter().map(|b| libc::c_int::from(*b)));
        }
        signals
    }
}

impl Drop for SignalPipe {
    fn drop(&mut self) {
        for signal in FORWARDED_SIGNALS {
            unsafe {
                libc::signal(signal, libc::SIG_DFL);
            }
        }
        let _ = SIGNAL_PIPE_WRITE_FD.compare_exchange(
            self.write_fd,
            -1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        close_fd(self.read_fd);
        close_fd(self.write_fd);
    }
}

/// Current (rows, cols) of the controlling terminal, if there is one.
pub fn terminal_size() -> Option<(u16, u16)> {
    match crossterm_size() {
        Ok((cols, rows)) if rows > 0 && cols > 0 => Some((rows, cols)),
        _ => None,
    }
}
