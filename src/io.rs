//! Raw file-descriptor helpers shared by the pty session and the relay loop.

use std::io::{self, ErrorKind};
use std::os::unix::io::RawFd;

const WRITE_POLL_MS: libc::c_int = 50;

/// Mark `fd` non-blocking.
///
/// # Safety
/// `fd` must be an open descriptor owned by the caller.
pub unsafe fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = libc::fcntl(fd, libc::F_GETFL);
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Outcome of a single read on a descriptor reported ready.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(usize),
    /// Zero-length read, or `EIO` from a pty master whose child side closed.
    Closed,
    /// `EINTR`/`EAGAIN`: nothing this time, try again on the next tick.
    Retry,
}

pub fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<ReadOutcome> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n > 0 {
        return Ok(ReadOutcome::Data(n as usize));
    }
    if n == 0 {
        return Ok(ReadOutcome::Closed);
    }
    let err = io::Error::last_os_error();
    match err.kind() {
        ErrorKind::Interrupted | ErrorKind::WouldBlock => Ok(ReadOutcome::Retry),
        _ if err.raw_os_error() == Some(libc::EIO) => Ok(ReadOutcome::Closed),
        _ => Err(err),
    }
}

/// A single non-blocking write attempt. A descriptor that is full or was
/// interrupted reports zero bytes written instead of an error.
pub fn write_some(fd: RawFd, data: &[u8]) -> io::Result<usize> {
    if data.is_empty() {
        return Ok(0);
    }
    let n = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
    if n >= 0 {
        return Ok(n as usize);
    }
    let err = io::Error::last_os_error();
    match err.kind() {
        ErrorKind::Interrupted | ErrorKind::WouldBlock => Ok(0),
        _ => Err(err),
    }
}

/// Write every byte of `data`, retrying interrupted and short writes and
/// waiting for writability on `EAGAIN` for as long as it takes.
pub fn write_all(fd: RawFd, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        let n = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
        if n > 0 {
            data = &data[n as usize..];
            continue;
        }
        if n == 0 {
            return Err(io::Error::new(ErrorKind::WriteZero, "write returned 0"));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            ErrorKind::Interrupted => continue,
            ErrorKind::WouldBlock => wait_writable(fd, WRITE_POLL_MS)?,
            _ => return Err(err),
        }
    }
    Ok(())
}

fn wait_writable(fd: RawFd, timeout_ms: libc::c_int) -> io::Result<()> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(err);
        }
    }
    Ok(())
}

pub fn is_tty(fd: RawFd) -> bool {
    unsafe { libc::isatty(fd) == 1 }
}

pub fn close_fd(fd: RawFd) {
    if fd >= 0 {
        unsafe {
            libc::close(fd);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io;
    use std::mem;
    use std::os::unix::io::RawFd;
    use std::ptr;
    use std::sync::{Mutex, OnceLock};

    /// Serializes tests that install process-wide signal handlers.
    pub(crate) fn signal_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    pub(crate) fn pipe_pair() -> (RawFd, RawFd) {
        let mut fds = [0; 2];
        let result = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(
            result,
            0,
            "pipe() failed with errno {}",
            io::Error::last_os_error()
        );
        // Keep test pipes out of children forked by concurrently running tests.
        for fd in fds {
            unsafe {
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
            }
        }
        (fds[0], fds[1])
    }

    pub(crate) fn open_pty_pair() -> (RawFd, RawFd) {
        let mut master = -1;
        let mut slave = -1;
        let mut ws: libc::winsize = unsafe { mem::zeroed() };
        ws.ws_row = 24;
        ws.ws_col = 80;
        let result = unsafe {
            libc::openpty(
                &mut master,
                &mut slave,
                ptr::null_mut(),
                ptr::null_mut(),
                &mut ws,
            )
        };
        assert_eq!(
            result,
            0,
            "openpty() failed with errno {}",
            io::Error::last_os_error()
        );
        (master, slave)
    }

    /// Read until EOF (or EIO from a pty master).
    pub(crate) fn read_all(fd: RawFd) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
            if n <= 0 {
                break;
            }
            out.extend_from_slice(&buf[..n as usize]);
        }
        out
    }
}
