//! The single-threaded I/O relay between the real terminal and the pty.
//!
//! One `poll(2)` per tick watches the pty master, the user's input, and the
//! signal pipe. Output is forwarded before it is inspected, and the
//! delayed-accept countdown only shortens the poll timeout, so forwarding in
//! both directions carries on for the whole wait.
//!
//! Input headed for the child is queued and written as the pty accepts it.
//! While the queue is above its high-water mark the user's input is not read,
//! so a slow child pushes back on the writer instead of losing bytes.

use crate::accept::{AcceptAction, AcceptController, Debounce};
use crate::ansi::strip_escapes;
use crate::config::SupervisorConfig;
use crate::io::{read_fd, write_all, ReadOutcome};
use crate::pty_session::PtySession;
use crate::terminal::{terminal_size, SignalPipe};
use crate::trigger::TriggerSet;
use crate::window::OutputWindow;
use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 4096;
const INPUT_CHUNK: usize = 1024;
const TRACE_TAIL_CHARS: usize = 200;
/// Queued input above which the user's side stops being read.
const INPUT_HIGH_WATER: usize = 64 * 1024;

/// Descriptors on the real-terminal side of the relay.
#[derive(Debug, Clone, Copy)]
pub struct RelayEndpoints {
    /// User input; `None` when there is nothing to forward.
    pub input_fd: Option<RawFd>,
    pub output_fd: RawFd,
    /// Terminal whose window size is mirrored onto the pty on `SIGWINCH`.
    pub winsize_fd: Option<RawFd>,
}

#[derive(Debug)]
pub enum RelayExit {
    /// The child closed its side of the pty; the ordinary way a session ends.
    ChildClosed,
    /// `poll` failed with something other than `EINTR`.
    PollFailed(io::Error),
}

#[derive(Debug)]
pub struct RelayOutcome {
    pub exit: RelayExit,
    pub accepts: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Child,
    User,
    Signals,
}

pub struct Relay<'a> {
    session: &'a PtySession,
    endpoints: RelayEndpoints,
    signals: Option<&'a SignalPipe>,
    triggers: TriggerSet,
    window: OutputWindow,
    debounce: Debounce,
    controller: AcceptController,
    poll_interval: Duration,
    accept_keystroke: Vec<u8>,
    /// Bytes for the child, oldest first, not yet taken by the pty.
    pending_input: VecDeque<u8>,
    accepts: usize,
}

impl<'a> Relay<'a> {
    pub fn new(session: &'a PtySession, config: &SupervisorConfig, endpoints: RelayEndpoints) -> Self {
        Self {
            session,
            endpoints,
            signals: None,
            triggers: config.trigger_set(),
            window: OutputWindow::new(config.buffer_capacity),
            debounce: Debounce::new(config.debounce_interval),
            controller: AcceptController::new(
                config.redraw_delay,
                config.accept_delay,
                config.show_countdown,
            ),
            poll_interval: config.poll_interval,
            accept_keystroke: config.accept_keystroke.clone(),
            pending_input: VecDeque::new(),
            accepts: 0,
        }
    }

    /// Route resize and interrupt signals through `signals`.
    pub fn with_signals(mut self, signals: &'a SignalPipe) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Relay until the child closes the pty or polling breaks down.
    pub fn run(mut self) -> RelayOutcome {
        let exit = self.run_loop();
        let cleanup = self.controller.cancel();
        self.perform(cleanup);
        tracing::debug!(
            ?exit,
            accepts = self.accepts,
            unsent_input = self.pending_input.len(),
            "relay finished"
        );
        RelayOutcome {
            exit,
            accepts: self.accepts,
        }
    }

    fn run_loop(&mut self) -> RelayExit {
        let mut sources: Vec<Source> = Vec::with_capacity(3);
        let mut fds: Vec<libc::pollfd> = Vec::with_capacity(3);
        loop {
            sources.clear();
            fds.clear();
            self.watch(&mut sources, &mut fds);

            let timeout = poll_timeout_ms(self.poll_interval, self.controller.next_wakeup(), Instant::now());
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return RelayExit::PollFailed(err);
                }
            } else if rc > 0 {
                for (source, pfd) in sources.iter().zip(fds.iter()) {
                    if pfd.revents == 0 {
                        continue;
                    }
                    match source {
                        Source::Signals => self.handle_signals(),
                        Source::User => self.forward_input(pfd.revents),
                        Source::Child => {
                            if pfd.revents & libc::POLLOUT != 0 {
                                self.flush_input();
                            }
                            let readable =
                                libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
                            if pfd.revents & readable != 0 && !self.forward_output() {
                                return RelayExit::ChildClosed;
                            }
                        }
                    }
                }
            }

            let actions = self.controller.advance(Instant::now());
            self.perform(actions);
        }
    }

    fn watch(&self, sources: &mut Vec<Source>, fds: &mut Vec<libc::pollfd>) {
        let mut add = |source, fd, events| {
            sources.push(source);
            fds.push(libc::pollfd {
                fd,
                events,
                revents: 0,
            });
        };
        if let Some(signals) = self.signals {
            add(Source::Signals, signals.read_fd(), libc::POLLIN);
        }
        if let Some(fd) = self.endpoints.input_fd {
            if self.pending_input.len() < INPUT_HIGH_WATER {
                add(Source::User, fd, libc::POLLIN);
            }
        }
        let mut child_events = libc::POLLIN;
        if !self.pending_input.is_empty() {
            child_events |= libc::POLLOUT;
        }
        add(Source::Child, self.session.master_fd(), child_events);
    }

    fn handle_signals(&mut self) {
        let Some(signals) = self.signals else {
            return;
        };
        for signal in signals.drain() {
            match signal {
                libc::SIGWINCH => {
                    self.sync_winsize();
                    if let Err(err) = self.session.signal_child(libc::SIGWINCH) {
                        tracing::debug!(error = ?err, "failed to forward SIGWINCH");
                    }
                }
                libc::SIGINT => {
                    tracing::debug!("forwarding SIGINT to child");
                    if let Err(err) = self.session.signal_child(libc::SIGINT) {
                        tracing::debug!(error = ?err, "failed to forward SIGINT");
                    }
                }
                other => tracing::debug!(signal = other, "ignoring unexpected signal"),
            }
        }
    }

    /// Mirror the real terminal's size onto the pty, falling back to the
    /// controlling terminal when the output fd reports none.
    fn sync_winsize(&self) {
        let Some(fd) = self.endpoints.winsize_fd else {
            return;
        };
        let synced = self.session.sync_winsize_from(fd).or_else(|err| {
            let (rows, cols) = terminal_size().ok_or(err)?;
            self.session.set_winsize(rows, cols)
        });
        match synced {
            Ok(()) => tracing::debug!(fd, "pty resized to match the terminal"),
            Err(err) => tracing::debug!(error = ?err, "failed to resize pty"),
        }
    }

    fn forward_input(&mut self, revents: libc::c_short) {
        let Some(fd) = self.endpoints.input_fd else {
            return;
        };
        if revents & libc::POLLNVAL != 0 {
            self.endpoints.input_fd = None;
            return;
        }
        let mut buf = [0u8; INPUT_CHUNK];
        match read_fd(fd, &mut buf) {
            Ok(ReadOutcome::Data(n)) => {
                self.pending_input.extend(&buf[..n]);
                self.flush_input();
            }
            Ok(ReadOutcome::Retry) => {}
            Ok(ReadOutcome::Closed) => {
                tracing::debug!("input reached end of stream; no longer watching it");
                self.endpoints.input_fd = None;
            }
            Err(err) => {
                tracing::debug!(error = %err, "input read failed; no longer watching it");
                self.endpoints.input_fd = None;
            }
        }
    }

    /// Hand queued input to the pty until it is drained or the pty is full.
    /// Whatever is left waits for the next `POLLOUT`.
    fn flush_input(&mut self) {
        while !self.pending_input.is_empty() {
            let (front, _) = self.pending_input.as_slices();
            match self.session.try_send(front) {
                Ok(0) => break,
                Ok(n) => {
                    self.pending_input.drain(..n);
                }
                Err(err) => {
                    tracing::debug!(
                        error = %err,
                        queued = self.pending_input.len(),
                        "pty write failed; keeping input queued"
                    );
                    break;
                }
            }
        }
    }

    /// Returns false once the child's side of the pty is gone.
    fn forward_output(&mut self) -> bool {
        let mut buf = [0u8; READ_CHUNK];
        let n = match read_fd(self.session.master_fd(), &mut buf) {
            Ok(ReadOutcome::Data(n)) => n,
            Ok(ReadOutcome::Retry) => return true,
            Ok(ReadOutcome::Closed) => return false,
            Err(err) => {
                tracing::debug!(error = %err, "pty read failed");
                return false;
            }
        };
        let data = &buf[..n];
        if let Err(err) = write_all(self.endpoints.output_fd, data) {
            tracing::debug!(error = %err, bytes = n, "dropped child output");
        }
        if self.controller.is_idle() {
            self.inspect_output(data);
        }
        true
    }

    fn inspect_output(&mut self, data: &[u8]) {
        self.window.push_bytes(data);
        let clean = strip_escapes(self.window.as_str());
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(tail = ?strip_escapes(self.window.tail(TRACE_TAIL_CHARS)), "window");
        }
        let Some(phrase) = self.triggers.first_match(&clean) else {
            return;
        };
        let now = Instant::now();
        if !self.debounce.ready(now) {
            tracing::trace!(phrase, "match suppressed by debounce");
            return;
        }
        if self.controller.trigger(now) {
            tracing::debug!(phrase, "trigger matched; waiting for redraw and countdown");
        }
    }

    fn perform(&mut self, actions: Vec<AcceptAction>) {
        for action in actions {
            match action {
                AcceptAction::SendAccept => self.send_accept(),
                AcceptAction::SetTitle(ref title) => {
                    tracing::debug!(%title, "countdown");
                    self.write_terminal(&action);
                }
                AcceptAction::ClearTitle => self.write_terminal(&action),
            }
        }
    }

    fn write_terminal(&self, action: &AcceptAction) {
        if let Some(bytes) = action.terminal_bytes() {
            if let Err(err) = write_all(self.endpoints.output_fd, &bytes) {
                tracing::debug!(error = %err, "failed to update title");
            }
        }
    }

    /// Queue the keystroke behind anything the user already typed.
    fn send_accept(&mut self) {
        tracing::debug!(queued_ahead = self.pending_input.len(), "sending accept keystroke");
        self.pending_input.extend(&self.accept_keystroke);
        self.flush_input();
        self.window.clear();
        self.debounce.record(Instant::now());
        self.accepts += 1;
    }
}

/// Poll timeout in whole milliseconds, never past the controller's next
/// deadline. Rounds up so a due deadline is not polled in a busy loop.
fn poll_timeout_ms(interval: Duration, wakeup: Option<Instant>, now: Instant) -> libc::c_int {
    let mut timeout = interval;
    if let Some(wakeup) = wakeup {
        timeout = timeout.min(wakeup.saturating_duration_since(now));
    }
    let ms = timeout.as_micros().div_ceil(1000);
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}
