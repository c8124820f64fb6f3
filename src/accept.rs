//! Delayed-accept state machine and debounce.
//!
//! The controller never sleeps. The relay loop asks it when it next needs to
//! run (`next_wakeup`), keeps forwarding I/O until then, and executes whatever
//! [`AcceptAction`]s `advance` hands back.

use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_secs(1);
const TITLE_PREFIX: &str = "auto-accept";

/// Minimum spacing between two fired accepts.
#[derive(Debug, Clone)]
pub struct Debounce {
    interval: Duration,
    last_fired: Option<Instant>,
}

impl Debounce {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: None,
        }
    }

    /// True if nothing has fired yet or strictly more than `interval` passed.
    pub fn ready(&self, now: Instant) -> bool {
        match self.last_fired {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.interval,
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.last_fired = Some(now);
    }
}

/// Side effects requested by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptAction {
    /// Show the remaining seconds in the window title.
    SetTitle(String),
    /// Reset the window title after a countdown.
    ClearTitle,
    /// Write the accept keystroke to the child.
    SendAccept,
}

impl AcceptAction {
    /// Bytes for the real terminal, if the action draws anything.
    pub fn terminal_bytes(&self) -> Option<Vec<u8>> {
        match self {
            AcceptAction::SetTitle(title) => Some(format!("\x1b]0;{title}\x07").into_bytes()),
            AcceptAction::ClearTitle => Some(b"\x1b]0;\x07".to_vec()),
            AcceptAction::SendAccept => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptPhase {
    Idle,
    /// Grace period for the child to finish redrawing the prompt.
    Redraw { until: Instant },
    Countdown {
        deadline: Instant,
        next_tick: Instant,
        remaining: u64,
    },
}

#[derive(Debug)]
pub struct AcceptController {
    redraw_delay: Duration,
    accept_delay: Duration,
    show_countdown: bool,
    phase: AcceptPhase,
}

impl AcceptController {
    pub fn new(redraw_delay: Duration, accept_delay: Duration, show_countdown: bool) -> Self {
        Self {
            redraw_delay,
            accept_delay,
            show_countdown,
            phase: AcceptPhase::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == AcceptPhase::Idle
    }

    /// Start the grace period. Ignored unless idle, so at most one accept is
    /// ever pending.
    pub fn trigger(&mut self, now: Instant) -> bool {
        if !self.is_idle() {
            return false;
        }
        self.phase = AcceptPhase::Redraw {
            until: now + self.redraw_delay,
        };
        true
    }

    /// Earliest instant at which `advance` has work to do.
    pub fn next_wakeup(&self) -> Option<Instant> {
        match self.phase {
            AcceptPhase::Idle => None,
            AcceptPhase::Redraw { until } => Some(until),
            AcceptPhase::Countdown {
                deadline,
                next_tick,
                ..
            } => Some(deadline.min(next_tick)),
        }
    }

    /// Apply every transition due at `now`.
    pub fn advance(&mut self, now: Instant) -> Vec<AcceptAction> {
        let mut actions = Vec::new();
        loop {
            match self.phase {
                AcceptPhase::Idle => break,
                AcceptPhase::Redraw { until } => {
                    if now < until {
                        break;
                    }
                    self.start_countdown(until, &mut actions);
                }
                AcceptPhase::Countdown {
                    deadline,
                    next_tick,
                    remaining,
                } => {
                    if now >= deadline {
                        if self.countdown_visible() {
                            actions.push(AcceptAction::ClearTitle);
                        }
                        actions.push(AcceptAction::SendAccept);
                        self.phase = AcceptPhase::Idle;
                        break;
                    }
                    if now < next_tick {
                        break;
                    }
                    let remaining = remaining.saturating_sub(1).max(1);
                    self.phase = AcceptPhase::Countdown {
                        deadline,
                        next_tick: next_tick + TICK,
                        remaining,
                    };
                    if self.countdown_visible() {
                        push_title(&mut actions, remaining);
                    }
                }
            }
        }
        collapse_titles(actions)
    }

    /// Drop a pending accept; the title is cleared if it was being shown.
    pub fn cancel(&mut self) -> Vec<AcceptAction> {
        let was_counting = matches!(self.phase, AcceptPhase::Countdown { .. });
        self.phase = AcceptPhase::Idle;
        if was_counting && self.countdown_visible() {
            vec![AcceptAction::ClearTitle]
        } else {
            Vec::new()
        }
    }

    fn countdown_visible(&self) -> bool {
        self.show_countdown && !self.accept_delay.is_zero()
    }

    fn start_countdown(&mut self, start: Instant, actions: &mut Vec<AcceptAction>) {
        let remaining = self.accept_delay.as_secs_f64().ceil() as u64;
        self.phase = AcceptPhase::Countdown {
            deadline: start + self.accept_delay,
            next_tick: start + TICK,
            remaining,
        };
        if self.countdown_visible() {
            push_title(actions, remaining);
        }
    }
}

fn push_title(actions: &mut Vec<AcceptAction>, remaining: u64) {
    actions.push(AcceptAction::SetTitle(format!(
        "{TITLE_PREFIX}: accepting in {remaining}s"
    )));
}

/// A late wakeup can cover several ticks; only the newest title matters, and
/// none at all if the same batch clears it again.
fn collapse_titles(actions: Vec<AcceptAction>) -> Vec<AcceptAction> {
    let last_title = actions
        .iter()
        .rposition(|action| matches!(action, AcceptAction::SetTitle(_)));
    let cleared_after = last_title.is_some_and(|idx| {
        actions[idx..]
            .iter()
            .any(|action| *action == AcceptAction::ClearTitle)
    });
    let last_title = if cleared_after { None } else { last_title };
    actions
        .into_iter()
        .enumerate()
        .filter(|(idx, action)| {
            !matches!(action, AcceptAction::SetTitle(_)) || Some(*idx) == last_title
        })
        .map(|(_, action)| action)
        .collect()
}
