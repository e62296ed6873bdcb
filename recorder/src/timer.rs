//! User timers
//!
//! A timer is driven by explicit state notifications from the instrumented
//! program and reports its accumulated value when it finishes.

use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// State notifications a timer reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerState {
    Start,
    Suspend,
    Finish,
    Resume,
}

impl TimerState {
    pub const VALUES: [TimerState; 4] = [
        TimerState::Start,
        TimerState::Suspend,
        TimerState::Finish,
        TimerState::Resume,
    ];

    pub fn ordinal(self) -> i32 {
        self as i32
    }

    pub fn from_ordinal(ordinal: i32) -> Result<Self, WireError> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|index| Self::VALUES.get(index).copied())
            .ok_or(WireError::InvalidOrdinal { kind: "timer state", ordinal })
    }
}

/// Accumulated value and state of one timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerInfo {
    start: i64,
    value: i64,
    state: TimerState,
}

impl TimerInfo {
    /// Creates a running timer started at `now`
    pub fn new(now: i64) -> Self {
        Self {
            start: now,
            value: 0,
            state: TimerState::Start,
        }
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, TimerState::Start | TimerState::Resume)
    }

    pub fn is_stopped(&self) -> bool {
        self.state == TimerState::Suspend
    }

    /// Applies a state notification; returns `true` exactly when the timer
    /// finished with this call. Out-of-order notifications are ignored.
    pub fn handle_state(&mut self, state: TimerState, now: i64) -> bool {
        match state {
            TimerState::Start => {
                if self.state == TimerState::Finish {
                    *self = TimerInfo::new(now);
                }
                false
            }
            TimerState::Suspend => {
                if self.is_active() {
                    self.accumulate(now);
                    self.state = TimerState::Suspend;
                }
                false
            }
            TimerState::Finish => {
                if self.is_stopped() {
                    self.state = TimerState::Finish;
                    true
                } else if self.is_active() {
                    self.accumulate(now);
                    self.state = TimerState::Finish;
                    true
                } else {
                    false
                }
            }
            TimerState::Resume => {
                if self.is_stopped() {
                    self.start = now;
                    self.state = TimerState::Resume;
                }
                false
            }
        }
    }

    fn accumulate(&mut self, now: i64) {
        self.value += now - self.start;
        self.start = 0;
    }
}
