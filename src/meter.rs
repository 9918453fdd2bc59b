//! Session metering: elapsed time and accrued cost.
//!
//! Readings are derived from the session record and the wall clock on every
//! tick. Nothing is accumulated between ticks, so a late tick only delays the
//! display and never skews the total.

use crate::model::Session;
use chrono::{DateTime, Utc};

/// Remaining runtime below which a low-balance warning is raised
pub const DEFAULT_LOW_BALANCE_SECS: u64 = 300;

/// Elapsed time and accrued cost at one instant
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Reading {
    pub elapsed_secs: u64,
    pub cost: f64,
}

impl Reading {
    pub const ZERO: Reading = Reading {
        elapsed_secs: 0,
        cost: 0.0,
    };

    pub fn is_zero(&self) -> bool {
        self.elapsed_secs == 0 && self.cost == 0.0
    }
}

/// Compute the reading for a session at `now`.
///
/// Inactive sessions and sessions without a start time read as zero.
pub fn reading_at(session: &Session, now: DateTime<Utc>) -> Reading {
    let Some(started_at) = session.active_since() else {
        return Reading::ZERO;
    };

    let millis = (now - started_at).num_milliseconds();
    if millis <= 0 {
        return Reading::ZERO;
    }

    let elapsed_secs = (millis / 1000) as u64;
    Reading {
        elapsed_secs,
        cost: elapsed_secs as f64 * session.rate_per_second,
    }
}

/// How long the balance lasts at the session's rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Seconds of runtime left; `None` when the rate is not positive
    pub remaining_secs: Option<u64>,
    pub exhausted: bool,
}

pub fn project(reading: &Reading, rate_per_second: f64, balance: f64, active: bool) -> Projection {
    let left = (balance - reading.cost).max(0.0);
    let remaining_secs = if rate_per_second > 0.0 {
        Some((left / rate_per_second).floor() as u64)
    } else {
        None
    };

    Projection {
        remaining_secs,
        exhausted: active && reading.cost >= balance,
    }
}

/// Tracks the live session and the reading currently on display
#[derive(Debug, Clone)]
pub struct SessionMeter {
    session: Option<Session>,
    reading: Reading,
    low_balance_secs: u64,
    low_balance_warned: bool,
}

impl Default for SessionMeter {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_BALANCE_SECS)
    }
}

impl SessionMeter {
    pub fn new(low_balance_secs: u64) -> Self {
        Self {
            session: None,
            reading: Reading::ZERO,
            low_balance_secs,
            low_balance_warned: false,
        }
    }

    /// Replace the tracked session record.
    ///
    /// Returns whether the meter is running afterwards. A record that is
    /// missing or no longer active zeroes the reading immediately.
    pub fn observe(&mut self, session: Option<&Session>) -> bool {
        let changed_id = match (&self.session, session) {
            (Some(old), Some(new)) => old.id != new.id,
            _ => true,
        };
        if changed_id {
            self.low_balance_warned = false;
        }

        self.session = session.cloned();
        if !self.is_active() {
            self.reading = Reading::ZERO;
        }
        self.is_active()
    }

    /// Recompute the reading from the wall clock
    pub fn tick(&mut self, now: DateTime<Utc>) -> Reading {
        self.reading = match &self.session {
            Some(session) => reading_at(session, now),
            None => Reading::ZERO,
        };
        self.reading
    }

    /// Stop tracking and zero the display
    pub fn reset(&mut self) {
        self.session = None;
        self.reading = Reading::ZERO;
        self.low_balance_warned = false;
    }

    pub fn reading(&self) -> Reading {
        if self.is_active() {
            self.reading
        } else {
            Reading::ZERO
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_active)
    }

    pub fn rate_per_second(&self) -> f64 {
        self.session
            .as_ref()
            .map(|s| s.rate_per_second)
            .unwrap_or(0.0)
    }

    pub fn projection(&self, balance: f64) -> Projection {
        project(
            &self.reading(),
            self.rate_per_second(),
            balance,
            self.is_active(),
        )
    }

    /// Returns the remaining seconds the first time they fall under the
    /// threshold for the current session.
    pub fn check_low_balance(&mut self, balance: f64) -> Option<u64> {
        if self.low_balance_warned || !self.is_active() {
            return None;
        }
        let remaining = self.projection(balance).remaining_secs?;
        if remaining < self.low_balance_secs {
            self.low_balance_warned = true;
            Some(remaining)
        } else {
            None
        }
    }
}

/// Format seconds as HH:MM:SS
pub fn format_duration(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Format a token amount for display
pub fn format_amount(amount: f64) -> String {
    if amount == 0.0 {
        "0 X4PN".to_string()
    } else if amount.abs() < 0.01 {
        format!("{:.6} X4PN", amount)
    } else if amount.abs() < 1.0 {
        format!("{:.4} X4PN", amount)
    } else {
        format!("{:.2} X4PN", amount)
    }
}
