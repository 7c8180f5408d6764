//! # Clock
//!
//! The vault never reads the wall clock itself. The host asks a [`Clock`]
//! for `now` once per call and hands that instant to the state machine,
//! which keeps every operation deterministic and every test reproducible.
//!
//! Two implementations:
//!
//! - [`SystemClock`] for real deployments.
//! - [`ManualClock`] for tests and the dev network, where `dev_increaseTime`
//!   fast-forwards thirty days in one request.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// A source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Advancing would leave the range `DateTime<Utc>` can represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("clock cannot advance by {secs}s: instant out of range")]
pub struct ClockOverflow {
    pub secs: i64,
}

/// A clock that only moves when told to.
///
/// Clones share the same instant, so a test can keep a handle while the
/// host owns another. Time never goes backwards: [`set`](Self::set) with an
/// earlier instant is ignored and reported as `false`.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Starts at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Moves the clock forward by `by`. Negative durations are ignored.
    /// Returns the new instant, or leaves the clock untouched on overflow.
    pub fn advance(&self, by: Duration) -> Result<DateTime<Utc>, ClockOverflow> {
        let mut now = self.now.lock();
        if by > Duration::zero() {
            *now = now.checked_add_signed(by).ok_or(ClockOverflow {
                secs: by.num_seconds(),
            })?;
        }
        Ok(*now)
    }

    /// Convenience for [`advance`](Self::advance) in whole seconds.
    pub fn advance_secs(&self, secs: i64) -> Result<DateTime<Utc>, ClockOverflow> {
        self.advance(Self::duration(secs)?)
    }

    /// The instant `secs` from now, without moving the clock.
    pub fn after_secs(&self, secs: i64) -> Result<DateTime<Utc>, ClockOverflow> {
        let now = self.now();
        if secs <= 0 {
            return Ok(now);
        }
        now.checked_add_signed(Self::duration(secs)?)
            .ok_or(ClockOverflow { secs })
    }

    fn duration(secs: i64) -> Result<Duration, ClockOverflow> {
        Duration::try_seconds(secs).ok_or(ClockOverflow { secs })
    }

    /// Jumps to `to` if it is not earlier than the current instant.
    pub fn set(&self, to: DateTime<Utc>) -> bool {
        let mut now = self.now.lock();
        if to < *now {
            return false;
        }
        *now = to;
        true
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}
