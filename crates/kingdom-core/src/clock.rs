//! Wall clock and game-day tracking.
//!
//! Everything time-dependent in the core reads the current instant through
//! [`Clock`], so tests can drive expiry, cooldowns, and day rollover with a
//! [`ManualClock`] instead of sleeping. Game days themselves are fixed
//! windows of wall time computed by
//! [`GameCalendar`](kingdom_economy::GameCalendar); [`DayTracker`] remembers
//! the last day seen so the upkeep sweep can tell when one ends.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, TimeDelta, Utc};

use kingdom_types::GameDay;

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Advancing would leave the representable range.
    #[error("clock cannot advance by {millis}ms from {from}")]
    OutOfRange {
        /// The instant before advancing.
        from: DateTime<Utc>,
        /// The requested step.
        millis: i64,
    },
}

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// A clock stopped at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Jump to `instant`.
    pub fn set(&self, instant: DateTime<Utc>) {
        self.millis
            .store(instant.timestamp_millis(), Ordering::Release);
    }

    /// Move forward by `step`. Returns the new instant.
    pub fn advance(&self, step: TimeDelta) -> Result<DateTime<Utc>, ClockError> {
        let from = self.now();
        let next = from
            .checked_add_signed(step)
            .ok_or(ClockError::OutOfRange {
                from,
                millis: step.num_milliseconds(),
            })?;
        self.set(next);
        Ok(next)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::Acquire)).unwrap_or_default()
    }
}

/// Last game day observed by the upkeep sweep.
#[derive(Debug)]
pub struct DayTracker {
    last: AtomicU64,
}

/// Marker for "no day observed yet".
const UNSEEN: u64 = u64::MAX;

impl Default for DayTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DayTracker {
    /// A tracker that has seen no day.
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(UNSEEN),
        }
    }

    /// Record `today`. Returns the previous day when `today` is later.
    ///
    /// The first observation only primes the tracker. Two sweeps racing on
    /// the same rollover see it once between them.
    pub fn observe(&self, today: GameDay) -> Option<GameDay> {
        let previous = self.last.fetch_max(today.0, Ordering::AcqRel);
        if previous == UNSEEN {
            self.last.store(today.0, Ordering::Release);
            return None;
        }
        (previous < today.0).then_some(GameDay(previous))
    }

    /// The last day observed, if any.
    pub fn last(&self) -> Option<GameDay> {
        let last = self.last.load(Ordering::Acquire);
        (last != UNSEEN).then_some(GameDay(last))
    }
}
