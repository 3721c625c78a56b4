//! # Fault Tracker
//!
//! The breaker state machine behind the listener. Faults are counted within a
//! rolling window that starts at the first fault of a streak; exceeding the
//! threshold trips the breaker, and consecutive trips escalate the reopen
//! delay until a streak expires naturally.
//!
//! ```text
//! record_failure ──▶ streak active? ──no──▶ start streak (first_fault_at = now)
//!                         │
//!                         ▼
//!                  fault_count += 1
//!                         │
//!        fault_count > threshold && connection open?
//!                  │yes                │no
//!                  ▼                   ▼
//!     open_count += 1, Trip{delay}    Hold
//! ```
//!
//! The tracker is a plain value with no I/O. The listener owns one behind a
//! single mutex and only ever calls the transition methods below.

use super::backoff::reopen_delay;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Breaker tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// How long a fault streak stays active after its first fault
    pub fault_window: Duration,

    /// Faults within the window tolerated before tripping
    pub fault_threshold: u32,

    /// Reopen delay after the first trip, and the per-trip increment
    pub min_open_duration: Duration,

    /// Upper bound on the reopen delay
    pub max_open_duration: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            fault_window: Duration::from_secs(60),
            fault_threshold: 5,
            min_open_duration: Duration::from_secs(60),
            max_open_duration: Duration::from_secs(300),
        }
    }
}

/// Result of recording a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripDecision {
    /// Keep receiving
    Hold { fault_count: u32 },

    /// Close the connection and reopen after `reopen_delay`
    Trip {
        fault_count: u32,
        open_count: u32,
        reopen_delay: Duration,
    },
}

impl TripDecision {
    pub fn is_trip(&self) -> bool {
        matches!(self, TripDecision::Trip { .. })
    }

    pub fn fault_count(&self) -> u32 {
        match *self {
            TripDecision::Hold { fault_count } | TripDecision::Trip { fault_count, .. } => {
                fault_count
            }
        }
    }
}

/// Rolling fault accounting for one listener
#[derive(Debug, Clone)]
pub struct FaultTracker {
    settings: BreakerSettings,
    first_fault_at: Option<Instant>,
    last_fault_at: Option<Instant>,
    last_fault_wall: Option<DateTime<Utc>>,
    fault_count: u32,
    open_count: u32,
    trips: u64,
    successes: u64,
    failures: u64,
}

impl FaultTracker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            first_fault_at: None,
            last_fault_at: None,
            last_fault_wall: None,
            fault_count: 0,
            open_count: 0,
            trips: 0,
            successes: 0,
            failures: 0,
        }
    }

    /// Clear the current streak if it started more than `fault_window` ago.
    ///
    /// Expiry also resets `open_count`, so a quiet window after any number of
    /// trips restores the shortest reopen delay. Returns true when a streak
    /// was cleared.
    pub fn try_expire_streak(&mut self, now: Instant) -> bool {
        match self.first_fault_at {
            Some(first) if now.saturating_duration_since(first) > self.settings.fault_window => {
                self.first_fault_at = None;
                self.fault_count = 0;
                self.open_count = 0;
                true
            }
            _ => false,
        }
    }

    /// Count a handler failure and decide whether to trip.
    ///
    /// `connection_open` must be false when the connection is absent, closed,
    /// or closing; no trip is issued then, which keeps trips one per connection.
    pub fn record_failure(&mut self, now: Instant, connection_open: bool) -> TripDecision {
        if self.first_fault_at.is_none() {
            self.first_fault_at = Some(now);
            self.fault_count = 0;
        }
        self.last_fault_at = Some(now);
        self.last_fault_wall = Some(Utc::now());
        self.fault_count = self.fault_count.saturating_add(1);
        self.failures += 1;

        if connection_open && self.fault_count > self.settings.fault_threshold {
            self.open_count = self.open_count.saturating_add(1);
            self.trips += 1;
            return TripDecision::Trip {
                fault_count: self.fault_count,
                open_count: self.open_count,
                reopen_delay: self.current_reopen_delay(),
            };
        }

        TripDecision::Hold {
            fault_count: self.fault_count,
        }
    }

    /// Count a handler success. Fault state is untouched.
    pub fn record_success(&mut self) {
        self.successes += 1;
    }

    /// Clear the streak ahead of a reopen attempt. `open_count` is kept.
    pub fn reset_for_reopen(&mut self) {
        self.fault_count = 0;
        self.first_fault_at = None;
    }

    /// Escalate after a reopen attempt that could not reconnect; returns the
    /// delay before the next attempt.
    pub fn escalate_failed_reopen(&mut self) -> Duration {
        self.open_count = self.open_count.saturating_add(1);
        self.current_reopen_delay()
    }

    /// Reopen delay for the current `open_count`
    pub fn current_reopen_delay(&self) -> Duration {
        reopen_delay(
            self.settings.min_open_duration,
            self.settings.max_open_duration,
            self.open_count,
        )
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    pub fn fault_count(&self) -> u32 {
        self.fault_count
    }

    pub fn open_count(&self) -> u32 {
        self.open_count
    }

    pub fn trips(&self) -> u64 {
        self.trips
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn streak_active(&self) -> bool {
        self.first_fault_at.is_some()
    }

    /// Time since the current streak began
    pub fn streak_age(&self, now: Instant) -> Option<Duration> {
        self.first_fault_at
            .map(|first| now.saturating_duration_since(first))
    }

    /// Monotonic time of the most recent fault
    pub fn last_fault_at(&self) -> Option<Instant> {
        self.last_fault_at
    }

    /// Wall-clock time of the most recent fault
    pub fn last_fault_wall(&self) -> Option<DateTime<Utc>> {
        self.last_fault_wall
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(threshold: u32, window_secs: u64) -> BreakerSettings {
        BreakerSettings {
            fault_window: Duration::from_secs(window_secs),
            fault_threshold: threshold,
            min_open_duration: Duration::from_secs(60),
            max_open_duration: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_trips_when_count_exceeds_threshold() {
        let start = Instant::now();
        let mut tracker = FaultTracker::new(settings(2, 10));

        let first = tracker.record_failure(start, true);
        assert_eq!(first, TripDecision::Hold { fault_count: 1 });
        assert!(tracker.streak_active());

        let second = tracker.record_failure(start + Duration::from_secs(1), true);
        assert_eq!(second, TripDecision::Hold { fault_count: 2 });

        let third = tracker.record_failure(start + Duration::from_secs(2), true);
        assert_eq!(
            third,
            TripDecision::Trip {
                fault_count: 3,
                open_count: 1,
                reopen_delay: Duration::from_secs(60),
            }
        );
        assert_eq!(tracker.trips(), 1);
    }

    #[test]
    fn test_no_trip_without_open_connection() {
        let now = Instant::now();
        let mut tracker = FaultTracker::new(settings(0, 10));

        let decision = tracker.record_failure(now, false);
        assert!(!decision.is_trip());
        assert_eq!(decision.fault_count(), 1);
        assert_eq!(tracker.open_count(), 0);
    }

    #[test]
    fn test_streak_expiry_resets_counts() {
        let start = Instant::now();
        let mut tracker = FaultTracker::new(settings(5, 10));

        tracker.record_failure(start, true);
        tracker.record_failure(start + Duration::from_secs(3), true);

        // Exactly at the window edge the streak is still active
        assert!(!tracker.try_expire_streak(start + Duration::from_secs(10)));
        assert_eq!(tracker.fault_count(), 2);

        assert!(tracker.try_expire_streak(start + Duration::from_secs(11)));
        assert_eq!(tracker.fault_count(), 0);
        assert!(!tracker.streak_active());
        assert!(tracker.streak_age(start + Duration::from_secs(11)).is_none());

        // Nothing left to expire
        assert!(!tracker.try_expire_streak(start + Duration::from_secs(60)));
    }

    #[test]
    fn test_escalation_survives_reopen_but_not_expiry() {
        let start = Instant::now();
        let mut tracker = FaultTracker::new(settings(0, 10));

        let trip = tracker.record_failure(start, true);
        assert!(trip.is_trip());
        tracker.reset_for_reopen();
        assert_eq!(tracker.fault_count(), 0);
        assert_eq!(tracker.open_count(), 1);

        let second = tracker.record_failure(start + Duration::from_secs(61), true);
        assert_eq!(
            second,
            TripDecision::Trip {
                fault_count: 1,
                open_count: 2,
                reopen_delay: Duration::from_secs(120),
            }
        );

        assert!(tracker.try_expire_streak(start + Duration::from_secs(200)));
        assert_eq!(tracker.open_count(), 0);
        assert_eq!(tracker.current_reopen_delay(), Duration::ZERO);
    }

    #[test]
    fn test_success_does_not_touch_fault_state() {
        let now = Instant::now();
        let mut tracker = FaultTracker::new(settings(3, 10));

        tracker.record_failure(now, true);
        tracker.record_success();

        assert_eq!(tracker.fault_count(), 1);
        assert!(tracker.streak_active());
        assert_eq!(tracker.successes(), 1);
        assert_eq!(tracker.failures(), 1);
        assert!(tracker.last_fault_wall().is_some());
        assert_eq!(tracker.last_fault_at(), Some(now));
    }

    #[test]
    fn test_failed_reopen_escalation_is_capped() {
        let mut tracker = FaultTracker::new(settings(0, 10));
        let delays: Vec<Duration> = (0..7).map(|_| tracker.escalate_failed_reopen()).collect();

        assert_eq!(delays[0], Duration::from_secs(60));
        assert_eq!(delays[1], Duration::from_secs(120));
        assert_eq!(delays[6], Duration::from_secs(300));
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}
