//! # Resilience Module
//!
//! Fault accounting for the circuit-breaker listener: a windowed fault
//! tracker that decides when to trip, and the capped, escalating reopen delay.
//!
//! ## Usage
//!
//! ```rust
//! use queue_breaker::resilience::{BreakerSettings, FaultTracker, TripDecision};
//! use std::time::Duration;
//! use tokio::time::Instant;
//!
//! let mut tracker = FaultTracker::new(BreakerSettings {
//!     fault_threshold: 1,
//!     ..Default::default()
//! });
//!
//! let now = Instant::now();
//! assert!(!tracker.record_failure(now, true).is_trip());
//! match tracker.record_failure(now, true) {
//!     TripDecision::Trip { reopen_delay, .. } => {
//!         assert_eq!(reopen_delay, Duration::from_secs(60));
//!     }
//!     TripDecision::Hold { .. } => unreachable!(),
//! }
//! ```

pub mod backoff;
pub mod circuit_breaker;

pub use backoff::reopen_delay;
pub use circuit_breaker::{BreakerSettings, FaultTracker, TripDecision};
