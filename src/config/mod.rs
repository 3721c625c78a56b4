//! # Listener Configuration
//!
//! Explicit configuration handed to the listener at construction: which queue
//! to receive from, which connection to use, and the four breaker tunables.
//! Durations are carried as milliseconds so the same values can come from a
//! config file, environment variables, or code.
//!
//! ## Usage
//!
//! ```rust
//! use queue_breaker::config::ListenerConfig;
//! use std::time::Duration;
//!
//! let config = ListenerConfig::new("orders")
//!     .with_connection("Endpoint=sb://example/;SharedAccessKey=secret")
//!     .with_fault_threshold(3)
//!     .with_fault_window(Duration::from_secs(30));
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.min_open_duration(), Duration::from_secs(60));
//! ```

pub mod loader;

use crate::error::{ListenerError, ListenerResult};
use crate::messaging::MessageHandlerOptions;
use crate::resilience::BreakerSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use loader::{detect_environment, ConfigLoader, DEFAULT_ENV_PREFIX};

/// Default fault window (60s)
pub const DEFAULT_FAULT_WINDOW_MS: u64 = 60_000;
/// Default fault threshold
pub const DEFAULT_FAULT_THRESHOLD: u32 = 5;
/// Default minimum reopen delay (60s)
pub const DEFAULT_MIN_OPEN_DURATION_MS: u64 = 60_000;
/// Default maximum reopen delay (300s)
pub const DEFAULT_MAX_OPEN_DURATION_MS: u64 = 300_000;

/// Configuration for a circuit-breaker listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Queue to receive from
    pub queue_name: String,

    /// Connection reference (connection string or the name of a setting holding one)
    pub connection: String,

    /// How long a fault streak stays active, in milliseconds
    pub fault_window_ms: u64,

    /// Faults within the window tolerated before tripping
    pub fault_threshold: u32,

    /// Reopen delay after the first trip, in milliseconds
    pub min_open_duration_ms: u64,

    /// Upper bound on the reopen delay, in milliseconds
    pub max_open_duration_ms: u64,

    /// Messages processed concurrently per session
    pub max_concurrent_calls: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            queue_name: String::new(),
            connection: String::new(),
            fault_window_ms: DEFAULT_FAULT_WINDOW_MS,
            fault_threshold: DEFAULT_FAULT_THRESHOLD,
            min_open_duration_ms: DEFAULT_MIN_OPEN_DURATION_MS,
            max_open_duration_ms: DEFAULT_MAX_OPEN_DURATION_MS,
            max_concurrent_calls: 1,
        }
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ListenerConfig {
    /// Create a configuration for `queue_name` with default tunables
    pub fn new<S: Into<String>>(queue_name: S) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Default::default()
        }
    }

    pub fn with_connection<S: Into<String>>(mut self, connection: S) -> Self {
        self.connection = connection.into();
        self
    }

    pub fn with_fault_window(mut self, window: Duration) -> Self {
        self.fault_window_ms = duration_to_ms(window);
        self
    }

    pub fn with_fault_threshold(mut self, threshold: u32) -> Self {
        self.fault_threshold = threshold;
        self
    }

    /// Set the reopen delay bounds
    pub fn with_open_duration_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.min_open_duration_ms = duration_to_ms(min);
        self.max_open_duration_ms = duration_to_ms(max);
        self
    }

    pub fn with_max_concurrent_calls(mut self, max_concurrent_calls: usize) -> Self {
        self.max_concurrent_calls = max_concurrent_calls;
        self
    }

    pub fn fault_window(&self) -> Duration {
        Duration::from_millis(self.fault_window_ms)
    }

    pub fn min_open_duration(&self) -> Duration {
        Duration::from_millis(self.min_open_duration_ms)
    }

    pub fn max_open_duration(&self) -> Duration {
        Duration::from_millis(self.max_open_duration_ms)
    }

    /// Breaker tunables for the fault tracker
    pub fn breaker_settings(&self) -> BreakerSettings {
        BreakerSettings {
            fault_window: self.fault_window(),
            fault_threshold: self.fault_threshold,
            min_open_duration: self.min_open_duration(),
            max_open_duration: self.max_open_duration(),
        }
    }

    /// Handler registration options; messages are always settled explicitly
    pub fn handler_options(&self) -> MessageHandlerOptions {
        MessageHandlerOptions {
            max_concurrent_calls: self.max_concurrent_calls,
            auto_complete: false,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ListenerResult<()> {
        if self.queue_name.trim().is_empty() {
            return Err(ListenerError::configuration("queue_name must not be empty"));
        }

        if self.fault_window_ms == 0 {
            return Err(ListenerError::configuration(
                "fault_window_ms must be greater than 0",
            ));
        }

        if self.min_open_duration_ms == 0 {
            return Err(ListenerError::configuration(
                "min_open_duration_ms must be greater than 0",
            ));
        }

        if self.max_open_duration_ms < self.min_open_duration_ms {
            return Err(ListenerError::configuration(format!(
                "max_open_duration_ms ({}) must not be less than min_open_duration_ms ({})",
                self.max_open_duration_ms, self.min_open_duration_ms
            )));
        }

        if self.max_concurrent_calls == 0 {
            return Err(ListenerError::configuration(
                "max_concurrent_calls must be at least 1",
            ));
        }

        Ok(())
    }
}
