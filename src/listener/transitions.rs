//! Observable listener state, emitted as plain data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle state of a circuit-breaker listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListenerState {
    /// Not receiving; initial and terminal state
    Stopped,
    /// Opening a broker connection
    Starting,
    /// Connection open, messages flowing
    Receiving,
    /// Connection closed by the breaker, reopen pending
    Tripped,
    /// Closing the connection on request
    Stopping,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListenerState::Stopped => "stopped",
            ListenerState::Starting => "starting",
            ListenerState::Receiving => "receiving",
            ListenerState::Tripped => "tripped",
            ListenerState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// What happened in a [`BreakerTransition`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionKind {
    /// A connection was opened by `start()`
    Started,
    /// First fault of a new streak
    StreakStarted,
    /// A streak aged past the fault window and was cleared
    StreakExpired,
    /// The connection was closed by the breaker
    Tripped { reopen_in: Duration },
    /// The reopen delay elapsed and a reconnect is being attempted
    ReopenAttempted,
    /// The connection was reopened after a trip
    Reopened,
    /// Reconnecting failed; another attempt is scheduled
    ReopenFailed { error: String, retry_in: Duration },
    /// The listener stopped on request
    Stopped,
    /// The listener was disposed
    Disposed,
}

/// A breaker or lifecycle transition with the counters at that moment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerTransition {
    pub kind: TransitionKind,
    pub at: DateTime<Utc>,
    pub fault_count: u32,
    pub open_count: u32,
}

/// Point-in-time view of a listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub queue_name: String,
    pub state: ListenerState,
    pub disposed: bool,
    pub fault_count: u32,
    pub open_count: u32,
    /// Age of the active fault streak
    pub streak_age: Option<Duration>,
    pub last_fault_at: Option<DateTime<Utc>>,
    /// Delay the next trip would schedule
    pub next_reopen_delay: Duration,
    pub messages_received: u64,
    pub messages_succeeded: u64,
    pub messages_failed: u64,
    pub transport_errors: u64,
    pub trips: u64,
}

impl BreakerSnapshot {
    /// Whether messages are currently being handed to the handler
    pub fn is_receiving(&self) -> bool {
        self.state == ListenerState::Receiving
    }
}
