//! # Listener Error Types
//!
//! Errors surfaced synchronously to callers of the listener's control
//! operations. Handler and transport failures never show up here; they are
//! settled inside the message callback.

use crate::messaging::MessagingError;
use thiserror::Error;

/// Errors returned by [`CircuitBreakerListener`](crate::listener::CircuitBreakerListener)
/// control operations
#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("Listener has already been disposed")]
    AlreadyDisposed,

    #[error("Operation was canceled")]
    OperationCanceled,

    #[error("Invalid listener state: {message}")]
    InvalidState { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
}

impl ListenerError {
    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Programming errors (invalid state, use after dispose) that must never be retried
    pub fn is_programming_error(&self) -> bool {
        matches!(self, Self::AlreadyDisposed | Self::InvalidState { .. })
    }
}

impl From<config::ConfigError> for ListenerError {
    fn from(err: config::ConfigError) -> Self {
        ListenerError::configuration(err.to_string())
    }
}

/// Result type alias for listener control operations
pub type ListenerResult<T> = Result<T, ListenerError>;
