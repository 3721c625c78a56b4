//! # Messaging Error Types
//!
//! Errors raised at the queue client boundary. Every variant here is a
//! transport-level failure from the listener's point of view: it is logged
//! and absorbed, never counted toward the circuit breaker.

use thiserror::Error;

/// Queue client error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("Queue client is closed: {queue_name}")]
    ClientClosed { queue_name: String },

    #[error("Message lock lost or unknown: {lock_token}")]
    LockLost { lock_token: String },

    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("A message handler is already registered on queue client: {queue_name}")]
    HandlerAlreadyRegistered { queue_name: String },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    /// Create a client closed error
    pub fn client_closed(queue_name: impl Into<String>) -> Self {
        Self::ClientClosed {
            queue_name: queue_name.into(),
        }
    }

    /// Create a lock lost error
    pub fn lock_lost(lock_token: impl ToString) -> Self {
        Self::LockLost {
            lock_token: lock_token.to_string(),
        }
    }

    /// Create a broker connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a queue operation error
    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a handler already registered error
    pub fn handler_already_registered(queue_name: impl Into<String>) -> Self {
        Self::HandlerAlreadyRegistered {
            queue_name: queue_name.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error originates from the broker connection rather than from
    /// misuse of the client API
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ClientClosed { .. }
                | Self::LockLost { .. }
                | Self::Connection { .. }
                | Self::QueueOperation { .. }
        )
    }
}

impl From<String> for MessagingError {
    fn from(message: String) -> Self {
        MessagingError::internal(message)
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
