//! # Queue Client Contracts
//!
//! The listener never talks to a concrete broker. It depends on these traits:
//! a factory that opens receive sessions, the session itself, and the
//! callback surface the session drives.

use super::errors::{MessagingError, MessagingResult};
use super::message::{LockToken, QueueMessage};
use async_trait::async_trait;
use std::sync::Arc;

/// Options applied when registering a message handler on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHandlerOptions {
    /// Upper bound on concurrently executing `on_message` calls
    pub max_concurrent_calls: usize,

    /// Settle messages automatically once `on_message` returns
    pub auto_complete: bool,
}

impl Default for MessageHandlerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 1,
            auto_complete: true,
        }
    }
}

/// Context for a transport-level exception reported by a session
#[derive(Debug, Clone)]
pub struct ExceptionReceived {
    /// The broker action that was in progress (e.g. "Receive")
    pub action: String,
    /// Queue the session is bound to
    pub queue_name: String,
    pub error: MessagingError,
}

/// Callback surface a session drives once a handler is registered
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one delivered message. `session` is the client that delivered
    /// it and must be used to settle it.
    async fn on_message(&self, session: &dyn QueueClient, message: QueueMessage);

    /// A delivery-level error occurred outside of message processing
    async fn on_exception(&self, exception: ExceptionReceived);
}

/// A live receive session against a single queue
#[async_trait]
pub trait QueueClient: Send + Sync + std::fmt::Debug {
    /// Queue this session receives from
    fn queue_name(&self) -> &str;

    /// Start pushing messages to `handler`; receiving proceeds in the background
    async fn register_handler(
        &self,
        handler: Arc<dyn MessageHandler>,
        options: MessageHandlerOptions,
    ) -> MessagingResult<()>;

    /// Complete a delivery, removing the message from the queue
    async fn acknowledge(&self, lock_token: LockToken) -> MessagingResult<()>;

    /// Abandon a delivery, making the message available for redelivery
    async fn release(&self, lock_token: LockToken) -> MessagingResult<()>;

    /// Close the session. Closing an already closed session is a no-op.
    async fn close(&self) -> MessagingResult<()>;

    fn is_closed_or_closing(&self) -> bool;
}

/// Opens new receive sessions; called on every start and reopen
#[async_trait]
pub trait QueueClientFactory: Send + Sync {
    async fn create_client(&self) -> MessagingResult<Arc<dyn QueueClient>>;
}
