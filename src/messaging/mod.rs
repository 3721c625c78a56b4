//! # Messaging Module
//!
//! Queue-facing building blocks: the message envelope, causality tagging, the
//! queue client contracts the listener depends on, and an in-memory broker
//! implementing those contracts.

pub mod causality;
pub mod client;
pub mod errors;
pub mod in_memory;
pub mod message;

pub use client::{
    ExceptionReceived, MessageHandler, MessageHandlerOptions, QueueClient, QueueClientFactory,
};
pub use errors::{MessagingError, MessagingResult};
pub use in_memory::{InMemoryQueue, InMemoryQueueClient, QueueStats, DEFAULT_MAX_DELIVERY_COUNT};
pub use message::{LockToken, QueueMessage};
