#![allow(clippy::doc_markdown)] // Allow technical terms like ServiceBus, JSON in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Queue Breaker
//!
//! A resilient message-queue consumer that protects downstream systems with a
//! windowed circuit breaker.
//!
//! ## Overview
//!
//! The listener opens a receive session on a queue, hands each delivered
//! message to a user-supplied handler, and settles the message afterwards:
//! acknowledged when the handler succeeds, released for redelivery when it
//! fails. Handler failures are counted within a sliding fault window. When
//! the count exceeds the configured threshold the listener closes its
//! connection and reopens it after a delay that grows with each consecutive
//! trip, capped at a maximum.
//!
//! ## Module Organization
//!
//! - [`listener`] - The circuit-breaker listener, its states and transitions
//! - [`resilience`] - Fault tracking and reopen delay computation
//! - [`messaging`] - Message envelope, causality tagging, queue client contracts, in-memory broker
//! - [`execution`] - The trigger executor boundary around the user's handler
//! - [`config`] - Listener configuration and layered loading
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use queue_breaker::config::ListenerConfig;
//! use queue_breaker::execution::HandlerExecutor;
//! use queue_breaker::listener::CircuitBreakerListener;
//! use queue_breaker::messaging::{InMemoryQueue, QueueMessage};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = InMemoryQueue::new("orders");
//! let config = ListenerConfig::new("orders")
//!     .with_fault_threshold(2)
//!     .with_fault_window(Duration::from_secs(10));
//!
//! let executor = HandlerExecutor::new("process_order", |message: QueueMessage, _cancel| async move {
//!     match message.body_as_str() {
//!         Some(_) => Ok(()),
//!         None => Err("body is not UTF-8".to_string()),
//!     }
//! });
//!
//! let listener = CircuitBreakerListener::new(config, Arc::new(queue.clone()), Arc::new(executor))?;
//! let mut transitions = listener.subscribe();
//! listener.start(&CancellationToken::new()).await?;
//!
//! queue.send(QueueMessage::new("order #1"));
//! if let Ok(transition) = transitions.recv().await {
//!     println!("{:?}", transition.kind);
//! }
//!
//! listener.dispose().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests, including paused-clock breaker scenarios
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod listener;
pub mod logging;
pub mod messaging;
pub mod resilience;

pub use config::{ConfigLoader, ListenerConfig};
pub use error::{ListenerError, ListenerResult};
pub use execution::{HandlerExecutor, TriggerExecutor, TriggerResult};
pub use listener::{
    BreakerSnapshot, BreakerTransition, CircuitBreakerListener, ListenerState, TransitionKind,
};
pub use logging::init_structured_logging;
pub use messaging::{
    InMemoryQueue, LockToken, MessageHandler, MessagingError, QueueClient, QueueClientFactory,
    QueueMessage,
};
pub use resilience::{BreakerSettings, FaultTracker, TripDecision};
