//! # Listener Module
//!
//! The circuit-breaker listener and the data it publishes about itself.

pub mod circuit_breaker_listener;
pub mod transitions;

pub use circuit_breaker_listener::CircuitBreakerListener;
pub use transitions::{BreakerSnapshot, BreakerTransition, ListenerState, TransitionKind};
