//! # Execution Module
//!
//! The boundary between the listener and the user's handler function.

pub mod executor;

pub use executor::{HandlerExecutor, TriggerExecutor, TriggerResult};
