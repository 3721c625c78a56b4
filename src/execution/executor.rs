//! # Trigger Executor
//!
//! Runs the user handler bound to a trigger and reports the outcome as data.
//! Nothing crosses this boundary as an error or a panic: both become a failed
//! [`TriggerResult`].

use crate::messaging::QueueMessage;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of one handler invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerResult {
    pub succeeded: bool,
    /// Failure description when `succeeded` is false
    pub error: Option<String>,
    pub duration: Duration,
}

impl TriggerResult {
    pub fn success(duration: Duration) -> Self {
        Self {
            succeeded: true,
            error: None,
            duration,
        }
    }

    pub fn failure(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            succeeded: false,
            error: Some(error.into()),
            duration,
        }
    }
}

/// Executes the handler bound to a queue trigger
#[async_trait]
pub trait TriggerExecutor: Send + Sync {
    /// Run the handler for `message`. Must not panic or fail past this call;
    /// handler failures are reported through [`TriggerResult::succeeded`].
    async fn execute(&self, message: &QueueMessage, cancellation: &CancellationToken)
        -> TriggerResult;
}

/// Adapts an async function into a [`TriggerExecutor`]
pub struct HandlerExecutor<F> {
    function_name: String,
    handler: F,
}

impl<F> HandlerExecutor<F> {
    pub fn new<Fut, E>(function_name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(QueueMessage, CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        Self {
            function_name: function_name.into(),
            handler,
        }
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }
}

impl<F> fmt::Debug for HandlerExecutor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerExecutor")
            .field("function_name", &self.function_name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut, E> TriggerExecutor for HandlerExecutor<F>
where
    F: Fn(QueueMessage, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send,
    E: fmt::Display + Send,
{
    async fn execute(
        &self,
        message: &QueueMessage,
        cancellation: &CancellationToken,
    ) -> TriggerResult {
        let started = Instant::now();
        let invocation = (self.handler)(message.clone(), cancellation.clone());
        let outcome = AssertUnwindSafe(invocation).catch_unwind().await;
        let duration = started.elapsed();

        match outcome {
            Ok(Ok(())) => {
                debug!(
                    function = %self.function_name,
                    message_id = %message.message_id,
                    duration_ms = duration.as_millis() as u64,
                    "🟢 Handler succeeded"
                );
                TriggerResult::success(duration)
            }
            Ok(Err(error)) => {
                let error = error.to_string();
                warn!(
                    function = %self.function_name,
                    message_id = %message.message_id,
                    duration_ms = duration.as_millis() as u64,
                    %error,
                    "🔴 Handler failed"
                );
                TriggerResult::failure(error, duration)
            }
            Err(panic) => {
                let error = format!("handler panicked: {}", panic_message(panic.as_ref()));
                warn!(
                    function = %self.function_name,
                    message_id = %message.message_id,
                    %error,
                    "🔴 Handler panicked"
                );
                TriggerResult::failure(error, duration)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
