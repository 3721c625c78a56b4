//! # Queue Breaker Demo
//!
//! Runs a circuit-breaker listener against an in-memory queue with a handler
//! that fails every message in a configurable range, then prints each
//! breaker transition as it happens.
//!
//! ```bash
//! cargo run --bin queue-breaker-demo                      # built-in demo settings
//! cargo run --bin queue-breaker-demo -- listener.toml     # settings from a file
//! ```

use anyhow::{Context, Result};
use queue_breaker::config::{ConfigLoader, ListenerConfig};
use queue_breaker::execution::HandlerExecutor;
use queue_breaker::listener::{CircuitBreakerListener, TransitionKind};
use queue_breaker::logging::init_structured_logging;
use queue_breaker::messaging::{causality, InMemoryQueue, QueueMessage};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

const MESSAGE_COUNT: u64 = 20;
const FAILING_MESSAGES: std::ops::Range<u64> = 3..9;

fn demo_config() -> ListenerConfig {
    ListenerConfig::new("demo-orders")
        .with_fault_threshold(2)
        .with_fault_window(Duration::from_secs(10))
        .with_open_duration_bounds(Duration::from_secs(1), Duration::from_secs(4))
}

fn load_config() -> Result<ListenerConfig> {
    match env::args().nth(1) {
        Some(path) => ConfigLoader::new()
            .with_file(&path)
            .load()
            .with_context(|| format!("failed to load listener configuration from {path}")),
        None => Ok(demo_config()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_structured_logging();

    let config = load_config()?;
    let queue = InMemoryQueue::new(config.queue_name.clone());
    let owner = Uuid::new_v4();

    let executor = HandlerExecutor::new("demo_handler", |message: QueueMessage, _cancel| async move {
        let sequence = message
            .property("sequence")
            .and_then(|value| value.as_u64())
            .unwrap_or_default();
        tokio::time::sleep(Duration::from_millis(50)).await;
        if FAILING_MESSAGES.contains(&sequence) {
            return Err(format!("downstream unavailable for message {sequence}"));
        }
        Ok(())
    });

    let listener = CircuitBreakerListener::new(config, Arc::new(queue.clone()), Arc::new(executor))
        .context("invalid listener configuration")?;
    let mut transitions = listener.subscribe();

    listener
        .start(&CancellationToken::new())
        .await
        .context("failed to start listener")?;

    for sequence in 0..MESSAGE_COUNT {
        let mut message = QueueMessage::new(format!("order #{sequence}"))
            .with_content_type("text/plain")
            .with_property("sequence", sequence);
        causality::tag(owner, &mut message);
        queue.send(message);
    }

    let drained = async {
        loop {
            match transitions.recv().await {
                Ok(transition) => {
                    println!(
                        "{} {:?} (faults={}, opens={})",
                        transition.at.format("%H:%M:%S%.3f"),
                        transition.kind,
                        transition.fault_count,
                        transition.open_count
                    );
                    if matches!(transition.kind, TransitionKind::Reopened) && queue.ready_count() == 0 {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    println!("... {skipped} transitions skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    if tokio::time::timeout(Duration::from_secs(30), drained).await.is_err() {
        info!("Demo timed out waiting for the breaker to settle");
    }

    // Let the reopened session finish whatever is left
    tokio::time::sleep(Duration::from_millis(500)).await;

    let snapshot = listener.snapshot();
    listener.dispose().await;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    println!("{:?}", queue.stats());
    Ok(())
}
