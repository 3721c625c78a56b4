//! Shared test doubles for listener integration tests
//!
//! `RecordingFactory` hands out `RecordingClient` sessions that never receive
//! on their own: tests push messages through the registered handler with
//! [`RecordingClient::deliver`], which awaits the full callback, so every
//! settlement and breaker decision is visible as soon as it returns. Like a
//! real broker, a closed session stops delivering but still accepts
//! settlement of locks it handed out before closing.

#![allow(dead_code)]

use async_trait::async_trait;
use queue_breaker::execution::{TriggerExecutor, TriggerResult};
use queue_breaker::listener::{BreakerTransition, TransitionKind};
use queue_breaker::messaging::{
    ExceptionReceived, LockToken, MessageHandler, MessageHandlerOptions, MessagingError,
    MessagingResult, QueueClient, QueueClientFactory, QueueMessage,
};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// A queue session that records every call made on it
pub struct RecordingClient {
    session_index: usize,
    queue_name: String,
    handler: Mutex<Option<Arc<dyn MessageHandler>>>,
    options: Mutex<Option<MessageHandlerOptions>>,
    held: Mutex<HashSet<LockToken>>,
    acknowledged: Mutex<Vec<LockToken>>,
    released: Mutex<Vec<LockToken>>,
    close_calls: AtomicUsize,
    closed: AtomicBool,
    fail_settlements: AtomicBool,
    fail_close: AtomicBool,
}

impl fmt::Debug for RecordingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingClient")
            .field("session_index", &self.session_index)
            .field("queue_name", &self.queue_name)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl RecordingClient {
    fn new(session_index: usize, queue_name: &str) -> Self {
        Self {
            session_index,
            queue_name: queue_name.to_string(),
            handler: Mutex::new(None),
            options: Mutex::new(None),
            held: Mutex::new(HashSet::new()),
            acknowledged: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            fail_settlements: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
        }
    }

    /// Lock `message` to this session and run it through the registered
    /// handler. A closed session delivers nothing.
    pub async fn deliver(&self, mut message: QueueMessage) -> LockToken {
        let token = LockToken::new();
        if self.is_closed() {
            return token;
        }
        message.lock_token = Some(token);
        message.delivery_count += 1;
        self.held.lock().unwrap().insert(token);

        let handler = self
            .handler
            .lock()
            .unwrap()
            .clone()
            .expect("no handler registered");
        handler.on_message(self, message).await;
        token
    }

    /// Report a transport error the way a broker SDK would
    pub async fn raise_exception(&self, error: MessagingError) {
        let handler = self
            .handler
            .lock()
            .unwrap()
            .clone()
            .expect("no handler registered");
        handler
            .on_exception(ExceptionReceived {
                action: "Receive".to_string(),
                queue_name: self.queue_name.clone(),
                error,
            })
            .await;
    }

    /// Make acknowledge and release fail with a lost lock
    pub fn fail_settlements(&self) {
        self.fail_settlements.store(true, Ordering::SeqCst);
    }

    /// Make close report a transport error after marking the session closed
    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    pub fn acknowledged(&self) -> Vec<LockToken> {
        self.acknowledged.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<LockToken> {
        self.released.lock().unwrap().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn options(&self) -> Option<MessageHandlerOptions> {
        *self.options.lock().unwrap()
    }

    fn settle(&self, ledger: &Mutex<Vec<LockToken>>, token: LockToken) -> MessagingResult<()> {
        if !self.held.lock().unwrap().remove(&token) {
            if self.is_closed() {
                return Err(MessagingError::client_closed(&self.queue_name));
            }
            return Err(MessagingError::lock_lost(token));
        }
        ledger.lock().unwrap().push(token);
        if self.fail_settlements.load(Ordering::SeqCst) {
            return Err(MessagingError::lock_lost(token));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueClient for RecordingClient {
    fn queue_name(&self) -> &str {
        &self.queue_name
    }

    async fn register_handler(
        &self,
        handler: Arc<dyn MessageHandler>,
        options: MessageHandlerOptions,
    ) -> MessagingResult<()> {
        let mut registered = self.handler.lock().unwrap();
        if registered.is_some() {
            return Err(MessagingError::handler_already_registered(&self.queue_name));
        }
        *registered = Some(handler);
        *self.options.lock().unwrap() = Some(options);
        Ok(())
    }

    async fn acknowledge(&self, lock_token: LockToken) -> MessagingResult<()> {
        self.settle(&self.acknowledged, lock_token)
    }

    async fn release(&self, lock_token: LockToken) -> MessagingResult<()> {
        self.settle(&self.released, lock_token)
    }

    async fn close(&self) -> MessagingResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(MessagingError::connection("link detached during close"));
        }
        Ok(())
    }

    fn is_closed_or_closing(&self) -> bool {
        self.is_closed()
    }
}

/// Hands out [`RecordingClient`] sessions and keeps every one it created
pub struct RecordingFactory {
    queue_name: String,
    sessions: Mutex<Vec<Arc<RecordingClient>>>,
    connect_failures: Mutex<VecDeque<MessagingError>>,
    connect_delay: Mutex<Option<Duration>>,
}

impl RecordingFactory {
    pub fn new(queue_name: &str) -> Arc<Self> {
        Arc::new(Self {
            queue_name: queue_name.to_string(),
            sessions: Mutex::new(Vec::new()),
            connect_failures: Mutex::new(VecDeque::new()),
            connect_delay: Mutex::new(None),
        })
    }

    /// Fail the next `count` connection attempts
    pub fn fail_next_connects(&self, count: usize) {
        let mut failures = self.connect_failures.lock().unwrap();
        for _ in 0..count {
            failures.push_back(MessagingError::connection("broker unreachable"));
        }
    }

    /// Delay every connection attempt by `delay`
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = Some(delay);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn session(&self, index: usize) -> Arc<RecordingClient> {
        Arc::clone(&self.sessions.lock().unwrap()[index])
    }

    pub fn latest(&self) -> Arc<RecordingClient> {
        Arc::clone(
            self.sessions
                .lock()
                .unwrap()
                .last()
                .expect("no session opened"),
        )
    }
}

#[async_trait]
impl QueueClientFactory for RecordingFactory {
    async fn create_client(&self) -> MessagingResult<Arc<dyn QueueClient>> {
        let delay = *self.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.connect_failures.lock().unwrap().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        let mut sessions = self.sessions.lock().unwrap();
        let client = Arc::new(RecordingClient::new(sessions.len(), &self.queue_name));
        sessions.push(Arc::clone(&client));
        Ok(client)
    }
}

/// Executor whose outcome is switched by the test
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let executor = Self::default();
        executor.failing.store(true, Ordering::SeqCst);
        Arc::new(executor)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TriggerExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _message: &QueueMessage,
        _cancellation: &CancellationToken,
    ) -> TriggerResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            TriggerResult::failure("downstream unavailable", Duration::ZERO)
        } else {
            TriggerResult::success(Duration::ZERO)
        }
    }
}

/// Wait for the first transition matching `predicate`, skipping the rest
pub async fn wait_for<P>(
    transitions: &mut broadcast::Receiver<BreakerTransition>,
    predicate: P,
) -> BreakerTransition
where
    P: Fn(&TransitionKind) -> bool,
{
    let wait = async {
        loop {
            match transitions.recv().await {
                Ok(transition) if predicate(&transition.kind) => return transition,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("transition channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(3600), wait)
        .await
        .expect("timed out waiting for transition")
}

/// Transitions already queued on the receiver
pub fn drain(transitions: &mut broadcast::Receiver<BreakerTransition>) -> Vec<TransitionKind> {
    let mut kinds = Vec::new();
    while let Ok(transition) = transitions.try_recv() {
        kinds.push(transition.kind);
    }
    kinds
}

/// Poll `condition` on the tokio clock until it holds
pub async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
