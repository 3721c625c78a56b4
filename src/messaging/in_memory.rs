//! # In-Memory Queue Broker
//!
//! A process-local broker implementing the queue client contracts with
//! peek-lock semantics: deliveries are locked to the receiving session until
//! acknowledged or released, released messages are redelivered with an
//! incremented delivery count, and messages exceeding the maximum delivery
//! count are dead-lettered. Closing a session stops delivery at once, but a
//! handler still running may settle its delivery afterwards. Locks nobody
//! holds any more are returned to the queue.

use super::client::{
    ExceptionReceived, MessageHandler, MessageHandlerOptions, QueueClient, QueueClientFactory,
};
use super::errors::{MessagingError, MessagingResult};
use super::message::{LockToken, QueueMessage};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Deliveries allowed before a message is dead-lettered
pub const DEFAULT_MAX_DELIVERY_COUNT: u32 = 10;

const SESSION_OPEN: u8 = 0;
const SESSION_CLOSING: u8 = 1;
const SESSION_CLOSED: u8 = 2;

/// Point-in-time counters for an in-memory queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: usize,
    pub dead_lettered: usize,
    pub completed: u64,
    pub released: u64,
    pub sessions_opened: u64,
}

#[derive(Debug)]
struct QueueShared {
    name: String,
    max_delivery_count: u32,
    ready: Mutex<VecDeque<QueueMessage>>,
    dead_letters: Mutex<Vec<QueueMessage>>,
    pending_faults: Mutex<VecDeque<MessagingError>>,
    connect_failures: Mutex<VecDeque<MessagingError>>,
    available: Notify,
    completed: AtomicU64,
    released: AtomicU64,
    sessions_opened: AtomicU64,
}

impl QueueShared {
    fn push_back(&self, message: QueueMessage) {
        self.ready.lock().push_back(message);
        self.available.notify_one();
    }

    fn push_front(&self, message: QueueMessage) {
        self.ready.lock().push_front(message);
        self.available.notify_one();
    }

    /// Wait for the next message, or for an injected transport fault
    async fn next_delivery(&self) -> MessagingResult<QueueMessage> {
        loop {
            if let Some(fault) = self.pending_faults.lock().pop_front() {
                return Err(fault);
            }
            if let Some(message) = self.ready.lock().pop_front() {
                return Ok(message);
            }
            self.available.notified().await;
        }
    }

    fn redeliver_or_dead_letter(&self, mut message: QueueMessage) {
        message.lock_token = None;
        if message.delivery_count >= self.max_delivery_count {
            warn!(
                queue = %self.name,
                message_id = %message.message_id,
                delivery_count = message.delivery_count,
                "☠️ Message exceeded max delivery count, dead-lettering"
            );
            self.dead_letters.lock().push(message);
        } else {
            self.push_back(message);
        }
    }
}

/// Handle to an in-memory queue. Cloning shares the same queue.
#[derive(Debug, Clone)]
pub struct InMemoryQueue {
    shared: Arc<QueueShared>,
}

impl InMemoryQueue {
    /// Create an empty queue with the default max delivery count
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_max_delivery_count(name, DEFAULT_MAX_DELIVERY_COUNT)
    }

    /// Create an empty queue that dead-letters after `max_delivery_count` deliveries
    pub fn with_max_delivery_count(name: impl Into<String>, max_delivery_count: u32) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                name: name.into(),
                max_delivery_count: max_delivery_count.max(1),
                ready: Mutex::new(VecDeque::new()),
                dead_letters: Mutex::new(Vec::new()),
                pending_faults: Mutex::new(VecDeque::new()),
                connect_failures: Mutex::new(VecDeque::new()),
                available: Notify::new(),
                completed: AtomicU64::new(0),
                released: AtomicU64::new(0),
                sessions_opened: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Enqueue a message for delivery
    pub fn send(&self, mut message: QueueMessage) {
        message.lock_token = None;
        message.enqueued_at = chrono::Utc::now();
        debug!(queue = %self.shared.name, message_id = %message.message_id, "Message enqueued");
        self.shared.push_back(message);
    }

    /// Messages waiting for delivery
    pub fn ready_count(&self) -> usize {
        self.shared.ready.lock().len()
    }

    pub fn dead_letters(&self) -> Vec<QueueMessage> {
        self.shared.dead_letters.lock().clone()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            ready: self.ready_count(),
            dead_lettered: self.shared.dead_letters.lock().len(),
            completed: self.shared.completed.load(Ordering::Acquire),
            released: self.shared.released.load(Ordering::Acquire),
            sessions_opened: self.shared.sessions_opened.load(Ordering::Acquire),
        }
    }

    /// Make the next receive attempt of some session fail with `error`.
    /// The session reports it to its registered exception handler.
    pub fn inject_transport_fault(&self, error: MessagingError) {
        self.shared.pending_faults.lock().push_back(error);
        self.shared.available.notify_one();
    }

    /// Make the next `create_client` call fail with `error`
    pub fn fail_next_connect(&self, error: MessagingError) {
        self.shared.connect_failures.lock().push_back(error);
    }

    /// Open a new receive session
    pub fn connect(&self) -> InMemoryQueueClient {
        let opened = self.shared.sessions_opened.fetch_add(1, Ordering::AcqRel) + 1;
        let session = Session {
            id: Uuid::new_v4(),
            queue: Arc::clone(&self.shared),
            state: AtomicU8::new(SESSION_OPEN),
            handler_registered: AtomicBool::new(false),
            in_flight: DashMap::new(),
            shutdown: CancellationToken::new(),
        };
        debug!(
            queue = %self.shared.name,
            session_id = %session.id,
            sessions_opened = opened,
            "Opened in-memory queue session"
        );
        InMemoryQueueClient {
            session: Arc::new(session),
        }
    }
}

#[async_trait]
impl QueueClientFactory for InMemoryQueue {
    async fn create_client(&self) -> MessagingResult<Arc<dyn QueueClient>> {
        if let Some(error) = self.shared.connect_failures.lock().pop_front() {
            return Err(error);
        }
        Ok(Arc::new(self.connect()))
    }
}

/// A locked delivery. `in_handler` is true while a worker is still inside
/// `on_message` for it.
#[derive(Debug)]
struct InFlight {
    message: QueueMessage,
    in_handler: bool,
}

#[derive(Debug)]
struct Session {
    id: Uuid,
    queue: Arc<QueueShared>,
    state: AtomicU8,
    handler_registered: AtomicBool,
    in_flight: DashMap<LockToken, InFlight>,
    shutdown: CancellationToken,
}

impl Session {
    /// Give an unsettled, unheld delivery back to the queue
    fn abandon(&self, lock_token: &LockToken) -> bool {
        match self
            .in_flight
            .remove_if(lock_token, |_, entry| !entry.in_handler)
        {
            Some((_, entry)) => {
                let mut message = entry.message;
                message.lock_token = None;
                self.queue.push_front(message);
                true
            }
            None => false,
        }
    }
}

/// One receive session on an [`InMemoryQueue`]
#[derive(Debug, Clone)]
pub struct InMemoryQueueClient {
    session: Arc<Session>,
}

impl InMemoryQueueClient {
    pub fn session_id(&self) -> Uuid {
        self.session.id
    }

    /// Deliveries currently locked to this session
    pub fn in_flight_count(&self) -> usize {
        self.session.in_flight.len()
    }

    async fn run_worker(
        &self,
        worker_index: usize,
        handler: Arc<dyn MessageHandler>,
        auto_complete: bool,
    ) {
        let session = &self.session;
        loop {
            let next = tokio::select! {
                biased;
                _ = session.shutdown.cancelled() => break,
                next = session.queue.next_delivery() => next,
            };

            let mut message = match next {
                Ok(message) => message,
                Err(error) => {
                    handler
                        .on_exception(ExceptionReceived {
                            action: "Receive".to_string(),
                            queue_name: session.queue.name.clone(),
                            error,
                        })
                        .await;
                    continue;
                }
            };

            if session.shutdown.is_cancelled() {
                session.queue.push_front(message);
                break;
            }

            let lock_token = LockToken::new();
            message.delivery_count += 1;
            message.lock_token = Some(lock_token);
            session.in_flight.insert(
                lock_token,
                InFlight {
                    message: message.clone(),
                    in_handler: true,
                },
            );

            handler.on_message(self, message).await;

            if auto_complete && session.in_flight.contains_key(&lock_token) {
                if let Err(error) = self.acknowledge(lock_token).await {
                    warn!(queue = %session.queue.name, %error, "Auto-complete failed");
                }
            }

            if let Some(mut entry) = session.in_flight.get_mut(&lock_token) {
                entry.in_handler = false;
            }
            if self.is_closed_or_closing() && session.abandon(&lock_token) {
                debug!(
                    queue = %session.queue.name,
                    session_id = %session.id,
                    %lock_token,
                    "Unsettled delivery returned after session close"
                );
            }
        }

        // Hand any pending wake-up to a worker that is still running
        session.queue.available.notify_one();
        debug!(
            queue = %session.queue.name,
            session_id = %session.id,
            worker_index,
            "Receive worker stopped"
        );
    }

    fn ensure_open(&self) -> MessagingResult<()> {
        if self.is_closed_or_closing() {
            return Err(MessagingError::client_closed(&self.session.queue.name));
        }
        Ok(())
    }

    /// Remove a held lock. Locks still held survive a close, so a handler
    /// that outlives the session can settle its delivery.
    fn take_lock(&self, lock_token: LockToken) -> MessagingResult<QueueMessage> {
        match self.session.in_flight.remove(&lock_token) {
            Some((_, entry)) => Ok(entry.message),
            None if self.is_closed_or_closing() => {
                Err(MessagingError::client_closed(&self.session.queue.name))
            }
            None => Err(MessagingError::lock_lost(lock_token)),
        }
    }
}

#[async_trait]
impl QueueClient for InMemoryQueueClient {
    fn queue_name(&self) -> &str {
        &self.session.queue.name
    }

    async fn register_handler(
        &self,
        handler: Arc<dyn MessageHandler>,
        options: MessageHandlerOptions,
    ) -> MessagingResult<()> {
        self.ensure_open()?;
        if self.session.handler_registered.swap(true, Ordering::AcqRel) {
            return Err(MessagingError::handler_already_registered(
                &self.session.queue.name,
            ));
        }

        let workers = options.max_concurrent_calls.max(1);
        for worker_index in 0..workers {
            let client = self.clone();
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                client
                    .run_worker(worker_index, handler, options.auto_complete)
                    .await;
            });
        }

        info!(
            queue = %self.session.queue.name,
            session_id = %self.session.id,
            workers,
            auto_complete = options.auto_complete,
            "📥 Message handler registered"
        );
        Ok(())
    }

    async fn acknowledge(&self, lock_token: LockToken) -> MessagingResult<()> {
        self.take_lock(lock_token)?;
        self.session.queue.completed.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn release(&self, lock_token: LockToken) -> MessagingResult<()> {
        let message = self.take_lock(lock_token)?;
        self.session.queue.released.fetch_add(1, Ordering::AcqRel);
        self.session.queue.redeliver_or_dead_letter(message);
        Ok(())
    }

    async fn close(&self) -> MessagingResult<()> {
        if self
            .session
            .state
            .compare_exchange(
                SESSION_OPEN,
                SESSION_CLOSING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            debug!(session_id = %self.session.id, "Session already closed or closing");
            return Ok(());
        }

        self.session.shutdown.cancel();

        // Deliveries no handler holds go back to the queue; held ones stay
        // locked until their handler settles them
        let tokens: Vec<LockToken> = self
            .session
            .in_flight
            .iter()
            .map(|entry| *entry.key())
            .collect();
        let returned = tokens
            .iter()
            .filter(|token| self.session.abandon(token))
            .count();

        self.session.state.store(SESSION_CLOSED, Ordering::Release);
        info!(
            queue = %self.session.queue.name,
            session_id = %self.session.id,
            returned_messages = returned,
            still_held = self.session.in_flight.len(),
            "🔌 Queue session closed"
        );
        Ok(())
    }

    fn is_closed_or_closing(&self) -> bool {
        self.session.state.load(Ordering::Acquire) != SESSION_OPEN
    }
}
