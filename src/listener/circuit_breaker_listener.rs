//! # Circuit-Breaker Listener
//!
//! Owns the queue connection lifecycle and the breaker protecting it. Every
//! delivered message is run through the trigger executor and then settled:
//! acknowledged on success, released on failure. Handler failures feed the
//! fault tracker; once the tracker trips, the connection is closed and a
//! single reopen is scheduled after an escalating, capped delay.
//!
//! ## State machine
//!
//! ```text
//! Stopped ──start()──▶ Starting ──▶ Receiving ──trip──▶ Tripped
//!    ▲                                 │  ▲               │
//!    │                                 │  └───reopen──────┘
//!    └──────── Stopping ◀──stop()──────┘
//! ```
//!
//! ## Concurrency
//!
//! Message callbacks run concurrently on the broker's workers. All breaker
//! bookkeeping and the connection handle sit behind one mutex, and the trip
//! decision takes the connection out of that mutex, so only one callback can
//! ever close a given connection or schedule its reopen. The mutex is never
//! held across an `.await`.

use super::transitions::{BreakerSnapshot, BreakerTransition, ListenerState, TransitionKind};
use crate::config::ListenerConfig;
use crate::error::{ListenerError, ListenerResult};
use crate::execution::TriggerExecutor;
use crate::logging::log_listener_operation;
use crate::messaging::{
    ExceptionReceived, MessageHandler, MessagingError, QueueClient, QueueClientFactory,
    QueueMessage,
};
use crate::resilience::{reopen_delay, FaultTracker, TripDecision};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const TRANSITION_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartReason {
    Requested,
    Reopen,
}

struct ReopenTimer {
    cancel: CancellationToken,
}

/// Everything guarded by the listener's single mutex
struct Control {
    state: ListenerState,
    disposed: bool,
    connection: Option<Arc<dyn QueueClient>>,
    tracker: FaultTracker,
    session_cancel: CancellationToken,
    reopen: Option<ReopenTimer>,
}

impl Control {
    fn connection_open(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| !connection.is_closed_or_closing())
    }

    fn cancel_reopen(&mut self) {
        if let Some(timer) = self.reopen.take() {
            timer.cancel.cancel();
        }
    }
}

struct ListenerInner {
    config: ListenerConfig,
    factory: Arc<dyn QueueClientFactory>,
    executor: Arc<dyn TriggerExecutor>,
    control: Mutex<Control>,
    /// Canceled on dispose or drop; parent of every reopen timer
    shutdown: CancellationToken,
    transitions: broadcast::Sender<BreakerTransition>,
    messages_received: AtomicU64,
    transport_errors: AtomicU64,
}

impl ListenerInner {
    fn queue_name(&self) -> &str {
        &self.config.queue_name
    }

    fn emit(&self, control: &Control, kind: TransitionKind) {
        // Nobody listening is fine
        let _ = self.transitions.send(BreakerTransition {
            kind,
            at: Utc::now(),
            fault_count: control.tracker.fault_count(),
            open_count: control.tracker.open_count(),
        });
    }

    fn record_transport_error(&self, action: &str, error: &MessagingError) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
        warn!(
            queue = %self.queue_name(),
            action = %action,
            %error,
            "Transport error absorbed"
        );
    }

    async fn close_quietly(&self, connection: &dyn QueueClient, reason: &str) {
        if connection.is_closed_or_closing() {
            debug!(queue = %self.queue_name(), reason, "Connection already closed");
            return;
        }
        if let Err(error) = connection.close().await {
            self.record_transport_error("close", &error);
        }
    }

    /// Open a session and register the message callback on it
    async fn open_session(self: &Arc<Self>) -> ListenerResult<Arc<dyn QueueClient>> {
        let connection = self.factory.create_client().await?;
        let handler: Arc<dyn MessageHandler> = Arc::new(SessionHandler {
            listener: Arc::downgrade(self),
        });

        if let Err(error) = connection
            .register_handler(handler, self.config.handler_options())
            .await
        {
            self.close_quietly(connection.as_ref(), "handler registration failed")
                .await;
            return Err(error.into());
        }

        Ok(connection)
    }

    async fn start_session(
        self: &Arc<Self>,
        cancellation: &CancellationToken,
        reason: StartReason,
    ) -> ListenerResult<()> {
        let resume_state = {
            let mut control = self.control.lock();
            if control.disposed {
                return Err(ListenerError::AlreadyDisposed);
            }
            if cancellation.is_cancelled() {
                return Err(ListenerError::OperationCanceled);
            }

            let expected = match reason {
                StartReason::Requested => ListenerState::Stopped,
                StartReason::Reopen => ListenerState::Tripped,
            };
            if control.state != expected {
                return Err(ListenerError::invalid_state(format!(
                    "cannot start a listener that is {}",
                    control.state
                )));
            }

            control.state = ListenerState::Starting;
            if control.session_cancel.is_cancelled() {
                control.session_cancel = CancellationToken::new();
            }
            expected
        };

        let connection = match self.open_session().await {
            Ok(connection) => connection,
            Err(error) => {
                let mut control = self.control.lock();
                if control.state == ListenerState::Starting {
                    control.state = resume_state;
                } else {
                    let stop_requested = control.state == ListenerState::Stopping;
                    control.state = ListenerState::Stopped;
                    if stop_requested && !control.disposed {
                        self.emit(&control, TransitionKind::Stopped);
                    }
                }
                error!(queue = %self.queue_name(), %error, "Failed to open queue connection");
                return Err(error);
            }
        };

        let aborted = {
            let mut control = self.control.lock();
            if control.disposed || control.state != ListenerState::Starting {
                control.state = ListenerState::Stopped;
                if !control.disposed {
                    self.emit(&control, TransitionKind::Stopped);
                }
                true
            } else {
                control.connection = Some(Arc::clone(&connection));
                control.state = ListenerState::Receiving;
                let kind = match reason {
                    StartReason::Requested => TransitionKind::Started,
                    StartReason::Reopen => TransitionKind::Reopened,
                };
                self.emit(&control, kind);
                false
            }
        };

        if aborted {
            debug!(queue = %self.queue_name(), "Start superseded by stop or dispose");
            self.close_quietly(connection.as_ref(), "start aborted").await;
            return Err(ListenerError::OperationCanceled);
        }

        let operation = match reason {
            StartReason::Requested => "start",
            StartReason::Reopen => "reopen",
        };
        info!(queue = %self.queue_name(), operation, "🟢 Queue listener receiving");
        log_listener_operation(operation, self.queue_name(), "receiving", None);
        Ok(())
    }

    async fn stop(&self, cancellation: &CancellationToken) -> ListenerResult<()> {
        let connection = {
            let mut control = self.control.lock();
            if control.disposed {
                return Err(ListenerError::AlreadyDisposed);
            }
            if matches!(
                control.state,
                ListenerState::Stopped | ListenerState::Stopping
            ) {
                return Err(ListenerError::invalid_state(
                    "The listener has not yet been started or has already been stopped",
                ));
            }
            if cancellation.is_cancelled() {
                return Err(ListenerError::OperationCanceled);
            }

            control.session_cancel.cancel();
            control.cancel_reopen();

            match control.state {
                ListenerState::Tripped => {
                    control.state = ListenerState::Stopped;
                    self.emit(&control, TransitionKind::Stopped);
                    None
                }
                ListenerState::Starting => {
                    // The in-progress start closes its own connection
                    control.state = ListenerState::Stopping;
                    return Ok(());
                }
                _ => {
                    control.state = ListenerState::Stopping;
                    control.connection.take()
                }
            }
        };

        if let Some(connection) = connection {
            self.close_quietly(connection.as_ref(), "stop requested")
                .await;
            let mut control = self.control.lock();
            if !control.disposed {
                control.state = ListenerState::Stopped;
                self.emit(&control, TransitionKind::Stopped);
            }
        }

        info!(queue = %self.queue_name(), "🛑 Queue listener stopped");
        log_listener_operation("stop", self.queue_name(), "stopped", None);
        Ok(())
    }

    async fn dispose(&self) {
        let connection = {
            let mut control = self.control.lock();
            if control.disposed {
                return;
            }
            control.disposed = true;
            control.session_cancel.cancel();
            self.shutdown.cancel();
            control.cancel_reopen();
            control.state = ListenerState::Stopped;
            control.connection.take()
        };

        if let Some(connection) = connection {
            self.close_quietly(connection.as_ref(), "disposed").await;
        }

        {
            let control = self.control.lock();
            self.emit(&control, TransitionKind::Disposed);
        }
        log_listener_operation("dispose", self.queue_name(), "disposed", None);
    }

    /// Per-message callback
    async fn process_message(self: &Arc<Self>, session: &dyn QueueClient, message: QueueMessage) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);

        let cancellation = {
            let mut control = self.control.lock();
            if control.tracker.try_expire_streak(Instant::now()) {
                debug!(queue = %self.queue_name(), "Fault streak expired, counters reset");
                self.emit(&control, TransitionKind::StreakExpired);
            }
            control.session_cancel.clone()
        };

        let result = self.executor.execute(&message, &cancellation).await;
        let lock_token = message.settlement_token();

        if result.succeeded {
            if let Err(error) = session.acknowledge(lock_token).await {
                self.record_transport_error("acknowledge", &error);
            }
            self.control.lock().tracker.record_success();
            return;
        }

        if let Err(error) = session.release(lock_token).await {
            self.record_transport_error("release", &error);
        }
        self.record_failure(&message, result.error.as_deref())
            .await;
    }

    async fn record_failure(self: &Arc<Self>, message: &QueueMessage, failure: Option<&str>) {
        let tripped_connection = {
            let mut control = self.control.lock();
            let connection_open = control.connection_open();
            let decision = control
                .tracker
                .record_failure(Instant::now(), connection_open);

            if decision.fault_count() == 1 {
                self.emit(&control, TransitionKind::StreakStarted);
            }

            match decision {
                TripDecision::Hold { fault_count } => {
                    debug!(
                        queue = %self.queue_name(),
                        message_id = %message.message_id,
                        fault_count,
                        failure,
                        "Handler fault recorded"
                    );
                    None
                }
                TripDecision::Trip {
                    fault_count,
                    open_count,
                    reopen_delay: delay,
                } => {
                    let connection = control.connection.take();
                    control.state = ListenerState::Tripped;
                    self.schedule_reopen(&mut control, delay);
                    self.emit(&control, TransitionKind::Tripped { reopen_in: delay });
                    error!(
                        queue = %self.queue_name(),
                        fault_count,
                        open_count,
                        reopen_delay_ms = delay.as_millis() as u64,
                        "🔴 Circuit breaker tripped, closing queue connection"
                    );
                    connection
                }
            }
        };

        if let Some(connection) = tripped_connection {
            self.close_quietly(connection.as_ref(), "breaker tripped")
                .await;
            log_listener_operation("trip", self.queue_name(), "tripped", failure);
        }
    }

    /// Arm the fire-once reopen timer. Must be called with the control lock held.
    fn schedule_reopen(self: &Arc<Self>, control: &mut Control, delay: Duration) {
        let cancel = self.shutdown.child_token();
        let timer_cancel = cancel.clone();
        let listener = Arc::clone(self);

        tokio::spawn(async move {
            tokio::select! {
                _ = timer_cancel.cancelled() => {
                    debug!(queue = %listener.queue_name(), "Reopen timer canceled");
                }
                _ = tokio::time::sleep(delay) => {
                    listener.reopen().await;
                }
            }
        });

        if let Some(previous) = control.reopen.replace(ReopenTimer { cancel }) {
            previous.cancel.cancel();
        }
    }

    async fn reopen(self: Arc<Self>) {
        {
            let mut control = self.control.lock();
            if control.disposed || control.state != ListenerState::Tripped {
                debug!(queue = %self.queue_name(), state = %control.state, "Reopen skipped");
                return;
            }
            control.tracker.reset_for_reopen();
            self.emit(&control, TransitionKind::ReopenAttempted);
        }

        info!(queue = %self.queue_name(), "🟡 Reopening queue connection");

        if let Err(error) = self
            .start_session(&CancellationToken::new(), StartReason::Reopen)
            .await
        {
            let mut control = self.control.lock();
            if control.disposed || control.state != ListenerState::Tripped {
                debug!(queue = %self.queue_name(), %error, "Reopen abandoned");
                return;
            }

            let retry_in = control.tracker.escalate_failed_reopen();
            self.emit(
                &control,
                TransitionKind::ReopenFailed {
                    error: error.to_string(),
                    retry_in,
                },
            );
            warn!(
                queue = %self.queue_name(),
                %error,
                retry_in_ms = retry_in.as_millis() as u64,
                "Reopen failed, rescheduling"
            );
            self.schedule_reopen(&mut control, retry_in);
        }
    }
}

/// The callback registered on each session. Holds the listener weakly so a
/// session never keeps a dropped listener alive.
struct SessionHandler {
    listener: Weak<ListenerInner>,
}

#[async_trait]
impl MessageHandler for SessionHandler {
    async fn on_message(&self, session: &dyn QueueClient, message: QueueMessage) {
        match self.listener.upgrade() {
            Some(listener) => listener.process_message(session, message).await,
            None => {
                // Listener is gone; stop this session so the broker keeps the
                // message for the next consumer instead of redelivering it here
                debug!(
                    queue = %session.queue_name(),
                    message_id = %message.message_id,
                    "Delivery reached a dropped listener, closing orphaned session"
                );
                if let Err(error) = session.close().await {
                    warn!(
                        queue = %session.queue_name(),
                        %error,
                        "Failed to close orphaned queue session"
                    );
                }
            }
        }
    }

    async fn on_exception(&self, exception: ExceptionReceived) {
        if let Some(listener) = self.listener.upgrade() {
            listener.transport_errors.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            queue = %exception.queue_name,
            action = %exception.action,
            error = %exception.error,
            "Transport exception absorbed"
        );
    }
}

/// Resilient queue consumer guarded by a windowed circuit breaker
///
/// ```rust,no_run
/// use queue_breaker::config::ListenerConfig;
/// use queue_breaker::execution::HandlerExecutor;
/// use queue_breaker::listener::CircuitBreakerListener;
/// use queue_breaker::messaging::{InMemoryQueue, QueueMessage};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = InMemoryQueue::new("orders");
/// let executor = HandlerExecutor::new("process_order", |message: QueueMessage, _cancel| async move {
///     println!("processing {:?}", message.body_as_str());
///     Ok::<(), String>(())
/// });
///
/// let listener = CircuitBreakerListener::new(
///     ListenerConfig::new("orders"),
///     Arc::new(queue.clone()),
///     Arc::new(executor),
/// )?;
/// listener.start(&CancellationToken::new()).await?;
/// queue.send(QueueMessage::new("order #1"));
/// // ...
/// listener.dispose().await;
/// # Ok(())
/// # }
/// ```
pub struct CircuitBreakerListener {
    inner: Arc<ListenerInner>,
}

impl CircuitBreakerListener {
    /// Create a stopped listener. Fails if `config` does not validate.
    pub fn new(
        config: ListenerConfig,
        factory: Arc<dyn QueueClientFactory>,
        executor: Arc<dyn TriggerExecutor>,
    ) -> ListenerResult<Self> {
        config.validate()?;

        let tracker = FaultTracker::new(config.breaker_settings());
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);

        info!(
            queue = %config.queue_name,
            fault_window_ms = config.fault_window_ms,
            fault_threshold = config.fault_threshold,
            min_open_duration_ms = config.min_open_duration_ms,
            max_open_duration_ms = config.max_open_duration_ms,
            "🛡️ Circuit breaker listener initialized"
        );

        Ok(Self {
            inner: Arc::new(ListenerInner {
                config,
                factory,
                executor,
                control: Mutex::new(Control {
                    state: ListenerState::Stopped,
                    disposed: false,
                    connection: None,
                    tracker,
                    session_cancel: CancellationToken::new(),
                    reopen: None,
                }),
                shutdown: CancellationToken::new(),
                transitions,
                messages_received: AtomicU64::new(0),
                transport_errors: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.inner.config
    }

    /// Open a connection and begin receiving. Returns once the message
    /// callback is registered; delivery proceeds in the background.
    pub async fn start(&self, cancellation: &CancellationToken) -> ListenerResult<()> {
        self.inner
            .start_session(cancellation, StartReason::Requested)
            .await
    }

    /// Cancel in-flight waits and close the connection. Stopping a tripped
    /// listener cancels its pending reopen.
    pub async fn stop(&self, cancellation: &CancellationToken) -> ListenerResult<()> {
        self.inner.stop(cancellation).await
    }

    /// Signal cancellation to in-flight handlers without closing the connection
    pub fn cancel(&self) -> ListenerResult<()> {
        let control = self.inner.control.lock();
        if control.disposed {
            return Err(ListenerError::AlreadyDisposed);
        }
        control.session_cancel.cancel();
        Ok(())
    }

    /// Cancel, close the connection if open, and make the listener unusable.
    /// Safe to call more than once.
    pub async fn dispose(&self) {
        self.inner.dispose().await;
    }

    pub fn state(&self) -> ListenerState {
        self.inner.control.lock().state
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.control.lock().disposed
    }

    /// Receive breaker and lifecycle transitions from now on
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerTransition> {
        self.inner.transitions.subscribe()
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let control = self.inner.control.lock();
        let tracker = &control.tracker;
        let settings = tracker.settings();

        BreakerSnapshot {
            queue_name: self.inner.config.queue_name.clone(),
            state: control.state,
            disposed: control.disposed,
            fault_count: tracker.fault_count(),
            open_count: tracker.open_count(),
            streak_age: tracker.streak_age(Instant::now()),
            last_fault_at: tracker.last_fault_wall(),
            next_reopen_delay: reopen_delay(
                settings.min_open_duration,
                settings.max_open_duration,
                tracker.open_count().saturating_add(1),
            ),
            messages_received: self.inner.messages_received.load(Ordering::Relaxed),
            messages_succeeded: tracker.successes(),
            messages_failed: tracker.failures(),
            transport_errors: self.inner.transport_errors.load(Ordering::Relaxed),
            trips: tracker.trips(),
        }
    }
}

impl fmt::Debug for CircuitBreakerListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerListener")
            .field("queue_name", &self.inner.config.queue_name)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for CircuitBreakerListener {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        let connection = {
            let mut control = self.inner.control.lock();
            // A reopen already connecting sees this and closes what it opened
            control.disposed = true;
            control.session_cancel.cancel();
            control.cancel_reopen();
            control.connection.take()
        };

        if let Some(connection) = connection {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    if let Err(error) = connection.close().await {
                        warn!(
                            queue = %connection.queue_name(),
                            %error,
                            "Failed to close queue connection on drop"
                        );
                    }
                });
            }
        }
    }
}
