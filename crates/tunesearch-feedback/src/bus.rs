//! In-process verdict event bus.
//!
//! [`VerdictBus`] decouples verdict producers (UI thumbs handlers, eval
//! harnesses) from the consumers that learn from them (bandit, answer
//! cache). Publishing is non-blocking; delivery happens later, off the
//! caller's thread.
//!
//! # Delivery model
//!
//! - Events are queued under a [`std::sync::Mutex`] and drained by one
//!   dedicated delivery thread, so subscribers see events in publication
//!   order and events from a single publisher are never reordered.
//! - Each subscriber is invoked once per event, in subscription order,
//!   behind [`std::panic::catch_unwind`]: a panicking handler is counted
//!   and logged, and delivery continues with the next subscriber.
//! - Each event is dispatched to a snapshot of the subscriber list, so
//!   handlers may register further subscribers mid-delivery; those start
//!   with the next event.
//! - Subscribers registered after an event was delivered never see that
//!   event. There is no replay.
//!
//! # Backpressure
//!
//! With `capacity: None` the queue is unbounded. With a bound, a full
//! queue rejects new events instead of blocking the publisher: `publish`
//! returns `false` and the drop is counted. Shutdown discards whatever is
//! still queued, counted separately, after the in-flight delivery
//! completes.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};
use tunesearch_core::{FeedbackError, FeedbackResult, VerdictEvent, VerdictHandler};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the [`VerdictBus`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Maximum queued, undelivered events. `None` (the default) means
    /// unbounded; with a bound the bus is lossy rather than blocking.
    pub capacity: Option<usize>,
}

impl BusConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FeedbackError::InvalidConfig`] when `capacity` is
    /// `Some(0)`, which could never deliver anything.
    pub fn validate(&self) -> FeedbackResult<()> {
        if self.capacity == Some(0) {
            return Err(FeedbackError::invalid_config(
                "capacity",
                0usize,
                "bounded queue must hold at least one event",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Lock-free counters for bus telemetry.
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// Events accepted into the queue.
    pub events_published: AtomicU64,
    /// Successful handler invocations (one per subscriber per event).
    pub events_delivered: AtomicU64,
    /// Events dispatched to the full subscriber list.
    pub events_processed: AtomicU64,
    /// Events rejected at publish time (queue full or bus shut down).
    pub events_dropped: AtomicU64,
    /// Handler invocations that panicked.
    pub handler_panics: AtomicU64,
    /// Queued events discarded by shutdown before delivery.
    pub lost_at_shutdown: AtomicU64,
}

impl BusMetrics {
    /// Point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> BusMetricsSnapshot {
        BusMetricsSnapshot {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            lost_at_shutdown: self.lost_at_shutdown.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`BusMetrics`] counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMetricsSnapshot {
    /// Events accepted into the queue.
    pub events_published: u64,
    /// Successful handler invocations.
    pub events_delivered: u64,
    /// Events dispatched to the full subscriber list.
    pub events_processed: u64,
    /// Events rejected at publish time.
    pub events_dropped: u64,
    /// Handler invocations that panicked.
    pub handler_panics: u64,
    /// Queued events discarded by shutdown.
    pub lost_at_shutdown: u64,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// A registered subscriber.
struct Subscriber {
    /// Diagnostic name carried into logs when the handler misbehaves.
    name: String,
    handler: Box<dyn VerdictHandler>,
}

/// Queue state behind the bus mutex.
struct BusState {
    /// Accepted, not yet dispatched events in publication order.
    queue: VecDeque<VerdictEvent>,
    /// One event has been popped and is being dispatched right now.
    in_flight: bool,
    /// Whether shutdown has been requested.
    shutdown: bool,
}

/// State shared between bus handles and the delivery thread.
struct BusShared {
    state: Mutex<BusState>,
    /// Wakes the delivery thread when events arrive or shutdown is set.
    available: Condvar,
    /// Wakes `wait_until_idle` callers when the queue drains.
    idle: Condvar,
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    metrics: Arc<BusMetrics>,
    capacity: Option<usize>,
}

impl BusShared {
    fn lock_state(&self) -> MutexGuard<'_, BusState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read_subscribers(&self) -> RwLockReadGuard<'_, Vec<Arc<Subscriber>>> {
        match self.subscribers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Dispatches one event to the subscribers registered at entry,
    /// isolating panics.
    fn dispatch(&self, event: &VerdictEvent) {
        // Handlers run without the subscriber lock held: a handler may
        // register further subscribers, which start with the next event.
        let subscribers: Vec<Arc<Subscriber>> = self.read_subscribers().clone();
        for subscriber in &subscribers {
            let outcome = catch_unwind(AssertUnwindSafe(|| subscriber.handler.on_verdict(event)));
            match outcome {
                Ok(()) => {
                    self.metrics.events_delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(payload) => {
                    self.metrics.handler_panics.fetch_add(1, Ordering::Relaxed);
                    let panic_detail = payload
                        .downcast_ref::<&str>()
                        .copied()
                        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                        .unwrap_or("opaque panic payload");
                    error!(
                        target: "tunesearch.bus",
                        subscriber = %subscriber.name,
                        query_id = %event.query_id,
                        panic = %panic_detail,
                        "verdict handler panicked; subscriber kept, delivery continues"
                    );
                }
            }
        }
        self.metrics.events_processed.fetch_add(1, Ordering::Relaxed);
        trace!(
            target: "tunesearch.bus",
            query_id = %event.query_id,
            verdict = %event.verdict,
            subscribers = subscribers.len(),
            "verdict dispatched"
        );
    }

    /// Delivery loop run by the dedicated bus thread.
    fn delivery_loop(&self) {
        loop {
            let event = {
                let mut state = self.lock_state();
                loop {
                    if state.shutdown {
                        let lost = state.queue.len() as u64;
                        if lost > 0 {
                            self.metrics
                                .lost_at_shutdown
                                .fetch_add(lost, Ordering::Relaxed);
                            state.queue.clear();
                            debug!(
                                target: "tunesearch.bus",
                                lost,
                                "discarded queued verdicts at shutdown"
                            );
                        }
                        self.idle.notify_all();
                        return;
                    }
                    if let Some(event) = state.queue.pop_front() {
                        state.in_flight = true;
                        break event;
                    }
                    state = match self.available.wait(state) {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                }
            };

            self.dispatch(&event);

            let mut state = self.lock_state();
            state.in_flight = false;
            if state.queue.is_empty() {
                self.idle.notify_all();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// VerdictBus
// ---------------------------------------------------------------------------

/// Asynchronous fan-out of verdict events to registered subscribers.
///
/// See the [module-level documentation](self) for the delivery and
/// backpressure model.
///
/// # Usage
///
/// ```ignore
/// let bus = VerdictBus::new(BusConfig::default())?;
/// bus.subscribe("bandit", move |event: &VerdictEvent| {
///     bandit.update(&event.query_id, event.verdict);
/// });
///
/// // From the UI thread, later:
/// bus.publish(VerdictEvent::new("q-42", Verdict::Up));
/// ```
pub struct VerdictBus {
    config: BusConfig,
    shared: Arc<BusShared>,
    delivery: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for VerdictBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerdictBus")
            .field("config", &self.config)
            .field("pending", &self.pending_count())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl VerdictBus {
    /// Creates a bus and starts its delivery thread.
    ///
    /// # Errors
    ///
    /// Returns [`FeedbackError::InvalidConfig`] if `config` is invalid, or
    /// [`FeedbackError::Io`] if the delivery thread cannot be spawned.
    pub fn new(config: BusConfig) -> FeedbackResult<Self> {
        config.validate()?;

        let shared = Arc::new(BusShared {
            state: Mutex::new(BusState {
                queue: VecDeque::new(),
                in_flight: false,
                shutdown: false,
            }),
            available: Condvar::new(),
            idle: Condvar::new(),
            subscribers: RwLock::new(Vec::new()),
            metrics: Arc::new(BusMetrics::default()),
            capacity: config.capacity,
        });

        let worker = Arc::clone(&shared);
        let delivery = thread::Builder::new()
            .name("tunesearch-bus".to_owned())
            .spawn(move || worker.delivery_loop())?;

        Ok(Self {
            config,
            shared,
            delivery: Some(delivery),
        })
    }

    // ── Subscription ─────────────────────────────────────────────────

    /// Registers a handler under a diagnostic name.
    ///
    /// The handler sees every event dispatched after registration; events
    /// already delivered are never replayed. Safe to call from inside a
    /// running handler; the new subscriber starts with the next event.
    /// Subscriptions cannot be removed.
    pub fn subscribe(&self, name: impl Into<String>, handler: impl VerdictHandler + 'static) {
        let name = name.into();
        let mut subscribers = match self.shared.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug!(
            target: "tunesearch.bus",
            subscriber = %name,
            total = subscribers.len() + 1,
            "subscriber registered"
        );
        subscribers.push(Arc::new(Subscriber {
            name,
            handler: Box::new(handler),
        }));
    }

    // ── Publish ──────────────────────────────────────────────────────

    /// Queues an event for delivery, never blocking the caller.
    ///
    /// Returns `false` when the event was rejected: the queue was at its
    /// configured capacity, or the bus was already shut down. Rejected
    /// events are counted in [`BusMetrics::events_dropped`].
    pub fn publish(&self, event: VerdictEvent) -> bool {
        let mut state = self.shared.lock_state();

        if state.shutdown {
            drop(state);
            self.shared.metrics.events_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                target: "tunesearch.bus",
                query_id = %event.query_id,
                "verdict published after shutdown; dropped"
            );
            return false;
        }

        if let Some(capacity) = self.shared.capacity
            && state.queue.len() >= capacity
        {
            drop(state);
            self.shared.metrics.events_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                target: "tunesearch.bus",
                query_id = %event.query_id,
                capacity,
                "verdict queue full; event dropped"
            );
            return false;
        }

        trace!(
            target: "tunesearch.bus",
            query_id = %event.query_id,
            verdict = %event.verdict,
            pending = state.queue.len() + 1,
            "verdict queued"
        );
        state.queue.push_back(event);
        drop(state);

        self.shared.metrics.events_published.fetch_add(1, Ordering::Relaxed);
        self.shared.available.notify_one();
        true
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Stops delivery. Queued, undelivered events are discarded and
    /// counted in [`BusMetrics::lost_at_shutdown`]; an in-flight delivery
    /// completes first. Idempotent.
    pub fn shutdown(&self) {
        let mut state = self.shared.lock_state();
        if !state.shutdown {
            state.shutdown = true;
            debug!(
                target: "tunesearch.bus",
                pending = state.queue.len(),
                "bus shutdown requested"
            );
        }
        drop(state);
        self.shared.available.notify_all();
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Blocks until every accepted event has been dispatched, or until
    /// `timeout` elapses. Returns `true` when the bus went idle.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock_state();
        loop {
            if state.queue.is_empty() && !state.in_flight {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = match self.shared.idle.wait_timeout(state, deadline - now) {
                Ok(pair) => pair,
                Err(poisoned) => poisoned.into_inner(),
            };
            state = guard;
        }
    }

    /// Number of accepted events not yet dispatched.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.lock_state().queue.len()
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.read_subscribers().len()
    }

    /// Shared reference to the metrics counters.
    ///
    /// Clone the `Arc` to keep reading after the bus is dropped.
    #[must_use]
    pub fn metrics(&self) -> &Arc<BusMetrics> {
        &self.shared.metrics
    }

    /// Configuration reference.
    #[must_use]
    pub const fn config(&self) -> &BusConfig {
        &self.config
    }
}

impl Drop for VerdictBus {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.delivery.take()
            && handle.join().is_err()
        {
            error!(target: "tunesearch.bus", "bus delivery thread panicked before join");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
