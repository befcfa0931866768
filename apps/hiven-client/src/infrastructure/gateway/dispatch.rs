//! Event Dispatch Queue
//!
//! Buffers decoded envelopes between the listening loop and the registered
//! handlers. The listening loop only waits for buffer capacity, never for
//! handlers.
//!
//! # Modes
//!
//! - **Sequential**: envelopes are handled one after another in arrival
//!   order.
//! - **Concurrent**: every envelope is handled on its own task. Handlers of
//!   the same envelope still run one after another in registration order.
//!
//! # Shutdown
//!
//! [`DispatchQueue::stop`] closes intake immediately. A graceful stop then
//! drains buffered envelopes and waits for running handlers; a forced stop
//! cancels them.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::domain::envelope::Envelope;
use crate::infrastructure::metrics;

tokio::task_local! {
    static IN_HANDLER: ();
}

/// Whether the current task is running an event handler.
#[must_use]
pub fn in_handler() -> bool {
    IN_HANDLER.try_with(|()| ()).is_ok()
}

// =============================================================================
// Handlers
// =============================================================================

/// A registered event handler.
pub type Handler =
    Arc<dyn Fn(Arc<Envelope>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Handlers keyed by dispatch key.
///
/// Keys are case-insensitive: `message_create` and `MESSAGE_CREATE` name
/// the same event.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        let mut counts: Vec<(&String, usize)> =
            handlers.iter().map(|(k, v)| (k, v.len())).collect();
        counts.sort();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &counts)
            .finish()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`. Handlers for the same event run in
    /// registration order.
    pub fn register<F, Fut>(&self, event: &str, handler: F)
    where
        F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: Handler = Arc::new(move |envelope| handler(envelope).boxed());
        self.handlers
            .write()
            .entry(normalize(event))
            .or_default()
            .push(boxed);
    }

    /// Handlers registered for `key`, in registration order.
    #[must_use]
    pub fn handlers_for(&self, key: &str) -> Vec<Handler> {
        self.handlers
            .read()
            .get(&normalize(key))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of handlers registered for `key`.
    #[must_use]
    pub fn count(&self, key: &str) -> usize {
        self.handlers
            .read()
            .get(&normalize(key))
            .map_or(0, Vec::len)
    }
}

fn normalize(key: &str) -> String {
    key.to_ascii_uppercase()
}

// =============================================================================
// Queue
// =============================================================================

/// How envelopes are handed to handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// One envelope at a time, in arrival order.
    #[default]
    Sequential,
    /// One task per envelope.
    Concurrent,
}

impl DispatchMode {
    /// Map the `queue_events` switch to a mode.
    #[must_use]
    pub const fn from_queue_events(queue_events: bool) -> Self {
        if queue_events {
            Self::Sequential
        } else {
            Self::Concurrent
        }
    }
}

/// Dispatch queue errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The queue no longer accepts envelopes.
    #[error("dispatch queue is closed")]
    Closed,

    /// `run` was called more than once.
    #[error("dispatch queue is already running")]
    AlreadyRunning,
}

/// Bounded envelope queue feeding the handler registry.
pub struct DispatchQueue {
    mode: DispatchMode,
    registry: Arc<HandlerRegistry>,
    tx: mpsc::Sender<Envelope>,
    rx: Mutex<Option<mpsc::Receiver<Envelope>>>,
    accepting: AtomicBool,
    in_flight: Arc<AtomicUsize>,
    drain: CancellationToken,
    force: CancellationToken,
    done: watch::Sender<bool>,
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("mode", &self.mode)
            .field("pending", &self.pending())
            .field("in_flight", &self.in_flight())
            .field("accepting", &self.is_accepting())
            .finish_non_exhaustive()
    }
}

impl DispatchQueue {
    /// Create a queue buffering up to `capacity` envelopes.
    #[must_use]
    pub fn new(mode: DispatchMode, capacity: usize, registry: Arc<HandlerRegistry>) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (done, _) = watch::channel(false);
        Self {
            mode,
            registry,
            tx,
            rx: Mutex::new(Some(rx)),
            accepting: AtomicBool::new(true),
            in_flight: Arc::new(AtomicUsize::new(0)),
            drain: CancellationToken::new(),
            force: CancellationToken::new(),
            done,
        }
    }

    /// Dispatch mode.
    #[must_use]
    pub const fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Whether `enqueue` still accepts envelopes.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Envelopes buffered but not yet picked up.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Envelopes whose handlers are currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Whether the run loop has finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Buffer an envelope, waiting only for buffer capacity.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Closed`] once [`stop`](Self::stop) was
    /// called.
    pub async fn enqueue(&self, envelope: Envelope) -> Result<(), DispatchError> {
        if !self.is_accepting() {
            return Err(DispatchError::Closed);
        }
        self.tx
            .send(envelope)
            .await
            .map_err(|_| DispatchError::Closed)
    }

    /// Consume the queue until it is stopped.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyRunning`] if called more than once.
    pub async fn run(&self) -> Result<(), DispatchError> {
        let Some(mut rx) = self.rx.lock().take() else {
            return Err(DispatchError::AlreadyRunning);
        };

        tracing::debug!(mode = ?self.mode, "Dispatch queue started");
        let mut tasks = JoinSet::new();
        let mut draining = false;
        let mut forced = false;

        loop {
            tokio::select! {
                biased;
                () = self.force.cancelled() => {
                    forced = true;
                    break;
                }
                () = self.drain.cancelled(), if !draining => {
                    draining = true;
                    rx.close();
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Dispatch task failed");
                    }
                }
                received = rx.recv() => {
                    let Some(envelope) = received else { break };
                    match self.mode {
                        DispatchMode::Sequential => {
                            tokio::select! {
                                biased;
                                () = self.force.cancelled() => {
                                    forced = true;
                                    break;
                                }
                                () = self.handle(envelope) => {}
                            }
                        }
                        DispatchMode::Concurrent => {
                            tasks.spawn(self.handle(envelope));
                        }
                    }
                }
            }
        }

        if !forced {
            // Graceful: wait for outstanding handler tasks unless forced meanwhile.
            loop {
                tokio::select! {
                    biased;
                    () = self.force.cancelled() => break,
                    joined = tasks.join_next() => match joined {
                        Some(Err(e)) => tracing::error!(error = %e, "Dispatch task failed"),
                        Some(Ok(())) => {}
                        None => break,
                    },
                }
            }
        }

        let cancelled = tasks.len();
        tasks.shutdown().await;
        let dropped = rx.len();
        rx.close();
        self.in_flight.store(0, Ordering::SeqCst);
        metrics::set_handlers_in_flight(0);

        tracing::debug!(
            forced = self.force.is_cancelled(),
            cancelled,
            dropped,
            "Dispatch queue stopped"
        );
        self.done.send_replace(true);
        Ok(())
    }

    /// Stop the queue.
    ///
    /// Intake stops immediately. With `force`, running handlers are
    /// cancelled; otherwise buffered envelopes are drained and running
    /// handlers complete. Waits for the run loop to finish unless called
    /// from inside a handler.
    pub async fn stop(&self, force: bool) {
        self.accepting.store(false, Ordering::SeqCst);
        self.drain.cancel();
        if force {
            self.force.cancel();
        }

        // Never started: nothing to drain.
        if let Some(mut rx) = self.rx.lock().take() {
            rx.close();
            self.done.send_replace(true);
        }

        if in_handler() {
            return;
        }

        let mut done = self.done.subscribe();
        let _ = done.wait_for(|done| *done).await;
    }

    /// Handle one envelope: resolve its handlers and run them in order.
    fn handle(&self, envelope: Envelope) -> impl Future<Output = ()> + Send + 'static {
        let key = envelope.dispatch_key().to_string();
        let handlers = self.registry.handlers_for(&key);
        let in_flight = Arc::clone(&self.in_flight);
        let envelope = Arc::new(envelope);

        let count = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_handlers_in_flight(count);
        let guard = InFlightGuard(in_flight);

        IN_HANDLER.scope((), async move {
            let _guard = guard;
            for handler in handlers {
                let call = AssertUnwindSafe(async { handler(Arc::clone(&envelope)).await });
                match call.catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        metrics::record_handler_failure(&key);
                        tracing::error!(event = %key, error = %e, "Event handler failed");
                    }
                    Err(panic) => {
                        metrics::record_handler_failure(&key);
                        tracing::error!(
                            event = %key,
                            panic = panic_message(panic.as_ref()),
                            "Event handler panicked"
                        );
                    }
                }
            }
        })
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let previous = self.0.fetch_sub(1, Ordering::SeqCst);
        metrics::set_handlers_in_flight(previous.saturating_sub(1));
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
