//! Heartbeat Monitor
//!
//! Sends a `HEARTBEAT` envelope on the interval announced in the swarm
//! handshake. The attempt fails when a send errors or stalls for longer
//! than one interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::session::{FrameSink, StreamSessionError};
use crate::domain::envelope::Envelope;
use crate::infrastructure::metrics;

/// Keep-alive failures.
#[derive(Debug, thiserror::Error)]
pub enum KeepAliveError {
    /// A heartbeat send did not complete within one interval.
    #[error("heartbeat send stalled for more than {0:?}")]
    Stalled(Duration),

    /// A heartbeat could not be sent.
    #[error("failed to send heartbeat: {0}")]
    SendFailed(#[source] StreamSessionError),
}

/// Snapshot of the monitor's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatRecord {
    /// Period between heartbeats.
    pub interval: Duration,
    /// When the last heartbeat was sent.
    pub last_sent: Option<Instant>,
    /// Whether the monitor loop is running.
    pub active: bool,
    /// Heartbeats sent so far.
    pub beats_sent: u64,
}

/// Periodic heartbeat sender for one session.
pub struct HeartbeatMonitor {
    sink: Arc<dyn FrameSink>,
    record: RwLock<HeartbeatRecord>,
    active: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for HeartbeatMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatMonitor")
            .field("record", &*self.record.read())
            .finish_non_exhaustive()
    }
}

impl HeartbeatMonitor {
    /// Create a monitor sending through `sink` every `interval`.
    #[must_use]
    pub fn new(sink: Arc<dyn FrameSink>, interval: Duration) -> Self {
        let (active, _) = watch::channel(false);
        Self {
            sink,
            record: RwLock::new(HeartbeatRecord {
                interval,
                last_sent: None,
                active: false,
                beats_sent: 0,
            }),
            active,
            cancel: CancellationToken::new(),
        }
    }

    /// Current record.
    #[must_use]
    pub fn record(&self) -> HeartbeatRecord {
        *self.record.read()
    }

    /// Whether the loop is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    /// Send heartbeats until [`stop`](Self::stop) is called.
    ///
    /// The first heartbeat goes out immediately.
    ///
    /// # Errors
    ///
    /// Returns [`KeepAliveError`] when a send fails or stalls.
    pub async fn run(&self) -> Result<(), KeepAliveError> {
        let period = self.record.read().interval;
        let _active = ActiveGuard::engage(self);

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let heartbeat = Envelope::heartbeat();

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat monitor stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let sent = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(()),
                sent = tokio::time::timeout(period, self.sink.send_envelope(&heartbeat)) => sent,
            };

            match sent {
                Ok(Ok(())) => {
                    let mut record = self.record.write();
                    record.last_sent = Some(Instant::now());
                    record.beats_sent += 1;
                    metrics::record_heartbeat_sent();
                    tracing::trace!(beats_sent = record.beats_sent, "Heartbeat sent");
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Heartbeat send failed");
                    return Err(KeepAliveError::SendFailed(e));
                }
                Err(_) => {
                    tracing::warn!(interval_ms = period.as_millis(), "Heartbeat send stalled");
                    return Err(KeepAliveError::Stalled(period));
                }
            }
        }
    }

    /// Cancel the loop and wait until it is inactive.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let mut active = self.active.subscribe();
        let _ = active.wait_for(|active| !*active).await;
    }
}

/// Marks the monitor active for the lifetime of `run`.
struct ActiveGuard<'a>(&'a HeartbeatMonitor);

impl<'a> ActiveGuard<'a> {
    fn engage(monitor: &'a HeartbeatMonitor) -> Self {
        monitor.record.write().active = true;
        monitor.active.send_replace(true);
        Self(monitor)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.record.write().active = false;
        self.0.active.send_replace(false);
    }
}
