//! Error reporting and cluster-visible warning events.
//!
//! Two channels, per the tracker's error taxonomy:
//!
//! - **Unhandled errors** (configuration faults, cache corruption) go to an
//!   injected [`ErrorReporter`]; the default logs and continues.
//! - **Warning events** (per-rule selector runtime failures) go to a
//!   [`WarningSink`]. The provided [`ChannelWarningSink`] decouples emission
//!   from delivery with a bounded channel and a background drain thread, and
//!   rate-limits per involved object so a rule that fails on every device of
//!   every slice cannot cause an event storm. Emission never blocks the
//!   event router.

use std::collections::HashMap;
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::tracker::TrackerError;

/// Callback receiving unhandled tracker errors.
pub type ErrorReporter = Arc<dyn Fn(&TrackerError) + Send + Sync>;

/// The default reporter: log and continue.
#[must_use]
pub fn default_error_reporter() -> ErrorReporter {
    Arc::new(|error| tracing::error!(%error, "unhandled tracker error"))
}

/// Reference to the cluster object a warning event is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Object kind, e.g. `DeviceTaintRule`.
    pub kind: &'static str,
    /// Object name.
    pub name: String,
}

/// A cluster-visible warning event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarningEvent {
    /// The object the event is attributed to.
    pub object: ObjectRef,
    /// Machine-readable reason, e.g. `CELRuntimeError`.
    pub reason: &'static str,
    /// Human-readable message.
    pub message: String,
}

/// Destination for warning events.
pub trait WarningSink: Send + Sync {
    /// Emit an event. Must not block the caller.
    fn warn(&self, event: WarningEvent);

    /// Best-effort wait until previously emitted events are delivered.
    fn flush(&self) {}
}

/// In-memory sink capturing events, for tests and in-process consumers.
#[derive(Debug, Default)]
pub struct MemoryWarningSink {
    events: Mutex<Vec<WarningEvent>>,
}

impl MemoryWarningSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything captured so far.
    #[must_use]
    pub fn events(&self) -> Vec<WarningEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl WarningSink for MemoryWarningSink {
    fn warn(&self, event: WarningEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Configuration for [`ChannelWarningSink`].
#[derive(Debug, Clone)]
pub struct WarningSinkConfig {
    /// Maximum events per involved object within the window.
    pub max_per_object: u32,
    /// Size of the sliding rate-limit window.
    pub window: Duration,
    /// Capacity of the delivery queue; events beyond it are dropped.
    pub queue_capacity: usize,
}

impl Default for WarningSinkConfig {
    fn default() -> Self {
        Self {
            // One burst per rule per few minutes is plenty for a condition
            // that persists until the rule or the devices change.
            max_per_object: 5,
            window: Duration::from_secs(300),
            queue_capacity: 256,
        }
    }
}

enum Command {
    Emit(WarningEvent),
    Flush(SyncSender<()>),
}

/// Warning sink that forwards events to a delivery function on a background
/// thread.
///
/// `warn` applies the per-object rate limit, then does a non-blocking send
/// into the bounded queue; on overflow the event is dropped and logged. The
/// drain thread exits when the sink is dropped, after delivering whatever is
/// still queued.
pub struct ChannelWarningSink {
    tx: Option<SyncSender<Command>>,
    worker: Option<thread::JoinHandle<()>>,
    limiter: Mutex<HashMap<ObjectRef, Vec<Instant>>>,
    config: WarningSinkConfig,
}

impl ChannelWarningSink {
    /// Spawn the drain thread around a delivery function.
    #[must_use]
    pub fn new<F>(config: WarningSinkConfig, deliver: F) -> Self
    where
        F: Fn(WarningEvent) + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel::<Command>(config.queue_capacity);
        let worker = thread::Builder::new()
            .name("slicetrack-warnings".to_string())
            .spawn(move || {
                while let Ok(command) = rx.recv() {
                    match command {
                        Command::Emit(event) => deliver(event),
                        Command::Flush(ack) => {
                            // Everything sent before the flush marker has
                            // already been delivered above.
                            let _ = ack.send(());
                        }
                    }
                }
            })
            .ok();
        if worker.is_none() {
            tracing::warn!("failed to spawn warning drain thread; events will be dropped");
        }

        Self {
            tx: worker.is_some().then_some(tx),
            worker,
            limiter: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Whether another event for this object is within the rate limit,
    /// recording it if so.
    fn admit(&self, object: &ObjectRef) -> bool {
        let now = Instant::now();
        let mut limiter = self.limiter.lock().unwrap_or_else(PoisonError::into_inner);
        let timestamps = limiter.entry(object.clone()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.config.window);
        if timestamps.len() >= self.config.max_per_object as usize {
            return false;
        }
        timestamps.push(now);
        true
    }
}

impl WarningSink for ChannelWarningSink {
    fn warn(&self, event: WarningEvent) {
        if !self.admit(&event.object) {
            tracing::debug!(
                object = %event.object.name,
                reason = event.reason,
                "warning event rate-limited"
            );
            return;
        }
        let Some(tx) = &self.tx else { return };
        match tx.try_send(Command::Emit(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(command) | TrySendError::Disconnected(command)) => {
                if let Command::Emit(event) = command {
                    tracing::warn!(
                        object = %event.object.name,
                        reason = event.reason,
                        "warning event dropped: delivery queue unavailable"
                    );
                }
            }
        }
    }

    fn flush(&self) {
        let Some(tx) = &self.tx else { return };
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        if tx.try_send(Command::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv_timeout(Duration::from_secs(1));
        }
    }
}

impl Drop for ChannelWarningSink {
    fn drop(&mut self) {
        // Closing the channel lets the drain thread finish the backlog and
        // exit.
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
