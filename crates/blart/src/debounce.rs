//! Trailing debounce of change notifications into child signals.
//!
//! Any number of producers call [`Debouncer::notify`]; a single dispatch task
//! turns each burst of notifications into exactly one signal to the child.
//!
//! ## Cycle
//!
//! The dispatcher is either *idle* (waiting) or *armed*. The first
//! notification that lands while it is idle arms it; the dispatcher then waits
//! out the delay, sends the signal once, and only then returns to idle.
//! Notifications arriving while armed are coalesced into the pending fire.
//! A notification arriving after the fire has completed starts a new cycle.
//!
//! The armed flag is a single `AtomicBool`; only the `false → true` swap wakes
//! the dispatcher, so at most one wake permit is ever outstanding.
//!
//! ## Modes
//!
//! - [`DebounceMode::Fixed`]: the fire happens `delay` after the cycle was
//!   armed. A continuous stream of notifications still fires every `delay`.
//! - [`DebounceMode::Reset`]: every notification while armed pushes the fire
//!   back to `delay` after that notification, so the fire happens `delay`
//!   after the last notification of the burst.
//!
//! Neither mode fires on the leading edge.

use crate::child::{Delivery, SignalTarget};
use crate::signal::Signal;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How notifications arriving during the delay window are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DebounceMode {
    /// Fire a fixed delay after the burst started
    #[default]
    Fixed,
    /// Restart the delay on every notification
    Reset,
}

impl fmt::Display for DebounceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Reset => write!(f, "reset"),
        }
    }
}

struct Shared {
    armed: AtomicBool,
    wake: Notify,
    /// Nanoseconds since `epoch` of the most recent notification
    last_notify: AtomicU64,
    epoch: Instant,
    notifications: AtomicU64,
    fires: AtomicU64,
}

impl Shared {
    fn elapsed_nanos(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn last_notify_at(&self) -> Instant {
        self.epoch + Duration::from_nanos(self.last_notify.load(Ordering::Acquire))
    }
}

/// Handle used by producers to report changes. Cheap to clone.
#[derive(Clone)]
pub struct Debouncer {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("armed", &self.is_armed())
            .field("notifications", &self.notifications())
            .field("fires", &self.fires())
            .finish()
    }
}

impl Debouncer {
    /// Start the dispatch task on the current tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `target` - Where fires are delivered (usually a [`crate::child::ChildSlot`])
    /// * `signal` - Signal sent on each fire
    /// * `delay` - Quiescence window
    /// * `mode` - See [`DebounceMode`]
    /// * `cancel` - Stops the dispatch task
    pub fn spawn(
        target: Arc<dyn SignalTarget>,
        signal: Signal,
        delay: Duration,
        mode: DebounceMode,
        cancel: CancellationToken,
    ) -> Self {
        let shared = Arc::new(Shared {
            armed: AtomicBool::new(false),
            wake: Notify::new(),
            last_notify: AtomicU64::new(0),
            epoch: Instant::now(),
            notifications: AtomicU64::new(0),
            fires: AtomicU64::new(0),
        });

        let dispatcher = Dispatcher {
            shared: shared.clone(),
            target,
            signal,
            delay,
            mode,
        };
        tokio::spawn(dispatcher.run(cancel.clone()));

        Self { shared, cancel }
    }

    /// Report that something changed. Never blocks and never fails.
    pub fn notify(&self) {
        let shared = &self.shared;
        shared.notifications.fetch_add(1, Ordering::Relaxed);
        shared
            .last_notify
            .store(shared.elapsed_nanos(), Ordering::Release);

        if !shared.armed.swap(true, Ordering::AcqRel) {
            shared.wake.notify_one();
        }
    }

    /// `true` while a delay-then-fire cycle is outstanding.
    pub fn is_armed(&self) -> bool {
        self.shared.armed.load(Ordering::Acquire)
    }

    /// Total calls to [`Debouncer::notify`].
    pub fn notifications(&self) -> u64 {
        self.shared.notifications.load(Ordering::Relaxed)
    }

    /// Completed fires, including ones dropped because the child was absent.
    pub fn fires(&self) -> u64 {
        self.shared.fires.load(Ordering::Acquire)
    }

    /// Stop the dispatch task. A pending fire is abandoned.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

struct Dispatcher {
    shared: Arc<Shared>,
    target: Arc<dyn SignalTarget>,
    signal: Signal,
    delay: Duration,
    mode: DebounceMode,
}

impl Dispatcher {
    async fn run(self, cancel: CancellationToken) {
        debug!(
            "Debounce dispatcher started (delay: {:?}, mode: {}, signal: {})",
            self.delay, self.mode, self.signal
        );

        loop {
            tokio::select! {
                _ = self.shared.wake.notified() => {}
                _ = cancel.cancelled() => break,
            }

            tokio::select! {
                _ = self.wait_out_delay() => {}
                _ = cancel.cancelled() => break,
            }

            self.fire();
            self.shared.fires.fetch_add(1, Ordering::AcqRel);
            self.shared.armed.store(false, Ordering::Release);
        }

        debug!("Debounce dispatcher stopped");
    }

    async fn wait_out_delay(&self) {
        match self.mode {
            DebounceMode::Fixed => sleep(self.delay).await,
            DebounceMode::Reset => {
                let mut deadline = self.shared.last_notify_at() + self.delay;
                loop {
                    sleep_until(deadline).await;
                    let latest = self.shared.last_notify_at() + self.delay;
                    if latest <= deadline {
                        break;
                    }
                    deadline = latest;
                }
            }
        }
    }

    fn fire(&self) {
        match self.target.send_signal(self.signal) {
            Ok(Delivery::Sent) => info!("==> signalling child"),
            Ok(Delivery::NotStarted) => debug!("Child not started; dropping {}", self.signal),
            Ok(Delivery::Exited) => debug!("Child already exited; dropping {}", self.signal),
            Err(e) => warn!("Failed to signal child: {e}"),
        }
    }
}
