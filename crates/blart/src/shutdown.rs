//! Signal relay and the graceful-then-forced shutdown sequence.
//!
//! Every signal handed to [`ShutdownController::handle`] is forwarded to the
//! child first. A termination-class signal additionally moves the controller
//! from [`ShutdownState::Running`] to [`ShutdownState::Draining`] and starts
//! the shutdown sequence:
//!
//! 1. wait up to [`Deadlines::graceful`] for the child to exit;
//! 2. if it has not, send `KILL` and wait up to [`Deadlines::forced`];
//! 3. finish with [`ExitReason::Forced`] whatever happened in step 2.
//!
//! The state lives in a `watch` channel. The `Running → Draining` transition
//! is a single compare-and-set under the channel lock, so at most one sequence
//! ever starts; later termination signals are only forwarded.

use crate::child::{Delivery, ExitSignal, SignalTarget};
use crate::signal::Signal;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// How long the child gets to exit after a termination signal.
pub const GRACEFUL_WAIT: Duration = Duration::from_secs(5);

/// How long the child gets to exit after the forced kill.
pub const FORCED_WAIT: Duration = Duration::from_secs(1);

/// Shutdown deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    pub graceful: Duration,
    pub forced: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            graceful: GRACEFUL_WAIT,
            forced: FORCED_WAIT,
        }
    }
}

/// Why the supervisor is exiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The child exited without needing a forced kill
    ChildExited,
    /// The forced-kill path was taken
    Forced,
}

impl ExitReason {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::ChildExited => 0,
            Self::Forced => 1,
        }
    }
}

/// Supervisor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    /// Termination requested; waiting for the child to exit on its own
    Draining,
    /// Graceful deadline passed; `KILL` sent
    ForceKilling,
    /// Terminal
    Exited(ExitReason),
}

impl ShutdownState {
    pub fn exit_reason(&self) -> Option<ExitReason> {
        match self {
            Self::Exited(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::ForceKilling => write!(f, "force-killing"),
            Self::Exited(ExitReason::ChildExited) => write!(f, "exited"),
            Self::Exited(ExitReason::Forced) => write!(f, "exited (forced)"),
        }
    }
}

struct Inner {
    target: Arc<dyn SignalTarget>,
    exit: ExitSignal,
    deadlines: Deadlines,
    state: watch::Sender<ShutdownState>,
}

/// Relays signals to the child and owns the shutdown state machine.
#[derive(Clone)]
pub struct ShutdownController {
    inner: Arc<Inner>,
}

impl fmt::Debug for ShutdownController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownController")
            .field("state", &self.state())
            .field("deadlines", &self.inner.deadlines)
            .finish()
    }
}

impl ShutdownController {
    pub fn new(target: Arc<dyn SignalTarget>, exit: ExitSignal, deadlines: Deadlines) -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self {
            inner: Arc::new(Inner {
                target,
                exit,
                deadlines,
                state,
            }),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.inner.state.subscribe()
    }

    /// Wait until the controller reaches [`ShutdownState::Exited`].
    pub async fn finished(&self) -> ExitReason {
        let mut rx = self.subscribe();
        match rx.wait_for(|state| state.exit_reason().is_some()).await {
            Ok(state) => state.exit_reason().unwrap_or(ExitReason::Forced),
            // The sender lives in `inner`, which we hold
            Err(_) => ExitReason::Forced,
        }
    }

    /// Forward `signal` to the child, then start the shutdown sequence if it
    /// is a termination signal and no sequence has started yet.
    ///
    /// Must be called from within a tokio runtime.
    pub fn handle(&self, signal: Signal) {
        self.forward(signal);

        if !signal.is_termination() {
            return;
        }

        if !self.transition(|s| *s == ShutdownState::Running, ShutdownState::Draining) {
            debug!(
                "Shutdown already {}; {} forwarded only",
                self.state(),
                signal
            );
            return;
        }

        let controller = self.clone();
        tokio::spawn(async move {
            controller.run_sequence().await;
        });
    }

    /// Record that the child exited on its own.
    ///
    /// Only has an effect while [`ShutdownState::Running`]; an exit during a
    /// shutdown sequence is observed by the sequence itself. Returns `true`
    /// if this call ended the supervisor.
    pub fn observe_child_exit(&self) -> bool {
        self.transition(
            |s| *s == ShutdownState::Running,
            ShutdownState::Exited(ExitReason::ChildExited),
        )
    }

    /// Feed signals from `signals` into [`ShutdownController::handle`] until
    /// the channel closes.
    pub async fn relay(&self, mut signals: mpsc::Receiver<Signal>) {
        while let Some(signal) = signals.recv().await {
            debug!("Received {}", signal);
            self.handle(signal);
        }
        debug!("Signal relay closed");
    }

    async fn run_sequence(&self) -> ExitReason {
        let deadlines = self.inner.deadlines;
        let exit = &self.inner.exit;

        info!("==> attempting to shut down cleanly");
        info!("==> waiting up to {:?} for child to exit", deadlines.graceful);

        tokio::select! {
            _ = exit.wait() => {
                info!("==> child shut down cleanly");
                self.finish(ExitReason::ChildExited);
                return ExitReason::ChildExited;
            }
            _ = sleep(deadlines.graceful) => {}
        }

        self.transition(|s| *s == ShutdownState::Draining, ShutdownState::ForceKilling);
        info!("==> attempting to now kill child");
        self.forward(Signal::Kill);

        tokio::select! {
            _ = exit.wait() => debug!("Child exited after kill"),
            _ = sleep(deadlines.forced) => debug!("Child still running after kill"),
        }

        info!("==> now committing suicide");
        self.finish(ExitReason::Forced);
        ExitReason::Forced
    }

    fn finish(&self, reason: ExitReason) {
        self.transition(|s| s.exit_reason().is_none(), ShutdownState::Exited(reason));
    }

    fn forward(&self, signal: Signal) {
        match self.inner.target.send_signal(signal) {
            Ok(Delivery::Sent) => debug!("Forwarded {} to child", signal),
            Ok(Delivery::NotStarted) => debug!("No child yet; {} not forwarded", signal),
            Ok(Delivery::Exited) => debug!("Child already exited; {} not forwarded", signal),
            Err(e) => warn!("Failed to forward {}: {}", signal, e),
        }
    }

    /// Atomically move to `to` if the current state satisfies `from`.
    fn transition(&self, from: impl Fn(&ShutdownState) -> bool, to: ShutdownState) -> bool {
        let changed = self.inner.state.send_if_modified(|state| {
            if from(&*state) {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            debug!("Shutdown state -> {}", to);
        }
        changed
    }
}
