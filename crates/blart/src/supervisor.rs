//! Wires the watcher, debouncer, child and shutdown controller together

use crate::child::{ChildProcess, ChildSlot};
use crate::config::Settings;
use crate::debounce::Debouncer;
use crate::error::StartupError;
use crate::relay::spawn_relay;
use crate::shutdown::{Deadlines, ExitReason, ShutdownController};
use crate::watcher::ChangeWatcher;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A running supervisor.
#[derive(Debug)]
pub struct Supervisor {
    child: Arc<ChildProcess>,
    debouncer: Debouncer,
    controller: ShutdownController,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Start supervising.
    ///
    /// This function:
    /// 1. Registers the file system watches
    /// 2. Installs the OS signal handlers
    /// 3. Starts the debouncer, targeting a not-yet-filled child slot
    /// 4. Launches the child
    /// 5. Starts the watcher, signal relay and exit observer tasks
    ///
    /// Any failure here happens before the child is running (or, for the
    /// child itself, instead of it). Must be called from within a tokio
    /// runtime.
    pub fn start(settings: Settings) -> Result<Self, StartupError> {
        let watcher = ChangeWatcher::new(&settings.paths, settings.recursive)?;

        let cancel = CancellationToken::new();
        let signals = spawn_relay(cancel.child_token()).map_err(StartupError::Relay)?;

        let slot = ChildSlot::new();
        let debouncer = Debouncer::spawn(
            Arc::new(slot.clone()),
            settings.signal,
            settings.delay,
            settings.mode,
            cancel.child_token(),
        );

        let child = match ChildProcess::spawn(&settings.command) {
            Ok(child) => child,
            Err(e) => {
                cancel.cancel();
                return Err(e.into());
            }
        };
        slot.set(child.clone());
        info!("==> starting child {}", child.command());

        let watcher_cancel = cancel.child_token();
        let watcher_debouncer = debouncer.clone();
        tokio::spawn(async move {
            if let Err(e) = watcher.run(watcher_debouncer, watcher_cancel).await {
                error!("Change watcher failed: {}", e);
            }
        });

        let controller = ShutdownController::new(
            Arc::new(slot),
            child.exited().clone(),
            Deadlines::default(),
        );

        let relay_controller = controller.clone();
        tokio::spawn(async move { relay_controller.relay(signals).await });

        let exit_controller = controller.clone();
        let exit = child.exited().clone();
        tokio::spawn(async move {
            if let Some(status) = exit.wait().await {
                info!("==> child exited ({})", status);
            }
            exit_controller.observe_child_exit();
        });

        Ok(Self {
            child,
            debouncer,
            controller,
            cancel,
        })
    }

    pub fn child(&self) -> &Arc<ChildProcess> {
        &self.child
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    pub fn controller(&self) -> &ShutdownController {
        &self.controller
    }

    /// Wait for the supervisor to finish, then stop the background tasks.
    pub async fn wait(self) -> ExitReason {
        let reason = self.controller.finished().await;
        self.cancel.cancel();
        info!("==> exiting with status {}", reason.exit_code());
        reason
    }
}

/// Start the supervisor and run it to completion.
pub async fn run(settings: Settings) -> Result<ExitReason, StartupError> {
    let supervisor = Supervisor::start(settings)?;
    Ok(supervisor.wait().await)
}
