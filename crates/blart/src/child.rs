//! The supervised child process.
//!
//! [`ChildProcess`] is created once by [`ChildProcess::spawn`] and is never
//! restarted or replaced. Everything else in the crate only ever *signals* it,
//! through the [`SignalTarget`] trait.
//!
//! ## Exit notification
//!
//! A dedicated task owns the OS process handle and awaits its exit. The result
//! is published once on an [`ExitSignal`], a `tokio::sync::watch` channel whose
//! value persists: any number of readers, including ones that subscribe after
//! the child has already exited, observe the exit without blocking.
//!
//! ## Delivery
//!
//! Sending a signal is a single non-blocking `kill(2)` call on Unix. Signalling
//! a child that has already exited is reported as [`Delivery::Exited`], never
//! as an error.

use crate::error::ChildError;
use crate::signal::Signal;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, OnceLock};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error};

/// Outcome of a signal delivery attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The signal was handed to the OS.
    Sent,
    /// There is no child yet; nothing was sent.
    NotStarted,
    /// The child has already exited; nothing was sent.
    Exited,
}

/// Something that can receive signals on behalf of the child process.
pub trait SignalTarget: Send + Sync {
    /// Send `signal`. Must not block and must be safe to call concurrently.
    fn send_signal(&self, signal: Signal) -> Result<Delivery, ChildError>;
}

impl<T: SignalTarget + ?Sized> SignalTarget for Arc<T> {
    fn send_signal(&self, signal: Signal) -> Result<Delivery, ChildError> {
        (**self).send_signal(signal)
    }
}

/// How the child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    /// Exit code, if the child exited normally
    pub code: Option<i32>,
    /// Terminating signal number, if the child was killed by a signal
    pub signal: Option<i32>,
}

impl ChildExit {
    /// Exit whose status could not be collected.
    pub fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }
}

impl From<ExitStatus> for ChildExit {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit status {code}"),
            #[cfg(unix)]
            (None, Some(raw)) => match Signal::from_raw(raw) {
                Some(signal) => write!(f, "terminated by {signal}"),
                None => write!(f, "terminated by signal {raw}"),
            },
            #[cfg(not(unix))]
            (None, Some(raw)) => write!(f, "terminated by signal {raw}"),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Create a linked publisher / signal pair for one child lifetime.
pub fn exit_channel() -> (ExitPublisher, ExitSignal) {
    let (tx, rx) = watch::channel(None);
    (ExitPublisher { tx }, ExitSignal { rx })
}

/// Write side of the one-shot exit notification.
#[derive(Debug)]
pub struct ExitPublisher {
    tx: watch::Sender<Option<ChildExit>>,
}

impl ExitPublisher {
    /// Publish the exit. Consumes the publisher so it can only happen once.
    pub fn publish(self, exit: ChildExit) {
        self.tx.send_replace(Some(exit));
    }
}

/// Read side of the one-shot exit notification. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ExitSignal {
    rx: watch::Receiver<Option<ChildExit>>,
}

impl ExitSignal {
    /// The exit, if it has been published.
    pub fn current(&self) -> Option<ChildExit> {
        *self.rx.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.current().is_some()
    }

    /// Wait until the child has exited.
    ///
    /// Returns immediately when the exit was published earlier. Resolves with
    /// `None` if the publisher was dropped without publishing, which means
    /// the exit can no longer be observed.
    pub async fn wait(&self) -> Option<ChildExit> {
        let mut rx = self.rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(exit) => *exit,
            Err(_) => None,
        }
    }
}

/// A running (or finished) child process.
#[derive(Debug)]
pub struct ChildProcess {
    pid: u32,
    command: String,
    exit: ExitSignal,
}

impl ChildProcess {
    /// Launch `command` with inherited standard streams.
    ///
    /// Spawns the exit-waiter task on the current tokio runtime, so this must
    /// be called from within one.
    pub fn spawn(command: &[String]) -> Result<Arc<ChildProcess>, ChildError> {
        let display = command.join(" ");
        let (program, args) = command.split_first().ok_or_else(|| ChildError::Spawn {
            command: display.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ChildError::Spawn {
                command: display.clone(),
                source,
            })?;

        let pid = child.id().ok_or_else(|| ChildError::Spawn {
            command: display.clone(),
            source: std::io::Error::other("child exited before its pid was read"),
        })?;

        let (publisher, exit) = exit_channel();
        tokio::spawn(async move {
            let outcome = match child.wait().await {
                Ok(status) => ChildExit::from(status),
                Err(e) => {
                    error!("Failed to wait for child {pid}: {e}");
                    ChildExit::unknown()
                }
            };
            debug!("Child {pid} exited: {outcome}");
            publisher.publish(outcome);
        });

        Ok(Arc::new(ChildProcess {
            pid,
            command: display,
            exit,
        }))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Command line as launched, joined with spaces.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn exited(&self) -> &ExitSignal {
        &self.exit
    }
}

impl SignalTarget for ChildProcess {
    fn send_signal(&self, signal: Signal) -> Result<Delivery, ChildError> {
        // Once reaped the pid may be reused by an unrelated process.
        if self.exit.has_exited() {
            return Ok(Delivery::Exited);
        }
        deliver(self.pid, signal)
    }
}

#[cfg(unix)]
fn deliver(pid: u32, signal: Signal) -> Result<Delivery, ChildError> {
    // SAFETY: kill(2) has no memory-safety preconditions.
    let result = unsafe { libc::kill(pid as libc::pid_t, signal.as_raw()) };
    if result == 0 {
        return Ok(Delivery::Sent);
    }

    let source = std::io::Error::last_os_error();
    if source.raw_os_error() == Some(libc::ESRCH) {
        Ok(Delivery::Exited)
    } else {
        Err(ChildError::Signal {
            signal,
            pid,
            source,
        })
    }
}

#[cfg(not(unix))]
fn deliver(_pid: u32, signal: Signal) -> Result<Delivery, ChildError> {
    Err(ChildError::Unsupported(signal))
}

/// Write-once slot holding the child once it has been started.
///
/// Components that are wired up before the child exists hold a `ChildSlot`;
/// signalling an empty slot is a silent no-op.
#[derive(Debug, Clone, Default)]
pub struct ChildSlot {
    inner: Arc<OnceLock<Arc<ChildProcess>>>,
}

impl ChildSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the child. Returns `false` if a child was already stored.
    pub fn set(&self, child: Arc<ChildProcess>) -> bool {
        self.inner.set(child).is_ok()
    }

    pub fn get(&self) -> Option<&Arc<ChildProcess>> {
        self.inner.get()
    }
}

impl SignalTarget for ChildSlot {
    fn send_signal(&self, signal: Signal) -> Result<Delivery, ChildError> {
        match self.inner.get() {
            Some(child) => child.send_signal(signal),
            None => Ok(Delivery::NotStarted),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_exit_signal_late_reader_sees_exit() {
        let (publisher, exit) = exit_channel();
        assert!(!exit.has_exited());

        publisher.publish(ChildExit {
            code: Some(0),
            signal: None,
        });

        // Two independent readers after the fact must both observe it
        let first = exit.clone();
        let second = exit.clone();
        assert_eq!(first.wait().await.unwrap().code, Some(0));
        assert_eq!(second.wait().await.unwrap().code, Some(0));
        assert!(exit.has_exited());
    }

    #[tokio::test]
    async fn test_exit_signal_wakes_pending_waiters() {
        let (publisher, exit) = exit_channel();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let exit = exit.clone();
                tokio::spawn(async move { exit.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        publisher.publish(ChildExit {
            code: Some(2),
            signal: None,
        });

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap().code, Some(2));
        }
    }

    #[tokio::test]
    async fn test_exit_signal_dropped_publisher_resolves_none() {
        let (publisher, exit) = exit_channel();
        drop(publisher);
        assert_eq!(exit.wait().await, None);
    }

    #[test]
    fn test_empty_slot_reports_not_started() {
        let slot = ChildSlot::new();
        assert!(slot.get().is_none());
        assert_eq!(slot.send_signal(Signal::Hup).unwrap(), Delivery::NotStarted);
    }

    #[test]
    fn test_child_exit_display() {
        let exited = ChildExit {
            code: Some(3),
            signal: None,
        };
        assert_eq!(exited.to_string(), "exit status 3");
        assert_eq!(ChildExit::unknown().to_string(), "unknown exit status");
    }

    #[cfg(unix)]
    #[test]
    fn test_child_exit_display_signal() {
        let killed = ChildExit {
            code: None,
            signal: Some(libc::SIGKILL),
        };
        assert_eq!(killed.to_string(), "terminated by SIGKILL");
    }

    #[tokio::test]
    async fn test_spawn_missing_program_fails() {
        let command = vec!["blart-test-no-such-program".to_string()];
        let err = ChildProcess::spawn(&command).unwrap_err();
        assert!(matches!(err, ChildError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_spawn_empty_command_fails() {
        let err = ChildProcess::spawn(&[]).unwrap_err();
        assert!(matches!(err, ChildError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_signal_after_exit_is_not_an_error() {
        let command = vec!["sh".to_string(), "-c".to_string(), "exit 0".to_string()];
        let child = ChildProcess::spawn(&command).unwrap();
        let exit = child.exited().wait().await.unwrap();
        assert_eq!(exit.code, Some(0));

        assert_eq!(child.send_signal(Signal::Term).unwrap(), Delivery::Exited);
        assert_eq!(child.send_signal(Signal::Kill).unwrap(), Delivery::Exited);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slot_forwards_to_child() {
        let command = vec!["sleep".to_string(), "30".to_string()];
        let child = ChildProcess::spawn(&command).unwrap();
        let slot = ChildSlot::new();
        assert!(slot.set(child.clone()));
        assert!(!slot.set(child.clone()));

        assert_eq!(slot.send_signal(Signal::Term).unwrap(), Delivery::Sent);
        let exit = child.exited().wait().await.unwrap();
        assert_eq!(exit.signal, Some(libc::SIGTERM));
        assert_eq!(exit.to_string(), "terminated by SIGTERM");
    }
}
