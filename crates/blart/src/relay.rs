//! OS signal subscription.
//!
//! Installs a handler for every signal in [`Signal::RELAYED`] and feeds each
//! delivery into an mpsc channel, which [`crate::shutdown::ShutdownController::relay`]
//! consumes. One small task per signal kind does the forwarding.

use crate::signal::Signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Capacity of the relay channel. Signals are rare; this only absorbs bursts.
const RELAY_CAPACITY: usize = 32;

/// Install the signal handlers and start forwarding.
///
/// Handlers are installed before this returns, so no signal delivered after
/// that point is lost. The channel closes once `cancel` fires.
#[cfg(unix)]
pub fn spawn_relay(cancel: CancellationToken) -> std::io::Result<mpsc::Receiver<Signal>> {
    use tokio::signal::unix::{SignalKind, signal};

    let (tx, rx) = mpsc::channel(RELAY_CAPACITY);

    let mut streams = Vec::with_capacity(Signal::RELAYED.len());
    for relayed in Signal::RELAYED {
        let stream = signal(SignalKind::from_raw(relayed.as_raw()))?;
        streams.push((*relayed, stream));
    }

    for (relayed, mut stream) in streams {
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = stream.recv() => {
                        if received.is_none() || tx.send(relayed).await.is_err() {
                            break;
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            debug!("Stopped relaying {}", relayed);
        });
    }

    Ok(rx)
}

/// Install the Ctrl-C handler and start forwarding it as [`Signal::Int`].
#[cfg(not(unix))]
pub fn spawn_relay(cancel: CancellationToken) -> std::io::Result<mpsc::Receiver<Signal>> {
    let (tx, rx) = mpsc::channel(RELAY_CAPACITY);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = tokio::signal::ctrl_c() => {
                    if received.is_err() || tx.send(Signal::Int).await.is_err() {
                        break;
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
        debug!("Stopped relaying Ctrl-C");
    });

    Ok(rx)
}
