//! Error types for startup validation and child process control

use crate::signal::Signal;
use std::path::PathBuf;

/// Problems with the supplied configuration.
///
/// All of these are fatal at startup: they are reported together with the
/// usage text and the process exits before the child is launched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Signal name not present in the signal table
    #[error("unknown signal: {0}")]
    UnknownSignal(String),

    #[error("no files to watch")]
    NoPaths,

    #[error("no command specified")]
    NoCommand,

    /// A watch path does not exist
    #[error("{}: no such file or directory", .0.display())]
    PathNotFound(PathBuf),

    #[error("invalid duration '{input}': {reason}")]
    InvalidDuration { input: String, reason: String },

    /// Config file could not be read
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML (or has unknown keys)
    #[error("TOML parsing error in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to create file system watcher: {0}")]
    WatcherInit(#[source] notify::Error),

    /// The filesystem watcher refused a path
    #[error("failed to watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Errors launching or signalling the child process
#[derive(Debug, thiserror::Error)]
pub enum ChildError {
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send {signal} to pid {pid}: {source}")]
    Signal {
        signal: Signal,
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("sending {0} is not supported on this platform")]
    Unsupported(Signal),
}

/// Anything that stops the supervisor from getting off the ground.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Child(#[from] ChildError),

    /// OS signal handlers could not be installed
    #[error("failed to install signal handlers: {0}")]
    Relay(#[source] std::io::Error),
}
