//! blart: supervise a child process and signal it when watched files change.
//!
//! The crate is organised around three concurrent pieces sharing one child:
//!
//! - [`watcher`] turns file system events into debouncer notifications
//! - [`debounce`] collapses bursts of notifications into one delayed signal
//! - [`shutdown`] relays OS signals to the child and runs the
//!   graceful-then-forced shutdown sequence
//!
//! [`supervisor`] wires them together; [`config`] resolves the settings they
//! run with.

pub mod child;
pub mod config;
pub mod debounce;
pub mod duration;
pub mod error;
pub mod relay;
pub mod shutdown;
pub mod signal;
pub mod supervisor;
pub mod watcher;

pub use child::{ChildProcess, ChildSlot, Delivery, SignalTarget};
pub use config::{Args, Settings};
pub use debounce::{DebounceMode, Debouncer};
pub use error::{ChildError, ConfigError, StartupError};
pub use shutdown::{ExitReason, ShutdownController, ShutdownState};
pub use signal::Signal;
pub use supervisor::Supervisor;
