//! Signal names and their OS signal numbers.
//!
//! The set of names accepted on the command line is the static [`SIGNAL_TABLE`].
//! Lookups are case-insensitive and accept an optional `SIG` prefix, so `hup`,
//! `HUP` and `SIGHUP` all resolve to [`Signal::Hup`].
//!
//! ## Termination class
//!
//! [`Signal::Int`], [`Signal::Kill`] and [`Signal::Term`] form the fixed
//! termination class. Receiving one of them starts the shutdown sequence in
//! [`crate::shutdown`]; every other signal is only forwarded.

use crate::error::ConfigError;
use std::fmt;
use std::str::FromStr;

/// A signal that can be sent to, or relayed to, the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Abrt,
    Alrm,
    Bus,
    Cont,
    Fpe,
    Hup,
    Ill,
    Int,
    Kill,
    Pipe,
    Quit,
    Segv,
    Term,
    Trap,
    Tstp,
    Usr1,
    Usr2,
    Winch,
}

/// Name → signal lookup table. Names are stored without the `SIG` prefix.
pub const SIGNAL_TABLE: &[(&str, Signal)] = &[
    ("ABRT", Signal::Abrt),
    ("ALRM", Signal::Alrm),
    ("BUS", Signal::Bus),
    ("CONT", Signal::Cont),
    ("FPE", Signal::Fpe),
    ("HUP", Signal::Hup),
    ("ILL", Signal::Ill),
    ("INT", Signal::Int),
    ("KILL", Signal::Kill),
    ("PIPE", Signal::Pipe),
    ("QUIT", Signal::Quit),
    ("SEGV", Signal::Segv),
    ("TERM", Signal::Term),
    ("TRAP", Signal::Trap),
    ("TSTP", Signal::Tstp),
    ("USR1", Signal::Usr1),
    ("USR2", Signal::Usr2),
    ("WINCH", Signal::Winch),
];

impl Signal {
    /// Signals that start the graceful-then-forced shutdown sequence.
    pub const TERMINATION: [Signal; 3] = [Signal::Int, Signal::Kill, Signal::Term];

    /// Signals the supervisor subscribes to and relays to the child.
    ///
    /// Signals that cannot be caught (`KILL`, `STOP`) or that describe a fault
    /// in the supervisor itself (`SEGV`, `BUS`, `FPE`, `ILL`, `TRAP`) are not
    /// listed. `PIPE` is left to the runtime.
    pub const RELAYED: &'static [Signal] = &[
        Signal::Hup,
        Signal::Int,
        Signal::Quit,
        Signal::Term,
        Signal::Usr1,
        Signal::Usr2,
        Signal::Alrm,
        Signal::Winch,
        Signal::Cont,
        Signal::Tstp,
    ];

    /// Look up a signal by name. Case-insensitive; `SIG` prefix optional.
    pub fn from_name(name: &str) -> Option<Signal> {
        let upper = name.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        SIGNAL_TABLE
            .iter()
            .find(|(entry, _)| *entry == bare)
            .map(|(_, signal)| *signal)
    }

    /// Bare name of the signal, e.g. `"HUP"`.
    pub fn name(self) -> &'static str {
        SIGNAL_TABLE
            .iter()
            .find(|(_, signal)| *signal == self)
            .map(|(name, _)| *name)
            .unwrap_or("UNKNOWN")
    }

    /// Return `true` for interrupt, kill and terminate.
    pub fn is_termination(self) -> bool {
        Self::TERMINATION.contains(&self)
    }

    /// OS signal number.
    #[cfg(unix)]
    pub fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Abrt => libc::SIGABRT,
            Signal::Alrm => libc::SIGALRM,
            Signal::Bus => libc::SIGBUS,
            Signal::Cont => libc::SIGCONT,
            Signal::Fpe => libc::SIGFPE,
            Signal::Hup => libc::SIGHUP,
            Signal::Ill => libc::SIGILL,
            Signal::Int => libc::SIGINT,
            Signal::Kill => libc::SIGKILL,
            Signal::Pipe => libc::SIGPIPE,
            Signal::Quit => libc::SIGQUIT,
            Signal::Segv => libc::SIGSEGV,
            Signal::Term => libc::SIGTERM,
            Signal::Trap => libc::SIGTRAP,
            Signal::Tstp => libc::SIGTSTP,
            Signal::Usr1 => libc::SIGUSR1,
            Signal::Usr2 => libc::SIGUSR2,
            Signal::Winch => libc::SIGWINCH,
        }
    }

    /// Reverse of [`Signal::as_raw`]; `None` for numbers outside the table.
    #[cfg(unix)]
    pub fn from_raw(raw: libc::c_int) -> Option<Signal> {
        SIGNAL_TABLE
            .iter()
            .map(|(_, signal)| *signal)
            .find(|signal| signal.as_raw() == raw)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIG{}", self.name())
    }
}

impl FromStr for Signal {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Signal::from_name(s).ok_or_else(|| ConfigError::UnknownSignal(s.to_string()))
    }
}
