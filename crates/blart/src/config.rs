//! Configuration resolution
//!
//! Resolves settings from multiple sources with priority:
//! 1. Command-line flags
//! 2. Config file given with `--config` (TOML)
//! 3. Defaults
//!
//! Validation runs in a fixed order (signal, delay, paths, command, path
//! existence) so the first problem reported is predictable.

use crate::debounce::DebounceMode;
use crate::duration::parse_duration;
use crate::error::ConfigError;
use crate::signal::Signal;
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Signal sent on change when none is configured
pub const DEFAULT_SIGNAL: Signal = Signal::Hup;

/// Quiescence delay when none is configured
pub const DEFAULT_DELAY: Duration = Duration::from_secs(3);

/// Separator for the `--files` list
pub const PATH_SEPARATOR: char = ':';

/// Signal a child process when watched files change
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "blart")]
#[command(about = "Signal a child process when watched files change")]
#[command(override_usage = "blart [flags] [command]")]
#[command(version)]
pub struct Args {
    /// Files and directories to watch, split by ':'
    #[arg(short = 'f', long = "files", value_name = "LIST")]
    pub files: Option<String>,

    /// Signal to send on change [default: HUP]
    #[arg(short = 's', long, value_name = "NAME")]
    pub signal: Option<String>,

    /// Time to wait after a change before signalling the child [default: 3s]
    #[arg(short = 'd', long, value_name = "DURATION")]
    pub delay: Option<String>,

    /// How changes during the delay are treated [default: fixed]
    #[arg(long, value_enum, value_name = "MODE")]
    pub debounce: Option<DebounceMode>,

    /// Watch directories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to run, with its arguments
    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

/// Contents of the `--config` file. Every key is optional.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub files: Vec<PathBuf>,
    pub signal: Option<String>,
    pub delay: Option<String>,
    pub debounce: Option<DebounceMode>,
    pub recursive: Option<bool>,
    pub command: Vec<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully validated runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub paths: Vec<PathBuf>,
    pub signal: Signal,
    pub delay: Duration,
    pub mode: DebounceMode,
    pub recursive: bool,
    pub command: Vec<String>,
}

impl Settings {
    /// Resolve settings from command-line arguments and, if given, the config file.
    pub fn resolve(args: &Args) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, file)
    }

    /// Merge flags over file values and validate the result.
    pub fn merge(args: &Args, file: FileConfig) -> Result<Self, ConfigError> {
        let signal = match args.signal.as_deref().or(file.signal.as_deref()) {
            Some(name) => name.parse()?,
            None => DEFAULT_SIGNAL,
        };

        let delay = match args.delay.as_deref().or(file.delay.as_deref()) {
            Some(raw) => parse_duration(raw)?,
            None => DEFAULT_DELAY,
        };

        let paths = match args.files.as_deref() {
            Some(list) => split_paths(list),
            None => file.files,
        };
        if paths.is_empty() {
            return Err(ConfigError::NoPaths);
        }

        let command = if args.command.is_empty() {
            file.command
        } else {
            args.command.clone()
        };
        if command.is_empty() {
            return Err(ConfigError::NoCommand);
        }

        if let Some(missing) = paths.iter().find(|p| !p.exists()) {
            return Err(ConfigError::PathNotFound(missing.clone()));
        }

        Ok(Self {
            paths,
            signal,
            delay,
            mode: args.debounce.or(file.debounce).unwrap_or_default(),
            recursive: args.recursive || file.recursive.unwrap_or(false),
            command,
        })
    }
}

/// Split a `:`-separated path list, dropping empty entries.
pub fn split_paths(list: &str) -> Vec<PathBuf> {
    list.split(PATH_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}
