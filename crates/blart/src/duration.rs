//! Duration string parsing for the `--delay` flag and config file

use crate::error::ConfigError;
use std::time::Duration;

/// Parse a duration string into a [`Duration`].
///
/// Supports formats like:
/// - "200ms" -> 200 milliseconds
/// - "3s" -> 3 seconds
/// - "2m" or "2min" -> 2 minutes
/// - "1h" -> 1 hour
/// - "1m30s" or "1m 30s" -> 90 seconds
/// - "0" -> zero
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let input = s.trim();
    if input.is_empty() {
        return Err(invalid(s, "empty duration string".to_string()));
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    humantime::parse_duration(input).map_err(|e| invalid(input, e.to_string()))
}

fn invalid(input: &str, reason: String) -> ConfigError {
    ConfigError::InvalidDuration {
        input: input.to_string(),
        reason,
    }
}
