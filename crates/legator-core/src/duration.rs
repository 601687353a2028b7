//! Duration-string parsing for timeouts and retention windows.

use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// Parse a compact duration string such as `"30s"`, `"10m"`, `"2h"`, `"1d"`.
///
/// A bare number is read as seconds. Composite strings like `"1h30m"` are
/// accepted; whitespace is not.
///
/// # Errors
///
/// Returns [`CoreError::InvalidDuration`] for empty input, unknown unit
/// suffixes, or a dangling number-less unit.
pub fn parse_duration(s: &str) -> CoreResult<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(CoreError::InvalidDuration {
            value: s.to_string(),
        });
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut saw_unit = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let value: u64 = digits.parse().map_err(|_| CoreError::InvalidDuration {
            value: s.to_string(),
        })?;
        digits.clear();
        saw_unit = true;
        let unit = match ch {
            's' => Duration::from_secs(1),
            'm' => Duration::from_secs(60),
            'h' => Duration::from_secs(3600),
            'd' => Duration::from_secs(86_400),
            _ => {
                return Err(CoreError::InvalidDuration {
                    value: s.to_string(),
                })
            }
        };
        total += unit * u32::try_from(value).map_err(|_| CoreError::InvalidDuration {
            value: s.to_string(),
        })?;
    }

    if !digits.is_empty() {
        // Trailing bare number: seconds, but only if no unit was ever given.
        if saw_unit {
            return Err(CoreError::InvalidDuration {
                value: s.to_string(),
            });
        }
        let value: u64 = digits.parse().map_err(|_| CoreError::InvalidDuration {
            value: s.to_string(),
        })?;
        total = Duration::from_secs(value);
    }

    Ok(total)
}
