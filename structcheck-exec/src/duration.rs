//! Duration Strings
//!
//! The one grammar for deadlines written as text: `#[timeout(duration = ..)]`
//! and the `[executor] timeout` setting both go through [`parse_duration`].

use crate::ExecError;
use std::time::Duration;

/// Parse duration string (e.g., "3s", "500ms", "2m", "1.5min", "250us")
///
/// Accepted units are `ns`, `us`/`µs`, `ms`, `s`, and `m`/`min`. A bare
/// number means seconds. Zero parses; [`crate::BoundedExecutor::new`] is
/// what rejects it as a deadline.
pub fn parse_duration(s: &str) -> Result<Duration, ExecError> {
    let invalid = |reason: &str| ExecError::InvalidDuration {
        input: s.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty duration string"));
    }

    // Find where the number ends and unit begins
    let (num_part, unit_part) = trimmed
        .char_indices()
        .find(|(_, c)| c.is_alphabetic())
        .map(|(i, _)| trimmed.split_at(i))
        .unwrap_or((trimmed, "s"));

    let value: f64 = num_part
        .trim()
        .parse()
        .map_err(|_| invalid("not a number"))?;

    let multiplier: u64 = match unit_part.to_lowercase().as_str() {
        "ns" => 1,
        "us" | "µs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" | "min" => 60_000_000_000,
        _ => return Err(invalid("unknown unit (use ns, us, ms, s, m or min)")),
    };

    let nanos = value * multiplier as f64;
    if !nanos.is_finite() || nanos < 0.0 {
        return Err(invalid("must be a finite, non-negative amount"));
    }
    Ok(Duration::from_nanos(nanos as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        let parse = |s| parse_duration(s).unwrap();
        assert_eq!(parse("3s"), Duration::from_secs(3));
        assert_eq!(parse("500ms"), Duration::from_millis(500));
        assert_eq!(parse("100us"), Duration::from_micros(100));
        assert_eq!(parse("100µs"), Duration::from_micros(100));
        assert_eq!(parse("1000ns"), Duration::from_micros(1));
        assert_eq!(parse("2m"), Duration::from_secs(120));
        assert_eq!(parse("2min"), Duration::from_secs(120));
        assert_eq!(parse("1.5s"), Duration::from_millis(1500));
        assert_eq!(parse(" 10 "), Duration::from_secs(10));
        assert_eq!(parse("0s"), Duration::ZERO);
    }

    #[test]
    fn test_rejects_malformed() {
        for input in ["", "   ", "3h", "-1s", "soon", "ms", "1e400s"] {
            match parse_duration(input) {
                Err(ExecError::InvalidDuration { input: echoed, .. }) => {
                    assert_eq!(echoed, input);
                }
                other => panic!("{input:?} gave {other:?}"),
            }
        }
    }
}
