//! Human friendly lifetimes such as `15m`, `1h30m` or `30d`.

use chrono::Duration;
use thiserror::Error;

/// Longest accepted lifetime: 3650 days.
pub const MAX_LIFETIME_MILLIS: u64 = 3650 * 86_400_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifetimeError {
    #[error("lifetime is empty")]
    Empty,
    #[error("invalid lifetime: {0}")]
    Invalid(String),
    #[error("lifetime must be greater than zero")]
    Zero,
    #[error("lifetime is out of range (at most 3650d)")]
    OutOfRange,
}

fn unit_millis(unit: &str) -> Option<u64> {
    match unit {
        "ms" => Some(1),
        "s" => Some(1_000),
        "m" => Some(60_000),
        "h" => Some(3_600_000),
        "d" => Some(86_400_000),
        _ => None,
    }
}

/// Parse a sequence of `<number><unit>` pairs. Units: `ms`, `s`, `m`, `h`, `d` (24 hours).
///
/// # Errors
/// Returns [`LifetimeError`] for empty, malformed or zero input and for anything
/// above [`MAX_LIFETIME_MILLIS`].
pub fn parse_lifetime(input: &str) -> Result<Duration, LifetimeError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(LifetimeError::Empty);
    }

    let invalid = || LifetimeError::Invalid(input.to_string());
    let mut rest = input;
    let mut total: u64 = 0;

    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let (number, tail) = rest.split_at(digits);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let value: u64 = number.parse().map_err(|_| LifetimeError::OutOfRange)?;
        let factor = unit_millis(unit).ok_or_else(invalid)?;
        total = value
            .checked_mul(factor)
            .and_then(|millis| total.checked_add(millis))
            .ok_or(LifetimeError::OutOfRange)?;
        rest = tail;
    }

    if total == 0 {
        return Err(LifetimeError::Zero);
    }
    if total > MAX_LIFETIME_MILLIS {
        return Err(LifetimeError::OutOfRange);
    }

    i64::try_from(total)
        .ok()
        .and_then(Duration::try_milliseconds)
        .ok_or(LifetimeError::OutOfRange)
}

/// Render a lifetime back into the compact form accepted by [`parse_lifetime`].
#[must_use]
pub fn format_lifetime(lifetime: Duration) -> String {
    let mut millis = lifetime.num_milliseconds();
    if millis <= 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    for (unit, factor) in [
        ("d", 86_400_000),
        ("h", 3_600_000),
        ("m", 60_000),
        ("s", 1_000),
        ("ms", 1),
    ] {
        let count = millis / factor;
        if count > 0 {
            out.push_str(&format!("{count}{unit}"));
            millis -= count * factor;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_units() -> Result<(), LifetimeError> {
        assert_eq!(parse_lifetime("250ms")?, Duration::milliseconds(250));
        assert_eq!(parse_lifetime("45s")?, Duration::seconds(45));
        assert_eq!(parse_lifetime("15m")?, Duration::minutes(15));
        assert_eq!(parse_lifetime("2h")?, Duration::hours(2));
        assert_eq!(parse_lifetime("30d")?, Duration::days(30));
        Ok(())
    }

    #[test]
    fn parses_sequences() -> Result<(), LifetimeError> {
        assert_eq!(
            parse_lifetime("1h30m")?,
            Duration::hours(1) + Duration::minutes(30)
        );
        assert_eq!(
            parse_lifetime(" 1d12h ")?,
            Duration::days(1) + Duration::hours(12)
        );
        Ok(())
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(parse_lifetime(""), Err(LifetimeError::Empty));
        assert_eq!(parse_lifetime("0s"), Err(LifetimeError::Zero));
        for raw in ["15", "m", "15x", "1h-30m", "1.5h", "h1"] {
            assert!(
                matches!(parse_lifetime(raw), Err(LifetimeError::Invalid(_))),
                "{raw}"
            );
        }
        assert_eq!(
            parse_lifetime("99999999999999999999d"),
            Err(LifetimeError::OutOfRange)
        );
    }

    #[test]
    fn caps_at_ten_years() -> Result<(), LifetimeError> {
        assert_eq!(parse_lifetime("3650d")?, Duration::days(3650));
        assert_eq!(parse_lifetime("3650d1ms"), Err(LifetimeError::OutOfRange));
        assert_eq!(parse_lifetime("100000000000d"), Err(LifetimeError::OutOfRange));
        Ok(())
    }

    #[test]
    fn format_matches_parser() -> Result<(), LifetimeError> {
        assert_eq!(format_lifetime(Duration::minutes(90)), "1h30m");
        assert_eq!(format_lifetime(Duration::days(30)), "30d");
        assert_eq!(format_lifetime(Duration::zero()), "0s");
        let parsed = parse_lifetime(&format_lifetime(Duration::milliseconds(90_061_001)))?;
        assert_eq!(parsed, Duration::milliseconds(90_061_001));
        Ok(())
    }
}
