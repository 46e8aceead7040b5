//! RINEX header epoch strings
//!
//! `TIME OF FIRST OBS` and `TIME OF LAST OBS` carry year, month, day, hour,
//! minute and fractional seconds as whitespace separated tokens, usually
//! followed by a time system label (`GPS`, `GLO`, ...).

use crate::error::{CatalogError, CatalogResult};
use chrono::{DateTime, Duration, NaiveDate, Utc};

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Parse a header epoch into a UTC timestamp with microsecond resolution.
///
/// The first six tokens must be plain decimal numbers; anything after them
/// (the time system label) is ignored. Calendar fields must be integral and in range, seconds must lie in
/// `[0, 60)`. Fractional seconds are rounded to the nearest microsecond,
/// carrying into the next minute when they round up to 60.
pub fn parse_epoch(value: &str) -> CatalogResult<DateTime<Utc>> {
    let tokens: Vec<&str> = value.split_whitespace().take(6).collect();
    if tokens.len() < 6 {
        return Err(CatalogError::invalid_timestamp(
            value,
            format!("expected 6 numeric fields, found {}", tokens.len()),
        ));
    }

    let mut numbers = [0.0; 6];
    for (slot, token) in numbers.iter_mut().zip(&tokens) {
        *slot = decimal(token).ok_or_else(|| {
            CatalogError::invalid_timestamp(value, format!("'{}' is not a decimal number", token))
        })?;
    }
    let [year, month, day, hour, minute, seconds] = numbers;

    let year = calendar_field(value, "year", year, 1900, 2999)?;
    let month = calendar_field(value, "month", month, 1, 12)?;
    let day = calendar_field(value, "day", day, 1, 31)?;
    let hour = calendar_field(value, "hour", hour, 0, 23)?;
    let minute = calendar_field(value, "minute", minute, 0, 59)?;

    if !(0.0..60.0).contains(&seconds) {
        return Err(CatalogError::invalid_timestamp(
            value,
            format!("seconds {} outside [0, 60)", seconds),
        ));
    }

    let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .ok_or_else(|| CatalogError::invalid_timestamp(value, "no such calendar date"))?;
    let start_of_minute = date
        .and_hms_opt(hour as u32, minute as u32, 0)
        .ok_or_else(|| CatalogError::invalid_timestamp(value, "invalid time of day"))?;

    let micros = (seconds * MICROS_PER_SECOND).round() as i64;
    Ok((start_of_minute + Duration::microseconds(micros)).and_utc())
}

/// Digits with at most one decimal point; no sign or exponent
fn decimal(token: &str) -> Option<f64> {
    let digits = token.bytes().filter(u8::is_ascii_digit).count();
    let points = token.bytes().filter(|b| *b == b'.').count();
    if digits == 0 || points > 1 || digits + points != token.len() {
        return None;
    }
    token.parse().ok()
}

fn calendar_field(value: &str, name: &str, field: f64, min: i64, max: i64) -> CatalogResult<i64> {
    if field.fract() != 0.0 || field < min as f64 || field > max as f64 {
        return Err(CatalogError::invalid_timestamp(
            value,
            format!("{} {} out of range", name, field),
        ));
    }
    Ok(field as i64)
}

/// Session length, present only when the last epoch is after the first
pub fn session_duration(first: DateTime<Utc>, last: Option<DateTime<Utc>>) -> Option<Duration> {
    last.filter(|last| *last > first).map(|last| last - first)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};

    #[test]
    fn test_parse_first_obs_line() {
        let ts = parse_epoch("  2025     3    10     5     0    0.0000000     GPS").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 3, 10, 5, 0, 0).unwrap());
    }

    #[test]
    fn test_fractional_seconds_round_to_micros() {
        let ts = parse_epoch("2024 12 31 23 59 12.3456789 GPS").unwrap();
        assert_eq!(ts.second(), 12);
        assert_eq!(ts.nanosecond(), 345_679_000);
    }

    #[test]
    fn test_rounding_carries_into_next_minute() {
        let ts = parse_epoch("2024 12 31 23 59 59.9999996").unwrap();
        assert_eq!(ts.year(), 2025);
        assert_eq!((ts.month(), ts.day(), ts.hour(), ts.minute()), (1, 1, 0, 0));
        assert_eq!(ts.second(), 0);
        assert_eq!(ts.nanosecond(), 0);
    }

    #[test]
    fn test_rejects_short_and_invalid_strings() {
        assert!(matches!(
            parse_epoch("2025 3 10 5 GPS"),
            Err(CatalogError::InvalidTimestamp { .. })
        ));
        assert!(parse_epoch("").is_err());
        assert!(parse_epoch("2025 13 10 5 0 0.0").is_err());
        assert!(parse_epoch("2025 2 30 5 0 0.0").is_err());
        assert!(parse_epoch("2025 3 10 5 0 60.0").is_err());
        assert!(parse_epoch("2025 3 10.5 5 0 0.0").is_err());
        assert!(parse_epoch("2025 3 10 5 0 -1.0").is_err());
    }

    #[test]
    fn test_rejects_garbage_between_fields() {
        assert!(parse_epoch("2025 3 x 10 5 0 0.0").is_err());
        assert!(parse_epoch("2025 3 10 5 0 GPS 0.0").is_err());
        assert!(parse_epoch("2025 3 1e1 5 0 0.0").is_err());
        assert!(parse_epoch("2025 3 10 5 0 inf").is_err());
        assert!(parse_epoch("2025 3 10 5 0 1.2.3").is_err());
        assert!(parse_epoch("2025 3 10 5 0 .").is_err());
        // trailing labels are still fine
        assert!(parse_epoch("2025 3 10 5 0 0. GPS extra").is_ok());
    }

    #[test]
    fn test_duration_only_when_last_after_first() {
        let first = parse_epoch("2025 3 10 5 0 0.0").unwrap();
        let last = parse_epoch("2025 3 10 6 30 0.0").unwrap();
        assert_eq!(session_duration(first, Some(last)), Some(Duration::minutes(90)));
        assert_eq!(session_duration(last, Some(first)), None);
        assert_eq!(session_duration(first, Some(first)), None);
        assert_eq!(session_duration(first, None), None);
    }
}
