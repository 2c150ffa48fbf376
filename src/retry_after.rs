//! `Retry-After` header parsing.
//!
//! Recognized forms: a decimal integer (seconds), an HTTP-date (RFC 7231
//! §7.1.1.1), or anything else, recorded verbatim with type `unknown`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAfterKind {
    Seconds,
    HttpDate,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAfter {
    pub seconds: u64,
    pub kind: RetryAfterKind,
    pub raw: String,
}

/// Parse a raw `Retry-After` header value against the current time.
pub fn parse(value: &str, now: SystemTime) -> RetryAfter {
    let trimmed = value.trim();

    if let Ok(secs) = trimmed.parse::<u64>() {
        return RetryAfter {
            seconds: secs,
            kind: RetryAfterKind::Seconds,
            raw: trimmed.to_string(),
        };
    }

    if let Some(target) = parse_http_date(trimmed) {
        let now_secs = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let seconds = target.saturating_sub(now_secs);
        return RetryAfter {
            seconds,
            kind: RetryAfterKind::HttpDate,
            raw: trimmed.to_string(),
        };
    }

    RetryAfter {
        seconds: 0,
        kind: RetryAfterKind::Unknown,
        raw: trimmed.to_string(),
    }
}

pub fn as_duration(retry_after: &RetryAfter) -> Duration {
    Duration::from_secs(retry_after.seconds)
}

/// Parse an RFC 7231 IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`) into Unix
/// seconds. Only the one fixed-width form the providers in scope emit is
/// supported, no obs-date fallback.
fn parse_http_date(text: &str) -> Option<u64> {
    let bytes = text.as_bytes();
    if bytes.len() != 29 || !text.ends_with("GMT") {
        return None;
    }
    // "Sun, 06 Nov 1994 08:49:37 GMT"
    //  0123456789012345678901234567890
    let day: u64 = text.get(5..7)?.parse().ok()?;
    let month = month_index(text.get(8..11)?)?;
    let year: u64 = text.get(12..16)?.parse().ok()?;
    let hour: u64 = text.get(17..19)?.parse().ok()?;
    let minute: u64 = text.get(20..22)?.parse().ok()?;
    let second: u64 = text.get(23..25)?.parse().ok()?;

    Some(days_from_civil(year, month, day) * 86_400 + hour * 3_600 + minute * 60 + second)
}

fn month_index(name: &str) -> Option<u64> {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    MONTHS.iter().position(|m| *m == name).map(|i| i as u64 + 1)
}

/// Days since the Unix epoch for a given civil (proleptic Gregorian) date.
/// Howard Hinnant's `days_from_civil` algorithm.
fn days_from_civil(y: u64, m: u64, d: u64) -> u64 {
    let y = y as i64 - i64::from(m <= 2);
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400; // [0, 399]
    let mp = (m as i64 + 9) % 12; // [0, 11]
    let doy = (153 * mp + 2) / 5 + d as i64 - 1; // [0, 365]
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy; // [0, 146096]
    (era * 146_097 + doe - 719_468) as u64
}
