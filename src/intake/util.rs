use crate::error::{IntakeError, IntakeResult};
use std::time::{SystemTime, UNIX_EPOCH};

pub const SECS_PER_DAY: u64 = 86_400;

/// Return the current Unix epoch in seconds.
pub fn now_epoch_secs() -> IntakeResult<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| IntakeError::StoreUnavailable("system clock is before UNIX_EPOCH".into()))
}

pub fn now_epoch_millis() -> IntakeResult<u128> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .map_err(|_| IntakeError::StoreUnavailable("system clock is before UNIX_EPOCH".into()))
}

/// Truncate `input` to at most `max_chars` Unicode characters, stripping
/// control characters and appending `…` when truncated.
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    let clean: String = input
        .chars()
        .map(|c| if c == '\n' || c == '\t' { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect();
    if clean.chars().count() > max_chars {
        let mut s: String = clean.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        clean
    }
}

/// First `max_chars` characters, no ellipsis. Used for fallback summaries.
pub fn leading_chars(input: &str, max_chars: usize) -> String {
    input.trim().chars().take(max_chars).collect()
}

pub fn days_to_secs(days: u64) -> u64 {
    days.saturating_mul(SECS_PER_DAY)
}

pub fn render_epoch(epoch_secs: u64) -> String {
    use chrono::{TimeZone, Utc};
    match Utc.timestamp_opt(epoch_secs as i64, 0).single() {
        Some(ts) => ts.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => epoch_secs.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_flattens_newlines_and_marks_cut() {
        assert_eq!(truncate_with_ellipsis("ab\ncd", 10), "ab cd");
        assert_eq!(truncate_with_ellipsis("abcdef", 3), "abc…");
    }

    #[test]
    fn render_epoch_is_utc_iso() {
        assert_eq!(render_epoch(0), "1970-01-01T00:00:00Z");
    }
}
