//! Human-readable formatting for operator-facing output.

use std::time::Duration;

use crate::slots::distribution::compact_ranges;

/// Format a count with K/M suffixes: `123`, `1.5K`, `2.5M`.
pub fn format_count(n: i64) -> String {
    if n < 0 {
        return format!("-{}", format_count(-n));
    }
    if n < 1_000 {
        n.to_string()
    } else if n < 1_000_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    }
}

/// Format a duration coarsely: milliseconds under a second, seconds under a
/// minute, minutes otherwise.
pub fn format_duration(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else if d < Duration::from_secs(60) {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{:.1}m", d.as_secs_f64() / 60.0)
    }
}

/// Render a slot list as compact ranges: `0-2, 5, 7-8`.
pub fn format_slot_ranges(slots: &[u16]) -> String {
    if slots.is_empty() {
        return "none".to_string();
    }
    compact_ranges(slots)
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a slot list for summaries, eliding the middle of long lists.
pub fn summarize_slots(slots: &[u16]) -> String {
    if slots.is_empty() {
        return "none".to_string();
    }
    if slots.len() <= 10 {
        return slots
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ");
    }
    let head: Vec<String> = slots[..3].iter().map(|s| s.to_string()).collect();
    let tail: Vec<String> = slots[slots.len() - 3..]
        .iter()
        .map(|s| s.to_string())
        .collect();
    format!("{}, ..., {}", head.join(", "), tail.join(", "))
}

/// Shorten a 40-character node id for compact listings.
pub fn short_id(id: &str) -> String {
    if id.len() <= 8 {
        id.to_string()
    } else {
        format!("{}...", &id[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_formatting() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(123), "123");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_000), "1.0K");
        assert_eq!(format_count(1_500), "1.5K");
        assert_eq!(format_count(999_999), "1000.0K");
        assert_eq!(format_count(1_000_000), "1.0M");
        assert_eq!(format_count(2_500_000), "2.5M");
        assert_eq!(format_count(123_456_789), "123.5M");
        assert_eq!(format_count(-1_500), "-1.5K");
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1.5m");
    }

    #[test]
    fn slot_range_formatting() {
        assert_eq!(format_slot_ranges(&[]), "none");
        assert_eq!(format_slot_ranges(&[0, 1, 2, 5, 7, 8]), "0-2, 5, 7-8");
    }

    #[test]
    fn slot_summaries_elide_long_lists() {
        assert_eq!(summarize_slots(&[]), "none");
        assert_eq!(summarize_slots(&[1, 2, 3]), "1, 2, 3");
        let long: Vec<u16> = (0..100).collect();
        assert_eq!(summarize_slots(&long), "0, 1, 2, ..., 97, 98, 99");
    }

    #[test]
    fn short_ids() {
        assert_eq!(short_id("abcd"), "abcd");
        assert_eq!(
            short_id("07c37dfeb235213a872192d90877d0cd55635b91"),
            "07c37dfe..."
        );
    }
}
