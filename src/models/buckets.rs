use std::collections::HashMap;

use chrono::NaiveDate;

pub const STATS_PREFIX: &str = "stats_";
pub const PATHS_PREFIX: &str = "paths_";
pub const ALERTS_PREFIX: &str = "alerts_";

/// Overflow accumulator absorbing paths beyond the per-domain cap.
pub const OVERFLOW_PATH: &str = "(other)";

/// Maximum number of explicit path entries per domain-day. The 51st
/// distinct path and beyond accumulates into [`OVERFLOW_PATH`] instead.
pub const PATH_CAP: usize = 50;

/// domain -> accumulated whole seconds for one calendar date.
pub type DomainBucket = HashMap<String, u64>;

/// domain -> (path -> accumulated whole seconds) for one calendar date.
pub type PathBucket = HashMap<String, HashMap<String, u64>>;

/// domain -> "already notified today" for one calendar date.
pub type AlertRecord = HashMap<String, bool>;

/// Zero-padded local calendar date, e.g. `2026-08-29`. Zero padding keeps
/// lexicographic comparison of date components valid.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn stats_key(date: NaiveDate) -> String {
    format!("{STATS_PREFIX}{}", date_key(date))
}

pub fn paths_key(date: NaiveDate) -> String {
    format!("{PATHS_PREFIX}{}", date_key(date))
}

pub fn alerts_key(date: NaiveDate) -> String {
    format!("{ALERTS_PREFIX}{}", date_key(date))
}

/// Returns the embedded date component when `key` belongs to one of the
/// daily bucket kinds, `None` for unrelated store keys.
pub fn bucket_date(key: &str) -> Option<&str> {
    for prefix in [STATS_PREFIX, PATHS_PREFIX, ALERTS_PREFIX] {
        if let Some(date) = key.strip_prefix(prefix) {
            return Some(date);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_key_formats_are_zero_padded() {
        assert_eq!(stats_key(date(2026, 3, 7)), "stats_2026-03-07");
        assert_eq!(paths_key(date(2026, 3, 7)), "paths_2026-03-07");
        assert_eq!(alerts_key(date(2026, 12, 31)), "alerts_2026-12-31");
    }

    #[test]
    fn test_bucket_date_extraction() {
        assert_eq!(bucket_date("stats_2026-01-02"), Some("2026-01-02"));
        assert_eq!(bucket_date("paths_2026-01-02"), Some("2026-01-02"));
        assert_eq!(bucket_date("alerts_2026-01-02"), Some("2026-01-02"));
        assert_eq!(bucket_date("current_session"), None);
        assert_eq!(bucket_date("settings"), None);
    }

    #[test]
    fn test_date_keys_compare_lexicographically() {
        assert!(date_key(date(2026, 9, 30)) < date_key(date(2026, 10, 1)));
        assert!(date_key(date(2025, 12, 31)) < date_key(date(2026, 1, 1)));
    }
}
