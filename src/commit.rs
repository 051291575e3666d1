use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, NaiveDate};

use crate::models::{
    paths_key, stats_key, DomainBucket, PathBucket, TrackedSession, OVERFLOW_PATH, PATH_CAP,
};
use crate::store::{decode_entry, KeyValueStore};

/// One calendar date's share of a committed interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedSlice {
    pub date: NaiveDate,
    pub seconds: u64,
}

/// Result of applying the elapsed interval to the daily buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Whether any positive time elapsed since the checkpoint. An
    /// incremental caller advances `last_checkpoint` exactly when this is
    /// true, even if flooring left nothing to write.
    pub advanced: bool,
    pub slices: Vec<DatedSlice>,
}

impl CommitOutcome {
    fn noop() -> Self {
        Self {
            advanced: false,
            slices: Vec::new(),
        }
    }
}

fn local_midnight(date: NaiveDate) -> Result<DateTime<Local>> {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("invalid midnight for {date}"))?;
    // DST can make a local midnight ambiguous; take the earliest instant.
    naive
        .and_local_timezone(Local)
        .earliest()
        .ok_or_else(|| anyhow!("no local representation for midnight of {date}"))
}

/// Splits the interval since the checkpoint into per-date whole-second
/// slices.
///
/// A non-positive interval yields no slices (clock skew or a duplicate
/// event). When the interval crosses a day boundary, the checkpoint's date
/// receives the pre-midnight remainder and today receives the time since
/// its own midnight. Durations are floored to whole seconds; sub-second
/// remainders are dropped, not carried forward. Zero-second slices are
/// omitted.
pub fn split_interval(
    last_checkpoint: DateTime<Local>,
    now: DateTime<Local>,
) -> Result<Vec<DatedSlice>> {
    let delta_ms = (now - last_checkpoint).num_milliseconds();
    if delta_ms <= 0 {
        return Ok(Vec::new());
    }

    let old_date = last_checkpoint.date_naive();
    let new_date = now.date_naive();

    let mut slices = Vec::with_capacity(2);

    if old_date == new_date {
        push_slice(&mut slices, old_date, delta_ms);
        return Ok(slices);
    }

    let boundary = old_date
        .succ_opt()
        .ok_or_else(|| anyhow!("calendar overflow after {old_date}"))?;
    let pre_ms = (local_midnight(boundary)? - last_checkpoint).num_milliseconds();
    push_slice(&mut slices, old_date, pre_ms);

    let post_ms = (now - local_midnight(new_date)?).num_milliseconds();
    push_slice(&mut slices, new_date, post_ms);

    Ok(slices)
}

fn push_slice(slices: &mut Vec<DatedSlice>, date: NaiveDate, millis: i64) {
    let seconds = (millis.max(0) / 1000) as u64;
    if seconds > 0 {
        slices.push(DatedSlice { date, seconds });
    }
}

/// Applies elapsed deltas to the per-day domain and path buckets.
#[derive(Clone)]
pub struct CommitEngine {
    durable: Arc<dyn KeyValueStore>,
}

impl CommitEngine {
    pub fn new(durable: Arc<dyn KeyValueStore>) -> Self {
        Self { durable }
    }

    /// Attributes the time elapsed since the session's checkpoint.
    ///
    /// Caller must hold the [`StoreGuard`](crate::guard::StoreGuard); the
    /// store has no transactions, and the guard is what keeps this
    /// read-modify-write from interleaving with other writers.
    pub async fn apply(
        &self,
        session: &TrackedSession,
        now: DateTime<Local>,
    ) -> Result<CommitOutcome> {
        let delta_ms = (now - session.last_checkpoint).num_milliseconds();
        if delta_ms <= 0 {
            return Ok(CommitOutcome::noop());
        }

        let slices = split_interval(session.last_checkpoint, now)?;
        for slice in &slices {
            self.apply_slice(session, slice).await?;
        }

        Ok(CommitOutcome {
            advanced: true,
            slices,
        })
    }

    async fn apply_slice(&self, session: &TrackedSession, slice: &DatedSlice) -> Result<()> {
        let stats_key = stats_key(slice.date);
        let paths_key = paths_key(slice.date);

        let fetched = self
            .durable
            .get(&[stats_key.clone(), paths_key.clone()])
            .await?;
        let mut stats: DomainBucket = decode_entry(&fetched, &stats_key)?.unwrap_or_default();
        let mut paths: PathBucket = decode_entry(&fetched, &paths_key)?.unwrap_or_default();

        *stats.entry(session.domain.clone()).or_insert(0) += slice.seconds;

        let domain_paths = paths.entry(session.domain.clone()).or_default();
        let slot = path_slot(domain_paths, &session.current_path);
        *domain_paths.entry(slot).or_insert(0) += slice.seconds;

        // Both bucket kinds for the date go out in one write so readers
        // never observe a torn intermediate state.
        let mut entries = HashMap::new();
        entries.insert(stats_key, serde_json::to_value(&stats)?);
        entries.insert(paths_key, serde_json::to_value(&paths)?);
        self.durable.set(entries).await?;

        Ok(())
    }
}

/// Picks the path entry to increment: an existing entry, a new one while
/// the domain-day is under the cap, or the overflow accumulator.
fn path_slot(domain_paths: &HashMap<String, u64>, path: &str) -> String {
    if domain_paths.contains_key(path) {
        return path.to_string();
    }
    let explicit = domain_paths
        .keys()
        .filter(|key| key.as_str() != OVERFLOW_PATH)
        .count();
    if explicit < PATH_CAP {
        path.to_string()
    } else {
        OVERFLOW_PATH.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(
        y: i32,
        mo: u32,
        d: u32,
        h: u32,
        mi: u32,
        s: u32,
    ) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .single()
            .expect("unambiguous local time")
    }

    #[test]
    fn test_same_day_single_slice() {
        let last = at(2026, 6, 1, 10, 0, 0);
        let now = at(2026, 6, 1, 10, 1, 30);
        let slices = split_interval(last, now).unwrap();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].date, last.date_naive());
        assert_eq!(slices[0].seconds, 90);
    }

    #[test]
    fn test_non_positive_delta_yields_nothing() {
        let last = at(2026, 6, 1, 10, 0, 0);
        assert!(split_interval(last, last).unwrap().is_empty());
        assert!(split_interval(last, at(2026, 6, 1, 9, 59, 59))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_midnight_split_conserves_total() {
        let last = at(2026, 6, 1, 23, 59, 30);
        let now = at(2026, 6, 2, 0, 0, 30);
        let slices = split_interval(last, now).unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].date, last.date_naive());
        assert_eq!(slices[0].seconds, 30);
        assert_eq!(slices[1].date, now.date_naive());
        assert_eq!(slices[1].seconds, 30);
        assert_eq!(slices[0].seconds + slices[1].seconds, 60);
    }

    #[test]
    fn test_sub_second_remainders_are_floored() {
        let last = at(2026, 6, 1, 10, 0, 0) + chrono::Duration::milliseconds(400);
        let now = at(2026, 6, 1, 10, 0, 2);
        let slices = split_interval(last, now).unwrap();
        assert_eq!(slices[0].seconds, 1);
    }

    #[test]
    fn test_sub_second_interval_yields_no_slice() {
        let last = at(2026, 6, 1, 10, 0, 0);
        let now = last + chrono::Duration::milliseconds(900);
        assert!(split_interval(last, now).unwrap().is_empty());
    }

    #[test]
    fn test_path_slot_respects_cap() {
        let mut domain_paths = HashMap::new();
        for i in 0..PATH_CAP {
            domain_paths.insert(format!("/page{i}"), 1);
        }
        // Existing entries are still incremented directly.
        assert_eq!(path_slot(&domain_paths, "/page0"), "/page0");
        // A new path past the cap lands in the overflow accumulator.
        assert_eq!(path_slot(&domain_paths, "/fresh"), OVERFLOW_PATH);

        domain_paths.remove("/page0");
        assert_eq!(path_slot(&domain_paths, "/fresh"), "/fresh");
    }
}
