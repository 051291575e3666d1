use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use log::info;

use crate::config::ConfigStore;
use crate::guard::StoreGuard;
use crate::models::{bucket_date, date_key};
use crate::store::KeyValueStore;

/// Deletes daily buckets older than the retention horizon.
pub struct RetentionCollector {
    durable: Arc<dyn KeyValueStore>,
    guard: Arc<StoreGuard>,
    config: Arc<ConfigStore>,
}

impl RetentionCollector {
    pub fn new(
        durable: Arc<dyn KeyValueStore>,
        guard: Arc<StoreGuard>,
        config: Arc<ConfigStore>,
    ) -> Self {
        Self {
            durable,
            guard,
            config,
        }
    }

    /// Removes every domain, path, and alert bucket dated strictly before
    /// `today - retention_days`. Idempotent; a pass with nothing to delete
    /// is a no-op. Returns the number of keys removed.
    pub async fn run(&self, today: NaiveDate) -> Result<usize> {
        let horizon = self.config.config().retention_days;
        let cutoff = date_key(today - Duration::days(horizon));

        let _permit = self.guard.acquire().await;

        let keys = self.durable.list_keys().await?;
        let expired: Vec<String> = keys
            .into_iter()
            .filter(|key| {
                bucket_date(key)
                    .map(|date| date < cutoff.as_str())
                    .unwrap_or(false)
            })
            .collect();

        if expired.is_empty() {
            return Ok(0);
        }

        let removed = expired.len();
        self.durable.remove(&expired).await?;
        info!("retention pass removed {removed} bucket keys older than {cutoff}");

        Ok(removed)
    }
}
