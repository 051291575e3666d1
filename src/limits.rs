use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use log::info;
use serde::{Deserialize, Serialize};

use crate::config::ConfigStore;
use crate::models::{alerts_key, stats_key, AlertRecord, DomainBucket};
use crate::store::{decode_entry, KeyValueStore};

/// A daily time budget for a domain or parent domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LimitRule {
    /// Exact domain (`example.com`) or parent domain matched against
    /// subdomains (`mail.example.com` matches pattern `example.com`).
    pub pattern: String,
    pub seconds: u64,
}

/// Delivery target for limit alerts. Fire-and-forget; rendering is the
/// embedder's concern.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Default sink routing alerts to the process log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        info!("notification: {title}: {message}");
    }
}

/// Resolves the first rule matching `domain`: an exact match or a parent
/// domain the domain is a subdomain of. Rules are checked in listed order.
pub fn resolve_limit<'a>(rules: &'a [LimitRule], domain: &str) -> Option<&'a LimitRule> {
    rules.iter().find(|rule| {
        domain == rule.pattern || domain.ends_with(&format!(".{}", rule.pattern))
    })
}

/// Checks a domain's accumulated time against its configured limit and
/// emits at most one notification per domain per calendar date.
#[derive(Clone)]
pub struct LimitEvaluator {
    durable: Arc<dyn KeyValueStore>,
    config: Arc<ConfigStore>,
    notifier: Arc<dyn NotificationSink>,
}

impl LimitEvaluator {
    pub fn new(
        durable: Arc<dyn KeyValueStore>,
        config: Arc<ConfigStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            durable,
            config,
            notifier,
        }
    }

    /// Caller must hold the [`StoreGuard`](crate::guard::StoreGuard): the
    /// alert-record read and write have to sit in one exclusive region or
    /// two racing commits could both decide to notify.
    pub async fn check_domain(&self, domain: &str, today: NaiveDate) -> Result<()> {
        let rules = self.config.limits();
        let Some(rule) = resolve_limit(&rules, domain) else {
            return Ok(());
        };

        let stats_key = stats_key(today);
        let alerts_key = alerts_key(today);
        let fetched = self
            .durable
            .get(&[stats_key.clone(), alerts_key.clone()])
            .await?;

        let stats: DomainBucket = decode_entry(&fetched, &stats_key)?.unwrap_or_default();
        let total = stats.get(domain).copied().unwrap_or(0);
        if total < rule.seconds {
            return Ok(());
        }

        let mut alerts: AlertRecord = decode_entry(&fetched, &alerts_key)?.unwrap_or_default();
        if alerts.get(domain).copied().unwrap_or(false) {
            return Ok(());
        }

        self.notifier.notify(
            "Time limit reached",
            &format!(
                "{domain}: {} today (limit {})",
                format_duration(total),
                format_duration(rule.seconds)
            ),
        );

        alerts.insert(domain.to_string(), true);
        let mut entries = HashMap::new();
        entries.insert(alerts_key, serde_json::to_value(&alerts)?);
        self.durable.set(entries).await?;

        Ok(())
    }
}

fn format_duration(total_secs: u64) -> String {
    let minutes = total_secs / 60;
    if minutes >= 60 {
        format!("{}h {:02}m", minutes / 60, minutes % 60)
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        format!("{total_secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(patterns: &[(&str, u64)]) -> Vec<LimitRule> {
        patterns
            .iter()
            .map(|(pattern, seconds)| LimitRule {
                pattern: pattern.to_string(),
                seconds: *seconds,
            })
            .collect()
    }

    #[test]
    fn test_exact_match_resolves() {
        let rules = rules(&[("example.com", 600)]);
        let rule = resolve_limit(&rules, "example.com").unwrap();
        assert_eq!(rule.seconds, 600);
    }

    #[test]
    fn test_parent_domain_matches_subdomains() {
        let rules = rules(&[("example.com", 600)]);
        assert!(resolve_limit(&rules, "mail.example.com").is_some());
        assert!(resolve_limit(&rules, "a.b.example.com").is_some());
        // A lookalike suffix without the dot boundary must not match.
        assert!(resolve_limit(&rules, "notexample.com").is_none());
    }

    #[test]
    fn test_first_listed_rule_wins() {
        let rules = rules(&[("mail.example.com", 100), ("example.com", 600)]);
        let rule = resolve_limit(&rules, "mail.example.com").unwrap();
        assert_eq!(rule.seconds, 100);
    }

    #[test]
    fn test_no_rule_no_match() {
        let rules = rules(&[("example.com", 600)]);
        assert!(resolve_limit(&rules, "other.org").is_none());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(300), "5m");
        assert_eq!(format_duration(3900), "1h 05m");
    }
}
