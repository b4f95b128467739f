//! Usage statistics: a read-only projection over stored records

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::credential::EncryptedCredential;
use crate::provider::Provider;

/// Derived, never persisted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub total: usize,
    pub by_provider: BTreeMap<Provider, usize>,
    /// keyId -> last reported use, only for records that have one
    pub last_used: BTreeMap<String, DateTime<Utc>>,
    pub expired: BTreeSet<String>,
}

impl UsageStats {
    /// Aggregate over records as of `now`
    pub fn compute(records: &[EncryptedCredential], now: DateTime<Utc>, max_age: Duration) -> Self {
        let mut stats = Self {
            total: records.len(),
            ..Self::default()
        };

        for record in records {
            *stats.by_provider.entry(record.provider).or_insert(0) += 1;

            if let Some(last_used) = record.last_used {
                stats.last_used.insert(record.key_id.clone(), last_used);
            }
            if record.is_expired(now, max_age) {
                stats.expired.insert(record.key_id.clone());
            }
        }

        stats
    }

    pub fn count_for(&self, provider: Provider) -> usize {
        self.by_provider.get(&provider).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(provider: Provider, days_old: i64) -> EncryptedCredential {
        let mut r = EncryptedCredential::new(provider, "payload".to_string());
        r.created_at = Utc::now() - Duration::days(days_old);
        r
    }

    #[test]
    fn test_empty() {
        let stats = UsageStats::compute(&[], Utc::now(), Duration::days(90));
        assert_eq!(stats.total, 0);
        assert!(stats.by_provider.is_empty());
        assert_eq!(stats.count_for(Provider::OpenAi), 0);
    }

    #[test]
    fn test_counts_and_expiry() {
        let now = Utc::now();
        let mut used = record(Provider::OpenAi, 10);
        used.last_used = Some(now - Duration::hours(2));
        let stale = record(Provider::OpenAi, 91);
        let fresh = record(Provider::Anthropic, 89);

        let stats = UsageStats::compute(
            &[used.clone(), stale.clone(), fresh.clone()],
            now,
            Duration::days(90),
        );

        assert_eq!(stats.total, 3);
        assert_eq!(stats.count_for(Provider::OpenAi), 2);
        assert_eq!(stats.count_for(Provider::Anthropic), 1);
        assert_eq!(stats.last_used.len(), 1);
        assert_eq!(stats.last_used.get(&used.key_id), used.last_used.as_ref());
        assert!(stats.expired.contains(&stale.key_id));
        assert!(!stats.expired.contains(&fresh.key_id));
    }
}
