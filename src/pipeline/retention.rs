// src/pipeline/retention.rs

//! Check history pruning.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::Result;
use crate::models::{CheckStatus, RetentionConfig};
use crate::storage::HistoryStore;

/// Keeps the latest "changed" record plus the `keep_recent` newest others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_recent: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { keep_recent: 3 }
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self {
            keep_recent: config.keep_recent,
        }
    }
}

/// Totals of a maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneSummary {
    pub sites: usize,
    pub deleted: usize,
    pub failed: usize,
}

impl RetentionPolicy {
    /// Prune one site. Idempotent; returns the number of deleted records.
    pub async fn prune(&self, store: &dyn HistoryStore, site_id: Uuid) -> Result<usize> {
        let changed = store
            .latest_check_with_status(site_id, CheckStatus::Changed)
            .await?;
        let exclude = changed.as_ref().map(|c| c.id);

        let mut keep: Vec<Uuid> = store
            .recent_checks(site_id, self.keep_recent, exclude)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        keep.extend(exclude);

        let deleted = store.delete_checks_except(site_id, &keep).await?;
        if deleted > 0 {
            log::debug!("Pruned {deleted} old checks for site {site_id}");
        }
        Ok(deleted)
    }

    /// Prune every site. A failing site is logged and skipped.
    pub async fn prune_all(&self, store: Arc<dyn HistoryStore>) -> Result<PruneSummary> {
        let sites = store.list_sites().await?;
        let mut summary = PruneSummary {
            sites: sites.len(),
            ..PruneSummary::default()
        };

        for site in &sites {
            match self.prune(store.as_ref(), site.id).await {
                Ok(deleted) => summary.deleted += deleted,
                Err(e) => {
                    log::error!("Cleanup failed for {}: {e}", site.url);
                    summary.failed += 1;
                }
            }
        }

        crate::utils::log::summary(
            "Cleanup",
            &[
                ("sites", summary.sites.to_string()),
                ("deleted", summary.deleted.to_string()),
                ("failed", summary.failed.to_string()),
            ],
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::{CheckRecord, MonitoredSite, User};
    use crate::storage::LocalStorage;

    async fn seeded(statuses: &[CheckStatus]) -> (LocalStorage, MonitoredSite, Vec<Uuid>) {
        let store = LocalStorage::in_memory();
        store.upsert_user(User::new(1, "ana", "ana@example.com")).await.unwrap();
        let site = store
            .insert_site(MonitoredSite::new("https://example.com", 1))
            .await
            .unwrap();

        let base = Utc::now();
        let mut ids = Vec::new();
        for (i, status) in statuses.iter().enumerate() {
            let at = base + Duration::seconds(i as i64);
            let record = CheckRecord::fetched(site.id, *status, format!("h{i}"), at);
            ids.push(record.id);
            store.commit_check(&record).await.unwrap();
        }
        (store, site, ids)
    }

    fn remaining(checks: &[CheckRecord]) -> Vec<Uuid> {
        let mut ids: Vec<_> = checks.iter().map(|c| c.id).collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_unchanged_history_keeps_three() {
        let (store, site, ids) = seeded(&[CheckStatus::Success; 6]).await;
        let policy = RetentionPolicy::default();

        assert_eq!(policy.prune(&store, site.id).await.unwrap(), 3);

        let mut expected = ids[3..].to_vec();
        expected.sort();
        assert_eq!(remaining(&store.list_checks(site.id).await.unwrap()), expected);
    }

    #[tokio::test]
    async fn test_old_change_is_kept() {
        use CheckStatus::*;
        let (store, site, ids) = seeded(&[Success, Changed, Success, Success, Success, Success]).await;

        RetentionPolicy::default().prune(&store, site.id).await.unwrap();

        let mut expected = vec![ids[1], ids[3], ids[4], ids[5]];
        expected.sort();
        assert_eq!(remaining(&store.list_checks(site.id).await.unwrap()), expected);
    }

    #[tokio::test]
    async fn test_recent_change_is_not_double_counted() {
        use CheckStatus::*;
        let (store, site, ids) = seeded(&[Success, Success, Success, Success, Changed]).await;

        RetentionPolicy::default().prune(&store, site.id).await.unwrap();

        let mut expected = vec![ids[1], ids[2], ids[3], ids[4]];
        expected.sort();
        assert_eq!(remaining(&store.list_checks(site.id).await.unwrap()), expected);
    }

    #[tokio::test]
    async fn test_prune_is_idempotent() {
        let (store, site, _) = seeded(&[CheckStatus::Success; 5]).await;
        let policy = RetentionPolicy::default();

        policy.prune(&store, site.id).await.unwrap();
        assert_eq!(policy.prune(&store, site.id).await.unwrap(), 0);
        assert_eq!(store.list_checks(site.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_prune_all_counts() {
        let (store, _, _) = seeded(&[CheckStatus::Success; 5]).await;
        let summary = RetentionPolicy { keep_recent: 1 }
            .prune_all(Arc::new(store))
            .await
            .unwrap();
        assert_eq!(
            summary,
            PruneSummary {
                sites: 1,
                deleted: 4,
                failed: 0
            }
        );
    }
}
