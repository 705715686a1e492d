// src/pipeline/check.rs

//! Single-site check: fetch, hash, compare, commit, notify, prune.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{CheckRecord, CheckStatus, MonitoredSite};
use crate::pipeline::hash::{content_hash, short};
use crate::pipeline::retention::RetentionPolicy;
use crate::services::{DispatchReport, Notifier, NotifierConfig, PageSource, SiteEvent};
use crate::storage::HistoryStore;

/// Result of one completed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub site_id: Uuid,
    pub url: String,
    pub status: CheckStatus,
    /// Digest of the fetched content, absent on error
    pub digest: Option<String>,
    pub error: Option<String>,
    /// `None` when nothing was worth sending
    pub notifications: Option<DispatchReport>,
}

impl CheckOutcome {
    pub fn has_changed(&self) -> bool {
        self.status == CheckStatus::Changed
    }
}

/// Compare a fresh digest with the stored one.
///
/// A site without a stored digest is on its first observation, which is
/// never a change.
pub fn detect_change(previous: Option<&str>, current: &str) -> CheckStatus {
    match previous {
        Some(previous) if previous != current => CheckStatus::Changed,
        _ => CheckStatus::Success,
    }
}

/// One async lock per site, so checks of the same site never interleave.
#[derive(Default)]
struct SiteLocks(Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>);

impl SiteLocks {
    async fn acquire(&self, site_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Drop locks nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(site_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Runs checks against one store with one notifier.
///
/// Clones share the per-site locks.
#[derive(Clone)]
pub struct SiteChecker {
    source: Arc<dyn PageSource>,
    store: Arc<dyn HistoryStore>,
    notifier: Notifier,
    retention: RetentionPolicy,
    locks: Arc<SiteLocks>,
}

impl SiteChecker {
    pub fn new(
        source: Arc<dyn PageSource>,
        store: Arc<dyn HistoryStore>,
        notifier: Notifier,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            source,
            store,
            notifier,
            retention,
            locks: Arc::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }

    /// Check `site` once and record the result.
    ///
    /// Checks of one site are serialized, and the row is re-read once the
    /// site's lock is held, so the comparison always uses the latest digest
    /// whatever snapshot the caller passed in.
    ///
    /// Fetch and hash failures become error records and never surface here.
    /// `Err` means the site no longer exists ([`AppError::NotFound`]) or the
    /// commit of a successful fetch failed, in which case nothing is notified.
    pub async fn check_site(
        &self,
        site: &MonitoredSite,
        target: &NotifierConfig,
    ) -> Result<CheckOutcome> {
        let _guard = self.locks.acquire(site.id).await;
        let site = self
            .store
            .get_site(site.id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("site {} ({})", site.id, site.url)))?;
        let checked_at = Utc::now();

        let fetched = self
            .source
            .fetch_text(&site.url)
            .await
            .and_then(|text| content_hash(&text));

        let digest = match fetched {
            Ok(digest) => digest,
            Err(e) => return Ok(self.record_failure(&site, target, e).await),
        };

        let status = detect_change(site.last_content_hash.as_deref(), &digest);
        let record = CheckRecord::fetched(site.id, status, &digest, checked_at);

        if let Err(e) = self.store.commit_check(&record).await {
            log::error!("Failed to save check for {}: {e}", site.url);
            return Err(e);
        }

        match status {
            CheckStatus::Changed => log::info!(
                "Change detected on {} ({} -> {})",
                site.url,
                site.last_content_hash.as_deref().map(short).unwrap_or("-"),
                short(&digest)
            ),
            _ => log::info!("No change on {} ({})", site.url, short(&digest)),
        }

        let notifications = if status == CheckStatus::Changed {
            let event = SiteEvent::Changed {
                url: site.url.clone(),
            };
            Some(self.notifier.notify(target, &event).await)
        } else {
            None
        };

        if let Err(e) = self.retention.prune(self.store.as_ref(), site.id).await {
            log::warn!("Cleanup after check failed for {}: {e}", site.url);
        }

        Ok(CheckOutcome {
            site_id: site.id,
            url: site.url.clone(),
            status,
            digest: Some(digest),
            error: None,
            notifications,
        })
    }

    async fn record_failure(
        &self,
        site: &MonitoredSite,
        target: &NotifierConfig,
        error: AppError,
    ) -> CheckOutcome {
        let message = error.to_string();
        if error.is_check_failure() {
            log::warn!("Check failed for {}: {message}", site.url);
        } else {
            log::error!("Unexpected error checking {}: {message}", site.url);
        }

        // Time of failure, not of the start of the fetch
        let failed_at = Utc::now();
        let record = CheckRecord::failed(site.id, &message, failed_at);

        let notifications = match self.store.commit_check(&record).await {
            Ok(_) => {
                let event = SiteEvent::Failed {
                    url: site.url.clone(),
                    error: message.clone(),
                };
                Some(self.notifier.notify(target, &event).await)
            }
            Err(e) => {
                log::error!("Failed to save error check for {}: {e}", site.url);
                None
            }
        };

        CheckOutcome {
            site_id: site.id,
            url: site.url.clone(),
            status: CheckStatus::Error,
            digest: None,
            error: Some(message),
            notifications,
        }
    }
}
