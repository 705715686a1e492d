// src/pipeline/batch.rs

//! Sequential multi-site runs.

use std::time::Duration;

use tokio::sync::watch;

use crate::error::AppError;
use crate::models::{CheckStatus, MonitoredSite};
use crate::pipeline::check::SiteChecker;
use crate::services::NotifierConfig;

/// Per-status counts of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    /// Completed checks, whatever their status
    pub checked: usize,
    pub changed: usize,
    pub errors: usize,
    /// Checks whose commit failed
    pub failed: usize,
    /// Sites deleted while the batch was running
    pub skipped: usize,
    pub stopped: bool,
}

impl BatchSummary {
    fn log(&self, title: &str) {
        crate::utils::log::summary(
            title,
            &[
                ("sites", self.total.to_string()),
                ("checked", self.checked.to_string()),
                ("changed", self.changed.to_string()),
                ("errors", self.errors.to_string()),
                ("failed", self.failed.to_string()),
                ("skipped", self.skipped.to_string()),
            ],
        );
    }
}

fn stop_requested(stop: Option<&watch::Receiver<bool>>) -> bool {
    stop.is_some_and(|rx| *rx.borrow())
}

/// Sleep between sites. Returns `true` if a stop arrived meanwhile.
async fn pause_between(pause: Duration, stop: Option<&watch::Receiver<bool>>) -> bool {
    let Some(stop) = stop else {
        tokio::time::sleep(pause).await;
        return false;
    };
    let mut stop = stop.clone();
    tokio::select! {
        _ = tokio::time::sleep(pause) => false,
        // A dropped sender counts as a stop
        _ = stop.wait_for(|stopped| *stopped) => true,
    }
}

/// Check `sites` one after another.
///
/// The checker re-reads each site before checking it, so `sites` may be a
/// stale listing; sites removed meanwhile are skipped. One site's failure
/// never stops the batch; a stop signal is honored between sites, never
/// mid-check.
pub async fn run_batch(
    checker: &SiteChecker,
    title: &str,
    sites: &[MonitoredSite],
    target: &NotifierConfig,
    pause: Duration,
    stop: Option<&watch::Receiver<bool>>,
) -> BatchSummary {
    let mut summary = BatchSummary {
        total: sites.len(),
        ..BatchSummary::default()
    };
    log::info!("{title}: checking {} sites", sites.len());

    for (index, site) in sites.iter().enumerate() {
        if stop_requested(stop) {
            log::info!("{title}: stop requested, {} sites left", sites.len() - index);
            summary.stopped = true;
            break;
        }
        if index > 0 && pause_between(pause, stop).await {
            log::info!("{title}: stop requested, {} sites left", sites.len() - index);
            summary.stopped = true;
            break;
        }

        match checker.check_site(site, target).await {
            Ok(outcome) => {
                summary.checked += 1;
                match outcome.status {
                    CheckStatus::Changed => summary.changed += 1,
                    CheckStatus::Error => summary.errors += 1,
                    CheckStatus::Success => {}
                }
            }
            Err(AppError::NotFound(_)) => {
                log::info!("Skipping {}: site was removed", site.url);
                summary.skipped += 1;
            }
            Err(e) => {
                log::error!("Error checking site {}: {e}", site.url);
                summary.failed += 1;
            }
        }
    }

    summary.log(title);
    summary
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::pipeline::check::testing::{Harness, StubSource};
    use crate::storage::HistoryStore;

    #[tokio::test]
    async fn test_one_failure_does_not_stop_batch() {
        let h = Harness::new(StubSource::serving([Ok("a"), Err("HTTP status 500"), Ok("c")]));
        let sites = vec![
            h.add_site(1, "https://a.example").await,
            h.add_site(1, "https://b.example").await,
            h.add_site(1, "https://c.example").await,
        ];

        let summary = run_batch(
            &h.checker,
            "test",
            &sites,
            &NotifierConfig::disabled(),
            Duration::ZERO,
            None,
        )
        .await;

        assert_eq!(summary.checked, 3);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(
            *h.source.fetched.lock().unwrap(),
            vec!["https://a.example", "https://b.example", "https://c.example"]
        );
    }

    #[tokio::test]
    async fn test_commit_failures_are_counted() {
        let h = Harness::new(StubSource::serving([Ok("a"), Ok("b")]));
        let sites = vec![
            h.add_site(1, "https://a.example").await,
            h.add_site(1, "https://b.example").await,
        ];
        h.store.fail_commits.store(true, Ordering::SeqCst);

        let summary = run_batch(
            &h.checker,
            "test",
            &sites,
            &NotifierConfig::disabled(),
            Duration::ZERO,
            None,
        )
        .await;

        assert_eq!(summary.failed, 2);
        assert_eq!(summary.checked, 0);
    }

    #[tokio::test]
    async fn test_removed_site_is_skipped() {
        let h = Harness::new(StubSource::serving([Ok("a")]));
        let gone = h.add_site(1, "https://gone.example").await;
        let kept = h.add_site(1, "https://kept.example").await;
        h.store.delete_site(gone.id).await.unwrap();

        let summary = run_batch(
            &h.checker,
            "test",
            &[gone, kept],
            &NotifierConfig::disabled(),
            Duration::ZERO,
            None,
        )
        .await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.checked, 1);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let h = Harness::new(StubSource::serving([Ok("a")]));
        let sites = vec![h.add_site(1, "https://a.example").await];
        let (_tx, rx) = watch::channel(true);

        let summary = run_batch(
            &h.checker,
            "test",
            &sites,
            &NotifierConfig::disabled(),
            Duration::ZERO,
            Some(&rx),
        )
        .await;

        assert!(summary.stopped);
        assert_eq!(summary.checked, 0);
        assert!(h.source.fetched.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_pause_finishes_current_site() {
        let h = Harness::new(StubSource::serving([Ok("a"), Ok("b")]));
        let sites = vec![
            h.add_site(1, "https://a.example").await,
            h.add_site(1, "https://b.example").await,
        ];
        let (tx, rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            tx.send(true).unwrap();
        });
        let summary = run_batch(
            &h.checker,
            "test",
            &sites,
            &NotifierConfig::disabled(),
            Duration::from_secs(1),
            Some(&rx),
        )
        .await;
        stopper.await.unwrap();

        assert!(summary.stopped);
        assert_eq!(summary.checked, 1);
    }
}
