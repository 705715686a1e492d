//! Monitored site data structure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CheckRecord, CheckStatus, UserId};

/// Outcome of the most recent check, as stored on the site row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    /// Never checked
    #[default]
    Pending,
    Success,
    Error,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Pending => "pending",
            SiteStatus::Success => "success",
            SiteStatus::Error => "error",
        }
    }
}

/// A web page watched on behalf of one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitoredSite {
    pub id: Uuid,

    /// Absolute http(s) URL
    pub url: String,

    /// Owning user
    pub owner_id: UserId,

    /// Time of the last check, successful or not
    pub last_checked: Option<DateTime<Utc>>,

    /// Digest of the last successfully fetched content
    pub last_content_hash: Option<String>,

    pub status: SiteStatus,

    pub created_at: DateTime<Utc>,
}

impl MonitoredSite {
    /// Create a site that has not been checked yet.
    pub fn new(url: impl Into<String>, owner_id: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            owner_id,
            last_checked: None,
            last_content_hash: None,
            status: SiteStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Fold a committed check into the row.
    ///
    /// Every check moves `last_checked`. Only a fetched record replaces the
    /// stored hash; an error record leaves it untouched.
    pub fn apply_check(&mut self, record: &CheckRecord) {
        self.last_checked = Some(record.check_time);
        match record.status {
            CheckStatus::Error => self.status = SiteStatus::Error,
            CheckStatus::Success | CheckStatus::Changed => {
                self.status = SiteStatus::Success;
                if let Some(digest) = &record.content_hash {
                    self.last_content_hash = Some(digest.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_site_is_pending() {
        let site = MonitoredSite::new("https://example.com", 1);
        assert_eq!(site.status, SiteStatus::Pending);
        assert!(site.last_checked.is_none());
        assert!(site.last_content_hash.is_none());
    }

    #[test]
    fn test_error_keeps_previous_hash() {
        let mut site = MonitoredSite::new("https://example.com", 1);
        let now = Utc::now();
        site.apply_check(&CheckRecord::fetched(site.id, CheckStatus::Success, "abc", now));
        site.apply_check(&CheckRecord::failed(site.id, "boom", now));

        assert_eq!(site.status, SiteStatus::Error);
        assert_eq!(site.last_checked, Some(now));
        assert_eq!(site.last_content_hash.as_deref(), Some("abc"));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&SiteStatus::Success).unwrap();
        assert_eq!(json, "\"success\"");
    }
}
