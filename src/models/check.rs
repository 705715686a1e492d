//! Check history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of a single check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// Fetched; content unchanged or first observation
    Success,
    /// Fetched; content differs from the previous digest
    Changed,
    /// Fetch or hash failed
    Error,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Success => "success",
            CheckStatus::Changed => "changed",
            CheckStatus::Error => "error",
        }
    }
}

/// One row of a site's check history. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckRecord {
    pub id: Uuid,
    pub site_id: Uuid,
    pub check_time: DateTime<Utc>,
    pub status: CheckStatus,
    pub content_hash: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CheckRecord {
    /// Record a successful fetch (status `Success` or `Changed`).
    pub fn fetched(
        site_id: Uuid,
        status: CheckStatus,
        digest: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            site_id,
            check_time: at,
            status,
            content_hash: Some(digest.into()),
            error_message: None,
            created_at: Utc::now(),
        }
    }

    /// Record a failed check.
    pub fn failed(site_id: Uuid, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            site_id,
            check_time: at,
            status: CheckStatus::Error,
            content_hash: None,
            error_message: Some(message.into()),
            created_at: Utc::now(),
        }
    }
}
