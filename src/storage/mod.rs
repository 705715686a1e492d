//! Storage abstractions for sites, users and check history.
//!
//! ## Directory Structure
//!
//! ```text
//! storage/
//! ├── config.toml           # Engine configuration
//! └── state.json            # Users, sites and check records
//! ```

pub mod local;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{CheckRecord, CheckStatus, MonitoredSite, User, UserId};

// Re-export for convenience
pub use local::LocalStorage;

/// Trait for history store backends.
///
/// Every method is a single unit of work: it either applies completely or not
/// at all. Check lists are ordered newest first.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Insert a new site. Fails if the owner already monitors the same URL.
    async fn insert_site(&self, site: MonitoredSite) -> Result<MonitoredSite>;

    async fn get_site(&self, id: Uuid) -> Result<Option<MonitoredSite>>;

    async fn list_sites(&self) -> Result<Vec<MonitoredSite>>;

    async fn list_sites_for_owner(&self, owner_id: UserId) -> Result<Vec<MonitoredSite>>;

    /// Delete a site and all of its check records.
    ///
    /// Returns the number of records removed with it.
    async fn delete_site(&self, id: Uuid) -> Result<usize>;

    /// Insert or replace a user.
    async fn upsert_user(&self, user: User) -> Result<()>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>>;

    async fn list_users(&self) -> Result<Vec<User>>;

    /// Atomically append `record` and fold it into the current row of its site.
    ///
    /// The row is updated from the record alone (see
    /// [`MonitoredSite::apply_check`]), never from a caller's copy of the site.
    /// Returns the updated row.
    async fn commit_check(&self, record: &CheckRecord) -> Result<MonitoredSite>;

    /// All records of a site.
    async fn list_checks(&self, site_id: Uuid) -> Result<Vec<CheckRecord>>;

    /// Most recent record of a site with the given status.
    async fn latest_check_with_status(
        &self,
        site_id: Uuid,
        status: CheckStatus,
    ) -> Result<Option<CheckRecord>>;

    /// Up to `limit` most recent records, skipping `exclude`.
    async fn recent_checks(
        &self,
        site_id: Uuid,
        limit: usize,
        exclude: Option<Uuid>,
    ) -> Result<Vec<CheckRecord>>;

    /// Delete every record of the site whose id is not in `keep`.
    ///
    /// Returns the number of deleted records.
    async fn delete_checks_except(&self, site_id: Uuid, keep: &[Uuid]) -> Result<usize>;
}
