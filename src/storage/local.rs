//! Local history store.
//!
//! Tables live in memory behind a single async mutex. When rooted at a
//! directory every mutation is written to `state.json` before it becomes
//! visible, using write-to-temp-then-rename, so a failed write leaves both the
//! file and the in-memory tables untouched.
//!
//! Several processes may share one directory (a running scheduler and CLI
//! edits). Each mutation re-reads `state.json` before applying its change, and
//! reads reload the tables whenever the file's size or mtime moved.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── config.toml           # Engine configuration (read by `config`)
//! └── state.json            # Users, sites, check records
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{CheckRecord, CheckStatus, MonitoredSite, User, UserId};
use crate::storage::HistoryStore;

const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    sites: Vec<MonitoredSite>,
    /// Insertion order
    #[serde(default)]
    checks: Vec<CheckRecord>,
}

impl Tables {
    /// Records of one site, newest first. Ties keep the later insert first.
    fn checks_for(&self, site_id: Uuid) -> Vec<&CheckRecord> {
        let mut checks: Vec<&CheckRecord> = self
            .checks
            .iter()
            .rev()
            .filter(|c| c.site_id == site_id)
            .collect();
        checks.sort_by(|a, b| b.check_time.cmp(&a.check_time));
        checks
    }

    fn site_index(&self, id: Uuid) -> Option<usize> {
        self.sites.iter().position(|s| s.id == id)
    }
}

/// Size and mtime of `state.json` when it was last read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileStamp {
    fn of(meta: &std::fs::Metadata) -> Self {
        Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        }
    }

    async fn read(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(Self::of(&meta))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

#[derive(Default)]
struct State {
    tables: Tables,
    stamp: Option<FileStamp>,
}

/// Local history store backend.
pub struct LocalStorage {
    root_dir: Option<PathBuf>,
    state: Mutex<State>,
}

impl Default for LocalStorage {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl LocalStorage {
    /// Store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            root_dir: None,
            state: Mutex::new(State::default()),
        }
    }

    /// Open the store rooted at `root_dir`, loading `state.json` if present.
    pub async fn open(root_dir: impl Into<PathBuf>) -> Result<Self> {
        let root_dir = root_dir.into();
        let state = match Self::read_state(&root_dir.join(STATE_FILE)).await? {
            Some((tables, stamp)) => State {
                tables,
                stamp: Some(stamp),
            },
            None => State::default(),
        };
        log::debug!(
            "Opened store at {} ({} users, {} sites, {} checks)",
            root_dir.display(),
            state.tables.users.len(),
            state.tables.sites.len(),
            state.tables.checks.len()
        );

        Ok(Self {
            root_dir: Some(root_dir),
            state: Mutex::new(state),
        })
    }

    /// Directory holding `state.json`, if persistent.
    pub fn root_dir(&self) -> Option<&Path> {
        self.root_dir.as_deref()
    }

    fn state_path(&self) -> Option<PathBuf> {
        self.root_dir.as_ref().map(|root| root.join(STATE_FILE))
    }

    /// Read `state.json`. `None` when the file does not exist.
    async fn read_state(path: &Path) -> Result<Option<(Tables, FileStamp)>> {
        let Some(stamp) = FileStamp::read(path).await? else {
            return Ok(None);
        };
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::Io(e)),
        };
        Ok(Some((serde_json::from_slice(&bytes)?, stamp)))
    }

    /// Lock the tables, first reloading them if the file changed on disk.
    ///
    /// With `force` the file is re-read even when its stamp looks unchanged.
    async fn synced(&self, force: bool) -> Result<MutexGuard<'_, State>> {
        let mut state = self.state.lock().await;
        let Some(path) = self.state_path() else {
            return Ok(state);
        };

        if !force && FileStamp::read(&path).await? == state.stamp {
            return Ok(state);
        }
        match Self::read_state(&path).await? {
            Some((tables, stamp)) => {
                if state.stamp != Some(stamp) {
                    log::debug!("Reloaded {} after an outside change", path.display());
                }
                state.tables = tables;
                state.stamp = Some(stamp);
            }
            None => state.stamp = None,
        }
        Ok(state)
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await
    }

    /// Write `tables` and return the stamp of the new file.
    async fn persist(&self, tables: &Tables) -> Result<Option<FileStamp>> {
        let Some(path) = self.state_path() else {
            return Ok(None);
        };
        let bytes = serde_json::to_vec_pretty(tables)
            .map_err(|e| AppError::persistence(format!("serialize state: {e}")))?;
        Self::write_bytes(&path, &bytes)
            .await
            .map_err(|e| AppError::persistence(format!("write {}: {e}", path.display())))?;
        // A failed stat only costs a reload on the next access
        Ok(FileStamp::read(&path).await.ok().flatten())
    }

    /// Apply `change` to a copy of the freshly loaded tables, persist it, then
    /// swap it in.
    async fn mutate<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut Tables) -> Result<T> + Send,
        T: Send,
    {
        let mut state = self
            .synced(true)
            .await
            .map_err(|e| AppError::persistence(format!("reload state: {e}")))?;
        let mut next = state.tables.clone();
        let value = change(&mut next)?;
        let stamp = self.persist(&next).await?;
        state.tables = next;
        state.stamp = stamp;
        Ok(value)
    }
}

#[async_trait]
impl HistoryStore for LocalStorage {
    async fn insert_site(&self, site: MonitoredSite) -> Result<MonitoredSite> {
        self.mutate(move |t| {
            if !t.users.iter().any(|u| u.id == site.owner_id) {
                return Err(AppError::not_found(format!("user {}", site.owner_id)));
            }
            if t
                .sites
                .iter()
                .any(|s| s.owner_id == site.owner_id && s.url == site.url)
            {
                return Err(AppError::validation(format!(
                    "{} is already monitored by user {}",
                    site.url, site.owner_id
                )));
            }
            t.sites.push(site.clone());
            Ok(site)
        })
        .await
    }

    async fn get_site(&self, id: Uuid) -> Result<Option<MonitoredSite>> {
        let state = self.synced(false).await?;
        Ok(state.tables.sites.iter().find(|s| s.id == id).cloned())
    }

    async fn list_sites(&self) -> Result<Vec<MonitoredSite>> {
        Ok(self.synced(false).await?.tables.sites.clone())
    }

    async fn list_sites_for_owner(&self, owner_id: UserId) -> Result<Vec<MonitoredSite>> {
        let state = self.synced(false).await?;
        Ok(state
            .tables
            .sites
            .iter()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn delete_site(&self, id: Uuid) -> Result<usize> {
        self.mutate(move |t| {
            let index = t
                .site_index(id)
                .ok_or_else(|| AppError::not_found(format!("site {id}")))?;
            let before = t.checks.len();
            t.checks.retain(|c| c.site_id != id);
            t.sites.remove(index);
            Ok(before - t.checks.len())
        })
        .await
    }

    async fn upsert_user(&self, user: User) -> Result<()> {
        self.mutate(move |t| {
            match t.users.iter_mut().find(|u| u.id == user.id) {
                Some(existing) => *existing = user,
                None => t.users.push(user),
            }
            Ok(())
        })
        .await
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let state = self.synced(false).await?;
        Ok(state.tables.users.iter().find(|u| u.id == id).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.synced(false).await?.tables.users.clone())
    }

    async fn commit_check(&self, record: &CheckRecord) -> Result<MonitoredSite> {
        let record = record.clone();
        self.mutate(move |t| {
            let index = t.site_index(record.site_id).ok_or_else(|| {
                AppError::persistence(format!("site {} no longer exists", record.site_id))
            })?;
            let site = &mut t.sites[index];
            site.apply_check(&record);
            let updated = site.clone();
            t.checks.push(record);
            Ok(updated)
        })
        .await
    }

    async fn list_checks(&self, site_id: Uuid) -> Result<Vec<CheckRecord>> {
        let state = self.synced(false).await?;
        Ok(state.tables.checks_for(site_id).into_iter().cloned().collect())
    }

    async fn latest_check_with_status(
        &self,
        site_id: Uuid,
        status: CheckStatus,
    ) -> Result<Option<CheckRecord>> {
        let state = self.synced(false).await?;
        Ok(state
            .tables
            .checks_for(site_id)
            .into_iter()
            .find(|c| c.status == status)
            .cloned())
    }

    async fn recent_checks(
        &self,
        site_id: Uuid,
        limit: usize,
        exclude: Option<Uuid>,
    ) -> Result<Vec<CheckRecord>> {
        let state = self.synced(false).await?;
        Ok(state
            .tables
            .checks_for(site_id)
            .into_iter()
            .filter(|c| Some(c.id) != exclude)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_checks_except(&self, site_id: Uuid, keep: &[Uuid]) -> Result<usize> {
        let keep = keep.to_vec();
        self.mutate(move |t| {
            let before = t.checks.len();
            t.checks
                .retain(|c| c.site_id != site_id || keep.contains(&c.id));
            Ok(before - t.checks.len())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    use super::*;
    use crate::models::SiteStatus;

    async fn store_with_site() -> (LocalStorage, MonitoredSite) {
        let store = LocalStorage::in_memory();
        store.upsert_user(User::new(1, "ana", "ana@example.com")).await.unwrap();
        let site = store
            .insert_site(MonitoredSite::new("https://example.com", 1))
            .await
            .unwrap();
        (store, site)
    }

    #[tokio::test]
    async fn test_unique_url_per_owner() {
        let (store, _) = store_with_site().await;
        store.upsert_user(User::new(2, "ben", "ben@example.com")).await.unwrap();

        let dup = store
            .insert_site(MonitoredSite::new("https://example.com", 1))
            .await;
        assert!(matches!(dup, Err(AppError::Validation(_))));

        // Same URL, different owner is fine
        store
            .insert_site(MonitoredSite::new("https://example.com", 2))
            .await
            .unwrap();
        assert_eq!(store.list_sites().await.unwrap().len(), 2);
        assert_eq!(store.list_sites_for_owner(2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_owner_rejected() {
        let store = LocalStorage::in_memory();
        let err = store
            .insert_site(MonitoredSite::new("https://example.com", 9))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_commit_updates_site_and_appends_record() {
        let (store, site) = store_with_site().await;
        let now = Utc::now();
        let record = CheckRecord::fetched(site.id, CheckStatus::Success, "abc", now);

        let updated = store.commit_check(&record).await.unwrap();

        let stored = store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(stored, updated);
        assert_eq!(stored.last_content_hash.as_deref(), Some("abc"));
        assert_eq!(stored.last_checked, Some(now));
        assert_eq!(store.list_checks(site.id).await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn test_error_commit_keeps_latest_hash() {
        let (store, site) = store_with_site().await;
        let base = Utc::now();
        for (i, digest) in ["h1", "h2"].into_iter().enumerate() {
            let at = base + Duration::seconds(i as i64);
            let record = CheckRecord::fetched(site.id, CheckStatus::Success, digest, at);
            store.commit_check(&record).await.unwrap();
        }

        let failed_at = base + Duration::seconds(5);
        let updated = store
            .commit_check(&CheckRecord::failed(site.id, "boom", failed_at))
            .await
            .unwrap();

        assert_eq!(updated.status, SiteStatus::Error);
        assert_eq!(updated.last_checked, Some(failed_at));
        assert_eq!(updated.last_content_hash.as_deref(), Some("h2"));
    }

    #[tokio::test]
    async fn test_commit_for_deleted_site_is_persistence_error() {
        let (store, site) = store_with_site().await;
        store.delete_site(site.id).await.unwrap();

        let record = CheckRecord::failed(site.id, "boom", Utc::now());
        let err = store.commit_check(&record).await.unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
        assert!(store.list_checks(site.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_site_cascades() {
        let (store, site) = store_with_site().await;
        for _ in 0..3 {
            let record = CheckRecord::failed(site.id, "boom", Utc::now());
            store.commit_check(&record).await.unwrap();
        }

        assert_eq!(store.delete_site(site.id).await.unwrap(), 3);
        assert!(store.get_site(site.id).await.unwrap().is_none());
        assert!(store.list_checks(site.id).await.unwrap().is_empty());
        assert!(matches!(
            store.delete_site(site.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ordered_queries() {
        let (store, site) = store_with_site().await;
        let base = Utc::now();
        let statuses = [
            CheckStatus::Success,
            CheckStatus::Changed,
            CheckStatus::Success,
            CheckStatus::Error,
        ];
        let mut ids = Vec::new();
        for (i, status) in statuses.into_iter().enumerate() {
            let at = base + Duration::seconds(i as i64);
            let record = match status {
                CheckStatus::Error => CheckRecord::failed(site.id, "boom", at),
                _ => CheckRecord::fetched(site.id, status, format!("h{i}"), at),
            };
            ids.push(record.id);
            store.commit_check(&record).await.unwrap();
        }

        let all = store.list_checks(site.id).await.unwrap();
        assert_eq!(all.first().map(|c| c.id), Some(ids[3]));

        let changed = store
            .latest_check_with_status(site.id, CheckStatus::Changed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(changed.id, ids[1]);

        let recent = store.recent_checks(site.id, 2, Some(ids[3])).await.unwrap();
        let recent: Vec<_> = recent.iter().map(|c| c.id).collect();
        assert_eq!(recent, vec![ids[2], ids[1]]);

        let deleted = store
            .delete_checks_except(site.id, &[ids[0], ids[3]])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let site_id = {
            let store = LocalStorage::open(tmp.path()).await.unwrap();
            store.upsert_user(User::new(1, "ana", "ana@example.com")).await.unwrap();
            let site = store
                .insert_site(MonitoredSite::new("https://example.com", 1))
                .await
                .unwrap();
            site.id
        };

        assert!(tmp.path().join("state.json").exists());
        assert!(!tmp.path().join("state.tmp").exists());

        let store = LocalStorage::open(tmp.path()).await.unwrap();
        assert_eq!(store.get_user(1).await.unwrap().unwrap().username, "ana");
        assert!(store.get_site(site_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_tables_untouched() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStorage::open(tmp.path()).await.unwrap();
        store.upsert_user(User::new(1, "ana", "ana@example.com")).await.unwrap();

        // A directory in place of the temp file makes the write fail
        std::fs::create_dir(tmp.path().join("state.tmp")).unwrap();
        let err = store
            .upsert_user(User::new(2, "ben", "ben@example.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Persistence(_)));
        assert_eq!(store.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_outside_edits_survive_commits() {
        let tmp = TempDir::new().unwrap();
        let daemon = LocalStorage::open(tmp.path()).await.unwrap();
        daemon.upsert_user(User::new(1, "ana", "ana@example.com")).await.unwrap();
        let watched = daemon
            .insert_site(MonitoredSite::new("https://a.example", 1))
            .await
            .unwrap();

        // A second handle on the same directory, as a CLI run would open
        let cli = LocalStorage::open(tmp.path()).await.unwrap();
        let added = cli
            .insert_site(MonitoredSite::new("https://b.example", 1))
            .await
            .unwrap();

        let record = CheckRecord::fetched(watched.id, CheckStatus::Success, "abc", Utc::now());
        daemon.commit_check(&record).await.unwrap();

        let reopened = LocalStorage::open(tmp.path()).await.unwrap();
        assert_eq!(reopened.list_sites().await.unwrap().len(), 2);
        assert!(reopened.get_site(added.id).await.unwrap().is_some());
        assert_eq!(reopened.list_checks(watched.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reads_pick_up_outside_edits() {
        let tmp = TempDir::new().unwrap();
        let daemon = LocalStorage::open(tmp.path()).await.unwrap();
        daemon.upsert_user(User::new(1, "ana", "ana@example.com")).await.unwrap();

        let cli = LocalStorage::open(tmp.path()).await.unwrap();
        let mut user = cli.get_user(1).await.unwrap().unwrap();
        user.settings.schedules.set(1, Some("30 17 * * *".into()));
        cli.upsert_user(user).await.unwrap();
        cli.upsert_user(User::new(2, "ben", "ben@example.com")).await.unwrap();

        let seen = daemon.get_user(1).await.unwrap().unwrap();
        assert_eq!(seen.settings.schedules.get(1), Some("30 17 * * *"));
        assert_eq!(daemon.list_users().await.unwrap().len(), 2);
    }
}
