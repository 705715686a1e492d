//! Background scheduler service.
//!
//! Each trigger runs in its own tokio task. A task sleeps until its next fire
//! time, runs its batch inline and only then plans again, so a trigger never
//! overlaps itself. Fires that come due meanwhile, and manual fires, collapse
//! into at most one pending run.
//!
//! A replaced or removed trigger is stopped and awaited before its successor
//! is registered, so two tasks for the same trigger id never overlap.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Config, MonitoredSite, NotificationsConfig, ScheduleSlots, User, UserId};
use crate::pipeline::{BatchSummary, CheckOutcome, SiteChecker, run_batch};
use crate::scheduler::cron::{CronSchedule, normalize_expression};
use crate::scheduler::trigger::{
    Plan, Trigger, TriggerInfo, TriggerScope, TriggerState, TriggerStatus,
    plan_next, user_trigger_prefix,
};
use crate::services::NotifierConfig;
use crate::storage::HistoryStore;

/// Result of rebuilding one user's triggers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconfigureReport {
    /// Ids of the registered triggers
    pub registered: Vec<String>,
    /// `(slot name, reason)` for every rejected schedule
    pub rejected: Vec<(String, String)>,
}

/// Everything a trigger task needs to run a batch.
#[derive(Clone)]
struct RunContext {
    checker: SiteChecker,
    notifications: Arc<NotificationsConfig>,
    tz: Tz,
    pause: Duration,
    grace: chrono::Duration,
}

impl RunContext {
    fn store(&self) -> &Arc<dyn HistoryStore> {
        self.checker.store()
    }

    /// Sites and channels for a scope. `None` when the run should be skipped.
    async fn resolve(
        &self,
        scope: TriggerScope,
    ) -> Result<Option<(Vec<MonitoredSite>, NotifierConfig)>> {
        match scope {
            TriggerScope::AllSites => {
                let sites = self.store().list_sites().await?;
                Ok(Some((sites, NotifierConfig::global(&self.notifications))))
            }
            TriggerScope::Owner(user_id) => {
                let Some(user) = self.store().get_user(user_id).await? else {
                    log::warn!("User {user_id} no longer exists");
                    return Ok(None);
                };
                if !user.is_active {
                    log::info!("User {} is inactive", user.username);
                    return Ok(None);
                }
                let sites = self.store().list_sites_for_owner(user_id).await?;
                Ok(Some((sites, NotifierConfig::for_user(&user, &self.notifications))))
            }
        }
    }

    async fn fire(&self, trigger: &Trigger, status: &Mutex<TriggerStatus>, stop: &watch::Receiver<bool>) {
        {
            let mut status = lock(status);
            status.state = TriggerState::Firing;
            status.next_fire = None;
            status.last_run = Some(Utc::now());
            status.runs += 1;
        }
        log::info!("Running {} ({})", trigger.name, trigger.id);

        match self.resolve(trigger.scope).await {
            Ok(Some((sites, target))) => {
                run_batch(&self.checker, &trigger.name, &sites, &target, self.pause, Some(stop)).await;
            }
            Ok(None) => log::info!("Skipping {}", trigger.id),
            Err(e) => log::error!("Error resolving sites for {}: {e}", trigger.id),
        }
    }
}

fn lock(status: &Mutex<TriggerStatus>) -> MutexGuard<'_, TriggerStatus> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Trigger task body.
async fn trigger_loop(
    ctx: RunContext,
    trigger: Arc<Trigger>,
    status: Arc<Mutex<TriggerStatus>>,
    wake: Arc<Notify>,
    mut stop: watch::Receiver<bool>,
) {
    let mut anchor = Utc::now();

    loop {
        if *stop.borrow() {
            break;
        }

        let next = match plan_next(&trigger.schedule, anchor, Utc::now(), ctx.grace, ctx.tz) {
            Plan::RunLate(missed) => {
                log::warn!("{} missed its run at {missed}, running late", trigger.id);
                anchor = missed;
                ctx.fire(&trigger, &status, &stop).await;
                continue;
            }
            Plan::Wait(at) => Some(at),
            Plan::Never => None,
        };

        {
            let mut status = lock(&status);
            status.state = TriggerState::Idle;
            status.next_fire = next;
        }

        let sleep = async {
            match next {
                Some(at) => tokio::time::sleep((at - Utc::now()).to_std().unwrap_or_default()).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = sleep => {
                if let Some(at) = next {
                    anchor = at;
                }
            }
            _ = wake.notified() => {
                log::info!("Manual run of {} requested", trigger.id);
            }
            changed = stop.changed() => {
                // A dropped sender counts as a stop
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
        }

        if *stop.borrow() {
            break;
        }
        ctx.fire(&trigger, &status, &stop).await;
    }

    log::debug!("Trigger {} stopped", trigger.id);
}

struct TriggerHandle {
    trigger: Arc<Trigger>,
    status: Arc<Mutex<TriggerStatus>>,
    wake: Arc<Notify>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TriggerHandle {
    fn info(&self) -> TriggerInfo {
        TriggerInfo::new(&self.trigger, &lock(&self.status))
    }

    /// Signal the task to stop after its current site.
    fn signal_stop(&self) {
        let _ = self.stop.send(true);
    }
}

/// Stop `handles` and wait for their in-flight checks to finish.
async fn retire(handles: Vec<TriggerHandle>) {
    for handle in &handles {
        handle.signal_stop();
    }
    for handle in handles {
        if let Err(e) = handle.task.await {
            log::error!("Trigger {} ended abnormally: {e}", handle.trigger.id);
        }
    }
}

/// What a user's triggers were last built from.
#[derive(Debug, Clone, PartialEq, Eq)]
struct UserSchedule {
    username: String,
    active: bool,
    slots: ScheduleSlots,
}

impl UserSchedule {
    fn of(user: &User, slots: &ScheduleSlots) -> Self {
        Self {
            username: user.username.clone(),
            active: user.is_active,
            slots: slots.clone(),
        }
    }
}

struct Inner {
    ctx: RunContext,
    global_schedule: Option<String>,
    triggers: Mutex<BTreeMap<String, TriggerHandle>>,
    /// Per-user inputs of the registered triggers
    built: Mutex<HashMap<UserId, UserSchedule>>,
    /// Held while a user's triggers are torn down and rebuilt
    rebuilding: tokio::sync::Mutex<()>,
}

/// Scheduler service. Cheap to clone; clones share the same triggers.
#[derive(Clone)]
pub struct SchedulerService {
    inner: Arc<Inner>,
}

impl SchedulerService {
    pub fn new(checker: SiteChecker, config: &Config) -> Result<Self> {
        let scheduler = &config.scheduler;
        let grace = i64::try_from(scheduler.misfire_grace_secs)
            .map_err(|_| AppError::config("misfire_grace_secs is too large"))?;

        Ok(Self {
            inner: Arc::new(Inner {
                ctx: RunContext {
                    checker,
                    notifications: Arc::new(config.notifications.clone()),
                    tz: scheduler.timezone()?,
                    pause: Duration::from_millis(scheduler.site_pause_ms),
                    grace: chrono::Duration::seconds(grace),
                },
                global_schedule: scheduler
                    .global_schedule
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
                triggers: Mutex::new(BTreeMap::new()),
                built: Mutex::new(HashMap::new()),
                rebuilding: tokio::sync::Mutex::new(()),
            }),
        })
    }

    fn store(&self) -> &Arc<dyn HistoryStore> {
        self.inner.ctx.store()
    }

    fn triggers(&self) -> MutexGuard<'_, BTreeMap<String, TriggerHandle>> {
        self.inner
            .triggers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn built(&self) -> MutexGuard<'_, HashMap<UserId, UserSchedule>> {
        self.inner
            .built
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register the global trigger and the triggers of every active user.
    pub async fn start(&self) -> Result<()> {
        crate::utils::log::header("Starting scheduler");
        self.register_global().await;
        self.sync_users().await?;

        log::info!("Scheduler started with {} triggers", self.triggers().len());
        Ok(())
    }

    /// Register (or replace) the legacy all-sites trigger, if configured.
    pub async fn register_global(&self) -> bool {
        let Some(expression) = &self.inner.global_schedule else {
            log::info!("Global check disabled");
            return false;
        };
        match CronSchedule::parse(expression) {
            Ok(schedule) => {
                let trigger = Trigger::global(schedule);
                let replaced = self.triggers().remove(&trigger.id);
                retire(replaced.into_iter().collect()).await;
                self.install(trigger);
                true
            }
            Err(e) => {
                log::error!("Global check not scheduled: {e}");
                false
            }
        }
    }

    fn install(&self, trigger: Trigger) {
        let trigger = Arc::new(trigger);
        let status = Arc::new(Mutex::new(TriggerStatus::default()));
        let wake = Arc::new(Notify::new());
        let (stop, stop_rx) = watch::channel(false);

        let task = tokio::spawn(trigger_loop(
            self.inner.ctx.clone(),
            trigger.clone(),
            status.clone(),
            wake.clone(),
            stop_rx,
        ));

        log::info!(
            "Scheduled {} ({}) with cron '{}'",
            trigger.name,
            trigger.id,
            trigger.schedule
        );
        let handle = TriggerHandle {
            trigger,
            status,
            wake,
            stop,
            task,
        };
        if let Some(old) = self.triggers().insert(handle.trigger.id.clone(), handle) {
            // Callers retire the previous task first
            log::warn!("Trigger {} replaced while still registered", old.trigger.id);
            old.signal_stop();
        }
    }

    /// Tear down every trigger of a user and register one per valid slot.
    ///
    /// Old trigger tasks are stopped and awaited first, so a check they have
    /// in flight completes before the new triggers exist. A malformed slot is
    /// logged and reported; the other slots still register.
    pub async fn reconfigure(
        &self,
        user_id: UserId,
        slots: &ScheduleSlots,
    ) -> Result<ReconfigureReport> {
        let _rebuilding = self.inner.rebuilding.lock().await;
        let user = self
            .store()
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("user {user_id}")))?;

        let removed = self.remove_user_triggers(user_id);
        if !removed.is_empty() {
            log::debug!("Removing {} triggers of user {}", removed.len(), user.username);
        }
        retire(removed).await;
        self.built().insert(user_id, UserSchedule::of(&user, slots));

        let mut report = ReconfigureReport::default();
        if !user.is_active {
            log::info!("User {} is inactive, no triggers registered", user.username);
            return Ok(report);
        }

        for (slot, raw) in slots.iter() {
            let expression = normalize_expression(raw);
            match CronSchedule::parse(&expression) {
                Ok(schedule) => {
                    let trigger = Trigger::for_user(user_id, &user.username, slot, schedule);
                    report.registered.push(trigger.id.clone());
                    self.install(trigger);
                }
                Err(e) => {
                    log::error!(
                        "Invalid {} for user {}: {e}",
                        ScheduleSlots::slot_name(slot),
                        user.username
                    );
                    report
                        .rejected
                        .push((ScheduleSlots::slot_name(slot), e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Rebuild a user's triggers from the schedules stored for them.
    pub async fn reload_user(&self, user_id: UserId) -> Result<ReconfigureReport> {
        let user = self
            .store()
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("user {user_id}")))?;
        self.reconfigure(user_id, &user.settings.schedules).await
    }

    /// Bring user triggers in line with the store.
    ///
    /// Users whose name, active flag or schedules differ from what their
    /// triggers were built from are reconfigured, and triggers of deleted
    /// users are removed. Returns the number of users touched.
    pub async fn sync_users(&self) -> Result<usize> {
        let users = self.store().list_users().await?;
        let mut touched = 0;

        for user in &users {
            let wanted = UserSchedule::of(user, &user.settings.schedules);
            if self.built().get(&user.id) == Some(&wanted) {
                continue;
            }
            touched += 1;
            if let Err(e) = self.reconfigure(user.id, &user.settings.schedules).await {
                log::error!("Error scheduling user {}: {e}", user.username);
            }
        }

        let deleted: Vec<UserId> = self
            .built()
            .keys()
            .filter(|id| !users.iter().any(|u| u.id == **id))
            .copied()
            .collect();
        for user_id in deleted {
            let _rebuilding = self.inner.rebuilding.lock().await;
            retire(self.remove_user_triggers(user_id)).await;
            self.built().remove(&user_id);
            log::info!("Removed triggers of deleted user {user_id}");
            touched += 1;
        }

        Ok(touched)
    }

    /// Unregister every trigger of a user. The caller retires the handles.
    fn remove_user_triggers(&self, user_id: UserId) -> Vec<TriggerHandle> {
        let prefix = user_trigger_prefix(user_id);
        let mut triggers = self.triggers();
        let ids: Vec<String> = triggers
            .keys()
            .filter(|id| id.starts_with(&prefix))
            .cloned()
            .collect();
        ids.iter().filter_map(|id| triggers.remove(id)).collect()
    }

    /// Check one site immediately through its owner's channels.
    pub async fn check_site_now(&self, site_id: Uuid) -> Result<CheckOutcome> {
        let site = self
            .store()
            .get_site(site_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("site {site_id}")))?;

        let target = match self.store().get_user(site.owner_id).await? {
            Some(user) => NotifierConfig::for_user(&user, &self.inner.ctx.notifications),
            None => NotifierConfig::disabled(),
        };
        self.inner.ctx.checker.check_site(&site, &target).await
    }

    /// Check every site of a user immediately.
    pub async fn check_user_now(&self, user_id: UserId) -> Result<BatchSummary> {
        let user = self
            .store()
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("user {user_id}")))?;
        let sites = self.store().list_sites_for_owner(user_id).await?;
        let target = NotifierConfig::for_user(&user, &self.inner.ctx.notifications);

        let title = format!("Check for {}", user.username);
        Ok(run_batch(
            &self.inner.ctx.checker,
            &title,
            &sites,
            &target,
            self.inner.ctx.pause,
            None,
        )
        .await)
    }

    /// Check every site immediately through the global channels.
    pub async fn check_all_now(&self) -> Result<BatchSummary> {
        let sites = self.store().list_sites().await?;
        let target = NotifierConfig::global(&self.inner.ctx.notifications);
        Ok(run_batch(
            &self.inner.ctx.checker,
            "Check all sites",
            &sites,
            &target,
            self.inner.ctx.pause,
            None,
        )
        .await)
    }

    /// Registered triggers, ordered by id.
    pub fn list_triggers(&self) -> Vec<TriggerInfo> {
        self.triggers().values().map(TriggerHandle::info).collect()
    }

    /// Queue a run of a trigger. Requests made while it runs collapse into one.
    pub fn fire_now(&self, trigger_id: &str) -> Result<()> {
        let triggers = self.triggers();
        let handle = triggers
            .get(trigger_id)
            .ok_or_else(|| AppError::not_found(format!("trigger {trigger_id}")))?;
        handle.wake.notify_one();
        Ok(())
    }

    /// Stop every trigger and wait for in-flight checks to finish.
    pub async fn shutdown(&self) {
        let handles: Vec<TriggerHandle> = {
            let mut triggers = self.triggers();
            std::mem::take(&mut *triggers).into_values().collect()
        };
        log::info!("Stopping {} triggers", handles.len());
        retire(handles).await;
        self.built().clear();
        log::info!("Scheduler stopped");
    }
}
