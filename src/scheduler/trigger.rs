//! Trigger definitions, state and fire planning.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::models::{ScheduleSlots, UserId};
use crate::scheduler::cron::CronSchedule;

/// Id of the legacy all-sites trigger.
pub const GLOBAL_TRIGGER_ID: &str = "global_check";

/// Display name of the legacy all-sites trigger.
pub const GLOBAL_TRIGGER_NAME: &str = "Global Website Check";

/// Upper bound on missed fires walked when catching up.
const MAX_CATCH_UP: usize = 10_000;

/// Which sites a trigger checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerScope {
    /// Every site, notified through the global bot
    AllSites,
    /// Sites owned by one user, notified through that user's channels
    Owner(UserId),
}

impl fmt::Display for TriggerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerScope::AllSites => f.write_str("all sites"),
            TriggerScope::Owner(id) => write!(f, "user {id}"),
        }
    }
}

/// A registered cron trigger.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub id: String,
    pub name: String,
    pub schedule: CronSchedule,
    pub scope: TriggerScope,
}

impl Trigger {
    pub fn global(schedule: CronSchedule) -> Self {
        Self {
            id: GLOBAL_TRIGGER_ID.to_string(),
            name: GLOBAL_TRIGGER_NAME.to_string(),
            schedule,
            scope: TriggerScope::AllSites,
        }
    }

    /// Trigger for schedule slot `slot` (zero-based) of a user.
    pub fn for_user(user_id: UserId, username: &str, slot: usize, schedule: CronSchedule) -> Self {
        Self {
            id: user_trigger_id(user_id, slot),
            name: format!("User {username} Schedule {}", slot + 1),
            schedule,
            scope: TriggerScope::Owner(user_id),
        }
    }
}

/// `user_<id>_schedule_<n>` with a one-based `n`.
pub fn user_trigger_id(user_id: UserId, slot: usize) -> String {
    format!("user_{user_id}_{}", ScheduleSlots::slot_name(slot))
}

/// Prefix shared by every trigger of a user.
pub fn user_trigger_prefix(user_id: UserId) -> String {
    format!("user_{user_id}_")
}

/// Lifecycle of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    /// Registered, first fire time not computed yet
    Registered,
    Firing,
    Idle,
}

impl TriggerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerState::Registered => "registered",
            TriggerState::Firing => "firing",
            TriggerState::Idle => "idle",
        }
    }
}

/// Mutable status shared between a trigger task and the service.
#[derive(Debug, Clone)]
pub struct TriggerStatus {
    pub state: TriggerState,
    pub next_fire: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub runs: u64,
}

impl Default for TriggerStatus {
    fn default() -> Self {
        Self {
            state: TriggerState::Registered,
            next_fire: None,
            last_run: None,
            runs: 0,
        }
    }
}

/// Snapshot of one trigger for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerInfo {
    pub id: String,
    pub name: String,
    pub expression: String,
    pub scope: TriggerScope,
    pub next_fire: Option<DateTime<Utc>>,
    pub state: TriggerState,
    pub runs: u64,
}

impl TriggerInfo {
    pub fn new(trigger: &Trigger, status: &TriggerStatus) -> Self {
        Self {
            id: trigger.id.clone(),
            name: trigger.name.clone(),
            expression: trigger.schedule.expression().to_string(),
            scope: trigger.scope,
            next_fire: status.next_fire,
            state: status.state,
            runs: status.runs,
        }
    }
}

/// What a trigger task should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Sleep until the given fire time
    Wait(DateTime<Utc>),
    /// Fire now for a missed time still inside the grace window
    RunLate(DateTime<Utc>),
    /// The schedule never fires again
    Never,
}

/// Decide the next step for a trigger whose last handled fire time is `anchor`.
///
/// Missed fires collapse into one late run for the most recent of them, as
/// long as it is no older than `grace`. Older misfires are dropped.
pub fn plan_next(
    schedule: &CronSchedule,
    anchor: DateTime<Utc>,
    now: DateTime<Utc>,
    grace: Duration,
    tz: Tz,
) -> Plan {
    let Some(mut due) = schedule.next_after(anchor, tz) else {
        return Plan::Never;
    };
    if due > now {
        return Plan::Wait(due);
    }

    for _ in 0..MAX_CATCH_UP {
        match schedule.next_after(due, tz) {
            Some(next) if next <= now => due = next,
            _ => break,
        }
    }

    if now - due <= grace {
        return Plan::RunLate(due);
    }
    log::warn!(
        "Run time of '{}' at {due} was missed by more than {}s, skipping",
        schedule.expression(),
        grace.num_seconds()
    );
    match schedule.next_after(now, tz) {
        Some(next) => Plan::Wait(next),
        None => Plan::Never,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn utc(h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, h, mi, 0).unwrap()
    }

    fn hourly() -> CronSchedule {
        CronSchedule::parse("0 * * * *").unwrap()
    }

    #[test]
    fn test_trigger_naming() {
        let schedule = CronSchedule::parse("0 8 * * *").unwrap();
        let trigger = Trigger::for_user(7, "ana", 2, schedule.clone());
        assert_eq!(trigger.id, "user_7_schedule_3");
        assert_eq!(trigger.name, "User ana Schedule 3");
        assert!(trigger.id.starts_with(&user_trigger_prefix(7)));
        assert!(!user_trigger_id(17, 0).starts_with(&user_trigger_prefix(1)));

        let global = Trigger::global(schedule);
        assert_eq!(global.id, "global_check");
        assert_eq!(global.name, "Global Website Check");
    }

    #[test]
    fn test_future_fire_waits() {
        let plan = plan_next(&hourly(), utc(10, 0), utc(10, 30), Duration::seconds(600), Tz::UTC);
        assert_eq!(plan, Plan::Wait(utc(11, 0)));
    }

    #[test]
    fn test_recent_misfire_runs_late() {
        let plan = plan_next(&hourly(), utc(10, 0), utc(11, 5), Duration::seconds(600), Tz::UTC);
        assert_eq!(plan, Plan::RunLate(utc(11, 0)));
    }

    #[test]
    fn test_many_misfires_coalesce() {
        let plan = plan_next(&hourly(), utc(1, 0), utc(11, 2), Duration::seconds(600), Tz::UTC);
        assert_eq!(plan, Plan::RunLate(utc(11, 0)));
    }

    #[test]
    fn test_old_misfire_is_dropped() {
        let plan = plan_next(&hourly(), utc(10, 0), utc(11, 30), Duration::seconds(600), Tz::UTC);
        assert_eq!(plan, Plan::Wait(utc(12, 0)));
    }

    #[test]
    fn test_never_firing_schedule() {
        let schedule = CronSchedule::parse("0 0 30 2 *").unwrap();
        let plan = plan_next(&schedule, utc(10, 0), utc(10, 0), Duration::seconds(600), Tz::UTC);
        assert_eq!(plan, Plan::Never);
    }
}
