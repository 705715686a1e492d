//! Users and their notification settings.

use serde::{Deserialize, Serialize};

use super::UserId;

/// Number of independent schedule slots per user.
pub const SCHEDULE_SLOTS: usize = 4;

/// Schedule assigned to new users: every day at 08:00.
pub const DEFAULT_SCHEDULE: &str = "0 8 * * *";

/// An account owning monitored sites.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,

    /// Account email, used when no notification address is set
    pub email: String,

    #[serde(default = "default_active")]
    pub is_active: bool,

    #[serde(default)]
    pub settings: NotificationSettings,
}

fn default_active() -> bool {
    true
}

impl User {
    pub fn new(id: UserId, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            email: email.into(),
            is_active: true,
            settings: NotificationSettings::default(),
        }
    }

    /// Address email alerts go to: the notification email, else the account email.
    pub fn notification_address(&self) -> Option<&str> {
        self.settings
            .notification_email
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(Some(self.email.as_str()).filter(|s| !s.trim().is_empty()))
    }
}

/// Per-user notification channels and check schedules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NotificationSettings {
    #[serde(default)]
    pub telegram_bot_token: Option<String>,

    #[serde(default)]
    pub telegram_chat_id: Option<String>,

    #[serde(default)]
    pub email_notifications_enabled: bool,

    #[serde(default)]
    pub notification_email: Option<String>,

    #[serde(default)]
    pub schedules: ScheduleSlots,
}

/// Ordered, fixed-size set of cron schedule slots.
///
/// Slot `n` (zero-based) is presented as `schedule_{n + 1}`. Blank strings are
/// stored as `None`, including when read back from disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "[Option<String>; SCHEDULE_SLOTS]")]
pub struct ScheduleSlots([Option<String>; SCHEDULE_SLOTS]);

impl From<[Option<String>; SCHEDULE_SLOTS]> for ScheduleSlots {
    fn from(raw: [Option<String>; SCHEDULE_SLOTS]) -> Self {
        let mut slots = Self::empty();
        for (index, schedule) in raw.into_iter().enumerate() {
            slots.set(index, schedule);
        }
        slots
    }
}

impl Default for ScheduleSlots {
    fn default() -> Self {
        let mut slots = Self::empty();
        slots.set(0, Some(DEFAULT_SCHEDULE.to_string()));
        slots
    }
}

impl ScheduleSlots {
    /// All slots unset.
    pub fn empty() -> Self {
        Self(Default::default())
    }

    /// Build from a list; entries past the fourth are ignored.
    pub fn from_list<I, S>(schedules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut slots = Self::empty();
        for (index, schedule) in schedules.into_iter().take(SCHEDULE_SLOTS).enumerate() {
            slots.set(index, Some(schedule.into()));
        }
        slots
    }

    /// Expression in slot `index`, if set.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).and_then(|s| s.as_deref())
    }

    /// Replace slot `index`. Out-of-range indexes are ignored.
    pub fn set(&mut self, index: usize, schedule: Option<String>) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = schedule
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
        }
    }

    /// Display name of slot `index`.
    pub fn slot_name(index: usize) -> String {
        format!("schedule_{}", index + 1)
    }

    /// Iterate `(index, expression)` over the set slots.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_deref().map(|s| (i, s)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_morning_schedule() {
        let slots = ScheduleSlots::default();
        assert_eq!(slots.get(0), Some(DEFAULT_SCHEDULE));
        assert_eq!(slots.get(1), None);
    }

    #[test]
    fn test_blank_slots_are_unset() {
        let mut slots = ScheduleSlots::empty();
        slots.set(2, Some("   ".into()));
        slots.set(9, Some("0 9 * * *".into()));
        assert!(slots.is_empty());
    }

    #[test]
    fn test_from_list_keeps_positions() {
        let slots = ScheduleSlots::from_list(["0 8 * * *", "", "30 17 * * 5", "0 0 1 * *", "x"]);
        let set: Vec<_> = slots.iter().collect();
        assert_eq!(set, vec![(0, "0 8 * * *"), (2, "30 17 * * 5"), (3, "0 0 1 * *")]);
        assert_eq!(ScheduleSlots::slot_name(2), "schedule_3");
    }

    #[test]
    fn test_stored_blank_slots_load_as_unset() {
        let slots: ScheduleSlots =
            serde_json::from_str(r#"[" 0 8 * * * ", "", "   ", null]"#).unwrap();
        assert_eq!(slots.iter().collect::<Vec<_>>(), vec![(0, "0 8 * * *")]);
        assert_eq!(serde_json::to_string(&slots).unwrap(), r#"["0 8 * * *",null,null,null]"#);
    }

    #[test]
    fn test_notification_address_fallback() {
        let mut user = User::new(1, "ana", "ana@example.com");
        assert_eq!(user.notification_address(), Some("ana@example.com"));

        user.settings.notification_email = Some("alerts@example.com".into());
        assert_eq!(user.notification_address(), Some("alerts@example.com"));

        user.settings.notification_email = Some(" ".into());
        user.email.clear();
        assert_eq!(user.notification_address(), None);
    }
}
