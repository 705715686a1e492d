//! Cron-driven background checks.
//!
//! - `cron`: expression parsing and next-fire computation
//! - `trigger`: trigger ids, state and misfire planning
//! - `service`: `SchedulerService`, one task per trigger

pub mod cron;
pub mod service;
pub mod trigger;

pub use cron::{CronSchedule, normalize_expression};
pub use service::{ReconfigureReport, SchedulerService};
pub use trigger::{Trigger, TriggerInfo, TriggerScope, TriggerState};
