//! Five-field cron expressions.
//!
//! `MIN HOUR DOM MON DOW`, each field `*`, a number or a comma list of
//! numbers. Day of week runs 0-6 with 0 = Sunday. When both day of month and
//! day of week are restricted, a time must match both.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::{AppError, Result};

/// How far ahead `next_after` looks before giving up.
const SEARCH_DAYS: u32 = 366 * 5;

struct Field {
    name: &'static str,
    min: u32,
    max: u32,
}

const FIELDS: [Field; 5] = [
    Field { name: "minute", min: 0, max: 59 },
    Field { name: "hour", min: 0, max: 23 },
    Field { name: "day", min: 1, max: 31 },
    Field { name: "month", min: 1, max: 12 },
    Field { name: "day_of_week", min: 0, max: 6 },
];

/// A parsed, range-checked cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: u64,
    hours: u64,
    days: u64,
    months: u64,
    weekdays: u64,
}

/// Pad a stored schedule with 2-4 fields to five with `*`.
///
/// Other lengths are only re-joined, so parsing still rejects them.
pub fn normalize_expression(raw: &str) -> String {
    let mut fields: Vec<&str> = raw.split_whitespace().collect();
    if (2..FIELDS.len()).contains(&fields.len()) {
        fields.resize(FIELDS.len(), "*");
    }
    fields.join(" ")
}

fn parse_field(expression: &str, raw: &str, field: &Field) -> Result<u64> {
    if raw == "*" {
        return Ok((field.min..=field.max).fold(0, |mask, v| mask | 1 << v));
    }

    let mut mask = 0u64;
    for item in raw.split(',') {
        let value: u32 = item.parse().map_err(|_| {
            AppError::schedule(
                expression,
                format!("invalid value '{item}' in {} field", field.name),
            )
        })?;
        if value < field.min || value > field.max {
            return Err(AppError::schedule(
                expression,
                format!(
                    "{} value {value} out of range {}-{}",
                    field.name, field.min, field.max
                ),
            ));
        }
        mask |= 1 << value;
    }
    Ok(mask)
}

fn contains(mask: u64, value: u32) -> bool {
    mask & (1 << value) != 0
}

fn set_values(mask: u64, max: u32) -> impl Iterator<Item = u32> {
    (0..=max).filter(move |v| contains(mask, *v))
}

impl CronSchedule {
    /// Parse an expression with exactly five fields.
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != FIELDS.len() {
            return Err(AppError::schedule(
                expression,
                format!(
                    "expected 5 fields (minute hour day month day_of_week), got {}",
                    parts.len()
                ),
            ));
        }

        let mut masks = [0u64; 5];
        for ((mask, raw), field) in masks.iter_mut().zip(&parts).zip(&FIELDS) {
            *mask = parse_field(expression, raw, field)?;
        }

        Ok(Self {
            expression: parts.join(" "),
            minutes: masks[0],
            hours: masks[1],
            days: masks[2],
            months: masks[3],
            weekdays: masks[4],
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn matches_date(&self, date: chrono::NaiveDate) -> bool {
        contains(self.months, date.month())
            && contains(self.days, date.day())
            && contains(self.weekdays, date.weekday().num_days_from_sunday())
    }

    /// First fire time strictly after `after`, evaluated in `tz`.
    ///
    /// Wall-clock times skipped by a DST jump do not fire; times repeated by
    /// a DST fallback fire once, at the earlier instant.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let start = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let start_local: NaiveDateTime = start.with_timezone(&tz).naive_local();

        let mut date = start_local.date();
        for _ in 0..SEARCH_DAYS {
            if self.matches_date(date) {
                for hour in set_values(self.hours, 23) {
                    for minute in set_values(self.minutes, 59) {
                        let candidate = date.and_hms_opt(hour, minute, 0)?;
                        if candidate < start_local {
                            continue;
                        }
                        if let Some(at) = tz.from_local_datetime(&candidate).earliest() {
                            let at = at.with_timezone(&Utc);
                            if at > after {
                                return Some(at);
                            }
                        }
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}
