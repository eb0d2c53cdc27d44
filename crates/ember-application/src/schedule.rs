//! Schedule expression parsing.
//!
//! Supports human-readable intervals (`"every 30m"`, `"2h"`, `"daily"`) and
//! cron expressions (5 or 6 field). The cron crate requires 7 fields
//! (sec min hour dom month dow year), so short expressions are padded.

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use ember_core::error::{EmberError, Result};
use std::str::FromStr;
use std::time::Duration;

/// A parsed schedule — either a fixed interval or a cron expression.
#[derive(Debug)]
pub enum Schedule {
    Interval(Duration),
    Cron(Box<CronSchedule>),
}

impl Schedule {
    /// Parses a schedule expression.
    ///
    /// # Errors
    ///
    /// Returns a Config error when the expression is neither a recognized
    /// interval nor a valid cron expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let s = expr.trim();
        if s.is_empty() {
            return Err(EmberError::config("empty schedule expression"));
        }
        if s.eq_ignore_ascii_case("daily") {
            return Ok(Schedule::Interval(Duration::from_secs(86400)));
        }
        if let Some(d) = parse_duration_str(s) {
            return Ok(Schedule::Interval(d));
        }
        let padded = match s.split_whitespace().count() {
            5 => format!("0 {} *", s), // standard 5-field: add seconds + year
            6 => format!("{} *", s),   // 6-field: add year
            _ => s.to_string(),
        };
        if let Ok(cron) = CronSchedule::from_str(&padded) {
            return Ok(Schedule::Cron(Box::new(cron)));
        }
        Err(EmberError::config(format!(
            "invalid schedule expression '{}'",
            expr
        )))
    }

    /// Time until the next tick after `now`.
    ///
    /// `None` means the schedule has no future occurrence.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Schedule::Interval(interval) => Some(*interval),
            Schedule::Cron(cron) => cron
                .after(&now)
                .next()
                .and_then(|next| (next - now).to_std().ok()),
        }
    }
}

/// Parses strings like `"30m"`, `"2h"`, `"every 2h"`, `"15 min"` into a
/// duration.
fn parse_duration_str(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();
    let s = s.strip_prefix("every").unwrap_or(&s).trim();

    if let Some(num) = s
        .strip_suffix("hours")
        .or(s.strip_suffix("hour"))
        .or(s.strip_suffix("hr"))
        .or(s.strip_suffix('h'))
    {
        if let Ok(n) = num.trim().parse::<u64>() {
            return Some(Duration::from_secs(n * 3600));
        }
    }
    if let Some(num) = s
        .strip_suffix("minutes")
        .or(s.strip_suffix("mins"))
        .or(s.strip_suffix("min"))
        .or(s.strip_suffix('m'))
    {
        if let Ok(n) = num.trim().parse::<u64>() {
            return Some(Duration::from_secs(n * 60));
        }
    }
    if let Some(num) = s
        .strip_suffix("seconds")
        .or(s.strip_suffix("sec"))
        .or(s.strip_suffix('s'))
    {
        if let Ok(n) = num.trim().parse::<u64>() {
            return Some(Duration::from_secs(n));
        }
    }

    None
}
