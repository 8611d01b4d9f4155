//! Quiet-hours windows and priority bypass policy.

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::delivery::ReminderInjectionConfig;
use crate::error::{NudgeError, NudgeResult};
use crate::reminders::{Reminder, ReminderPriority};

/// A wall-clock time of day with minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// Create a time of day, validating the ranges.
    pub fn new(hour: u8, minute: u8) -> NudgeResult<Self> {
        if hour > 23 || minute > 59 {
            return Err(NudgeError::invalid_time(&format!("{}:{:02}", hour, minute)));
        }
        Ok(Self { hour, minute })
    }

    /// Parse 24-hour `HH:MM` (a single-digit hour is accepted).
    pub fn parse(value: &str) -> NudgeResult<Self> {
        let invalid = || NudgeError::invalid_time(value);
        let (hour, minute) = value.trim().split_once(':').ok_or_else(invalid)?;
        if hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
            return Err(invalid());
        }
        if !hour.chars().chain(minute.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let hour: u8 = hour.parse().map_err(|_| invalid())?;
        let minute: u8 = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }

    /// Minutes since midnight.
    pub fn minutes(&self) -> u32 {
        u32::from(self.hour) * 60 + u32::from(self.minute)
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }
}

impl FromStr for TimeOfDay {
    type Err = NudgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Whether `now` (minute of day) falls in the window `[start, end)`.
///
/// `start > end` wraps past midnight. `start == end` is a disabled window,
/// not an all-day one.
pub fn in_window(start: TimeOfDay, end: TimeOfDay, now: u32) -> bool {
    let (start, end) = (start.minutes(), end.minutes());
    if start < end {
        start <= now && now < end
    } else if start > end {
        now >= start || now < end
    } else {
        false
    }
}

/// Minute of day of `now` in the given fixed UTC offset.
pub fn local_minute_of_day(now: DateTime<Utc>, utc_offset_minutes: i32) -> u32 {
    match FixedOffset::east_opt(utc_offset_minutes * 60) {
        Some(offset) => {
            let local = now.with_timezone(&offset);
            local.hour() * 60 + local.minute()
        }
        None => now.hour() * 60 + now.minute(),
    }
}

/// Whether quiet hours are active at `now`.
///
/// Quiet hours apply only when both boundaries are configured. Boundaries
/// that fail to parse disable the window; config validation rejects them
/// before they get here.
pub fn is_quiet_hours(config: &ReminderInjectionConfig, now: DateTime<Utc>) -> bool {
    let (Some(start), Some(end)) = (
        config.quiet_hours_start.as_deref(),
        config.quiet_hours_end.as_deref(),
    ) else {
        return false;
    };

    match (TimeOfDay::parse(start), TimeOfDay::parse(end)) {
        (Ok(start), Ok(end)) => in_window(
            start,
            end,
            local_minute_of_day(now, config.utc_offset_minutes),
        ),
        _ => {
            warn!(start, end, "Ignoring unparseable quiet hours");
            false
        }
    }
}

/// Delivery policy for one priority level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityPolicy {
    /// Deliver during quiet hours
    pub bypass_quiet_hours: bool,
}

/// Per-priority delivery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrioritySystemConfig {
    pub urgent: PriorityPolicy,
    pub normal: PriorityPolicy,
    pub low: PriorityPolicy,
}

impl Default for PrioritySystemConfig {
    fn default() -> Self {
        Self {
            urgent: PriorityPolicy {
                bypass_quiet_hours: true,
            },
            normal: PriorityPolicy {
                bypass_quiet_hours: false,
            },
            low: PriorityPolicy {
                bypass_quiet_hours: false,
            },
        }
    }
}

impl PrioritySystemConfig {
    /// Policy for a priority level.
    pub fn policy(&self, priority: ReminderPriority) -> PriorityPolicy {
        match priority {
            ReminderPriority::Urgent => self.urgent,
            ReminderPriority::Normal => self.normal,
            ReminderPriority::Low => self.low,
        }
    }
}

/// Whether a reminder may be delivered during quiet hours.
///
/// Explicit exemption always wins. Otherwise only urgent reminders can bypass,
/// and only when the urgent policy allows it.
pub fn should_bypass_quiet_hours(reminder: &Reminder, priorities: &PrioritySystemConfig) -> bool {
    reminder.quiet_hours_exempt
        || (reminder.priority == ReminderPriority::Urgent && priorities.urgent.bypass_quiet_hours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminders::ReminderTrigger;

    fn at(hh_mm: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&format!("2026-03-02T{}:00Z", hh_mm))
            .unwrap()
            .with_timezone(&Utc)
    }

    fn quiet(start: &str, end: &str) -> ReminderInjectionConfig {
        ReminderInjectionConfig {
            quiet_hours_start: Some(start.to_string()),
            quiet_hours_end: Some(end.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(TimeOfDay::parse("22:00").unwrap().minutes(), 22 * 60);
        assert_eq!(TimeOfDay::parse("7:05").unwrap().minutes(), 7 * 60 + 5);
        assert_eq!(TimeOfDay::parse("07:05").unwrap().to_string(), "07:05");

        for bad in ["24:00", "12:60", "12", "12:5", "ab:cd", "", "-1:00", "123:00"] {
            assert!(TimeOfDay::parse(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_window_properties_hold_for_every_minute() {
        let step = |m: u32| TimeOfDay::new((m / 60) as u8, (m % 60) as u8).unwrap();
        for start in (0..1440).step_by(90) {
            for end in (0..1440).step_by(75) {
                for now in (0..1440).step_by(7) {
                    let expected = if start < end {
                        start <= now && now < end
                    } else if start > end {
                        now >= start || now < end
                    } else {
                        false
                    };
                    assert_eq!(
                        in_window(step(start), step(end), now),
                        expected,
                        "start={} end={} now={}",
                        start,
                        end,
                        now
                    );
                }
            }
        }
    }

    #[test]
    fn test_same_day_window_boundaries() {
        let config = quiet("13:00", "14:30");
        assert!(!is_quiet_hours(&config, at("12:59")));
        assert!(is_quiet_hours(&config, at("13:00")));
        assert!(is_quiet_hours(&config, at("14:29")));
        assert!(!is_quiet_hours(&config, at("14:30")));
    }

    #[test]
    fn test_overnight_window() {
        let config = quiet("22:00", "07:00");
        assert!(is_quiet_hours(&config, at("22:00")));
        assert!(is_quiet_hours(&config, at("23:00")));
        assert!(is_quiet_hours(&config, at("00:00")));
        assert!(is_quiet_hours(&config, at("06:59")));
        assert!(!is_quiet_hours(&config, at("07:00")));
        assert!(!is_quiet_hours(&config, at("21:59")));
    }

    #[test]
    fn test_equal_boundaries_disable_window() {
        let config = quiet("09:00", "09:00");
        assert!(!is_quiet_hours(&config, at("09:00")));
        assert!(!is_quiet_hours(&config, at("03:00")));
    }

    #[test]
    fn test_missing_boundary_disables_window() {
        let mut config = quiet("22:00", "07:00");
        config.quiet_hours_end = None;
        assert!(!is_quiet_hours(&config, at("23:00")));

        let config = ReminderInjectionConfig::default();
        assert!(!is_quiet_hours(&config, at("23:00")));
    }

    #[test]
    fn test_malformed_boundary_disables_window() {
        let config = quiet("late", "07:00");
        assert!(!is_quiet_hours(&config, at("23:00")));
    }

    #[test]
    fn test_utc_offset_shifts_local_time() {
        let mut config = quiet("22:00", "07:00");
        config.utc_offset_minutes = 120;
        // 21:00 UTC is 23:00 at UTC+2
        assert!(is_quiet_hours(&config, at("21:00")));
        assert!(!is_quiet_hours(&config, at("05:00")));
    }

    #[test]
    fn test_exemption_always_bypasses() {
        let never = PrioritySystemConfig {
            urgent: PriorityPolicy {
                bypass_quiet_hours: false,
            },
            ..Default::default()
        };

        for priority in [
            ReminderPriority::Urgent,
            ReminderPriority::Normal,
            ReminderPriority::Low,
        ] {
            let reminder = Reminder::new("agent-1", "Meds", ReminderTrigger::context("x"))
                .with_priority(priority)
                .quiet_hours_exempt();
            assert!(should_bypass_quiet_hours(&reminder, &never));
            assert!(should_bypass_quiet_hours(&reminder, &PrioritySystemConfig::default()));
        }
    }

    #[test]
    fn test_urgent_bypass_follows_policy() {
        let urgent = Reminder::new("agent-1", "Flight", ReminderTrigger::context("x"))
            .with_priority(ReminderPriority::Urgent);
        let normal = Reminder::new("agent-1", "Laundry", ReminderTrigger::context("x"));

        let defaults = PrioritySystemConfig::default();
        assert!(should_bypass_quiet_hours(&urgent, &defaults));
        assert!(!should_bypass_quiet_hours(&normal, &defaults));

        let strict = PrioritySystemConfig {
            urgent: PriorityPolicy {
                bypass_quiet_hours: false,
            },
            ..defaults
        };
        assert!(!should_bypass_quiet_hours(&urgent, &strict));
        assert!(!strict.policy(ReminderPriority::Urgent).bypass_quiet_hours);
    }
}
