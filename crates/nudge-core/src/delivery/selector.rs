//! Selection of the reminders to inject into an agent turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::delivery::quiet_hours::{is_quiet_hours, should_bypass_quiet_hours, TimeOfDay};
use crate::delivery::PrioritySystemConfig;
use crate::error::{NudgeError, NudgeResult};
use crate::reminders::{Reminder, ReminderPriority, ReminderStatus, ReminderTrigger};

/// Injection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderInjectionConfig {
    /// Master switch; disabled selects nothing
    pub enabled: bool,
    /// Cap on non-urgent reminders per cycle
    pub max_reminders: usize,
    /// Consider context-triggered reminders
    pub include_contextual: bool,
    /// Minimum context score for a context reminder to be due
    pub min_context_score: f32,
    /// Quiet hours start, "HH:MM"
    pub quiet_hours_start: Option<String>,
    /// Quiet hours end, "HH:MM" (exclusive)
    pub quiet_hours_end: Option<String>,
    /// Fixed offset of the user's local time from UTC
    pub utc_offset_minutes: i32,
}

impl Default for ReminderInjectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_reminders: 3,
            include_contextual: true,
            min_context_score: 0.7,
            quiet_hours_start: None,
            quiet_hours_end: None,
            utc_offset_minutes: 0,
        }
    }
}

impl ReminderInjectionConfig {
    /// Reject malformed settings before they reach the selector.
    pub fn validate(&self) -> NudgeResult<()> {
        for boundary in [&self.quiet_hours_start, &self.quiet_hours_end]
            .into_iter()
            .flatten()
        {
            TimeOfDay::parse(boundary)?;
        }
        if !(0.0..=1.0).contains(&self.min_context_score) {
            return Err(NudgeError::validation(format!(
                "min_context_score must be between 0 and 1, got {}",
                self.min_context_score
            )));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(NudgeError::validation(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        Ok(())
    }
}

/// Context relevance scores for context-triggered reminders, keyed by id.
pub trait ContextScores: Send + Sync {
    /// Score in `[0, 1]`, or None when the reminder was not scored.
    fn score(&self, reminder_id: &str) -> Option<f32>;
}

impl ContextScores for HashMap<String, f32> {
    fn score(&self, reminder_id: &str) -> Option<f32> {
        self.get(reminder_id).copied()
    }
}

/// No context scores; context reminders are never due.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContextScores;

impl ContextScores for NoContextScores {
    fn score(&self, _reminder_id: &str) -> Option<f32> {
        None
    }
}

/// When a reminder became due, or None if it is not due at `now`.
pub fn due_at(
    reminder: &Reminder,
    now: DateTime<Utc>,
    config: &ReminderInjectionConfig,
    scores: &dyn ContextScores,
) -> Option<DateTime<Utc>> {
    match reminder.status {
        ReminderStatus::Snoozed => reminder.snooze_until.filter(|until| *until <= now),
        ReminderStatus::Pending => match &reminder.trigger {
            ReminderTrigger::Scheduled { at } => Some(*at).filter(|at| *at <= now),
            ReminderTrigger::Recurring { .. } => {
                let fired = reminder.last_fired_at.filter(|fired| *fired <= now)?;
                match reminder.triggered_at {
                    Some(delivered) if delivered >= fired => None,
                    _ => Some(fired),
                }
            }
            ReminderTrigger::Context { .. } => {
                if !config.include_contextual {
                    return None;
                }
                let score = scores.score(&reminder.id)?;
                (score >= config.min_context_score).then_some(reminder.created_at)
            }
        },
        _ => None,
    }
}

/// Pick the reminders to deliver this cycle, in delivery order.
///
/// Urgent reminders are uncapped while the urgent policy bypasses quiet hours.
/// Everything else, exempt or not, counts against `max_reminders`. During
/// quiet hours only reminders allowed to bypass them are considered.
pub fn select_for_injection(
    reminders: &[Reminder],
    config: &ReminderInjectionConfig,
    now: DateTime<Utc>,
    priorities: &PrioritySystemConfig,
    scores: &dyn ContextScores,
) -> Vec<Reminder> {
    if !config.enabled {
        return Vec::new();
    }

    let quiet = is_quiet_hours(config, now);
    let mut candidates: Vec<(DateTime<Utc>, &Reminder)> = reminders
        .iter()
        .filter_map(|r| due_at(r, now, config, scores).map(|due| (due, r)))
        .filter(|(_, r)| !quiet || should_bypass_quiet_hours(r, priorities))
        .collect();

    candidates.sort_by(|(a_due, a), (b_due, b)| {
        a.priority
            .cmp(&b.priority)
            .then(a_due.cmp(b_due))
            .then_with(|| a.id.cmp(&b.id))
    });

    let urgent_uncapped = priorities.urgent.bypass_quiet_hours;
    let mut capped = 0usize;
    let selected: Vec<Reminder> = candidates
        .into_iter()
        .filter(|(_, r)| {
            if urgent_uncapped && r.priority == ReminderPriority::Urgent {
                return true;
            }
            capped += 1;
            capped <= config.max_reminders
        })
        .map(|(_, r)| r.clone())
        .collect();

    debug!(
        considered = reminders.len(),
        selected = selected.len(),
        quiet_hours = quiet,
        "Selected reminders for injection"
    );

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::PriorityPolicy;
    use chrono::Duration;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn late_evening() -> DateTime<Utc> {
        at("2026-03-02T23:00:00Z")
    }

    fn due(id: &str, priority: ReminderPriority, minutes_ago: i64) -> Reminder {
        Reminder::new(
            "agent-1",
            format!("Reminder {}", id),
            ReminderTrigger::at(late_evening() - Duration::minutes(minutes_ago)),
        )
        .with_id(id)
        .with_priority(priority)
    }

    fn overnight_quiet() -> ReminderInjectionConfig {
        ReminderInjectionConfig {
            quiet_hours_start: Some("22:00".to_string()),
            quiet_hours_end: Some("07:00".to_string()),
            ..Default::default()
        }
    }

    fn ids(selected: &[Reminder]) -> Vec<&str> {
        selected.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_disabled_selects_nothing() {
        let config = ReminderInjectionConfig {
            enabled: false,
            ..Default::default()
        };
        let reminders = vec![due("a", ReminderPriority::Urgent, 5)];
        let selected = select_for_injection(
            &reminders,
            &config,
            late_evening(),
            &PrioritySystemConfig::default(),
            &NoContextScores,
        );
        assert!(selected.is_empty());
    }

    #[test]
    fn test_quiet_hours_hold_normal_but_not_exempt() {
        let reminders = vec![
            due("normal", ReminderPriority::Normal, 5),
            due("exempt", ReminderPriority::Normal, 5).quiet_hours_exempt(),
        ];
        let selected = select_for_injection(
            &reminders,
            &overnight_quiet(),
            late_evening(),
            &PrioritySystemConfig::default(),
            &NoContextScores,
        );
        assert_eq!(ids(&selected), vec!["exempt"]);
    }

    #[test]
    fn test_urgent_bypass_can_be_disabled() {
        let reminders = vec![due("urgent", ReminderPriority::Urgent, 5)];
        let strict = PrioritySystemConfig {
            urgent: PriorityPolicy {
                bypass_quiet_hours: false,
            },
            ..Default::default()
        };
        let selected = select_for_injection(
            &reminders,
            &overnight_quiet(),
            late_evening(),
            &strict,
            &NoContextScores,
        );
        assert!(selected.is_empty());
    }

    #[test]
    fn test_strict_urgent_policy_caps_urgent() {
        let config = ReminderInjectionConfig {
            max_reminders: 2,
            ..Default::default()
        };
        let reminders: Vec<Reminder> = (0..3)
            .map(|i| due(&format!("urgent-{}", i), ReminderPriority::Urgent, 10 - i))
            .collect();
        let strict = PrioritySystemConfig {
            urgent: PriorityPolicy {
                bypass_quiet_hours: false,
            },
            ..Default::default()
        };

        let selected =
            select_for_injection(&reminders, &config, late_evening(), &strict, &NoContextScores);
        assert_eq!(ids(&selected), vec!["urgent-0", "urgent-1"]);

        let lenient = select_for_injection(
            &reminders,
            &config,
            late_evening(),
            &PrioritySystemConfig::default(),
            &NoContextScores,
        );
        assert_eq!(lenient.len(), 3);
    }

    #[test]
    fn test_cap_applies_to_exempt_normal_but_not_urgent() {
        let config = ReminderInjectionConfig {
            max_reminders: 2,
            ..overnight_quiet()
        };
        let mut reminders: Vec<Reminder> = (0..3)
            .map(|i| due(&format!("exempt-{}", i), ReminderPriority::Normal, 10 - i).quiet_hours_exempt())
            .collect();
        reminders.extend((0..3).map(|i| due(&format!("urgent-{}", i), ReminderPriority::Urgent, 10 - i)));

        let selected = select_for_injection(
            &reminders,
            &config,
            late_evening(),
            &PrioritySystemConfig::default(),
            &NoContextScores,
        );
        assert_eq!(
            ids(&selected),
            vec!["urgent-0", "urgent-1", "urgent-2", "exempt-0", "exempt-1"]
        );
    }

    #[test]
    fn test_ordering_is_priority_then_due_time_then_id() {
        let config = ReminderInjectionConfig {
            max_reminders: 10,
            ..Default::default()
        };
        let reminders = vec![
            due("low", ReminderPriority::Low, 60),
            due("normal-late", ReminderPriority::Normal, 1),
            due("normal-b", ReminderPriority::Normal, 30),
            due("normal-a", ReminderPriority::Normal, 30),
            due("urgent", ReminderPriority::Urgent, 2),
        ];
        let selected = select_for_injection(
            &reminders,
            &config,
            late_evening(),
            &PrioritySystemConfig::default(),
            &NoContextScores,
        );
        assert_eq!(
            ids(&selected),
            vec!["urgent", "normal-a", "normal-b", "normal-late", "low"]
        );
    }

    #[test]
    fn test_future_and_terminal_reminders_are_not_due() {
        let config = ReminderInjectionConfig::default();
        let now = late_evening();

        let future = due("future", ReminderPriority::Normal, -5);
        assert_eq!(due_at(&future, now, &config, &NoContextScores), None);

        let mut done = due("done", ReminderPriority::Normal, 5);
        done.complete(now);
        assert_eq!(due_at(&done, now, &config, &NoContextScores), None);

        let mut delivered = due("delivered", ReminderPriority::Normal, 5);
        delivered.mark_triggered(now);
        assert_eq!(due_at(&delivered, now, &config, &NoContextScores), None);
    }

    #[test]
    fn test_snoozed_reminder_is_due_once_snooze_expires() {
        let config = ReminderInjectionConfig::default();
        let now = late_evening();
        let mut reminder = due("snoozed", ReminderPriority::Normal, 60);
        reminder
            .snooze(now - Duration::minutes(1), now - Duration::minutes(30))
            .unwrap();
        assert_eq!(
            due_at(&reminder, now, &config, &NoContextScores),
            Some(now - Duration::minutes(1))
        );

        reminder.snooze_until = Some(now + Duration::minutes(1));
        assert_eq!(due_at(&reminder, now, &config, &NoContextScores), None);
    }

    #[test]
    fn test_recurring_reminder_is_due_after_each_fire() {
        let config = ReminderInjectionConfig::default();
        let now = late_evening();
        let mut reminder = Reminder::new("agent-1", "Standup", ReminderTrigger::cron("0 0 9 * * *"))
            .with_id("standup");
        assert_eq!(due_at(&reminder, now, &config, &NoContextScores), None);

        reminder.last_fired_at = Some(now - Duration::minutes(10));
        assert_eq!(
            due_at(&reminder, now, &config, &NoContextScores),
            Some(now - Duration::minutes(10))
        );

        reminder.triggered_at = Some(now - Duration::minutes(5));
        assert_eq!(due_at(&reminder, now, &config, &NoContextScores), None);
    }

    #[test]
    fn test_context_reminders_need_a_score() {
        let config = ReminderInjectionConfig::default();
        let now = late_evening();
        let reminder = Reminder::new("agent-1", "Buy milk", ReminderTrigger::context("grocery"))
            .with_id("milk")
            .created_at(now - Duration::hours(1));

        assert_eq!(due_at(&reminder, now, &config, &NoContextScores), None);

        let mut scores = HashMap::new();
        scores.insert("milk".to_string(), 0.5f32);
        assert_eq!(due_at(&reminder, now, &config, &scores), None);

        scores.insert("milk".to_string(), 0.7f32);
        assert_eq!(
            due_at(&reminder, now, &config, &scores),
            Some(now - Duration::hours(1))
        );

        let off = ReminderInjectionConfig {
            include_contextual: false,
            ..Default::default()
        };
        assert_eq!(due_at(&reminder, now, &off, &scores), None);
    }

    #[test]
    fn test_validate_rejects_bad_boundaries() {
        assert!(overnight_quiet().validate().is_ok());

        let config = ReminderInjectionConfig {
            quiet_hours_start: Some("25:00".to_string()),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.suggestion().is_some());

        let config = ReminderInjectionConfig {
            min_context_score: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
