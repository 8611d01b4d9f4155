//! Mapping between reminder triggers and job-service schedules.

use chrono::{DateTime, Utc};

use crate::reminders::{Reminder, ReminderPriority, ReminderTrigger};
use crate::schedule::{JobPayload, JobSchedule};

/// Prefix of every job name owned by a reminder.
pub const REMINDER_JOB_PREFIX: &str = "reminder:";

/// A schedule plus its run policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub schedule: JobSchedule,
    pub delete_after_run: bool,
}

/// Deterministic job name for a reminder.
pub fn job_name_for(reminder_id: &str) -> String {
    format!("{}{}", REMINDER_JOB_PREFIX, reminder_id)
}

/// Reminder id encoded in a job name, if the job belongs to a reminder.
pub fn reminder_id_from_job_name(name: &str) -> Option<&str> {
    name.strip_prefix(REMINDER_JOB_PREFIX)
        .filter(|id| !id.is_empty())
}

/// Natural schedule of a reminder's trigger.
///
/// Context reminders are surfaced by semantic matching and never scheduled.
pub fn trigger_to_schedule(reminder: &Reminder) -> Option<ScheduledJob> {
    match &reminder.trigger {
        ReminderTrigger::Scheduled { at } => Some(ScheduledJob {
            schedule: JobSchedule::at(*at),
            delete_after_run: true,
        }),
        ReminderTrigger::Recurring { cron } => Some(ScheduledJob {
            schedule: JobSchedule::cron(cron.clone()),
            delete_after_run: false,
        }),
        ReminderTrigger::Context { .. } => None,
    }
}

/// One-shot schedule that wakes a snoozed reminder.
pub fn snooze_schedule(until: DateTime<Utc>) -> ScheduledJob {
    ScheduledJob {
        schedule: JobSchedule::at(until),
        delete_after_run: true,
    }
}

fn priority_label(priority: ReminderPriority) -> &'static str {
    match priority {
        ReminderPriority::Urgent => "[URGENT] Reminder",
        ReminderPriority::Normal => "Reminder",
        ReminderPriority::Low => "Low priority reminder",
    }
}

/// Render the message a reminder's job delivers when it fires.
pub fn build_job_payload(reminder: &Reminder) -> JobPayload {
    let mut message = format!("{}: {}", priority_label(reminder.priority), reminder.title);

    if let Some(body) = reminder.body.as_deref().filter(|b| !b.trim().is_empty()) {
        message.push('\n');
        message.push_str(body);
    }
    if !reminder.context_tags.is_empty() {
        message.push_str("\nTags: ");
        message.push_str(&reminder.context_tags.join(", "));
    }

    JobPayload {
        reminder_id: reminder.id.clone(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduled_trigger_is_one_shot() {
        let at = Utc::now();
        let reminder = Reminder::new("agent-1", "Dentist", ReminderTrigger::at(at));
        let scheduled = trigger_to_schedule(&reminder).unwrap();

        assert_eq!(scheduled.schedule, JobSchedule::At { at_ms: at.timestamp_millis() });
        assert!(scheduled.delete_after_run);
    }

    #[test]
    fn test_recurring_trigger_is_persistent() {
        let reminder = Reminder::new("agent-1", "Standup", ReminderTrigger::cron("0 0 9 * * Mon-Fri"));
        let scheduled = trigger_to_schedule(&reminder).unwrap();

        assert_eq!(scheduled.schedule, JobSchedule::cron("0 0 9 * * Mon-Fri"));
        assert!(!scheduled.delete_after_run);
    }

    #[test]
    fn test_context_trigger_is_never_scheduled() {
        let reminder = Reminder::new("agent-1", "Buy milk", ReminderTrigger::context("grocery"));
        assert!(trigger_to_schedule(&reminder).is_none());
    }

    #[test]
    fn test_job_name_round_trip() {
        assert_eq!(job_name_for("abc"), "reminder:abc");
        assert_eq!(reminder_id_from_job_name("reminder:abc"), Some("abc"));
        assert_eq!(reminder_id_from_job_name("reminder:"), None);
        assert_eq!(reminder_id_from_job_name("backup:abc"), None);
    }

    #[test]
    fn test_payload_formatting() {
        let reminder = Reminder::new("agent-1", "Submit report", ReminderTrigger::at(Utc::now()))
            .with_id("rem-9")
            .with_priority(ReminderPriority::Urgent)
            .with_body("Due to finance by noon")
            .with_tags(vec!["work".to_string(), "q3".to_string()]);

        let payload = build_job_payload(&reminder);
        assert_eq!(payload.reminder_id, "rem-9");
        assert_eq!(
            payload.message,
            "[URGENT] Reminder: Submit report\nDue to finance by noon\nTags: work, q3"
        );
    }

    #[test]
    fn test_payload_without_optional_parts() {
        let reminder = Reminder::new("agent-1", "Water plants", ReminderTrigger::at(Utc::now()))
            .with_priority(ReminderPriority::Low);
        assert_eq!(
            build_job_payload(&reminder).message,
            "Low priority reminder: Water plants"
        );
    }
}
