//! Reminder types and lifecycle transitions.
//!
//! - `Reminder`: a stored reminder with exactly one trigger
//! - `ReminderTrigger`: when a reminder becomes due (scheduled, recurring, context)
//! - `ReminderStatus` / `ReminderPriority`: lifecycle state and delivery priority

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::error::{NudgeError, NudgeResult};
use crate::feedback::Reaction;

/// A reminder owned by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    /// Opaque identifier
    pub id: String,
    /// Agent that owns the reminder
    pub agent_id: String,
    /// Short human-readable title
    pub title: String,
    /// Optional longer text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// What makes this reminder due. The kind never changes after creation.
    pub trigger: ReminderTrigger,
    /// Lifecycle state
    pub status: ReminderStatus,
    /// Delivery priority
    pub priority: ReminderPriority,
    /// When this reminder was created
    pub created_at: DateTime<Utc>,
    /// When the reminder was last delivered to the user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggered_at: Option<DateTime<Utc>>,
    /// When the reminder was last completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wake-up time; present iff status is snoozed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snooze_until: Option<DateTime<Utc>>,
    /// Last time the external scheduler fired this reminder's job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fired_at: Option<DateTime<Utc>>,
    /// Free-form tags shown with the reminder
    #[serde(default)]
    pub context_tags: Vec<String>,
    /// Deliver even during quiet hours
    #[serde(default)]
    pub quiet_hours_exempt: bool,
    /// Content chunk the reminder was extracted from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_chunk_id: Option<String>,
}

impl Reminder {
    /// Create a pending, normal-priority reminder.
    pub fn new(
        agent_id: impl Into<String>,
        title: impl Into<String>,
        trigger: ReminderTrigger,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            title: title.into(),
            body: None,
            trigger,
            status: ReminderStatus::Pending,
            priority: ReminderPriority::Normal,
            created_at: Utc::now(),
            triggered_at: None,
            completed_at: None,
            snooze_until: None,
            last_fired_at: None,
            context_tags: Vec::new(),
            quiet_hours_exempt: false,
            source_chunk_id: None,
        }
    }

    /// Builder method to set the id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder method to set the body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Builder method to set the priority
    pub fn with_priority(mut self, priority: ReminderPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder method to set context tags
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.context_tags = tags;
        self
    }

    /// Builder method to exempt the reminder from quiet hours
    pub fn quiet_hours_exempt(mut self) -> Self {
        self.quiet_hours_exempt = true;
        self
    }

    /// Builder method to set the creation time
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Builder method to link the source content chunk
    pub fn with_source_chunk(mut self, chunk_id: impl Into<String>) -> Self {
        self.source_chunk_id = Some(chunk_id.into());
        self
    }

    /// Completed and dismissed reminders never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ReminderStatus::Completed | ReminderStatus::Dismissed
        )
    }

    /// Check the status/snooze invariant and trigger fields.
    pub fn validate(&self) -> NudgeResult<()> {
        if self.id.trim().is_empty() {
            return Err(NudgeError::missing_field("id"));
        }
        if self.agent_id.trim().is_empty() {
            return Err(NudgeError::missing_field("agent_id"));
        }
        match (&self.status, &self.snooze_until) {
            (ReminderStatus::Snoozed, None) => Err(NudgeError::missing_field("snooze_until")),
            (status, Some(_)) if *status != ReminderStatus::Snoozed => Err(
                NudgeError::validation("snooze_until is only allowed on snoozed reminders"),
            ),
            _ => self.trigger.validate(),
        }
    }

    /// Mark the reminder as delivered.
    pub fn mark_triggered(&mut self, now: DateTime<Utc>) {
        if self.is_terminal() {
            return;
        }
        self.status = ReminderStatus::Triggered;
        self.triggered_at = Some(now);
        self.snooze_until = None;
    }

    /// Snooze until the given time.
    pub fn snooze(&mut self, until: DateTime<Utc>, now: DateTime<Utc>) -> NudgeResult<()> {
        if self.is_terminal() {
            return Err(NudgeError::validation(format!(
                "Cannot snooze {} reminder '{}'",
                self.status, self.id
            )));
        }
        if until <= now {
            return Err(NudgeError::validation_with_suggestion(
                "Snooze time must be in the future",
                "Pick a wake-up time after now",
            ));
        }
        self.status = ReminderStatus::Snoozed;
        self.snooze_until = Some(until);
        Ok(())
    }

    /// Complete the reminder. Recurring reminders go back to pending for their
    /// next occurrence.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        if self.is_terminal() {
            return;
        }
        self.completed_at = Some(now);
        self.snooze_until = None;
        self.status = match self.trigger {
            ReminderTrigger::Recurring { .. } => ReminderStatus::Pending,
            _ => ReminderStatus::Completed,
        };
    }

    /// Dismiss the reminder. Recurring reminders go back to pending.
    pub fn dismiss(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.snooze_until = None;
        self.status = match self.trigger {
            ReminderTrigger::Recurring { .. } => ReminderStatus::Pending,
            _ => ReminderStatus::Dismissed,
        };
    }

    /// Return a snoozed reminder to pending once its snooze has expired.
    pub fn wake(&mut self, now: DateTime<Utc>) -> bool {
        match (self.status, self.snooze_until) {
            (ReminderStatus::Snoozed, Some(until)) if until <= now => {
                self.status = ReminderStatus::Pending;
                self.snooze_until = None;
                true
            }
            _ => false,
        }
    }

    /// Apply a user reaction to the lifecycle.
    pub fn apply_reaction(
        &mut self,
        reaction: Reaction,
        snooze_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> NudgeResult<()> {
        match reaction {
            Reaction::Completed => self.complete(now),
            Reaction::Dismissed => self.dismiss(),
            Reaction::Snoozed => {
                let until = snooze_until.ok_or_else(|| NudgeError::missing_field("snooze_until"))?;
                self.snooze(until, now)?;
            }
            Reaction::Acted => self.mark_triggered(self.triggered_at.unwrap_or(now)),
            Reaction::Ignored => {
                if !self.is_terminal() {
                    self.status = ReminderStatus::Pending;
                    self.snooze_until = None;
                }
            }
        }
        Ok(())
    }
}

/// What makes a reminder due.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReminderTrigger {
    /// Due once at a fixed instant
    Scheduled { at: DateTime<Utc> },
    /// Due whenever the cron expression fires (evaluated by the job service)
    Recurring { cron: String },
    /// Due when the conversation matches the pattern (scored elsewhere)
    Context { pattern: String },
}

impl ReminderTrigger {
    /// Create a one-shot trigger
    pub fn at(at: DateTime<Utc>) -> Self {
        Self::Scheduled { at }
    }

    /// Create a cron trigger
    pub fn cron(expr: impl Into<String>) -> Self {
        Self::Recurring { cron: expr.into() }
    }

    /// Create a context trigger
    pub fn context(pattern: impl Into<String>) -> Self {
        Self::Context {
            pattern: pattern.into(),
        }
    }

    /// Stable name of the trigger kind, as stored in the database.
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::Scheduled { .. } => TriggerKind::Scheduled,
            Self::Recurring { .. } => TriggerKind::Recurring,
            Self::Context { .. } => TriggerKind::Context,
        }
    }

    fn validate(&self) -> NudgeResult<()> {
        match self {
            Self::Scheduled { .. } => Ok(()),
            Self::Recurring { cron } if cron.trim().is_empty() => {
                Err(NudgeError::missing_field("cron"))
            }
            Self::Context { pattern } if pattern.trim().is_empty() => {
                Err(NudgeError::missing_field("pattern"))
            }
            _ => Ok(()),
        }
    }
}

/// Trigger kind without payload.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Scheduled,
    Recurring,
    Context,
}

/// Lifecycle state of a reminder.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Pending,
    Triggered,
    Completed,
    Dismissed,
    Snoozed,
}

/// Delivery priority. Ordering is urgent first.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReminderPriority {
    Urgent,
    Normal,
    Low,
}
