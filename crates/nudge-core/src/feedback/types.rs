//! Feedback events and per-reminder effectiveness metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::{NudgeError, NudgeResult};
use crate::feedback::ScoreWindow;

/// How the user reacted to a delivered reminder.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Reaction {
    Completed,
    Dismissed,
    Snoozed,
    Ignored,
    Acted,
}

impl Reaction {
    pub const ALL: [Reaction; 5] = [
        Reaction::Completed,
        Reaction::Dismissed,
        Reaction::Snoozed,
        Reaction::Ignored,
        Reaction::Acted,
    ];
}

/// Where a reaction came from.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSource {
    /// The user said so
    #[default]
    Explicit,
    /// No reaction before the timeout
    Timeout,
    /// Derived from later conversation
    Inferred,
}

/// One recorded reaction. Append-only; removed only by retention cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub id: String,
    pub reminder_id: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    pub shown_at: DateTime<Utc>,
    pub reaction: Reaction,
    pub source: FeedbackSource,
    pub recorded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reaction_time_ms: Option<i64>,
    /// How relevant the reminder was to the conversation, 0-1
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_relevance_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_response: Option<String>,
}

/// Input to `FeedbackStore::record_outcome`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderOutcome {
    pub reminder_id: String,
    pub agent_id: String,
    pub reaction: Reaction,
    #[serde(default)]
    pub session_key: Option<String>,
    /// Defaults to the recording time
    #[serde(default)]
    pub shown_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: FeedbackSource,
    #[serde(default)]
    pub reaction_time_ms: Option<i64>,
    #[serde(default)]
    pub context_relevance_score: Option<f64>,
    #[serde(default)]
    pub trigger_message: Option<String>,
    #[serde(default)]
    pub user_response: Option<String>,
}

impl ReminderOutcome {
    pub fn new(
        reminder_id: impl Into<String>,
        agent_id: impl Into<String>,
        reaction: Reaction,
    ) -> Self {
        Self {
            reminder_id: reminder_id.into(),
            agent_id: agent_id.into(),
            reaction,
            session_key: None,
            shown_at: None,
            source: FeedbackSource::Explicit,
            reaction_time_ms: None,
            context_relevance_score: None,
            trigger_message: None,
            user_response: None,
        }
    }

    /// Builder method to set the session
    pub fn with_session(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = Some(session_key.into());
        self
    }

    /// Builder method to set when the reminder was shown
    pub fn shown_at(mut self, at: DateTime<Utc>) -> Self {
        self.shown_at = Some(at);
        self
    }

    /// Builder method to set the source
    pub fn with_source(mut self, source: FeedbackSource) -> Self {
        self.source = source;
        self
    }

    /// Builder method to set the reaction time
    pub fn with_reaction_time_ms(mut self, ms: i64) -> Self {
        self.reaction_time_ms = Some(ms);
        self
    }

    /// Builder method to set the context relevance
    pub fn with_relevance(mut self, score: f64) -> Self {
        self.context_relevance_score = Some(score);
        self
    }

    /// Builder method to keep the surrounding conversation
    pub fn with_messages(
        mut self,
        trigger_message: Option<String>,
        user_response: Option<String>,
    ) -> Self {
        self.trigger_message = trigger_message;
        self.user_response = user_response;
        self
    }

    pub fn validate(&self) -> NudgeResult<()> {
        if self.reminder_id.trim().is_empty() {
            return Err(NudgeError::missing_field("reminder_id"));
        }
        if self.agent_id.trim().is_empty() {
            return Err(NudgeError::missing_field("agent_id"));
        }
        if let Some(score) = self.context_relevance_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(NudgeError::validation(format!(
                    "context_relevance_score must be between 0 and 1, got {}",
                    score
                )));
            }
        }
        if matches!(self.reaction_time_ms, Some(ms) if ms < 0) {
            return Err(NudgeError::validation("reaction_time_ms must not be negative"));
        }
        Ok(())
    }
}

/// Direction of recent effectiveness.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    #[default]
    Stable,
}

/// Aggregated effectiveness of one reminder.
///
/// Counts always sum to `total_showings`; rates are count / total_showings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivenessMetrics {
    pub reminder_id: String,
    pub agent_id: String,
    pub total_showings: u32,
    pub completed_count: u32,
    pub dismissed_count: u32,
    pub snoozed_count: u32,
    pub ignored_count: u32,
    pub acted_count: u32,
    pub completion_rate: f64,
    pub dismissal_rate: f64,
    pub avg_reaction_time_ms: Option<f64>,
    pub avg_context_relevance: Option<f64>,
    pub effectiveness_score: f64,
    pub trend: Trend,
    /// Outcome scores, oldest first
    pub recent_scores: ScoreWindow,
    pub last_calculated_at: DateTime<Utc>,
}

impl EffectivenessMetrics {
    /// Enough showings to draw conclusions from.
    pub fn is_reliable(&self, min_showings: u32) -> bool {
        self.total_showings >= min_showings
    }

    fn rate(&self, count: u32) -> f64 {
        if self.total_showings == 0 {
            0.0
        } else {
            f64::from(count) / f64::from(self.total_showings)
        }
    }

    pub fn acted_rate(&self) -> f64 {
        self.rate(self.acted_count)
    }

    pub fn snooze_rate(&self) -> f64 {
        self.rate(self.snoozed_count)
    }

    pub fn ignore_rate(&self) -> f64 {
        self.rate(self.ignored_count)
    }

    /// Count of one reaction.
    pub fn count(&self, reaction: Reaction) -> u32 {
        match reaction {
            Reaction::Completed => self.completed_count,
            Reaction::Dismissed => self.dismissed_count,
            Reaction::Snoozed => self.snoozed_count,
            Reaction::Ignored => self.ignored_count,
            Reaction::Acted => self.acted_count,
        }
    }
}

/// Best and worst reminders of an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRanking {
    /// Highest effectiveness first
    pub top: Vec<EffectivenessMetrics>,
    /// Lowest effectiveness first
    pub bottom: Vec<EffectivenessMetrics>,
}

/// Feedback totals of an agent over a time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentFeedbackStats {
    pub agent_id: String,
    pub window_days: u32,
    pub total_showings: u32,
    pub unique_reminders: u32,
    pub completed: u32,
    pub dismissed: u32,
    pub snoozed: u32,
    pub ignored: u32,
    pub acted: u32,
    pub completion_rate: f64,
    pub dismissal_rate: f64,
    pub avg_reaction_time_ms: Option<f64>,
}
