//! Turning reminder outcomes and aggregate effectiveness into learnings.

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::{NudgeError, NudgeResult};
use crate::feedback::{EffectivenessMetrics, Reaction, ReminderOutcome, Trend};
use crate::reminders::{Reminder, ReminderTrigger};

/// What kind of knowledge a learning records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LearningCategory {
    /// How the user responds to one reminder
    ReminderPreference,
    /// Patterns across all of an agent's reminders
    ReminderEffectiveness,
}

/// Polarity of a learning.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OutcomeType {
    Positive,
    Negative,
    Neutral,
}

/// A natural-language learning for the agent's memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learning {
    pub category: LearningCategory,
    pub content: String,
    /// 0-1
    pub confidence: f64,
    /// Where the learning came from, e.g. `reminder_feedback:<reminder id>`
    pub source: String,
    pub outcome_type: OutcomeType,
}

/// Thresholds of the learning translator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Showings required before a reminder yields any learning
    pub min_showings: u32,
    /// Completion rate at or above which a positive outcome is learned
    pub positive_completion_rate: f64,
    /// Dismissal rate at or above which a declining reminder is learned
    pub negative_dismissal_rate: f64,
    pub base_confidence: f64,
    pub high_confidence: f64,
    /// Showings required for high confidence
    pub high_confidence_showings: u32,
    /// Dominant rate required for high confidence
    pub high_confidence_rate: f64,
    /// Total showings that must be exceeded before system learnings are generated
    pub system_min_showings: u32,
    /// Reminders a bucket needs to be compared
    pub min_bucket_count: u32,
    /// Best-worst effectiveness gap that makes an axis worth reporting
    pub min_spread: f64,
    /// Local time offset used for time-of-day buckets
    pub utc_offset_minutes: i32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_showings: 3,
            positive_completion_rate: 0.6,
            negative_dismissal_rate: 0.5,
            base_confidence: 0.6,
            high_confidence: 0.85,
            high_confidence_showings: 10,
            high_confidence_rate: 0.7,
            system_min_showings: 20,
            min_bucket_count: 3,
            min_spread: 0.2,
            utc_offset_minutes: 0,
        }
    }
}

impl LearningConfig {
    pub fn validate(&self) -> NudgeResult<()> {
        let unit = [
            ("positive_completion_rate", self.positive_completion_rate),
            ("negative_dismissal_rate", self.negative_dismissal_rate),
            ("base_confidence", self.base_confidence),
            ("high_confidence", self.high_confidence),
            ("high_confidence_rate", self.high_confidence_rate),
            ("min_spread", self.min_spread),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(NudgeError::validation(format!(
                    "{} must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    fn confidence(&self, showings: u32, dominant_rate: f64) -> f64 {
        let confidence =
            if showings >= self.high_confidence_showings && dominant_rate >= self.high_confidence_rate {
                self.high_confidence
            } else {
                self.base_confidence
            };
        confidence.clamp(0.0, 1.0)
    }
}

/// Part of the day a scheduled reminder lands in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum TimeBucket {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeBucket {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => Self::Morning,
            12..=16 => Self::Afternoon,
            17..=20 => Self::Evening,
            _ => Self::Night,
        }
    }

    /// Bucket of an instant in the given fixed offset.
    pub fn of(at: DateTime<Utc>, utc_offset_minutes: i32) -> Self {
        let hour = match FixedOffset::east_opt(utc_offset_minutes * 60) {
            Some(offset) => at.with_timezone(&offset).hour(),
            None => at.hour(),
        };
        Self::from_hour(hour)
    }
}

fn percent(rate: f64) -> u32 {
    (rate * 100.0).round() as u32
}

fn describe_when(trigger: &ReminderTrigger, utc_offset_minutes: i32) -> String {
    match trigger {
        ReminderTrigger::Scheduled { at } => {
            format!("in the {}", TimeBucket::of(*at, utc_offset_minutes))
        }
        ReminderTrigger::Recurring { cron } => format!("on the recurring schedule '{}'", cron),
        ReminderTrigger::Context { pattern } => {
            format!("when the conversation touches on '{}'", pattern)
        }
    }
}

/// Translate one recorded outcome into a learning, if it says anything.
///
/// Positive learnings need a completing reaction and a high completion rate.
/// Negative learnings need dismissals to outweigh completions on a declining
/// trend. Everything in between, and any reminder with too few showings,
/// yields nothing.
pub fn outcome_to_learning(
    outcome: &ReminderOutcome,
    reminder: &Reminder,
    metrics: &EffectivenessMetrics,
    config: &LearningConfig,
) -> Option<Learning> {
    if !metrics.is_reliable(config.min_showings) {
        return None;
    }

    let when = describe_when(&reminder.trigger, config.utc_offset_minutes);
    let completing = matches!(outcome.reaction, Reaction::Completed | Reaction::Acted);

    let (outcome_type, content, dominant_rate) =
        if completing && metrics.completion_rate >= config.positive_completion_rate {
            (
                OutcomeType::Positive,
                format!(
                    "User responds well to the reminder '{}' {} ({}% completed over {} showings).",
                    reminder.title,
                    when,
                    percent(metrics.completion_rate),
                    metrics.total_showings
                ),
                metrics.completion_rate,
            )
        } else if metrics.dismissal_rate > metrics.completion_rate
            && metrics.dismissal_rate >= config.negative_dismissal_rate
            && metrics.trend == Trend::Declining
        {
            (
                OutcomeType::Negative,
                format!(
                    "User tends to dismiss the reminder '{}' {} ({}% dismissed over {} showings, declining); consider a different time or wording.",
                    reminder.title,
                    when,
                    percent(metrics.dismissal_rate),
                    metrics.total_showings
                ),
                metrics.dismissal_rate,
            )
        } else {
            return None;
        };

    Some(Learning {
        category: LearningCategory::ReminderPreference,
        content,
        confidence: config.confidence(metrics.total_showings, dominant_rate),
        source: format!("reminder_feedback:{}", reminder.id),
        outcome_type,
    })
}

/// Effectiveness of one group of reminders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketStat {
    pub label: String,
    /// Reminders in the bucket
    pub count: u32,
    pub avg_effectiveness: f64,
}

/// Effectiveness of an agent's reminders grouped along three axes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total_showings: u32,
    pub by_priority: Vec<BucketStat>,
    pub by_trigger_type: Vec<BucketStat>,
    pub by_time_of_day: Vec<BucketStat>,
}

#[derive(Default)]
struct Accumulator {
    count: u32,
    score_sum: f64,
}

fn into_buckets(groups: BTreeMap<String, Accumulator>) -> Vec<BucketStat> {
    groups
        .into_iter()
        .map(|(label, acc)| BucketStat {
            label,
            count: acc.count,
            avg_effectiveness: acc.score_sum / f64::from(acc.count.max(1)),
        })
        .collect()
}

impl AggregateStats {
    /// Group metrics by their reminder's priority, trigger kind and, for
    /// scheduled reminders, time of day. Metrics without a matching reminder
    /// are skipped.
    pub fn from_metrics(
        reminders: &[Reminder],
        metrics: &[EffectivenessMetrics],
        utc_offset_minutes: i32,
    ) -> Self {
        let by_id: HashMap<&str, &Reminder> =
            reminders.iter().map(|r| (r.id.as_str(), r)).collect();

        let mut total_showings = 0u32;
        let mut by_priority: BTreeMap<String, Accumulator> = BTreeMap::new();
        let mut by_trigger: BTreeMap<String, Accumulator> = BTreeMap::new();
        let mut by_time: BTreeMap<String, Accumulator> = BTreeMap::new();

        for m in metrics {
            let Some(reminder) = by_id.get(m.reminder_id.as_str()) else {
                continue;
            };
            total_showings += m.total_showings;

            let add = |groups: &mut BTreeMap<String, Accumulator>, label: String| {
                let acc = groups.entry(label).or_default();
                acc.count += 1;
                acc.score_sum += m.effectiveness_score;
            };
            add(&mut by_priority, reminder.priority.to_string());
            add(&mut by_trigger, reminder.trigger.kind().to_string());
            if let ReminderTrigger::Scheduled { at } = &reminder.trigger {
                add(
                    &mut by_time,
                    TimeBucket::of(*at, utc_offset_minutes).to_string(),
                );
            }
        }

        Self {
            total_showings,
            by_priority: into_buckets(by_priority),
            by_trigger_type: into_buckets(by_trigger),
            by_time_of_day: into_buckets(by_time),
        }
    }
}

/// Learnings about which kinds of reminders work for an agent.
///
/// At most one learning per axis, naming the best and worst bucket, and only
/// when the gap between them is large enough to matter.
pub fn generate_system_learnings(
    agent_id: &str,
    stats: &AggregateStats,
    config: &LearningConfig,
) -> Vec<Learning> {
    if stats.total_showings <= config.system_min_showings {
        return Vec::new();
    }

    let axes = [
        ("priority", "priority", &stats.by_priority),
        ("trigger type", "reminders", &stats.by_trigger_type),
        ("time of day", "reminders in the", &stats.by_time_of_day),
    ];

    axes.into_iter()
        .filter_map(|(axis, lead, buckets)| {
            let eligible: Vec<&BucketStat> = buckets
                .iter()
                .filter(|b| b.count >= config.min_bucket_count)
                .collect();
            let best = eligible
                .iter()
                .max_by(|a, b| a.avg_effectiveness.total_cmp(&b.avg_effectiveness))?;
            let worst = eligible
                .iter()
                .min_by(|a, b| a.avg_effectiveness.total_cmp(&b.avg_effectiveness))?;
            let spread = best.avg_effectiveness - worst.avg_effectiveness;
            if spread <= config.min_spread {
                return None;
            }

            let confidence = if spread >= 2.0 * config.min_spread {
                config.high_confidence
            } else {
                config.base_confidence
            }
            .clamp(0.0, 1.0);
            let label = |b: &BucketStat| match axis {
                "priority" => format!("{} {}", b.label, lead),
                _ => format!("{} {}", lead, b.label),
            };
            Some(Learning {
                category: LearningCategory::ReminderEffectiveness,
                content: format!(
                    "By {}, {} work best for this user ({:.0}% effective) and {} work worst ({:.0}% effective).",
                    axis,
                    label(*best),
                    best.avg_effectiveness * 100.0,
                    label(*worst),
                    worst.avg_effectiveness * 100.0
                ),
                confidence,
                source: format!("reminder_analytics:{}", agent_id),
                outcome_type: OutcomeType::Neutral,
            })
        })
        .collect()
}
