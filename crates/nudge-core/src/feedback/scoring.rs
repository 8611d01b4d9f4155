//! Effectiveness scoring: per-outcome scores, the recent-score window and trend.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::{NudgeError, NudgeResult};
use crate::feedback::{Reaction, Trend};

/// Default number of recent outcome scores kept per reminder.
pub const DEFAULT_WINDOW_CAPACITY: usize = 10;

/// Score of a single outcome.
pub fn outcome_score(reaction: Reaction) -> f64 {
    match reaction {
        Reaction::Completed => 1.0,
        Reaction::Acted => 0.8,
        Reaction::Snoozed => 0.3,
        Reaction::Dismissed => 0.1,
        Reaction::Ignored => 0.0,
    }
}

/// Fixed-capacity window of outcome scores, oldest first.
///
/// Serialized as a plain JSON list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<f64>", into = "Vec<f64>")]
pub struct ScoreWindow {
    scores: VecDeque<f64>,
    capacity: usize,
}

impl ScoreWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            scores: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Window of `capacity` holding the newest of `scores`.
    pub fn from_scores(capacity: usize, scores: impl IntoIterator<Item = f64>) -> Self {
        let mut window = Self::new(capacity);
        for score in scores {
            window.push(score);
        }
        window
    }

    /// Append a score, evicting the oldest when full.
    pub fn push(&mut self, score: f64) {
        if self.scores.len() == self.capacity {
            self.scores.pop_front();
        }
        self.scores.push_back(score);
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.scores.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.scores.iter().copied().collect()
    }
}

impl Default for ScoreWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

impl From<Vec<f64>> for ScoreWindow {
    fn from(scores: Vec<f64>) -> Self {
        Self::from_scores(DEFAULT_WINDOW_CAPACITY.max(scores.len()), scores)
    }
}

impl From<ScoreWindow> for Vec<f64> {
    fn from(window: ScoreWindow) -> Self {
        window.scores.into()
    }
}

/// Weights and thresholds of the effectiveness model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectivenessConfig {
    pub completion_weight: f64,
    pub acted_weight: f64,
    pub snooze_weight: f64,
    /// Subtracted per unit of dismissal rate
    pub dismissal_weight: f64,
    /// Share of the final score taken from average context relevance
    pub relevance_weight: f64,
    /// Recent scores kept per reminder
    pub window_capacity: usize,
    /// Scores per half when comparing recent to earlier outcomes
    pub trend_window: usize,
    /// Minimum mean difference that counts as a trend
    pub trend_epsilon: f64,
    /// Showings below which a reminder is not ranked or learned from
    pub min_showings: u32,
}

impl Default for EffectivenessConfig {
    fn default() -> Self {
        Self {
            completion_weight: 0.6,
            acted_weight: 0.3,
            snooze_weight: 0.1,
            dismissal_weight: 0.4,
            relevance_weight: 0.2,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            trend_window: 3,
            trend_epsilon: 0.1,
            min_showings: 3,
        }
    }
}

impl EffectivenessConfig {
    pub fn validate(&self) -> NudgeResult<()> {
        let weights = [
            ("completion_weight", self.completion_weight),
            ("acted_weight", self.acted_weight),
            ("snooze_weight", self.snooze_weight),
            ("dismissal_weight", self.dismissal_weight),
            ("relevance_weight", self.relevance_weight),
        ];
        for (name, weight) in weights {
            if !(0.0..=1.0).contains(&weight) {
                return Err(NudgeError::validation(format!(
                    "{} must be between 0 and 1, got {}",
                    name, weight
                )));
            }
        }
        if self.window_capacity == 0 || self.trend_window == 0 {
            return Err(NudgeError::validation(
                "window_capacity and trend_window must be positive",
            ));
        }
        if self.trend_epsilon < 0.0 {
            return Err(NudgeError::validation("trend_epsilon must not be negative"));
        }
        Ok(())
    }
}

/// Rates the effectiveness score is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreInputs {
    pub completion_rate: f64,
    pub acted_rate: f64,
    pub snooze_rate: f64,
    pub dismissal_rate: f64,
    pub avg_relevance: Option<f64>,
}

/// Effectiveness score in `[0, 1]`.
///
/// Non-decreasing in completion rate and non-increasing in dismissal rate for
/// any non-negative weights.
pub fn effectiveness_score(inputs: &ScoreInputs, config: &EffectivenessConfig) -> f64 {
    let base = (config.completion_weight * inputs.completion_rate
        + config.acted_weight * inputs.acted_rate
        + config.snooze_weight * inputs.snooze_rate
        - config.dismissal_weight * inputs.dismissal_rate)
        .clamp(0.0, 1.0);

    match inputs.avg_relevance {
        Some(relevance) => ((1.0 - config.relevance_weight) * base
            + config.relevance_weight * relevance.clamp(0.0, 1.0))
        .clamp(0.0, 1.0),
        None => base,
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Compare the newest `k` scores with the `k` before them, where
/// `k = min(window, len / 2)`.
pub fn classify_trend(scores: &[f64], window: usize, epsilon: f64) -> Trend {
    let k = window.min(scores.len() / 2);
    if k == 0 {
        return Trend::Stable;
    }
    let recent = &scores[scores.len() - k..];
    let earlier = &scores[scores.len() - 2 * k..scores.len() - k];

    let delta = mean(recent) - mean(earlier);
    if delta > epsilon {
        Trend::Improving
    } else if delta < -epsilon {
        Trend::Declining
    } else {
        Trend::Stable
    }
}
