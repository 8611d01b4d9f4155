//! Delivery feedback and per-reminder effectiveness.
//!
//! Every reaction to a delivered reminder is appended as a [`FeedbackEvent`].
//! Recording an event recomputes the reminder's [`EffectivenessMetrics`] from
//! its full event history and pushes the outcome's score into a bounded
//! window that drives the trend.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use nudge_core::feedback::{FeedbackStore, Reaction, ReminderOutcome, SqliteFeedbackStore};
//!
//! let store = SqliteFeedbackStore::in_memory().unwrap();
//! let outcome = ReminderOutcome::new("rem-1", "agent-1", Reaction::Completed);
//! let (_event, metrics) = store.record_outcome(&outcome, Utc::now()).unwrap();
//!
//! assert_eq!(metrics.total_showings, 1);
//! assert_eq!(metrics.completion_rate, 1.0);
//! ```

mod scoring;
mod store;
mod types;

pub use scoring::{
    classify_trend, effectiveness_score, outcome_score, EffectivenessConfig, ScoreInputs,
    ScoreWindow, DEFAULT_WINDOW_CAPACITY,
};
pub use store::{FeedbackStore, SqliteFeedbackStore};
pub use types::{
    AgentFeedbackStats, EffectivenessMetrics, FeedbackEvent, FeedbackSource, PerformanceRanking,
    Reaction, ReminderOutcome, Trend,
};
