//! Learnings derived from reminder feedback.
//!
//! Individual outcomes become preference learnings once a reminder has enough
//! showings; aggregate effectiveness across an agent's reminders becomes
//! system learnings about what kinds of reminders work for that agent.

mod sink;
mod translator;

#[cfg(test)]
pub use sink::MockLearningStore;
pub use sink::{InMemoryLearningStore, LearningStore};
pub use translator::{
    generate_system_learnings, outcome_to_learning, AggregateStats, BucketStat, Learning,
    LearningCategory, LearningConfig, OutcomeType, TimeBucket,
};
