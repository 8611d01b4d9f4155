//! nudge-core - Reminder delivery engine for AI agents.
//!
//! This crate decides which stored reminders reach an agent's context on each
//! turn, keeps an external job scheduler in step with reminder state, records
//! how the user reacts, and turns those reactions into learnings.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use chrono::Utc;
//! use nudge_core::{
//!     InMemoryJobService, InMemoryLearningStore, NoContextScores, NoopObserver, NudgeConfig,
//!     Reaction, Reminder, ReminderEngine, ReminderOutcome, ReminderTrigger,
//! };
//!
//! let engine = ReminderEngine::in_memory(
//!     NudgeConfig::default(),
//!     Arc::new(InMemoryJobService::new()),
//!     Arc::new(InMemoryLearningStore::new()),
//! )?;
//!
//! let reminder = Reminder::new("agent-1", "Submit timesheet", ReminderTrigger::at(Utc::now()));
//! engine.upsert_reminder(&reminder, Utc::now()).await?;
//!
//! // Deliver whatever is due
//! let delivered = engine.run_cycle("agent-1", Utc::now(), &NoContextScores, &NoopObserver).await?;
//!
//! // Report the user's reaction
//! let outcome = ReminderOutcome::new(&reminder.id, "agent-1", Reaction::Completed);
//! let metrics = engine.record_reaction(&outcome, None, Utc::now()).await?;
//! ```

pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod learning;
pub mod reminders;
pub mod schedule;

// Re-export commonly used types
pub use config::NudgeConfig;
pub use delivery::{
    ContextScores, NoContextScores, PrioritySystemConfig, ReminderInjectionConfig,
};
pub use engine::{DeliveryObserver, NoopObserver, ReminderEngine};
pub use error::{NudgeError, NudgeResult};
pub use feedback::{
    EffectivenessMetrics, FeedbackEvent, FeedbackStore, Reaction, ReminderOutcome,
    SqliteFeedbackStore,
};
pub use learning::{InMemoryLearningStore, Learning, LearningStore};
pub use reminders::{
    Reminder, ReminderPriority, ReminderStatus, ReminderStore, ReminderTrigger,
    SqliteReminderStore,
};
pub use schedule::{CronJobService, InMemoryJobService, Job, JobService, SyncReport};
