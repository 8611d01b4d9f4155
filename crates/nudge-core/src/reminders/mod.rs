//! Reminder data model and persistence.
//!
//! A reminder carries exactly one trigger:
//! - `Scheduled`: due once at a fixed instant (one-shot job)
//! - `Recurring`: due whenever a cron expression fires (persistent job)
//! - `Context`: due when the conversation matches a pattern (never scheduled)
//!
//! # Example
//!
//! ```
//! use nudge_core::reminders::{Reminder, ReminderPriority, ReminderTrigger};
//!
//! let reminder = Reminder::new(
//!     "agent-1",
//!     "Renew passport",
//!     ReminderTrigger::cron("0 0 9 * * Mon"),
//! )
//! .with_priority(ReminderPriority::Urgent)
//! .with_tags(vec!["travel".to_string()]);
//!
//! assert!(reminder.validate().is_ok());
//! ```

mod store;
mod types;

pub(crate) use store::{parse_optional_time, parse_time};
pub use store::{ReminderStore, SqliteReminderStore};
pub use types::{Reminder, ReminderPriority, ReminderStatus, ReminderTrigger, TriggerKind};
