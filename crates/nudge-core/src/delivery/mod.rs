//! Deciding which reminders reach the agent's context, and when.
//!
//! - `quiet_hours`: quiet-hours windows and per-priority bypass policy
//! - `selector`: due-set computation, quiet-hours filtering, ordering and cap

pub mod quiet_hours;
pub mod selector;

pub use quiet_hours::{
    is_quiet_hours, should_bypass_quiet_hours, PriorityPolicy, PrioritySystemConfig, TimeOfDay,
};
pub use selector::{
    due_at, select_for_injection, ContextScores, NoContextScores, ReminderInjectionConfig,
};
