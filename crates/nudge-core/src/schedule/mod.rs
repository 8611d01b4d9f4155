//! Reminder scheduling on an external job service.
//!
//! - `mapper`: translates a reminder trigger into a job schedule and payload
//! - `reconciler`: keeps the job service consistent with reminder state
//! - `jobs`: the [`JobService`] interface and an in-memory implementation
//! - `cron`: a job service that fires jobs on a local tokio-cron-scheduler
//!
//! Jobs are named `reminder:<reminder id>`, so the reconciler finds a
//! reminder's job by name instead of keeping its own mapping table.

mod cron;
mod jobs;
pub mod mapper;
pub mod reconciler;

pub use cron::{CronJobService, FiredJob, FiredJobReceiver};
#[cfg(test)]
pub use jobs::MockJobService;
pub use jobs::{
    InMemoryJobService, Job, JobCreate, JobPatch, JobPayload, JobSchedule, JobService,
    RemoveResult,
};
pub use mapper::{build_job_payload, job_name_for, trigger_to_schedule, REMINDER_JOB_PREFIX};
pub use reconciler::{register, sync, update_on_status_change, ReconcileAction, SyncReport};
