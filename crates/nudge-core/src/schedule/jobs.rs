//! Job scheduling service interface.
//!
//! The job service owns cron evaluation and firing; this crate only creates,
//! patches, lists and removes jobs through [`JobService`].

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{NudgeError, NudgeResult};

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobSchedule {
    /// Fire once at an instant (milliseconds since the Unix epoch)
    At {
        #[serde(rename = "atMs")]
        at_ms: i64,
    },
    /// Fire whenever the cron expression matches
    Cron { expr: String },
}

impl JobSchedule {
    /// One-shot schedule at the given instant
    pub fn at(at: DateTime<Utc>) -> Self {
        Self::At {
            at_ms: at.timestamp_millis(),
        }
    }

    /// Cron schedule
    pub fn cron(expr: impl Into<String>) -> Self {
        Self::Cron { expr: expr.into() }
    }

    /// The instant of a one-shot schedule
    pub fn fire_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::At { at_ms } => Utc.timestamp_millis_opt(*at_ms).single(),
            Self::Cron { .. } => None,
        }
    }

    /// Whether this is a one-shot schedule whose instant is at or before `now`.
    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.fire_time().is_some_and(|at| at <= now)
    }
}

/// Message delivered when a reminder job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    /// Reminder the job belongs to
    pub reminder_id: String,
    /// Rendered trigger message
    pub message: String,
}

/// A job as reported by the job service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Service-assigned identifier
    pub id: String,
    /// Unique name; reminder jobs use `reminder:<id>`
    pub name: String,
    /// Agent the job runs for
    pub agent_id: String,
    /// Disabled jobs never fire
    pub enabled: bool,
    /// Remove the job after its first run
    pub delete_after_run: bool,
    /// When the job fires
    pub schedule: JobSchedule,
    /// What the job delivers
    pub payload: JobPayload,
}

/// Request to create a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreate {
    pub name: String,
    pub agent_id: String,
    pub enabled: bool,
    pub delete_after_run: bool,
    pub schedule: JobSchedule,
    pub payload: JobPayload,
}

/// Partial update of a job; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_after_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<JobSchedule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<JobPayload>,
}

impl JobPatch {
    /// Whether the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.enabled.is_none()
            && self.delete_after_run.is_none()
            && self.schedule.is_none()
            && self.payload.is_none()
    }

    /// Apply the patch to a job in place.
    pub fn apply_to(self, job: &mut Job) {
        if let Some(enabled) = self.enabled {
            job.enabled = enabled;
        }
        if let Some(delete_after_run) = self.delete_after_run {
            job.delete_after_run = delete_after_run;
        }
        if let Some(schedule) = self.schedule {
            job.schedule = schedule;
        }
        if let Some(payload) = self.payload {
            job.payload = payload;
        }
    }
}

/// Result of a remove call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveResult {
    pub removed: bool,
}

/// External job scheduling service.
///
/// Implementations bring their own timeout and retry policy. `update` on an
/// unknown id returns [`NudgeError::NotFound`]; `add` with a taken name returns
/// [`NudgeError::AlreadyExists`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobService: Send + Sync {
    /// List jobs, optionally including disabled ones.
    async fn list(&self, include_disabled: bool) -> NudgeResult<Vec<Job>>;

    /// Create a job.
    async fn add(&self, job: JobCreate) -> NudgeResult<Job>;

    /// Patch an existing job.
    async fn update(&self, job_id: &str, patch: JobPatch) -> NudgeResult<Job>;

    /// Remove a job.
    async fn remove(&self, job_id: &str) -> NudgeResult<RemoveResult>;
}

/// Job service that only keeps jobs in memory and never fires them.
///
/// Useful for hosts that poll for due reminders themselves, and for tests.
#[derive(Default)]
pub struct InMemoryJobService {
    jobs: RwLock<HashMap<String, Job>>,
}

impl InMemoryJobService {
    /// Create an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs, enabled or not.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Whether no jobs are stored.
    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Look up a job by name.
    pub async fn get_by_name(&self, name: &str) -> Option<Job> {
        self.jobs
            .read()
            .await
            .values()
            .find(|job| job.name == name)
            .cloned()
    }
}

#[async_trait]
impl JobService for InMemoryJobService {
    async fn list(&self, include_disabled: bool) -> NudgeResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut listed: Vec<Job> = jobs
            .values()
            .filter(|job| include_disabled || job.enabled)
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    async fn add(&self, create: JobCreate) -> NudgeResult<Job> {
        let mut jobs = self.jobs.write().await;
        if jobs.values().any(|job| job.name == create.name) {
            return Err(NudgeError::job_exists(create.name));
        }

        let job = Job {
            id: Uuid::new_v4().to_string(),
            name: create.name,
            agent_id: create.agent_id,
            enabled: create.enabled,
            delete_after_run: create.delete_after_run,
            schedule: create.schedule,
            payload: create.payload,
        };
        jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn update(&self, job_id: &str, patch: JobPatch) -> NudgeResult<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| NudgeError::job_not_found(job_id))?;
        patch.apply_to(job);
        Ok(job.clone())
    }

    async fn remove(&self, job_id: &str) -> NudgeResult<RemoveResult> {
        let removed = self.jobs.write().await.remove(job_id).is_some();
        Ok(RemoveResult { removed })
    }
}
