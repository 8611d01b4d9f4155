//! Keeps the job service aligned with reminder state.
//!
//! Every operation computes the job a reminder should have, diffs it against
//! the job the service reports, and applies the smallest change. Running any
//! of them twice with no reminder changes in between is a no-op.
//!
//! Concurrent external mutation is tolerated: a job that vanished before
//! `update`/`remove`, or a name that got taken before `add`, is logged and left
//! for the next pass to converge. Every other job-service error propagates.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::error::NudgeResult;
use crate::reminders::{Reminder, ReminderStatus};
use crate::schedule::mapper::{
    build_job_payload, job_name_for, reminder_id_from_job_name, snooze_schedule,
    trigger_to_schedule, ScheduledJob,
};
use crate::schedule::{Job, JobCreate, JobPatch, JobPayload, JobSchedule, JobService};

/// What a reconcile step did to the job service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Created,
    Updated,
    Removed,
    Unchanged,
}

/// Counts from a full [`sync`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub registered: usize,
    pub updated: usize,
    pub removed: usize,
}

impl SyncReport {
    fn count(&mut self, action: ReconcileAction) {
        match action {
            ReconcileAction::Created => self.registered += 1,
            ReconcileAction::Updated => self.updated += 1,
            ReconcileAction::Removed => self.removed += 1,
            ReconcileAction::Unchanged => {}
        }
    }

    /// Whether the pass changed nothing.
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// The job a reminder should have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub agent_id: String,
    pub enabled: bool,
    pub delete_after_run: bool,
    pub schedule: JobSchedule,
    pub payload: JobPayload,
}

impl JobSpec {
    fn new(reminder: &Reminder, scheduled: ScheduledJob, enabled: bool) -> Self {
        Self {
            name: job_name_for(&reminder.id),
            agent_id: reminder.agent_id.clone(),
            enabled,
            delete_after_run: scheduled.delete_after_run,
            schedule: scheduled.schedule,
            payload: build_job_payload(reminder),
        }
    }

    /// Fields of `job` that differ from this spec.
    pub fn diff(&self, job: &Job) -> JobPatch {
        JobPatch {
            enabled: (job.enabled != self.enabled).then_some(self.enabled),
            delete_after_run: (job.delete_after_run != self.delete_after_run)
                .then_some(self.delete_after_run),
            schedule: (job.schedule != self.schedule).then(|| self.schedule.clone()),
            payload: (job.payload != self.payload).then(|| self.payload.clone()),
        }
    }

    fn into_create(self) -> JobCreate {
        JobCreate {
            name: self.name,
            agent_id: self.agent_id,
            enabled: self.enabled,
            delete_after_run: self.delete_after_run,
            schedule: self.schedule,
            payload: self.payload,
        }
    }
}

/// Desired job-service state for one reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesiredJob {
    Absent,
    Present(JobSpec),
}

/// Compute the job a reminder should have given its current status.
///
/// Pending and snoozed reminders keep an enabled job; every other status keeps
/// a disabled one. A snoozed reminder fires once at its wake-up time
/// regardless of trigger kind.
pub fn desired_job(reminder: &Reminder) -> DesiredJob {
    let Some(natural) = trigger_to_schedule(reminder) else {
        return DesiredJob::Absent;
    };

    let enabled = matches!(
        reminder.status,
        ReminderStatus::Pending | ReminderStatus::Snoozed
    );
    let scheduled = match (reminder.status, reminder.snooze_until) {
        (ReminderStatus::Snoozed, Some(until)) => snooze_schedule(until),
        _ => natural,
    };

    DesiredJob::Present(JobSpec::new(reminder, scheduled, enabled))
}

async fn find_job<J: JobService + ?Sized>(jobs: &J, name: &str) -> NudgeResult<Option<Job>> {
    Ok(jobs
        .list(true)
        .await?
        .into_iter()
        .find(|job| job.name == name))
}

/// Create or update a reminder's job with its natural schedule.
///
/// Returns `None` for reminders without a schedulable trigger.
pub async fn register<J: JobService + ?Sized>(
    jobs: &J,
    reminder: &Reminder,
) -> NudgeResult<Option<Job>> {
    let Some(scheduled) = trigger_to_schedule(reminder) else {
        debug!(reminder_id = %reminder.id, "Context reminder, not scheduling");
        return Ok(None);
    };
    let spec = JobSpec::new(reminder, scheduled, true);

    if let Some(job) = find_job(jobs, &spec.name).await? {
        return patch_existing(jobs, &spec, job).await.map(Some);
    }

    match jobs.add(spec.clone().into_create()).await {
        Ok(job) => {
            info!(reminder_id = %reminder.id, job_id = %job.id, "Registered reminder job");
            Ok(Some(job))
        }
        Err(e) if e.is_already_exists() => {
            // Lost a race with another writer; converge onto its job.
            warn!(reminder_id = %reminder.id, "Job appeared concurrently, updating instead");
            match find_job(jobs, &spec.name).await? {
                Some(job) => patch_existing(jobs, &spec, job).await.map(Some),
                None => Ok(None),
            }
        }
        Err(e) => Err(e),
    }
}

async fn patch_existing<J: JobService + ?Sized>(
    jobs: &J,
    spec: &JobSpec,
    job: Job,
) -> NudgeResult<Job> {
    let patch = spec.diff(&job);
    if patch.is_empty() {
        return Ok(job);
    }
    jobs.update(&job.id, patch).await
}

/// Bring a reminder's job in line with the reminder's current status.
pub async fn update_on_status_change<J: JobService + ?Sized>(
    jobs: &J,
    reminder: &Reminder,
    now: DateTime<Utc>,
) -> NudgeResult<ReconcileAction> {
    let existing = find_job(jobs, &job_name_for(&reminder.id)).await?;
    apply(jobs, &reminder.id, desired_job(reminder), existing, now).await
}

/// Remove the job of a deleted reminder.
pub async fn remove_for_reminder<J: JobService + ?Sized>(
    jobs: &J,
    reminder_id: &str,
) -> NudgeResult<ReconcileAction> {
    match find_job(jobs, &job_name_for(reminder_id)).await? {
        Some(job) => remove_job(jobs, &job).await,
        None => Ok(ReconcileAction::Unchanged),
    }
}

async fn apply<J: JobService + ?Sized>(
    jobs: &J,
    reminder_id: &str,
    desired: DesiredJob,
    existing: Option<Job>,
    now: DateTime<Utc>,
) -> NudgeResult<ReconcileAction> {
    match (desired, existing) {
        (DesiredJob::Absent, None) => Ok(ReconcileAction::Unchanged),
        (DesiredJob::Absent, Some(job)) => remove_job(jobs, &job).await,
        (DesiredJob::Present(spec), None) => {
            if !spec.enabled {
                return Ok(ReconcileAction::Unchanged);
            }
            if spec.schedule.is_past(now) {
                // Already due by time comparison; a job would only fire late.
                debug!(reminder_id, "One-shot time already passed, not creating job");
                return Ok(ReconcileAction::Unchanged);
            }
            match jobs.add(spec.into_create()).await {
                Ok(job) => {
                    debug!(reminder_id, job_id = %job.id, "Created reminder job");
                    Ok(ReconcileAction::Created)
                }
                Err(e) if e.is_already_exists() => {
                    warn!(reminder_id, "Job already exists, deferring to next sync");
                    Ok(ReconcileAction::Unchanged)
                }
                Err(e) => Err(e),
            }
        }
        (DesiredJob::Present(spec), Some(job)) => {
            let patch = spec.diff(&job);
            if patch.is_empty() {
                return Ok(ReconcileAction::Unchanged);
            }
            match jobs.update(&job.id, patch).await {
                Ok(_) => {
                    debug!(reminder_id, job_id = %job.id, "Updated reminder job");
                    Ok(ReconcileAction::Updated)
                }
                Err(e) if e.is_not_found() => {
                    warn!(reminder_id, job_id = %job.id, "Job vanished before update");
                    Ok(ReconcileAction::Unchanged)
                }
                Err(e) => Err(e),
            }
        }
    }
}

async fn remove_job<J: JobService + ?Sized>(jobs: &J, job: &Job) -> NudgeResult<ReconcileAction> {
    match jobs.remove(&job.id).await {
        Ok(result) if result.removed => {
            debug!(job_id = %job.id, name = %job.name, "Removed reminder job");
            Ok(ReconcileAction::Removed)
        }
        Ok(_) => Ok(ReconcileAction::Unchanged),
        Err(e) if e.is_not_found() => {
            warn!(job_id = %job.id, "Job vanished before removal");
            Ok(ReconcileAction::Unchanged)
        }
        Err(e) => Err(e),
    }
}

/// Full reconciliation of every reminder against the job service.
///
/// Reminder-owned jobs whose reminder no longer exists are removed, as are
/// duplicate jobs sharing one reminder's name.
pub async fn sync<J: JobService + ?Sized>(
    jobs: &J,
    reminders: &[Reminder],
    now: DateTime<Utc>,
) -> NudgeResult<SyncReport> {
    let mut observed: HashMap<String, Vec<Job>> = HashMap::new();
    for job in jobs.list(true).await? {
        if reminder_id_from_job_name(&job.name).is_some() {
            observed.entry(job.name.clone()).or_default().push(job);
        }
    }

    let mut report = SyncReport::default();
    let known: HashSet<&str> = reminders.iter().map(|r| r.id.as_str()).collect();

    for reminder in reminders {
        let mut found = observed.remove(&job_name_for(&reminder.id)).unwrap_or_default();
        let existing = if found.is_empty() {
            None
        } else {
            Some(found.remove(0))
        };
        for duplicate in &found {
            report.count(remove_job(jobs, duplicate).await?);
        }
        report.count(apply(jobs, &reminder.id, desired_job(reminder), existing, now).await?);
    }

    for (name, orphans) in observed {
        let owned_by_known = reminder_id_from_job_name(&name).is_some_and(|id| known.contains(id));
        if owned_by_known {
            continue;
        }
        for job in &orphans {
            report.count(remove_job(jobs, job).await?);
        }
    }

    if report.is_noop() {
        debug!(reminders = reminders.len(), "Reminder jobs already in sync");
    } else {
        info!(
            registered = report.registered,
            updated = report.updated,
            removed = report.removed,
            "Reconciled reminder jobs"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NudgeError;
    use crate::reminders::{ReminderPriority, ReminderTrigger};
    use crate::schedule::{InMemoryJobService, MockJobService, RemoveResult};
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn scheduled(id: &str) -> Reminder {
        Reminder::new("agent-1", "Dentist", ReminderTrigger::at(now() + Duration::hours(3)))
            .with_id(id)
    }

    fn recurring(id: &str) -> Reminder {
        Reminder::new("agent-1", "Standup", ReminderTrigger::cron("0 0 9 * * Mon-Fri")).with_id(id)
    }

    fn contextual(id: &str) -> Reminder {
        Reminder::new("agent-1", "Buy milk", ReminderTrigger::context("grocery")).with_id(id)
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let jobs = InMemoryJobService::new();
        let reminder = scheduled("rem-1");

        let first = register(&jobs, &reminder).await.unwrap().unwrap();
        let second = register(&jobs, &reminder).await.unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(jobs.len().await, 1);
        assert!(first.delete_after_run);
        assert_eq!(first.name, "reminder:rem-1");
    }

    #[tokio::test]
    async fn test_register_updates_in_place() {
        let jobs = InMemoryJobService::new();
        let mut reminder = recurring("rem-1");
        register(&jobs, &reminder).await.unwrap();

        reminder.trigger = ReminderTrigger::cron("0 30 9 * * Mon-Fri");
        reminder.priority = ReminderPriority::Urgent;
        let job = register(&jobs, &reminder).await.unwrap().unwrap();

        assert_eq!(job.schedule, JobSchedule::cron("0 30 9 * * Mon-Fri"));
        assert!(job.payload.message.starts_with("[URGENT]"));
        assert_eq!(jobs.len().await, 1);
    }

    #[tokio::test]
    async fn test_register_skips_context_reminders() {
        let jobs = InMemoryJobService::new();
        assert!(register(&jobs, &contextual("rem-1")).await.unwrap().is_none());
        assert!(jobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_snooze_overrides_schedule() {
        let jobs = InMemoryJobService::new();
        let mut reminder = recurring("rem-1");
        register(&jobs, &reminder).await.unwrap();

        let until = now() + Duration::minutes(45);
        reminder.snooze(until, now()).unwrap();
        let action = update_on_status_change(&jobs, &reminder, now()).await.unwrap();
        assert_eq!(action, ReconcileAction::Updated);

        let job = jobs.get_by_name("reminder:rem-1").await.unwrap();
        assert_eq!(job.schedule, JobSchedule::at(until));
        assert!(job.enabled);
        assert!(job.delete_after_run);
    }

    #[tokio::test]
    async fn test_terminal_status_disables_job() {
        let jobs = InMemoryJobService::new();
        let mut reminder = scheduled("rem-1");
        register(&jobs, &reminder).await.unwrap();

        reminder.dismiss();
        let action = update_on_status_change(&jobs, &reminder, now()).await.unwrap();
        assert_eq!(action, ReconcileAction::Updated);
        assert!(!jobs.get_by_name("reminder:rem-1").await.unwrap().enabled);

        let action = update_on_status_change(&jobs, &reminder, now()).await.unwrap();
        assert_eq!(action, ReconcileAction::Unchanged);
    }

    #[tokio::test]
    async fn test_missing_job_created_only_when_enabled() {
        let jobs = InMemoryJobService::new();
        let mut reminder = scheduled("rem-1");
        reminder.mark_triggered(now());

        let action = update_on_status_change(&jobs, &reminder, now()).await.unwrap();
        assert_eq!(action, ReconcileAction::Unchanged);
        assert!(jobs.is_empty().await);

        let pending = scheduled("rem-2");
        let action = update_on_status_change(&jobs, &pending, now()).await.unwrap();
        assert_eq!(action, ReconcileAction::Created);
    }

    #[tokio::test]
    async fn test_past_one_shot_is_not_recreated() {
        let jobs = InMemoryJobService::new();
        let reminder = Reminder::new("agent-1", "Late", ReminderTrigger::at(now() - Duration::hours(1)))
            .with_id("rem-1");

        let action = update_on_status_change(&jobs, &reminder, now()).await.unwrap();
        assert_eq!(action, ReconcileAction::Unchanged);
        assert!(jobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_context_reminder_job_is_removed() {
        let jobs = InMemoryJobService::new();
        let stray = recurring("rem-1");
        register(&jobs, &stray).await.unwrap();

        // Same id now carried by a context reminder, e.g. after a re-import
        let reminder = contextual("rem-1");
        let action = update_on_status_change(&jobs, &reminder, now()).await.unwrap();
        assert_eq!(action, ReconcileAction::Removed);
        assert!(jobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_sync_twice_is_noop() {
        let jobs = InMemoryJobService::new();
        let mut snoozed = recurring("rem-3");
        snoozed.snooze(now() + Duration::hours(1), now()).unwrap();
        let mut done = scheduled("rem-4");
        done.complete(now());

        let reminders = vec![scheduled("rem-1"), recurring("rem-2"), snoozed, done, contextual("rem-5")];

        let first = sync(&jobs, &reminders, now()).await.unwrap();
        assert_eq!(
            first,
            SyncReport {
                registered: 3,
                updated: 0,
                removed: 0
            }
        );

        let second = sync(&jobs, &reminders, now()).await.unwrap();
        assert_eq!(second, SyncReport::default());
        assert!(second.is_noop());
    }

    #[tokio::test]
    async fn test_sync_removes_orphans_and_duplicates() {
        let jobs = InMemoryJobService::new();
        let kept = recurring("rem-1");
        register(&jobs, &kept).await.unwrap();
        register(&jobs, &recurring("gone")).await.unwrap();

        // A foreign job is never touched
        jobs.add(JobCreate {
            name: "backup:nightly".to_string(),
            agent_id: "agent-1".to_string(),
            enabled: true,
            delete_after_run: false,
            schedule: JobSchedule::cron("0 0 3 * * *"),
            payload: JobPayload {
                reminder_id: String::new(),
                message: "backup".to_string(),
            },
        })
        .await
        .unwrap();

        let report = sync(&jobs, &[kept], now()).await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(jobs.len().await, 2);
        assert!(jobs.get_by_name("reminder:gone").await.is_none());
        assert!(jobs.get_by_name("backup:nightly").await.is_some());
    }

    #[tokio::test]
    async fn test_remove_for_reminder() {
        let jobs = InMemoryJobService::new();
        register(&jobs, &recurring("rem-1")).await.unwrap();

        assert_eq!(
            remove_for_reminder(&jobs, "rem-1").await.unwrap(),
            ReconcileAction::Removed
        );
        assert_eq!(
            remove_for_reminder(&jobs, "rem-1").await.unwrap(),
            ReconcileAction::Unchanged
        );
    }

    #[tokio::test]
    async fn test_remove_for_reminder_only_removes() {
        let existing = Job {
            id: "job-1".to_string(),
            name: "reminder:rem-1".to_string(),
            agent_id: "agent-1".to_string(),
            enabled: false,
            delete_after_run: true,
            schedule: JobSchedule::at(now() - Duration::days(1)),
            payload: JobPayload {
                reminder_id: "rem-1".to_string(),
                message: "Reminder: Dentist".to_string(),
            },
        };

        let mut jobs = MockJobService::new();
        jobs.expect_list().returning(move |_| Ok(vec![existing.clone()]));
        jobs.expect_remove()
            .withf(|id| id.to_string() == "job-1")
            .times(1)
            .returning(|_| Ok(RemoveResult { removed: true }));
        jobs.expect_add().never();
        jobs.expect_update().never();

        assert_eq!(
            remove_for_reminder(&jobs, "rem-1").await.unwrap(),
            ReconcileAction::Removed
        );
    }

    #[tokio::test]
    async fn test_remove_for_reminder_tolerates_vanished_job() {
        let existing = Job {
            id: "job-1".to_string(),
            name: "reminder:rem-1".to_string(),
            agent_id: "agent-1".to_string(),
            enabled: true,
            delete_after_run: false,
            schedule: JobSchedule::cron("0 0 9 * * *"),
            payload: JobPayload {
                reminder_id: "rem-1".to_string(),
                message: "Reminder: Standup".to_string(),
            },
        };

        let mut jobs = MockJobService::new();
        jobs.expect_list().returning(move |_| Ok(vec![existing.clone()]));
        jobs.expect_remove()
            .returning(|id| Err(NudgeError::job_not_found(id)));

        assert_eq!(
            remove_for_reminder(&jobs, "rem-1").await.unwrap(),
            ReconcileAction::Unchanged
        );
    }

    #[tokio::test]
    async fn test_service_failure_propagates() {
        let mut jobs = MockJobService::new();
        jobs.expect_list()
            .returning(|_| Err(NudgeError::scheduler("connection refused")));

        let err = sync(&jobs, &[scheduled("rem-1")], now()).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_vanished_job_is_not_fatal() {
        let existing = Job {
            id: "job-1".to_string(),
            name: "reminder:rem-1".to_string(),
            agent_id: "agent-1".to_string(),
            enabled: true,
            delete_after_run: false,
            schedule: JobSchedule::cron("0 0 8 * * *"),
            payload: JobPayload {
                reminder_id: "rem-1".to_string(),
                message: "old".to_string(),
            },
        };

        let mut jobs = MockJobService::new();
        jobs.expect_list().returning(move |_| Ok(vec![existing.clone()]));
        jobs.expect_update()
            .returning(|id, _| Err(NudgeError::job_not_found(id)));

        let action = update_on_status_change(&jobs, &recurring("rem-1"), now())
            .await
            .unwrap();
        assert_eq!(action, ReconcileAction::Unchanged);
    }

    #[tokio::test]
    async fn test_add_conflict_is_not_fatal() {
        let mut jobs = MockJobService::new();
        jobs.expect_list().returning(|_| Ok(Vec::new()));
        jobs.expect_add()
            .returning(|create| Err(NudgeError::job_exists(create.name)));

        let report = sync(&jobs, &[recurring("rem-1")], now()).await.unwrap();
        assert!(report.is_noop());
    }
}
