//! In-process job service backed by tokio-cron-scheduler.
//!
//! Jobs are kept in memory and armed on a [`JobScheduler`] while enabled.
//! Every firing is delivered as a [`FiredJob`] on an mpsc channel; the host
//! forwards it to [`crate::engine::ReminderEngine::on_reminder_trigger`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{NudgeError, NudgeResult};
use crate::schedule::{Job, JobCreate, JobPatch, JobSchedule, JobService, RemoveResult};

/// A job that fired.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredJob {
    /// The job as it was when it fired
    pub job: Job,
    /// When it fired
    pub fired_at: DateTime<Utc>,
}

/// Channel for receiving fired jobs.
pub type FiredJobReceiver = mpsc::Receiver<FiredJob>;

struct Entry {
    job: Job,
    /// Handle of the armed scheduler job, if any
    guid: Option<Uuid>,
}

type Entries = Arc<RwLock<HashMap<String, Entry>>>;

enum Armed {
    Scheduled(Uuid),
    FiredNow,
    Idle,
}

/// Job service that runs jobs on a local tokio-cron-scheduler.
pub struct CronJobService {
    scheduler: JobScheduler,
    entries: Entries,
    fire_sender: mpsc::Sender<FiredJob>,
    running: RwLock<bool>,
}

impl CronJobService {
    /// Create a new service.
    ///
    /// Returns the service and a receiver for fired jobs.
    pub async fn new() -> NudgeResult<(Self, FiredJobReceiver)> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| NudgeError::scheduler(format!("Failed to create scheduler: {}", e)))?;

        let (tx, rx) = mpsc::channel(100);

        Ok((
            Self {
                scheduler,
                entries: Arc::new(RwLock::new(HashMap::new())),
                fire_sender: tx,
                running: RwLock::new(false),
            },
            rx,
        ))
    }

    /// Start firing jobs.
    pub async fn start(&self) -> NudgeResult<()> {
        let mut running = self.running.write().await;
        if !*running {
            self.scheduler
                .start()
                .await
                .map_err(|e| NudgeError::scheduler(format!("Failed to start scheduler: {}", e)))?;
            *running = true;
            info!("Reminder job scheduler started");
        }
        Ok(())
    }

    /// Stop firing jobs.
    pub async fn shutdown(&mut self) -> NudgeResult<()> {
        let mut running = self.running.write().await;
        if *running {
            self.scheduler
                .shutdown()
                .await
                .map_err(|e| NudgeError::scheduler(format!("Failed to shutdown scheduler: {}", e)))?;
            *running = false;
            info!("Reminder job scheduler stopped");
        }
        Ok(())
    }

    /// Check if the scheduler is running.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Number of jobs currently armed on the scheduler.
    pub async fn armed_count(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.guid.is_some())
            .count()
    }

    async fn arm(&self, job: &Job) -> NudgeResult<Armed> {
        if !job.enabled {
            return Ok(Armed::Idle);
        }

        let cron_job = match &job.schedule {
            JobSchedule::At { .. } => {
                let Some(at) = job.schedule.fire_time() else {
                    return Err(NudgeError::validation(format!(
                        "Job '{}' has an out-of-range fire time",
                        job.name
                    )));
                };
                let now = Utc::now();
                if at <= now {
                    // Already past, fire immediately
                    let fired = FiredJob {
                        job: job.clone(),
                        fired_at: now,
                    };
                    let _ = self.fire_sender.send(fired).await;
                    return Ok(Armed::FiredNow);
                }
                let duration = (at - now)
                    .to_std()
                    .map_err(|e| NudgeError::internal(format!("Invalid duration: {}", e)))?;
                let (sender, entries, fired) = self.callback_parts(job);
                CronJob::new_one_shot_async(duration, move |_uuid, _lock| {
                    Box::pin(fire(sender.clone(), entries.clone(), fired.clone(), true))
                })
                .map_err(|e| NudgeError::scheduler(format!("Failed to create one-shot job: {}", e)))?
            }
            JobSchedule::Cron { expr } => {
                let (sender, entries, fired) = self.callback_parts(job);
                CronJob::new_async(expr.as_str(), move |_uuid, _lock| {
                    Box::pin(fire(sender.clone(), entries.clone(), fired.clone(), false))
                })
                .map_err(|e| {
                    NudgeError::validation(format!("Invalid cron expression '{}': {}", expr, e))
                })?
            }
        };

        let guid = cron_job.guid();
        self.scheduler
            .add(cron_job)
            .await
            .map_err(|e| NudgeError::scheduler(format!("Failed to add job: {}", e)))?;
        debug!(job_id = %job.id, name = %job.name, "Armed job");
        Ok(Armed::Scheduled(guid))
    }

    fn callback_parts(&self, job: &Job) -> (mpsc::Sender<FiredJob>, Entries, Job) {
        (
            self.fire_sender.clone(),
            Arc::clone(&self.entries),
            job.clone(),
        )
    }

    async fn disarm(&self, guid: Option<Uuid>) -> NudgeResult<()> {
        if let Some(guid) = guid {
            self.scheduler
                .remove(&guid)
                .await
                .map_err(|e| NudgeError::scheduler(format!("Failed to remove job: {}", e)))?;
        }
        Ok(())
    }

    /// Record the arming outcome for a job that may have changed meanwhile.
    async fn settle(&self, job: &Job, armed: Armed) {
        let mut entries = self.entries.write().await;
        match armed {
            Armed::FiredNow if job.delete_after_run => {
                entries.remove(&job.id);
            }
            Armed::Scheduled(guid) => {
                if let Some(entry) = entries.get_mut(&job.id) {
                    entry.guid = Some(guid);
                }
            }
            Armed::FiredNow | Armed::Idle => {}
        }
    }
}

async fn fire(sender: mpsc::Sender<FiredJob>, entries: Entries, job: Job, one_shot: bool) {
    if one_shot {
        let mut entries = entries.write().await;
        if job.delete_after_run {
            entries.remove(&job.id);
        } else if let Some(entry) = entries.get_mut(&job.id) {
            entry.guid = None;
        }
    }
    debug!(job_id = %job.id, name = %job.name, "Job fired");
    let fired = FiredJob {
        job,
        fired_at: Utc::now(),
    };
    let _ = sender.send(fired).await;
}

#[async_trait]
impl JobService for CronJobService {
    async fn list(&self, include_disabled: bool) -> NudgeResult<Vec<Job>> {
        let entries = self.entries.read().await;
        let mut jobs: Vec<Job> = entries
            .values()
            .filter(|entry| include_disabled || entry.job.enabled)
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(jobs)
    }

    async fn add(&self, create: JobCreate) -> NudgeResult<Job> {
        let job = {
            let mut entries = self.entries.write().await;
            if entries.values().any(|entry| entry.job.name == create.name) {
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
            entries.insert(
                job.id.clone(),
                Entry {
                    job: job.clone(),
                    guid: None,
                },
            );
            job
        };

        match self.arm(&job).await {
            Ok(armed) => {
                self.settle(&job, armed).await;
                Ok(job)
            }
            Err(e) => {
                self.entries.write().await.remove(&job.id);
                Err(e)
            }
        }
    }

    async fn update(&self, job_id: &str, patch: JobPatch) -> NudgeResult<Job> {
        let (job, previous_guid) = {
            let mut entries = self.entries.write().await;
            let entry = entries
                .get_mut(job_id)
                .ok_or_else(|| NudgeError::job_not_found(job_id))?;
            patch.apply_to(&mut entry.job);
            (entry.job.clone(), entry.guid.take())
        };

        self.disarm(previous_guid).await?;
        let armed = self.arm(&job).await?;
        self.settle(&job, armed).await;
        Ok(job)
    }

    async fn remove(&self, job_id: &str) -> NudgeResult<RemoveResult> {
        let removed = self.entries.write().await.remove(job_id);
        match removed {
            Some(entry) => {
                self.disarm(entry.guid).await?;
                Ok(RemoveResult { removed: true })
            }
            None => Ok(RemoveResult { removed: false }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::JobPayload;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn create(name: &str, schedule: JobSchedule, delete_after_run: bool) -> JobCreate {
        JobCreate {
            name: name.to_string(),
            agent_id: "agent-1".to_string(),
            enabled: true,
            delete_after_run,
            schedule,
            payload: JobPayload {
                reminder_id: "rem-1".to_string(),
                message: "Reminder: test".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_service_creation() {
        let (service, _rx) = CronJobService::new().await.unwrap();
        assert!(!service.is_running().await);
        assert_eq!(service.armed_count().await, 0);
    }

    #[tokio::test]
    async fn test_service_start_stop() {
        let (mut service, _rx) = CronJobService::new().await.unwrap();

        service.start().await.unwrap();
        assert!(service.is_running().await);

        service.shutdown().await.unwrap();
        assert!(!service.is_running().await);
    }

    #[tokio::test]
    async fn test_cron_job_is_armed_until_disabled() {
        let (service, _rx) = CronJobService::new().await.unwrap();
        let job = service
            .add(create("reminder:rem-1", JobSchedule::cron("0 0 9 * * *"), false))
            .await
            .unwrap();
        assert_eq!(service.armed_count().await, 1);

        let patch = JobPatch {
            enabled: Some(false),
            ..Default::default()
        };
        service.update(&job.id, patch).await.unwrap();
        assert_eq!(service.armed_count().await, 0);
        assert_eq!(service.list(true).await.unwrap().len(), 1);
        assert!(service.list(false).await.unwrap().is_empty());

        assert!(service.remove(&job.id).await.unwrap().removed);
        assert!(service.list(true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_future_one_shot_is_armed() {
        let (service, _rx) = CronJobService::new().await.unwrap();
        let at = Utc::now() + ChronoDuration::hours(1);
        service
            .add(create("reminder:rem-1", JobSchedule::at(at), true))
            .await
            .unwrap();
        assert_eq!(service.armed_count().await, 1);
    }

    #[tokio::test]
    async fn test_past_one_shot_fires_immediately() {
        let (service, mut rx) = CronJobService::new().await.unwrap();
        let past = Utc::now() - ChronoDuration::hours(1);

        let job = service
            .add(create("reminder:rem-1", JobSchedule::at(past), true))
            .await
            .unwrap();

        let fired = tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("Should receive within timeout")
            .expect("Should receive fired job");

        assert_eq!(fired.job.id, job.id);
        assert_eq!(fired.job.payload.reminder_id, "rem-1");
        // delete_after_run jobs disappear once they have fired
        assert!(service.list(true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_cron_is_rejected() {
        let (service, _rx) = CronJobService::new().await.unwrap();
        let err = service
            .add(create("reminder:rem-1", JobSchedule::cron("not a cron"), false))
            .await
            .unwrap_err();
        assert!(matches!(err, NudgeError::Validation { .. }));
        assert!(service.list(true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let (service, _rx) = CronJobService::new().await.unwrap();
        service
            .add(create("reminder:rem-1", JobSchedule::cron("0 0 9 * * *"), false))
            .await
            .unwrap();
        let err = service
            .add(create("reminder:rem-1", JobSchedule::cron("0 0 9 * * *"), false))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }
}
