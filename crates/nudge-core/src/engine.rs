//! Reminder engine wiring stores, job service and learning sink together.
//!
//! The engine owns no background tasks. Hosts drive it: call
//! [`ReminderEngine::run_cycle`] when building an agent turn, forward fired
//! jobs to [`ReminderEngine::handle_fired`], and report user reactions through
//! [`ReminderEngine::record_reaction`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::NudgeConfig;
use crate::delivery::{select_for_injection, ContextScores};
use crate::error::{NudgeError, NudgeResult};
use crate::feedback::{
    AgentFeedbackStats, EffectivenessMetrics, FeedbackStore, PerformanceRanking, ReminderOutcome,
    SqliteFeedbackStore,
};
use crate::learning::{
    generate_system_learnings, outcome_to_learning, AggregateStats, Learning, LearningStore,
};
use crate::reminders::{Reminder, ReminderStatus, ReminderStore, SqliteReminderStore};
use crate::schedule::{
    mapper::reminder_id_from_job_name, reconciler, FiredJob, Job, JobService, ReconcileAction,
    SyncReport,
};

/// Receives the reminders delivered by each cycle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryObserver: Send + Sync {
    async fn on_delivered(&self, agent_id: &str, reminders: &[Reminder]);
}

/// Observer that ignores deliveries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

#[async_trait]
impl DeliveryObserver for NoopObserver {
    async fn on_delivered(&self, _agent_id: &str, _reminders: &[Reminder]) {}
}

/// Reminder delivery engine.
///
/// # Example
///
/// ```ignore
/// use nudge_core::{InMemoryLearningStore, NudgeConfig, ReminderEngine};
/// use nudge_core::schedule::CronJobService;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let (jobs, mut fired) = CronJobService::new().await?;
///     jobs.start().await?;
///
///     let engine = ReminderEngine::open(
///         NudgeConfig::from_env(),
///         Arc::new(jobs),
///         Arc::new(InMemoryLearningStore::new()),
///     )?;
///     engine.sync(Utc::now()).await?;
///
///     while let Some(job) = fired.recv().await {
///         engine.handle_fired(job).await?;
///     }
///     Ok(())
/// }
/// ```
pub struct ReminderEngine {
    reminders: Arc<dyn ReminderStore>,
    feedback: Arc<dyn FeedbackStore>,
    jobs: Arc<dyn JobService>,
    learnings: Arc<dyn LearningStore>,
    config: NudgeConfig,
}

impl ReminderEngine {
    /// Create an engine from explicit parts.
    pub fn new(
        config: NudgeConfig,
        reminders: Arc<dyn ReminderStore>,
        feedback: Arc<dyn FeedbackStore>,
        jobs: Arc<dyn JobService>,
        learnings: Arc<dyn LearningStore>,
    ) -> NudgeResult<Self> {
        config.validate()?;
        debug!(
            max_reminders = config.injection.max_reminders,
            quiet_hours = config.injection.quiet_hours_start.is_some(),
            "Creating ReminderEngine"
        );
        Ok(Self {
            reminders,
            feedback,
            jobs,
            learnings,
            config,
        })
    }

    /// Create an engine with SQLite stores at the configured paths.
    pub fn open(
        config: NudgeConfig,
        jobs: Arc<dyn JobService>,
        learnings: Arc<dyn LearningStore>,
    ) -> NudgeResult<Self> {
        for path in [&config.reminder_db_path, &config.feedback_db_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }
        debug!(
            reminders = %config.reminder_db_path.display(),
            feedback = %config.feedback_db_path.display(),
            "Opening file-backed stores"
        );
        let reminders = Arc::new(SqliteReminderStore::new(&config.reminder_db_path)?);
        let feedback = Arc::new(
            SqliteFeedbackStore::new(&config.feedback_db_path)?
                .with_config(config.effectiveness.clone()),
        );
        Self::new(config, reminders, feedback, jobs, learnings)
    }

    /// Create an engine with in-memory SQLite stores.
    pub fn in_memory(
        config: NudgeConfig,
        jobs: Arc<dyn JobService>,
        learnings: Arc<dyn LearningStore>,
    ) -> NudgeResult<Self> {
        let reminders = Arc::new(SqliteReminderStore::in_memory()?);
        let feedback = Arc::new(
            SqliteFeedbackStore::in_memory()?.with_config(config.effectiveness.clone()),
        );
        Self::new(config, reminders, feedback, jobs, learnings)
    }

    /// Select, mark and report the reminders to deliver to an agent now.
    pub async fn run_cycle(
        &self,
        agent_id: &str,
        now: DateTime<Utc>,
        scores: &dyn ContextScores,
        observer: &dyn DeliveryObserver,
    ) -> NudgeResult<Vec<Reminder>> {
        let candidates = self.reminders.list_for_agent(agent_id)?;
        let mut delivered = select_for_injection(
            &candidates,
            &self.config.injection,
            now,
            &self.config.priorities,
            scores,
        );

        for reminder in &mut delivered {
            reminder.mark_triggered(now);
            self.reminders.update(reminder)?;
            reconciler::update_on_status_change(self.jobs.as_ref(), reminder, now).await?;
        }

        if !delivered.is_empty() {
            info!(agent_id, delivered = delivered.len(), "Delivered reminders");
            observer.on_delivered(agent_id, &delivered).await;
        }
        Ok(delivered)
    }

    /// Fire callback of the job service.
    ///
    /// Stamps the fire time on the reminder so the selector sees it as due.
    /// Returns false for unknown or finished reminders.
    pub async fn on_reminder_trigger(
        &self,
        reminder_id: &str,
        job: &Job,
        now: DateTime<Utc>,
    ) -> NudgeResult<bool> {
        let Some(mut reminder) = self.reminders.get(reminder_id)? else {
            debug!(reminder_id, job_id = %job.id, "Job fired for unknown reminder");
            return Ok(false);
        };
        if reminder.is_terminal() {
            debug!(reminder_id, status = %reminder.status, "Job fired for finished reminder");
            return Ok(false);
        }
        if reminder.status == ReminderStatus::Snoozed {
            // Due by its snooze time; nothing to stamp.
            return Ok(true);
        }

        reminder.last_fired_at = Some(now);
        self.reminders.update(&reminder)?;
        debug!(reminder_id, job_id = %job.id, "Reminder job fired");
        Ok(true)
    }

    /// Route a fired job to its reminder.
    pub async fn handle_fired(&self, fired: FiredJob) -> NudgeResult<bool> {
        let reminder_id = match reminder_id_from_job_name(&fired.job.name) {
            Some(id) => id.to_string(),
            None if !fired.job.payload.reminder_id.is_empty() => fired.job.payload.reminder_id.clone(),
            None => {
                debug!(job = %fired.job.name, "Ignoring job not owned by a reminder");
                return Ok(false);
            }
        };
        self.on_reminder_trigger(&reminder_id, &fired.job, fired.fired_at)
            .await
    }

    /// Record a user reaction and apply its lifecycle transition.
    ///
    /// `snooze_until` is required for snoozes. A learning is forwarded to the
    /// learning store when the outcome warrants one.
    pub async fn record_reaction(
        &self,
        outcome: &ReminderOutcome,
        snooze_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> NudgeResult<EffectivenessMetrics> {
        let reminder = self
            .reminders
            .get(&outcome.reminder_id)?
            .ok_or_else(|| NudgeError::reminder_not_found(&outcome.reminder_id))?;
        if reminder.agent_id != outcome.agent_id {
            return Err(NudgeError::validation(format!(
                "Reminder '{}' does not belong to agent '{}'",
                reminder.id, outcome.agent_id
            )));
        }

        // Apply to a copy first so an invalid snooze records nothing.
        let mut updated = reminder.clone();
        updated.apply_reaction(outcome.reaction, snooze_until, now)?;

        let (_event, metrics) = self.feedback.record_outcome(outcome, now)?;
        if updated != reminder {
            self.reminders.update(&updated)?;
            reconciler::update_on_status_change(self.jobs.as_ref(), &updated, now).await?;
        }

        if let Some(learning) = outcome_to_learning(outcome, &updated, &metrics, &self.config.learning) {
            debug!(
                reminder_id = %updated.id,
                outcome_type = %learning.outcome_type,
                "Forwarding reminder learning"
            );
            self.learnings.add_learning(&updated.agent_id, learning).await?;
        }

        Ok(metrics)
    }

    /// Create or replace a reminder and reconcile its job.
    pub async fn upsert_reminder(
        &self,
        reminder: &Reminder,
        now: DateTime<Utc>,
    ) -> NudgeResult<ReconcileAction> {
        reminder.validate()?;
        match self.reminders.get(&reminder.id)? {
            Some(_) => self.reminders.update(reminder)?,
            None => self.reminders.add(reminder)?,
        }
        reconciler::update_on_status_change(self.jobs.as_ref(), reminder, now).await
    }

    /// Delete a reminder and its job. Returns whether the reminder existed.
    pub async fn delete_reminder(&self, reminder_id: &str) -> NudgeResult<bool> {
        let existed = self.reminders.delete(reminder_id)?;
        reconciler::remove_for_reminder(self.jobs.as_ref(), reminder_id).await?;
        Ok(existed)
    }

    /// Reconcile every stored reminder against the job service.
    pub async fn sync(&self, now: DateTime<Utc>) -> NudgeResult<SyncReport> {
        let all = self.reminders.list_all()?;
        let report = reconciler::sync(self.jobs.as_ref(), &all, now).await?;
        info!(
            reminders = all.len(),
            registered = report.registered,
            updated = report.updated,
            removed = report.removed,
            "Reminder jobs synced"
        );
        Ok(report)
    }

    /// Generate and store learnings about an agent's reminders as a whole.
    pub async fn emit_system_learnings(&self, agent_id: &str) -> NudgeResult<Vec<Learning>> {
        let reminders = self.reminders.list_for_agent(agent_id)?;
        let metrics = self.feedback.list_metrics(agent_id)?;
        let stats = AggregateStats::from_metrics(
            &reminders,
            &metrics,
            self.config.learning.utc_offset_minutes,
        );

        let learnings = generate_system_learnings(agent_id, &stats, &self.config.learning);
        for learning in &learnings {
            self.learnings.add_learning(agent_id, learning.clone()).await?;
        }
        debug!(agent_id, count = learnings.len(), "Emitted system learnings");
        Ok(learnings)
    }

    /// Delete feedback events older than the retention window.
    pub fn cleanup(&self, now: DateTime<Utc>) -> NudgeResult<usize> {
        self.feedback
            .cleanup_old_feedback(self.config.retention_days, now)
    }

    /// Best and worst reminders of an agent.
    pub fn performance_ranking(&self, agent_id: &str, n: usize) -> NudgeResult<PerformanceRanking> {
        self.feedback.get_performance_ranking(agent_id, n)
    }

    /// Feedback totals of an agent over the last `window_days`.
    pub fn agent_stats(
        &self,
        agent_id: &str,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> NudgeResult<AgentFeedbackStats> {
        self.feedback
            .get_agent_feedback_stats(agent_id, window_days, now)
    }

    /// Get a reference to the reminder store.
    pub fn reminder_store(&self) -> Arc<dyn ReminderStore> {
        self.reminders.clone()
    }

    /// Get a reference to the feedback store.
    pub fn feedback_store(&self) -> Arc<dyn FeedbackStore> {
        self.feedback.clone()
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &NudgeConfig {
        &self.config
    }
}
