//! Feedback storage trait and SQLite implementation.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{NudgeError, NudgeResult};
use crate::feedback::{
    classify_trend, effectiveness_score, outcome_score, AgentFeedbackStats, EffectivenessConfig,
    EffectivenessMetrics, FeedbackEvent, FeedbackSource, PerformanceRanking, Reaction,
    ReminderOutcome, ScoreInputs, ScoreWindow, Trend,
};
use crate::reminders::parse_time;

/// Trait for feedback storage operations
pub trait FeedbackStore: Send + Sync {
    /// Append an event and recompute the reminder's metrics
    fn record_outcome(
        &self,
        outcome: &ReminderOutcome,
        now: DateTime<Utc>,
    ) -> NudgeResult<(FeedbackEvent, EffectivenessMetrics)>;

    /// Metrics of one reminder, if it has any feedback
    fn get_metrics(&self, reminder_id: &str) -> NudgeResult<Option<EffectivenessMetrics>>;

    /// Events of one reminder, newest first
    fn get_events(&self, reminder_id: &str, limit: usize) -> NudgeResult<Vec<FeedbackEvent>>;

    /// All metrics rows of an agent
    fn list_metrics(&self, agent_id: &str) -> NudgeResult<Vec<EffectivenessMetrics>>;

    /// Best and worst `n` reliable reminders of an agent
    fn get_performance_ranking(&self, agent_id: &str, n: usize) -> NudgeResult<PerformanceRanking>;

    /// Totals over events shown in the last `window_days`
    fn get_agent_feedback_stats(
        &self,
        agent_id: &str,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> NudgeResult<AgentFeedbackStats>;

    /// Delete events shown before the retention window. Metrics are kept.
    fn cleanup_old_feedback(&self, retention_days: u32, now: DateTime<Utc>) -> NudgeResult<usize>;
}

/// SQLite-backed feedback store
pub struct SqliteFeedbackStore {
    conn: Mutex<Connection>,
    config: EffectivenessConfig,
}

const EVENT_COLUMNS: &str = r#"SELECT id, reminder_id, agent_id, session_key, shown_at, reaction,
       source, recorded_at, reaction_time_ms, context_relevance_score,
       trigger_message, user_response
FROM reminder_feedback"#;

const METRICS_COLUMNS: &str = r#"SELECT reminder_id, agent_id, total_showings, completed_count,
       dismissed_count, snoozed_count, ignored_count, acted_count, completion_rate,
       dismissal_rate, avg_reaction_time_ms, avg_context_relevance, effectiveness_score,
       trend, recent_scores, last_calculated_at
FROM reminder_effectiveness"#;

/// Fixed-width UTC timestamps so text comparison matches time order.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `now` minus `days`, or `None` when that falls outside chrono's range.
fn days_before(now: DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    Duration::try_days(i64::from(days)).and_then(|d| now.checked_sub_signed(d))
}

/// Reaction counts and averages over a reminder's full event history.
#[derive(Debug, Default)]
struct EventTotals {
    total: u32,
    completed: u32,
    dismissed: u32,
    snoozed: u32,
    ignored: u32,
    acted: u32,
    avg_reaction_time_ms: Option<f64>,
    avg_relevance: Option<f64>,
}

impl EventTotals {
    fn rate(&self, count: u32) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(count) / f64::from(self.total)
        }
    }
}

impl SqliteFeedbackStore {
    /// Create a new store at the given path
    pub fn new(path: impl AsRef<Path>) -> NudgeResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            config: EffectivenessConfig::default(),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> NudgeResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            config: EffectivenessConfig::default(),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Builder method to set the effectiveness model
    pub fn with_config(mut self, config: EffectivenessConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EffectivenessConfig {
        &self.config
    }

    fn lock(&self) -> NudgeResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| NudgeError::database(e.to_string()))
    }

    fn init_schema(&self) -> NudgeResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS reminder_feedback (
                id TEXT PRIMARY KEY,
                reminder_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                session_key TEXT,
                shown_at TEXT NOT NULL,
                reaction TEXT NOT NULL,
                source TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                reaction_time_ms INTEGER,
                context_relevance_score REAL,
                trigger_message TEXT,
                user_response TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_feedback_reminder ON reminder_feedback(reminder_id);
            CREATE INDEX IF NOT EXISTS idx_feedback_agent ON reminder_feedback(agent_id);
            CREATE INDEX IF NOT EXISTS idx_feedback_shown ON reminder_feedback(shown_at);
            CREATE INDEX IF NOT EXISTS idx_feedback_reaction ON reminder_feedback(reaction);

            CREATE TABLE IF NOT EXISTS reminder_effectiveness (
                reminder_id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                total_showings INTEGER NOT NULL DEFAULT 0,
                completed_count INTEGER NOT NULL DEFAULT 0,
                dismissed_count INTEGER NOT NULL DEFAULT 0,
                snoozed_count INTEGER NOT NULL DEFAULT 0,
                ignored_count INTEGER NOT NULL DEFAULT 0,
                acted_count INTEGER NOT NULL DEFAULT 0,
                completion_rate REAL NOT NULL DEFAULT 0,
                dismissal_rate REAL NOT NULL DEFAULT 0,
                avg_reaction_time_ms REAL,
                avg_context_relevance REAL,
                effectiveness_score REAL NOT NULL DEFAULT 0,
                trend TEXT NOT NULL DEFAULT 'stable',
                recent_scores TEXT NOT NULL DEFAULT '[]',
                last_calculated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_effectiveness_agent ON reminder_effectiveness(agent_id);
        "#,
        )?;
        Ok(())
    }

    fn row_to_event(row: &rusqlite::Row<'_>) -> NudgeResult<FeedbackEvent> {
        let shown_at: String = row.get(4)?;
        let reaction: String = row.get(5)?;
        let source: String = row.get(6)?;
        let recorded_at: String = row.get(7)?;

        Ok(FeedbackEvent {
            id: row.get(0)?,
            reminder_id: row.get(1)?,
            agent_id: row.get(2)?,
            session_key: row.get(3)?,
            shown_at: parse_time(&shown_at)?,
            reaction: Reaction::from_str(&reaction)
                .map_err(|e| NudgeError::parse(format!("reaction '{}': {}", reaction, e)))?,
            source: FeedbackSource::from_str(&source)
                .map_err(|e| NudgeError::parse(format!("source '{}': {}", source, e)))?,
            recorded_at: parse_time(&recorded_at)?,
            reaction_time_ms: row.get(8)?,
            context_relevance_score: row.get(9)?,
            trigger_message: row.get(10)?,
            user_response: row.get(11)?,
        })
    }

    fn row_to_metrics(&self, row: &rusqlite::Row<'_>) -> NudgeResult<EffectivenessMetrics> {
        let trend: String = row.get(13)?;
        let recent: String = row.get(14)?;
        let last_calculated_at: String = row.get(15)?;
        let scores: Vec<f64> = serde_json::from_str(&recent)?;

        Ok(EffectivenessMetrics {
            reminder_id: row.get(0)?,
            agent_id: row.get(1)?,
            total_showings: row.get(2)?,
            completed_count: row.get(3)?,
            dismissed_count: row.get(4)?,
            snoozed_count: row.get(5)?,
            ignored_count: row.get(6)?,
            acted_count: row.get(7)?,
            completion_rate: row.get(8)?,
            dismissal_rate: row.get(9)?,
            avg_reaction_time_ms: row.get(10)?,
            avg_context_relevance: row.get(11)?,
            effectiveness_score: row.get(12)?,
            trend: Trend::from_str(&trend)
                .map_err(|e| NudgeError::parse(format!("trend '{}': {}", trend, e)))?,
            recent_scores: ScoreWindow::from_scores(self.config.window_capacity, scores),
            last_calculated_at: parse_time(&last_calculated_at)?,
        })
    }

    fn query_metrics(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> NudgeResult<Vec<EffectivenessMetrics>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, |row| Ok(self.row_to_metrics(row)))?;

        rows.map(|r| r.map_err(NudgeError::from).and_then(|inner| inner))
            .collect()
    }

    fn insert_event(tx: &Transaction<'_>, event: &FeedbackEvent) -> NudgeResult<()> {
        let reaction: &'static str = event.reaction.into();
        let source: &'static str = event.source.into();
        tx.execute(
            r#"INSERT INTO reminder_feedback
               (id, reminder_id, agent_id, session_key, shown_at, reaction, source,
                recorded_at, reaction_time_ms, context_relevance_score,
                trigger_message, user_response)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            params![
                event.id,
                event.reminder_id,
                event.agent_id,
                event.session_key,
                ts(event.shown_at),
                reaction,
                source,
                ts(event.recorded_at),
                event.reaction_time_ms,
                event.context_relevance_score,
                event.trigger_message,
                event.user_response,
            ],
        )?;
        Ok(())
    }

    fn event_totals(tx: &Transaction<'_>, reminder_id: &str) -> NudgeResult<EventTotals> {
        let totals = tx.query_row(
            r#"SELECT COUNT(*),
                      COALESCE(SUM(reaction = 'completed'), 0),
                      COALESCE(SUM(reaction = 'dismissed'), 0),
                      COALESCE(SUM(reaction = 'snoozed'), 0),
                      COALESCE(SUM(reaction = 'ignored'), 0),
                      COALESCE(SUM(reaction = 'acted'), 0),
                      AVG(reaction_time_ms),
                      AVG(context_relevance_score)
               FROM reminder_feedback WHERE reminder_id = ?1"#,
            params![reminder_id],
            |row| {
                Ok(EventTotals {
                    total: row.get(0)?,
                    completed: row.get(1)?,
                    dismissed: row.get(2)?,
                    snoozed: row.get(3)?,
                    ignored: row.get(4)?,
                    acted: row.get(5)?,
                    avg_reaction_time_ms: row.get(6)?,
                    avg_relevance: row.get(7)?,
                })
            },
        )?;
        Ok(totals)
    }

    fn stored_scores(tx: &Transaction<'_>, reminder_id: &str) -> NudgeResult<Vec<f64>> {
        let recent: Option<String> = tx
            .query_row(
                "SELECT recent_scores FROM reminder_effectiveness WHERE reminder_id = ?1",
                params![reminder_id],
                |row| row.get(0),
            )
            .optional()?;
        match recent {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    fn upsert_metrics(tx: &Transaction<'_>, metrics: &EffectivenessMetrics) -> NudgeResult<()> {
        let trend: &'static str = metrics.trend.into();
        tx.execute(
            r#"INSERT INTO reminder_effectiveness
               (reminder_id, agent_id, total_showings, completed_count, dismissed_count,
                snoozed_count, ignored_count, acted_count, completion_rate, dismissal_rate,
                avg_reaction_time_ms, avg_context_relevance, effectiveness_score, trend,
                recent_scores, last_calculated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
               ON CONFLICT(reminder_id) DO UPDATE SET
                   agent_id = excluded.agent_id,
                   total_showings = excluded.total_showings,
                   completed_count = excluded.completed_count,
                   dismissed_count = excluded.dismissed_count,
                   snoozed_count = excluded.snoozed_count,
                   ignored_count = excluded.ignored_count,
                   acted_count = excluded.acted_count,
                   completion_rate = excluded.completion_rate,
                   dismissal_rate = excluded.dismissal_rate,
                   avg_reaction_time_ms = excluded.avg_reaction_time_ms,
                   avg_context_relevance = excluded.avg_context_relevance,
                   effectiveness_score = excluded.effectiveness_score,
                   trend = excluded.trend,
                   recent_scores = excluded.recent_scores,
                   last_calculated_at = excluded.last_calculated_at"#,
            params![
                metrics.reminder_id,
                metrics.agent_id,
                metrics.total_showings,
                metrics.completed_count,
                metrics.dismissed_count,
                metrics.snoozed_count,
                metrics.ignored_count,
                metrics.acted_count,
                metrics.completion_rate,
                metrics.dismissal_rate,
                metrics.avg_reaction_time_ms,
                metrics.avg_context_relevance,
                metrics.effectiveness_score,
                trend,
                serde_json::to_string(&metrics.recent_scores)?,
                ts(metrics.last_calculated_at),
            ],
        )?;
        Ok(())
    }

    fn compute_metrics(
        &self,
        outcome: &ReminderOutcome,
        totals: &EventTotals,
        previous_scores: Vec<f64>,
        now: DateTime<Utc>,
    ) -> EffectivenessMetrics {
        let mut recent_scores = ScoreWindow::from_scores(self.config.window_capacity, previous_scores);
        recent_scores.push(outcome_score(outcome.reaction));

        let completion_rate = totals.rate(totals.completed);
        let dismissal_rate = totals.rate(totals.dismissed);
        let inputs = ScoreInputs {
            completion_rate,
            acted_rate: totals.rate(totals.acted),
            snooze_rate: totals.rate(totals.snoozed),
            dismissal_rate,
            avg_relevance: totals.avg_relevance,
        };

        EffectivenessMetrics {
            reminder_id: outcome.reminder_id.clone(),
            agent_id: outcome.agent_id.clone(),
            total_showings: totals.total,
            completed_count: totals.completed,
            dismissed_count: totals.dismissed,
            snoozed_count: totals.snoozed,
            ignored_count: totals.ignored,
            acted_count: totals.acted,
            completion_rate,
            dismissal_rate,
            avg_reaction_time_ms: totals.avg_reaction_time_ms,
            avg_context_relevance: totals.avg_relevance,
            effectiveness_score: effectiveness_score(&inputs, &self.config),
            trend: classify_trend(
                &recent_scores.to_vec(),
                self.config.trend_window,
                self.config.trend_epsilon,
            ),
            recent_scores,
            last_calculated_at: now,
        }
    }
}

impl FeedbackStore for SqliteFeedbackStore {
    fn record_outcome(
        &self,
        outcome: &ReminderOutcome,
        now: DateTime<Utc>,
    ) -> NudgeResult<(FeedbackEvent, EffectivenessMetrics)> {
        outcome.validate()?;

        let event = FeedbackEvent {
            id: Uuid::new_v4().to_string(),
            reminder_id: outcome.reminder_id.clone(),
            agent_id: outcome.agent_id.clone(),
            session_key: outcome.session_key.clone(),
            shown_at: outcome.shown_at.unwrap_or(now),
            reaction: outcome.reaction,
            source: outcome.source,
            recorded_at: now,
            reaction_time_ms: outcome.reaction_time_ms,
            context_relevance_score: outcome.context_relevance_score,
            trigger_message: outcome.trigger_message.clone(),
            user_response: outcome.user_response.clone(),
        };

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        Self::insert_event(&tx, &event)?;
        let totals = Self::event_totals(&tx, &outcome.reminder_id)?;
        let previous = Self::stored_scores(&tx, &outcome.reminder_id)?;
        let metrics = self.compute_metrics(outcome, &totals, previous, now);
        Self::upsert_metrics(&tx, &metrics)?;
        tx.commit()?;

        debug!(
            reminder_id = %outcome.reminder_id,
            reaction = %outcome.reaction,
            showings = metrics.total_showings,
            score = metrics.effectiveness_score,
            trend = %metrics.trend,
            "Recorded reminder outcome"
        );

        Ok((event, metrics))
    }

    fn get_metrics(&self, reminder_id: &str) -> NudgeResult<Option<EffectivenessMetrics>> {
        let mut found = self.query_metrics(
            &format!("{} WHERE reminder_id = ?1", METRICS_COLUMNS),
            params![reminder_id],
        )?;
        Ok(found.pop())
    }

    fn get_events(&self, reminder_id: &str, limit: usize) -> NudgeResult<Vec<FeedbackEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE reminder_id = ?1 ORDER BY shown_at DESC, recorded_at DESC LIMIT ?2",
            EVENT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![reminder_id, limit as i64], |row| {
            Ok(Self::row_to_event(row))
        })?;

        rows.map(|r| r.map_err(NudgeError::from).and_then(|inner| inner))
            .collect()
    }

    fn list_metrics(&self, agent_id: &str) -> NudgeResult<Vec<EffectivenessMetrics>> {
        self.query_metrics(
            &format!("{} WHERE agent_id = ?1 ORDER BY reminder_id", METRICS_COLUMNS),
            params![agent_id],
        )
    }

    fn get_performance_ranking(&self, agent_id: &str, n: usize) -> NudgeResult<PerformanceRanking> {
        let min_showings = self.config.min_showings;
        let limit = n as i64;
        let top = self.query_metrics(
            &format!(
                "{} WHERE agent_id = ?1 AND total_showings >= ?2 \
                 ORDER BY effectiveness_score DESC, reminder_id ASC LIMIT ?3",
                METRICS_COLUMNS
            ),
            params![agent_id, min_showings, limit],
        )?;
        let bottom = self.query_metrics(
            &format!(
                "{} WHERE agent_id = ?1 AND total_showings >= ?2 \
                 ORDER BY effectiveness_score ASC, reminder_id ASC LIMIT ?3",
                METRICS_COLUMNS
            ),
            params![agent_id, min_showings, limit],
        )?;
        Ok(PerformanceRanking { top, bottom })
    }

    fn get_agent_feedback_stats(
        &self,
        agent_id: &str,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> NudgeResult<AgentFeedbackStats> {
        // A window reaching past the representable range covers everything
        let since = days_before(now, window_days).map(ts).unwrap_or_default();
        let conn = self.lock()?;

        let mut stats = conn.query_row(
            r#"SELECT COUNT(*),
                      COUNT(DISTINCT reminder_id),
                      COALESCE(SUM(reaction = 'completed'), 0),
                      COALESCE(SUM(reaction = 'dismissed'), 0),
                      COALESCE(SUM(reaction = 'snoozed'), 0),
                      COALESCE(SUM(reaction = 'ignored'), 0),
                      COALESCE(SUM(reaction = 'acted'), 0),
                      AVG(reaction_time_ms)
               FROM reminder_feedback
               WHERE agent_id = ?1 AND shown_at >= ?2"#,
            params![agent_id, since],
            |row| {
                Ok(AgentFeedbackStats {
                    agent_id: agent_id.to_string(),
                    window_days,
                    total_showings: row.get(0)?,
                    unique_reminders: row.get(1)?,
                    completed: row.get(2)?,
                    dismissed: row.get(3)?,
                    snoozed: row.get(4)?,
                    ignored: row.get(5)?,
                    acted: row.get(6)?,
                    avg_reaction_time_ms: row.get(7)?,
                    ..Default::default()
                })
            },
        )?;

        if stats.total_showings > 0 {
            let total = f64::from(stats.total_showings);
            stats.completion_rate = f64::from(stats.completed) / total;
            stats.dismissal_rate = f64::from(stats.dismissed) / total;
        }
        Ok(stats)
    }

    fn cleanup_old_feedback(&self, retention_days: u32, now: DateTime<Utc>) -> NudgeResult<usize> {
        let Some(cutoff) = days_before(now, retention_days).map(ts) else {
            debug!(retention_days, "Retention reaches past the earliest time, nothing to clean");
            return Ok(0);
        };
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM reminder_feedback WHERE shown_at < ?1",
            params![cutoff],
        )?;
        if deleted > 0 {
            info!(deleted, retention_days, "Cleaned up old reminder feedback");
        }
        Ok(deleted)
    }
}
