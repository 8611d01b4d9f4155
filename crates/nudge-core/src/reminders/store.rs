//! Reminder storage trait and SQLite implementation.

use crate::error::{NudgeError, NudgeResult};
use crate::reminders::{Reminder, ReminderStatus, ReminderTrigger};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

/// Trait for reminder storage operations
pub trait ReminderStore: Send + Sync {
    /// Add a new reminder
    fn add(&self, reminder: &Reminder) -> NudgeResult<()>;

    /// Get reminder by ID
    fn get(&self, id: &str) -> NudgeResult<Option<Reminder>>;

    /// Update an existing reminder. The trigger kind must not change.
    fn update(&self, reminder: &Reminder) -> NudgeResult<()>;

    /// Delete a reminder, returning whether it existed
    fn delete(&self, id: &str) -> NudgeResult<bool>;

    /// All reminders, every agent and status
    fn list_all(&self) -> NudgeResult<Vec<Reminder>>;

    /// All reminders of one agent
    fn list_for_agent(&self, agent_id: &str) -> NudgeResult<Vec<Reminder>>;

    /// Reminders of one agent in the given status
    fn list_by_status(&self, agent_id: &str, status: ReminderStatus) -> NudgeResult<Vec<Reminder>>;
}

/// SQLite-backed reminder store
pub struct SqliteReminderStore {
    conn: Mutex<Connection>,
}

const SELECT_COLUMNS: &str = r#"SELECT id, agent_id, title, body, trigger_data, status, priority,
       created_at, triggered_at, completed_at, snooze_until, last_fired_at,
       context_tags, quiet_hours_exempt, source_chunk_id
FROM reminders"#;

impl SqliteReminderStore {
    /// Create a new store at the given path
    pub fn new(path: impl AsRef<Path>) -> NudgeResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> NudgeResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
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
            CREATE TABLE IF NOT EXISTS reminders (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT,
                trigger_type TEXT NOT NULL,
                trigger_data TEXT NOT NULL,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                created_at TEXT NOT NULL,
                triggered_at TEXT,
                completed_at TEXT,
                snooze_until TEXT,
                last_fired_at TEXT,
                context_tags TEXT NOT NULL DEFAULT '[]',
                quiet_hours_exempt INTEGER NOT NULL DEFAULT 0,
                source_chunk_id TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_reminders_agent ON reminders(agent_id);
            CREATE INDEX IF NOT EXISTS idx_reminders_status ON reminders(status);
            CREATE INDEX IF NOT EXISTS idx_reminders_trigger ON reminders(trigger_type);
        "#,
        )?;
        Ok(())
    }

    fn row_to_reminder(row: &rusqlite::Row<'_>) -> NudgeResult<Reminder> {
        let trigger_data: String = row.get(4)?;
        let status: String = row.get(5)?;
        let priority: String = row.get(6)?;
        let created_at: String = row.get(7)?;
        let context_tags: String = row.get(12)?;
        let exempt: i32 = row.get(13)?;

        Ok(Reminder {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            title: row.get(2)?,
            body: row.get(3)?,
            trigger: serde_json::from_str::<ReminderTrigger>(&trigger_data)?,
            status: ReminderStatus::from_str(&status)
                .map_err(|e| NudgeError::parse(format!("status '{}': {}", status, e)))?,
            priority: priority
                .parse()
                .map_err(|e| NudgeError::parse(format!("priority '{}': {}", priority, e)))?,
            created_at: parse_time(&created_at)?,
            triggered_at: parse_optional_time(row.get(8)?)?,
            completed_at: parse_optional_time(row.get(9)?)?,
            snooze_until: parse_optional_time(row.get(10)?)?,
            last_fired_at: parse_optional_time(row.get(11)?)?,
            context_tags: serde_json::from_str(&context_tags)?,
            quiet_hours_exempt: exempt != 0,
            source_chunk_id: row.get(14)?,
        })
    }

    fn query(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> NudgeResult<Vec<Reminder>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let results = stmt.query_map(args, |row| Ok(Self::row_to_reminder(row)))?;

        results
            .map(|r| r.map_err(NudgeError::from).and_then(|inner| inner))
            .collect()
    }
}

pub(crate) fn parse_time(s: &str) -> NudgeResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| NudgeError::Parse {
            message: format!("timestamp '{}': {}", s, e),
            code: crate::error::ErrorCode::ParseInvalidTime,
        })
}

pub(crate) fn parse_optional_time(s: Option<String>) -> NudgeResult<Option<DateTime<Utc>>> {
    s.map(|s| parse_time(&s)).transpose()
}

impl ReminderStore for SqliteReminderStore {
    fn add(&self, reminder: &Reminder) -> NudgeResult<()> {
        reminder.validate()?;
        let conn = self.lock()?;
        let trigger_type: &'static str = reminder.trigger.kind().into();
        let status: &'static str = reminder.status.into();
        let priority: &'static str = reminder.priority.into();

        conn.execute(
            r#"INSERT INTO reminders
               (id, agent_id, title, body, trigger_type, trigger_data, status, priority,
                created_at, triggered_at, completed_at, snooze_until, last_fired_at,
                context_tags, quiet_hours_exempt, source_chunk_id)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"#,
            params![
                reminder.id,
                reminder.agent_id,
                reminder.title,
                reminder.body,
                trigger_type,
                serde_json::to_string(&reminder.trigger)?,
                status,
                priority,
                reminder.created_at.to_rfc3339(),
                reminder.triggered_at.map(|dt| dt.to_rfc3339()),
                reminder.completed_at.map(|dt| dt.to_rfc3339()),
                reminder.snooze_until.map(|dt| dt.to_rfc3339()),
                reminder.last_fired_at.map(|dt| dt.to_rfc3339()),
                serde_json::to_string(&reminder.context_tags)?,
                reminder.quiet_hours_exempt as i32,
                reminder.source_chunk_id,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> NudgeResult<Option<Reminder>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_COLUMNS))?;

        stmt.query_row(params![id], |row| Ok(Self::row_to_reminder(row)))
            .optional()?
            .transpose()
    }

    fn update(&self, reminder: &Reminder) -> NudgeResult<()> {
        reminder.validate()?;
        let conn = self.lock()?;
        let trigger_type: &'static str = reminder.trigger.kind().into();

        let stored_type: Option<String> = conn
            .query_row(
                "SELECT trigger_type FROM reminders WHERE id = ?1",
                params![reminder.id],
                |row| row.get(0),
            )
            .optional()?;
        match stored_type {
            None => return Err(NudgeError::reminder_not_found(&reminder.id)),
            Some(stored) if stored != trigger_type => return Err(NudgeError::immutable("trigger")),
            Some(_) => {}
        }

        let status: &'static str = reminder.status.into();
        let priority: &'static str = reminder.priority.into();
        conn.execute(
            r#"UPDATE reminders SET
               agent_id = ?2, title = ?3, body = ?4, trigger_data = ?5, status = ?6,
               priority = ?7, triggered_at = ?8, completed_at = ?9, snooze_until = ?10,
               last_fired_at = ?11, context_tags = ?12, quiet_hours_exempt = ?13,
               source_chunk_id = ?14
               WHERE id = ?1"#,
            params![
                reminder.id,
                reminder.agent_id,
                reminder.title,
                reminder.body,
                serde_json::to_string(&reminder.trigger)?,
                status,
                priority,
                reminder.triggered_at.map(|dt| dt.to_rfc3339()),
                reminder.completed_at.map(|dt| dt.to_rfc3339()),
                reminder.snooze_until.map(|dt| dt.to_rfc3339()),
                reminder.last_fired_at.map(|dt| dt.to_rfc3339()),
                serde_json::to_string(&reminder.context_tags)?,
                reminder.quiet_hours_exempt as i32,
                reminder.source_chunk_id,
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: &str) -> NudgeResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM reminders WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn list_all(&self) -> NudgeResult<Vec<Reminder>> {
        self.query(&format!("{} ORDER BY created_at", SELECT_COLUMNS), &[])
    }

    fn list_for_agent(&self, agent_id: &str) -> NudgeResult<Vec<Reminder>> {
        self.query(
            &format!("{} WHERE agent_id = ?1 ORDER BY created_at", SELECT_COLUMNS),
            &[&agent_id],
        )
    }

    fn list_by_status(&self, agent_id: &str, status: ReminderStatus) -> NudgeResult<Vec<Reminder>> {
        let status: &'static str = status.into();
        self.query(
            &format!(
                "{} WHERE agent_id = ?1 AND status = ?2 ORDER BY created_at",
                SELECT_COLUMNS
            ),
            &[&agent_id, &status],
        )
    }
}
