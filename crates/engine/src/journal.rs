use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use common::{Command, Error, Result};

use crate::channel::SlotStore;

/// How a processed command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Confirmed,
    TimedOut,
    Rejected,
    SubmissionFailed,
    /// Same intent text as the previously processed command; not acted on.
    Duplicate,
    /// Pending when monitoring stopped; never acted on.
    Discarded,
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Confirmed => "confirmed",
            ExecutionOutcome::TimedOut => "timed_out",
            ExecutionOutcome::Rejected => "rejected",
            ExecutionOutcome::SubmissionFailed => "submission_failed",
            ExecutionOutcome::Duplicate => "duplicate",
            ExecutionOutcome::Discarded => "discarded",
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "confirmed" => Ok(ExecutionOutcome::Confirmed),
            "timed_out" => Ok(ExecutionOutcome::TimedOut),
            "rejected" => Ok(ExecutionOutcome::Rejected),
            "submission_failed" => Ok(ExecutionOutcome::SubmissionFailed),
            "duplicate" => Ok(ExecutionOutcome::Duplicate),
            "discarded" => Ok(ExecutionOutcome::Discarded),
            other => Err(Error::Decode(format!("unknown execution outcome '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub command_id: Uuid,
    pub intent_text: String,
    pub actuator: String,
    pub outcome: ExecutionOutcome,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// SQLite-backed execution journal and command slot store.
#[derive(Clone)]
pub struct Journal {
    db: SqlitePool,
}

impl Journal {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn record(&self, entry: &JournalEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO executions (command_id, intent_text, actuator, outcome, detail, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(command_id) DO UPDATE SET
                outcome = excluded.outcome,
                detail = excluded.detail,
                recorded_at = excluded.recorded_at
            "#,
        )
        .bind(entry.command_id.to_string())
        .bind(&entry.intent_text)
        .bind(&entry.actuator)
        .bind(entry.outcome.as_str())
        .bind(&entry.detail)
        .bind(entry.recorded_at.to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Most recent entries, newest first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<JournalEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT command_id, intent_text, actuator, outcome, detail, recorded_at
            FROM executions
            ORDER BY recorded_at DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|row| {
                let id: String = row.try_get("command_id")?;
                let outcome: String = row.try_get("outcome")?;
                let recorded_at: String = row.try_get("recorded_at")?;
                Ok(JournalEntry {
                    command_id: parse_uuid(&id)?,
                    intent_text: row.try_get("intent_text")?,
                    actuator: row.try_get("actuator")?,
                    outcome: outcome.parse()?,
                    detail: row.try_get("detail")?,
                    recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
                        .map_err(|e| Error::Decode(e.to_string()))?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }
}

#[async_trait]
impl SlotStore for Journal {
    async fn save(&self, command: &Command) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO command_slot (slot, command_id, record, updated_at)
            VALUES (1, ?1, ?2, ?3)
            ON CONFLICT(slot) DO UPDATE SET
                command_id = excluded.command_id,
                record = excluded.record,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(command.id.to_string())
        .bind(command.encode())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<Command>> {
        let row = sqlx::query("SELECT command_id, record FROM command_slot WHERE slot = 1")
            .fetch_optional(&self.db)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row.try_get("command_id")?;
        let record: String = row.try_get("record")?;
        Command::decode(parse_uuid(&id)?, &record).map(Some)
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::Decode(format!("bad command id '{raw}': {e}")))
}
