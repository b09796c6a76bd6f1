use chrono::{DateTime, Local};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, TestKind};
use crate::error::StoreError;
use crate::scoring::{Level, Outcome};
use crate::service::{Ack, ResultService, ServiceError, SessionTicket, Submission};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT UNIQUE,
    test_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    submitted_at TEXT,
    test_kind TEXT,
    correct INTEGER,
    total INTEGER,
    percentage INTEGER,
    level TEXT,
    time_spent_seconds INTEGER,
    max_score INTEGER,
    detail TEXT
);
CREATE INDEX IF NOT EXISTS idx_sessions_kind ON sessions(test_kind);
CREATE INDEX IF NOT EXISTS idx_sessions_submitted ON sessions(submitted_at);
CREATE TABLE IF NOT EXISTS pending_outcomes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL UNIQUE,
    outcome TEXT NOT NULL,
    error TEXT NOT NULL,
    failed_at TEXT NOT NULL
);
"#;

/// One submitted session as listed by `history` and written by `export_csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub session_id: String,
    pub test_id: String,
    pub test_kind: TestKind,
    pub started_at: DateTime<Local>,
    pub submitted_at: DateTime<Local>,
    pub correct: usize,
    pub total: usize,
    pub percentage: u32,
    pub level: Level,
    pub time_spent_seconds: u64,
    pub max_score: usize,
}

/// An outcome kept after its submission failed
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOutcome {
    pub outcome: Outcome,
    pub error: String,
    pub failed_at: DateTime<Local>,
}

/// Counts reported by [`LocalResultStore::resubmit_pending`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub submitted: usize,
    pub remaining: usize,
}

/// SQLite backed result service with local history and a queue of failed submissions
#[derive(Debug)]
pub struct LocalResultStore {
    conn: Connection,
    known_tests: Vec<String>,
}

fn to_sql_name<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(serde_json::to_value(value)?
        .as_str()
        .unwrap_or_default()
        .to_string())
}

fn from_sql_name<T: DeserializeOwned>(idx: usize, name: String) -> rusqlite::Result<T> {
    serde_json::from_value(serde_json::Value::String(name))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Local>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Local))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn unavailable(err: impl std::fmt::Display) -> ServiceError {
    ServiceError::Unavailable(err.to_string())
}

impl LocalResultStore {
    /// Open (or create) the database at `path`; only tests of `catalog` can be started
    pub fn open<P: AsRef<Path>>(path: P, catalog: &Catalog) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?, catalog)
    }

    pub fn open_in_memory(catalog: &Catalog) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, catalog)
    }

    fn with_connection(conn: Connection, catalog: &Catalog) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            known_tests: catalog.tests.iter().map(|t| t.id.clone()).collect(),
        })
    }

    fn insert_session(&self, session_id: Option<&str>, test_id: &str) -> rusqlite::Result<String> {
        self.conn.execute(
            "INSERT INTO sessions (session_id, test_id, started_at) VALUES (?1, ?2, ?3)",
            params![session_id, test_id, Local::now().to_rfc3339()],
        )?;
        if let Some(id) = session_id {
            return Ok(id.to_string());
        }

        let row_id = self.conn.last_insert_rowid();
        let session_id = format!("local-{row_id}");
        self.conn.execute(
            "UPDATE sessions SET session_id = ?1 WHERE id = ?2",
            params![session_id, row_id],
        )?;
        Ok(session_id)
    }

    fn store_submission(&self, session_id: &str, submission: &Submission) -> Result<(), StoreError> {
        self.conn.execute(
            r#"
            UPDATE sessions SET
                submitted_at = ?1, test_kind = ?2, correct = ?3, total = ?4, percentage = ?5,
                level = ?6, time_spent_seconds = ?7, max_score = ?8, detail = ?9
            WHERE session_id = ?10
            "#,
            params![
                Local::now().to_rfc3339(),
                to_sql_name(&submission.test_kind)?,
                submission.correct as i64,
                submission.total as i64,
                submission.percentage,
                to_sql_name(&submission.level)?,
                submission.time_spent_seconds as i64,
                submission.max_score as i64,
                serde_json::to_string(&submission.detail)?,
                session_id,
            ],
        )?;
        Ok(())
    }

    /// Submitted sessions, newest first
    pub fn history(
        &self,
        kind: Option<TestKind>,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let kind = kind.map(|k| to_sql_name(&k)).transpose()?;
        let mut stmt = self.conn.prepare(
            r#"
            SELECT session_id, test_id, test_kind, started_at, submitted_at, correct, total,
                   percentage, level, time_spent_seconds, max_score
            FROM sessions
            WHERE submitted_at IS NOT NULL AND (?1 IS NULL OR test_kind = ?1)
            ORDER BY submitted_at DESC, id DESC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt.query_map(params![kind, limit as i64], |row| {
            let started: String = row.get(3)?;
            let submitted: String = row.get(4)?;
            Ok(HistoryEntry {
                session_id: row.get(0)?,
                test_id: row.get(1)?,
                test_kind: from_sql_name(2, row.get(2)?)?,
                started_at: parse_time(3, &started)?,
                submitted_at: parse_time(4, &submitted)?,
                correct: row.get::<_, i64>(5)? as usize,
                total: row.get::<_, i64>(6)? as usize,
                percentage: row.get(7)?,
                level: from_sql_name(8, row.get(8)?)?,
                time_spent_seconds: row.get::<_, i64>(9)? as u64,
                max_score: row.get::<_, i64>(10)? as usize,
            })
        })?;

        let mut entries = Vec::new();
        for entry in rows {
            entries.push(entry?);
        }
        Ok(entries)
    }

    /// Stored per-stimulus detail of a submitted session
    pub fn detail(&self, session_id: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let raw: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT detail FROM sessions WHERE session_id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw.flatten() {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Keep `outcome` for a later retry
    pub fn record_failed_submission(&self, outcome: &Outcome, error: &str) -> Result<(), StoreError> {
        warn!(session_id = %outcome.session_id, error, "keeping outcome for retry");
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO pending_outcomes (session_id, outcome, error, failed_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                outcome.session_id,
                serde_json::to_string(outcome)?,
                error,
                Local::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Outcomes waiting for a retry, oldest first
    pub fn pending(&self) -> Result<Vec<PendingOutcome>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT outcome, error, failed_at FROM pending_outcomes ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            let raw: String = row.get(0)?;
            let failed: String = row.get(2)?;
            let outcome: Outcome = serde_json::from_str(&raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
            })?;
            Ok(PendingOutcome {
                outcome,
                error: row.get(1)?,
                failed_at: parse_time(2, &failed)?,
            })
        })?;

        let mut pending = Vec::new();
        for p in rows {
            pending.push(p?);
        }
        Ok(pending)
    }

    pub fn remove_pending(&self, session_id: &str) -> Result<bool, StoreError> {
        let removed = self.conn.execute(
            "DELETE FROM pending_outcomes WHERE session_id = ?1",
            [session_id],
        )?;
        Ok(removed > 0)
    }

    /// Submit every pending outcome to this store.
    ///
    /// Outcomes whose session was never opened here are adopted; an outcome
    /// that was already submitted is dropped from the queue.
    pub fn resubmit_pending(&mut self) -> Result<RetryReport, StoreError> {
        let mut report = RetryReport::default();
        for pending in self.pending()? {
            let outcome = &pending.outcome;
            let submission = Submission::from(outcome);

            let mut result = self.submit_session(&outcome.session_id, &submission);
            if result == Err(ServiceError::NotFound) {
                self.insert_session(Some(&outcome.session_id), &outcome.test_id)?;
                result = self.submit_session(&outcome.session_id, &submission);
            }

            match result {
                Ok(_) | Err(ServiceError::Conflict) => {
                    self.remove_pending(&outcome.session_id)?;
                    report.submitted += 1;
                }
                Err(err) => {
                    warn!(session_id = %outcome.session_id, %err, "retry failed");
                    report.remaining += 1;
                }
            }
        }
        info!(submitted = report.submitted, remaining = report.remaining, "retry finished");
        Ok(report)
    }

    /// Write the whole history to `path` as CSV; returns the number of rows
    pub fn export_csv<P: AsRef<Path>>(&self, path: P) -> Result<usize, StoreError> {
        let entries = self.history(None, usize::MAX >> 1)?;
        let mut writer = csv::Writer::from_path(path)?;
        for entry in &entries {
            writer.serialize(entry)?;
        }
        writer.flush()?;
        Ok(entries.len())
    }
}

impl ResultService for LocalResultStore {
    fn start_session(&mut self, test_id: &str) -> Result<SessionTicket, ServiceError> {
        if !self.known_tests.iter().any(|t| t == test_id) {
            return Err(ServiceError::NotFound);
        }
        let session_id = self.insert_session(None, test_id).map_err(unavailable)?;
        debug!(%session_id, test_id, "session row created");
        Ok(SessionTicket { session_id })
    }

    fn submit_session(
        &mut self,
        session_id: &str,
        submission: &Submission,
    ) -> Result<Ack, ServiceError> {
        let submitted: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT submitted_at FROM sessions WHERE session_id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(unavailable)?;

        match submitted {
            None => Err(ServiceError::NotFound),
            Some(Some(_)) => Err(ServiceError::Conflict),
            Some(None) => {
                self.store_submission(session_id, submission)
                    .map_err(unavailable)?;
                debug!(session_id, "outcome stored");
                Ok(Ack {
                    session_id: session_id.to_string(),
                })
            }
        }
    }
}
