//! Per-run audit store.
//!
//! Every run is persisted as exactly one row keyed by its execution id,
//! including runs that halted with `error` set. A retried save for the
//! same execution id overwrites the row, so the operation is idempotent.
//! Records reconstruct into the full shared state.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;

use crate::state::{RiskLevel, SharedState};


/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Errors raised by the audit store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuditError {
    /// Database error from `SQLite`.
    #[error("audit storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The store cannot serve requests at all.
    #[error("audit store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be decoded back into a state.
    #[error("corrupt audit record for {execution_id}: {reason}")]
    Corrupt {
        /// The record's execution id.
        execution_id: String,
        /// What failed to decode.
        reason: String,
    },
}

/// `SQLite`-backed audit store.
#[derive(Clone)]
pub struct SqliteAuditStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditStore {
    /// Opens or creates the store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be initialized.
    pub fn in_memory() -> Result<Self, AuditError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Persists one run. Saving the same execution id again overwrites the
    /// previous row (last writer wins).
    ///
    /// # Errors
    ///
    /// Returns an error when serialization or storage fails.
    pub async fn save(&self, state: &SharedState) -> Result<(), AuditError> {
        let conn = Arc::clone(&self.conn);
        let state = state.clone();
        run_blocking(move || {
            let structured_model = state
                .regulatory_model
                .as_ref()
                .map(|m| serde_json::to_string(m))
                .transpose()
                .map_err(|err| AuditError::Unavailable(format!("model encode failed: {err}")))?;
            let impacted_files = serde_json::to_string(&state.impacted_files)
                .map_err(|err| AuditError::Unavailable(format!("files encode failed: {err}")))?;
            let impact_analysis = serde_json::to_string(&state.impact_analysis)
                .map_err(|err| AuditError::Unavailable(format!("impacts encode failed: {err}")))?;

            let guard = conn.lock().unwrap();
            guard.execute(
                "INSERT INTO audit_logs (execution_id, raw_text, repo_path, change_detected,
                     risk_level, structured_model, impacted_files, impact_analysis,
                     technical_spec, kiro_prompt, error, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT (execution_id) DO UPDATE SET
                     raw_text = excluded.raw_text,
                     repo_path = excluded.repo_path,
                     change_detected = excluded.change_detected,
                     risk_level = excluded.risk_level,
                     structured_model = excluded.structured_model,
                     impacted_files = excluded.impacted_files,
                     impact_analysis = excluded.impact_analysis,
                     technical_spec = excluded.technical_spec,
                     kiro_prompt = excluded.kiro_prompt,
                     error = excluded.error,
                     timestamp = excluded.timestamp",
                params![
                    state.execution_id,
                    state.regulatory_text,
                    state.repo_path,
                    state.change_detected,
                    state.risk_level.map(|r| r.to_string()),
                    structured_model,
                    impacted_files,
                    impact_analysis,
                    state.technical_spec,
                    state.kiro_prompt,
                    state.error,
                    state.execution_timestamp.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Loads the audit record for one execution id.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails or the record is corrupt.
    pub async fn get(&self, execution_id: String) -> Result<Option<SharedState>, AuditError> {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let guard = conn.lock().unwrap();
            let row = guard
                .query_row(
                    "SELECT execution_id, raw_text, repo_path, change_detected, risk_level,
                            structured_model, impacted_files, impact_analysis,
                            technical_spec, kiro_prompt, error, timestamp
                     FROM audit_logs WHERE execution_id = ?1",
                    params![execution_id],
                    |row| {
                        Ok(RawAuditRow {
                            execution_id: row.get(0)?,
                            raw_text: row.get(1)?,
                            repo_path: row.get(2)?,
                            change_detected: row.get(3)?,
                            risk_level: row.get(4)?,
                            structured_model: row.get(5)?,
                            impacted_files: row.get(6)?,
                            impact_analysis: row.get(7)?,
                            technical_spec: row.get(8)?,
                            kiro_prompt: row.get(9)?,
                            error: row.get(10)?,
                            timestamp: row.get(11)?,
                        })
                    },
                )
                .optional()?;
            row.map(RawAuditRow::into_state).transpose()
        })
        .await
    }

    /// Cheap liveness probe for health reporting.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot answer a trivial query.
    pub async fn ping(&self) -> Result<(), AuditError> {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let guard = conn.lock().unwrap();
            guard.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }
}

struct RawAuditRow {
    execution_id: String,
    raw_text: String,
    repo_path: String,
    change_detected: Option<bool>,
    risk_level: Option<String>,
    structured_model: Option<String>,
    impacted_files: Option<String>,
    impact_analysis: Option<String>,
    technical_spec: Option<String>,
    kiro_prompt: Option<String>,
    error: Option<String>,
    timestamp: String,
}

impl RawAuditRow {
    fn into_state(self) -> Result<SharedState, AuditError> {
        let corrupt = |reason: String| AuditError::Corrupt {
            execution_id: self.execution_id.clone(),
            reason,
        };

        let execution_timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|err| corrupt(format!("bad timestamp: {err}")))?;
        let regulatory_model = self
            .structured_model
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|err| corrupt(format!("bad structured_model: {err}")))?;
        let impacted_files = self
            .impacted_files
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|err| corrupt(format!("bad impacted_files: {err}")))?
            .unwrap_or_default();
        let impact_analysis = self
            .impact_analysis
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|err| corrupt(format!("bad impact_analysis: {err}")))?
            .unwrap_or_default();
        let risk_level = match self.risk_level.as_deref() {
            None => None,
            Some(raw) => Some(
                RiskLevel::parse(raw)
                    .ok_or_else(|| corrupt(format!("bad risk_level {raw:?}")))?,
            ),
        };

        Ok(SharedState {
            execution_id: self.execution_id,
            regulatory_text: self.raw_text,
            repo_path: self.repo_path,
            execution_timestamp,
            change_detected: self.change_detected,
            risk_level,
            regulatory_model,
            impacted_files,
            impact_analysis,
            technical_spec: self.technical_spec,
            kiro_prompt: self.kiro_prompt,
            error: self.error,
        })
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T, AuditError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AuditError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| AuditError::Unavailable(format!("worker task failed: {err}")))?
}
