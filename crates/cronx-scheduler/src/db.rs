use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use cronx_core::{JobId, TemplateId};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{info, warn};

use crate::error::{Result, SchedulerError};
use crate::store::JobStore;
use crate::types::{ExecutionLogEntry, ExecutionStatus, HttpMethod, Job, Template};

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `templates`, `jobs` and `execution_logs` tables (idempotent)
/// plus the indexes used by startup loading and log inspection.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS templates (
            id                    TEXT    NOT NULL PRIMARY KEY,
            name                  TEXT    NOT NULL,
            method                TEXT    NOT NULL DEFAULT 'GET',
            url                   TEXT    NOT NULL,
            headers               TEXT    NOT NULL DEFAULT '{}', -- JSON object
            body                  TEXT,
            auth                  TEXT    NOT NULL DEFAULT '{\"type\":\"none\"}', -- JSON AuthConfig
            timeout_seconds       INTEGER NOT NULL DEFAULT 30,
            follow_redirects      INTEGER NOT NULL DEFAULT 1,
            validate_ssl          INTEGER NOT NULL DEFAULT 1,
            expected_status_codes TEXT    NOT NULL DEFAULT '[200]', -- JSON array
            response_validation   TEXT,                             -- JSON or NULL
            created_at            TEXT    NOT NULL,
            updated_at            TEXT    NOT NULL,
            deleted_at            TEXT
        ) STRICT;

        CREATE TABLE IF NOT EXISTS jobs (
            id               TEXT    NOT NULL PRIMARY KEY,
            name             TEXT    NOT NULL,
            description      TEXT,
            cron_expression  TEXT    NOT NULL,
            timezone         TEXT    NOT NULL DEFAULT 'UTC',
            template_id      TEXT    NOT NULL REFERENCES templates(id),
            is_enabled       INTEGER NOT NULL DEFAULT 1,
            retry_attempts   INTEGER NOT NULL DEFAULT 3,
            timeout_seconds  INTEGER NOT NULL DEFAULT 30,
            execution_count  INTEGER NOT NULL DEFAULT 0,
            success_count    INTEGER NOT NULL DEFAULT 0,
            failure_count    INTEGER NOT NULL DEFAULT 0,
            last_execution   TEXT,               -- ISO-8601 or NULL
            next_execution   TEXT,               -- ISO-8601 or NULL
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL,
            deleted_at       TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_jobs_enabled ON jobs (is_enabled, deleted_at);

        CREATE TABLE IF NOT EXISTS execution_logs (
            id               TEXT    NOT NULL PRIMARY KEY,
            job_id           TEXT    NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            executed_at      TEXT    NOT NULL,
            status           TEXT    NOT NULL,   -- success | failure | timeout
            response_status  INTEGER,
            response_body    TEXT,
            response_headers TEXT,               -- JSON object or NULL
            duration_ms      INTEGER NOT NULL,
            error_message    TEXT,
            retry_attempt    INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_execution_logs_job ON execution_logs (job_id, executed_at);
        ",
    )?;
    Ok(())
}

const JOB_COLUMNS: &str = "id, name, description, cron_expression, timezone, template_id,
     is_enabled, retry_attempts, timeout_seconds, execution_count, success_count,
     failure_count, last_execution, next_execution, created_at, updated_at";

const TEMPLATE_COLUMNS: &str = "id, name, method, url, headers, body, auth, timeout_seconds,
     follow_redirects, validate_ssl, expected_status_codes, response_validation";

/// SQLite-backed [`JobStore`].
///
/// Stat increments are single `UPDATE ... SET x = x + 1` statements, so they
/// stay correct when a manual run and a timer fire overlap.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // a panic while holding the lock cannot leave a half-applied statement
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_template(&self, template: &Template) -> Result<()> {
        let now = ts(&Utc::now());
        self.conn().execute(
            "INSERT INTO templates
             (id, name, method, url, headers, body, auth, timeout_seconds,
              follow_redirects, validate_ssl, expected_status_codes,
              response_validation, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?13)",
            rusqlite::params![
                template.id.as_str(),
                template.name,
                template.method.to_string(),
                template.url,
                serde_json::to_string(&template.headers)?,
                template.body,
                serde_json::to_string(&template.auth)?,
                template.timeout_seconds,
                template.follow_redirects,
                template.validate_ssl,
                serde_json::to_string(&template.expected_status_codes)?,
                template
                    .response_validation
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                now,
            ],
        )?;
        info!(template_id = %template.id, name = %template.name, "template stored");
        Ok(())
    }

    /// Soft-delete: the row stays, `get_template` stops returning it.
    pub fn delete_template(&self, id: &TemplateId) -> Result<()> {
        let now = ts(&Utc::now());
        let n = self.conn().execute(
            "UPDATE templates SET deleted_at = ?1, updated_at = ?1
             WHERE id = ?2 AND deleted_at IS NULL",
            rusqlite::params![now, id.as_str()],
        )?;
        if n == 0 {
            return Err(SchedulerError::TemplateNotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub fn insert_job(&self, job: &Job) -> Result<()> {
        self.conn().execute(
            "INSERT INTO jobs
             (id, name, description, cron_expression, timezone, template_id,
              is_enabled, retry_attempts, timeout_seconds, execution_count,
              success_count, failure_count, last_execution, next_execution,
              created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
            rusqlite::params![
                job.id.as_str(),
                job.name,
                job.description,
                job.cron_expression,
                job.timezone,
                job.template_id.as_str(),
                job.is_enabled,
                job.retry_attempts,
                job.timeout_seconds,
                job.execution_count as i64,
                job.success_count as i64,
                job.failure_count as i64,
                job.last_execution.map(|t| ts(&t)),
                job.next_execution.map(|t| ts(&t)),
                ts(&job.created_at),
                ts(&job.updated_at),
            ],
        )?;
        info!(job_id = %job.id, name = %job.name, "job stored");
        Ok(())
    }

    /// Flip the enabled flag; the caller is expected to notify the scheduler.
    pub fn set_job_enabled(&self, id: &JobId, enabled: bool) -> Result<()> {
        let now = ts(&Utc::now());
        let n = self.conn().execute(
            "UPDATE jobs SET is_enabled = ?1, updated_at = ?2
             WHERE id = ?3 AND deleted_at IS NULL",
            rusqlite::params![enabled, now, id.as_str()],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// All log rows of a job, oldest first.
    pub fn list_execution_logs(&self, job_id: &JobId) -> Result<Vec<ExecutionLogEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, executed_at, status, response_status, response_body,
                    response_headers, duration_ms, error_message, retry_attempt, created_at
             FROM execution_logs WHERE job_id = ?1
             ORDER BY executed_at, created_at",
        )?;
        let rows = stmt.query_map([job_id.as_str()], log_from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn get_template(&self, id: &TemplateId) -> Result<Option<Template>> {
        let sql = format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = ?1 AND deleted_at IS NULL"
        );
        let template = self
            .conn()
            .query_row(&sql, [id.as_str()], template_from_row)
            .optional()?;
        Ok(template)
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1 AND deleted_at IS NULL");
        let job = self
            .conn()
            .query_row(&sql, [id.as_str()], job_from_row)
            .optional()?;
        Ok(job)
    }

    async fn increment_job_stats(
        &self,
        id: &JobId,
        success: bool,
        executed_at: DateTime<Utc>,
    ) -> Result<()> {
        let (ok, failed) = if success { (1i64, 0i64) } else { (0, 1) };
        let n = self.conn().execute(
            "UPDATE jobs SET execution_count = execution_count + 1,
                             success_count   = success_count + ?1,
                             failure_count   = failure_count + ?2,
                             last_execution  = ?3,
                             updated_at      = ?3
             WHERE id = ?4",
            rusqlite::params![ok, failed, ts(&executed_at), id.as_str()],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn set_next_execution(&self, id: &JobId, next: Option<DateTime<Utc>>) -> Result<()> {
        let now = ts(&Utc::now());
        self.conn().execute(
            "UPDATE jobs SET next_execution = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![next.map(|t| ts(&t)), now, id.as_str()],
        )?;
        Ok(())
    }

    async fn append_execution_log(&self, entry: &ExecutionLogEntry) -> Result<()> {
        self.conn().execute(
            "INSERT INTO execution_logs
             (id, job_id, executed_at, status, response_status, response_body,
              response_headers, duration_ms, error_message, retry_attempt, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            rusqlite::params![
                entry.id,
                entry.job_id.as_str(),
                ts(&entry.executed_at),
                entry.status.to_string(),
                entry.response_status,
                entry.response_body,
                entry
                    .response_headers
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                entry.duration_ms as i64,
                entry.error_message,
                entry.retry_attempt,
                ts(&entry.created_at),
            ],
        )?;
        Ok(())
    }

    async fn list_enabled_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE is_enabled = 1 AND deleted_at IS NULL
             ORDER BY created_at"
        ))?;
        let jobs = stmt
            .query_map([], job_from_row)?
            .filter_map(|r| match r {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!("skipping unreadable job row: {e}");
                    None
                }
            })
            .collect();
        Ok(jobs)
    }
}

// --- row mapping -------------------------------------------------------------

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: JobId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        cron_expression: row.get(3)?,
        timezone: row.get(4)?,
        template_id: TemplateId(row.get(5)?),
        is_enabled: row.get(6)?,
        retry_attempts: row.get(7)?,
        timeout_seconds: row.get(8)?,
        execution_count: row.get::<_, i64>(9)? as u64,
        success_count: row.get::<_, i64>(10)? as u64,
        failure_count: row.get::<_, i64>(11)? as u64,
        last_execution: opt_timestamp(row, 12)?,
        next_execution: opt_timestamp(row, 13)?,
        created_at: timestamp(row, 14)?,
        updated_at: timestamp(row, 15)?,
    })
}

fn template_from_row(row: &Row<'_>) -> rusqlite::Result<Template> {
    let method: String = row.get(2)?;
    Ok(Template {
        id: TemplateId(row.get(0)?),
        name: row.get(1)?,
        method: method
            .parse::<HttpMethod>()
            .map_err(|e| conversion_error(2, e.into()))?,
        url: row.get(3)?,
        headers: json_column(row, 4)?,
        body: row.get(5)?,
        auth: json_column(row, 6)?,
        timeout_seconds: row.get(7)?,
        follow_redirects: row.get(8)?,
        validate_ssl: row.get(9)?,
        expected_status_codes: json_column(row, 10)?,
        response_validation: opt_json_column(row, 11)?,
    })
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<ExecutionLogEntry> {
    let status: String = row.get(3)?;
    Ok(ExecutionLogEntry {
        id: row.get(0)?,
        job_id: JobId(row.get(1)?),
        executed_at: timestamp(row, 2)?,
        status: status
            .parse::<ExecutionStatus>()
            .map_err(|e| conversion_error(3, e.into()))?,
        response_status: row.get(4)?,
        response_body: row.get(5)?,
        response_headers: opt_json_column(row, 6)?,
        duration_ms: row.get::<_, i64>(7)? as u64,
        error_message: row.get(8)?,
        retry_attempt: row.get(9)?,
        created_at: timestamp(row, 10)?,
    })
}

/// Fixed-width UTC text so timestamp columns sort chronologically.
fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, e: Box<dyn std::error::Error + Send + Sync>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e)
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, Box::new(e)))
}

fn opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, Box::new(e)))
    })
    .transpose()
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, Box::new(e)))
}

fn opt_json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| serde_json::from_str(&s).map_err(|e| conversion_error(idx, Box::new(e))))
        .transpose()
}
