//! Job records for background agent cycles
//!
//! Jobs transition queued -> running -> {completed, failed}. Stream
//! consumers poll this table with short-lived statements; they must not
//! hold the connection lock across iterations.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'queued',
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    result TEXT,
    summary TEXT,
    error TEXT
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at DESC);
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub summary: Option<String>,
    pub error: Option<String>,
}

pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open jobs database at {db_path}"))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize jobs schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn create(&self, job_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO jobs (id, status, created_at) VALUES (?1, 'queued', ?2)",
            params![job_id, Utc::now().to_rfc3339()],
        )
        .context("Failed to create job")?;
        Ok(())
    }

    pub fn mark_running(&self, job_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE jobs SET status = 'running', started_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), job_id],
        )?;
        Ok(())
    }

    pub fn mark_completed(&self, job_id: &str, result: &serde_json::Value) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE jobs SET status = 'completed', completed_at = ?1, result = ?2 WHERE id = ?3",
            params![Utc::now().to_rfc3339(), result.to_string(), job_id],
        )?;
        Ok(())
    }

    pub fn mark_failed(&self, job_id: &str, error: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE jobs SET status = 'failed', completed_at = ?1, error = ?2 WHERE id = ?3",
            params![Utc::now().to_rfc3339(), error, job_id],
        )?;
        Ok(())
    }

    pub fn set_summary(&self, job_id: &str, summary: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE jobs SET summary = ?1 WHERE id = ?2",
            params![summary, job_id],
        )?;
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, status, created_at, started_at, completed_at, result, summary, error
             FROM jobs WHERE id = ?1",
        )?;
        let job = stmt.query_row(params![job_id], row_to_job).optional()?;
        Ok(job)
    }

    pub fn list_recent(&self, limit: usize) -> Result<Vec<JobRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, status, created_at, started_at, completed_at, result, summary, error
             FROM jobs ORDER BY created_at DESC LIMIT ?1",
        )?;
        let jobs = stmt
            .query_map(params![limit as i64], row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    pub fn list_completed(&self, limit: usize) -> Result<Vec<JobRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, status, created_at, started_at, completed_at, result, summary, error
             FROM jobs WHERE status = 'completed' AND result IS NOT NULL
             ORDER BY completed_at DESC LIMIT ?1",
        )?;
        let jobs = stmt
            .query_map(params![limit as i64], row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Startup recovery: any job left `running` by a previous process is a
    /// casualty of the restart and can never complete.
    pub fn fail_interrupted(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE jobs SET status = 'failed', error = 'interrupted by restart', completed_at = ?1
             WHERE status = 'running'",
            params![Utc::now().to_rfc3339()],
        )?;
        if changed > 0 {
            warn!("⚠️ Marked {} interrupted job(s) as failed", changed);
        } else {
            info!("No interrupted jobs found on startup");
        }
        Ok(changed)
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRecord> {
    let created: String = row.get(2)?;
    let started: Option<String> = row.get(3)?;
    let completed: Option<String> = row.get(4)?;
    let result: Option<String> = row.get(5)?;
    Ok(JobRecord {
        id: row.get(0)?,
        status: row.get(1)?,
        created_at: parse_ts(&created),
        started_at: started.as_deref().map(parse_ts),
        completed_at: completed.as_deref().map(parse_ts),
        result: result.and_then(|r| serde_json::from_str(&r).ok()),
        summary: row.get(6)?,
        error: row.get(7)?,
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
