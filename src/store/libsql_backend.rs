//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! shared, which serializes writes per key as the registry requires.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::WorkData;
use crate::error::DatabaseError;
use crate::scheduler::job::JobRecord;
use crate::scheduler::state::ExecutionState;
use crate::store::migrations;
use crate::store::traits::{Database, WorkRecord};

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("bad uuid {s:?}: {e}")))
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

const JOB_COLUMNS: &str = "id, state, input, progress, output, tags, unique_name, prerequisite, run_attempt_count, seq, created_at, updated_at";

/// Map a libsql Row to a JobRecord. Column order matches JOB_COLUMNS.
fn row_to_job(row: &libsql::Row) -> Result<JobRecord, DatabaseError> {
    let get_text = |idx: i32| -> Result<String, DatabaseError> {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::Query(format!("job column {idx}: {e}")))
    };

    let id = parse_uuid(&get_text(0)?)?;
    let state_str = get_text(1)?;
    let state: ExecutionState = state_str
        .parse()
        .map_err(|_| DatabaseError::Serialization(format!("bad job state {state_str:?}")))?;
    let input = WorkData::from_json(Some(&get_text(2)?))?;
    let progress = WorkData::from_json(Some(&get_text(3)?))?;
    let output = WorkData::from_json(Some(&get_text(4)?))?;
    let tags: Vec<String> = serde_json::from_str(&get_text(5)?)
        .map_err(|e| DatabaseError::Serialization(format!("job tags: {e}")))?;
    let unique_name: Option<String> = row.get(6).ok();
    let prerequisite = match row.get::<String>(7).ok() {
        Some(s) => Some(parse_uuid(&s)?),
        None => None,
    };
    let run_attempt_count: i64 = row.get(8).unwrap_or(0);
    let seq: i64 = row
        .get(9)
        .map_err(|e| DatabaseError::Query(format!("job seq: {e}")))?;

    Ok(JobRecord {
        id,
        state,
        input,
        progress,
        output,
        tags,
        unique_name,
        prerequisite,
        run_attempt_count: run_attempt_count.max(0) as u32,
        seq,
        created_at: parse_datetime(&get_text(10)?),
        updated_at: parse_datetime(&get_text(11)?),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    // ── Task registry ───────────────────────────────────────────────

    async fn record_task(
        &self,
        work_id: Uuid,
        task_id: &str,
        tag: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let work_id_str = work_id.to_string();

        conn.execute(
            "INSERT INTO task_ids (work_id, task_id, seq)
             VALUES (?1, ?2, (SELECT COALESCE(MAX(seq), 0) + 1 FROM task_ids))
             ON CONFLICT(work_id) DO UPDATE SET
                task_id = excluded.task_id,
                seq = excluded.seq,
                recorded_at = datetime('now')",
            params![work_id_str.clone(), task_id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("record_task: {e}")))?;

        match tag {
            Some(tag) => conn
                .execute(
                    "INSERT INTO task_tags (work_id, tag) VALUES (?1, ?2)
                     ON CONFLICT(work_id) DO UPDATE SET tag = excluded.tag",
                    params![work_id_str, tag],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("record_task tag: {e}")))?,
            None => conn
                .execute(
                    "DELETE FROM task_tags WHERE work_id = ?1",
                    params![work_id_str],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("record_task tag: {e}")))?,
        };

        debug!(work_id = %work_id, task_id, tag = ?tag, "Task recorded");
        Ok(())
    }

    async fn get_task_id(&self, work_id: Uuid) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT task_id FROM task_ids WHERE work_id = ?1",
                params![work_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_task_id: {e}"))),
        }
    }

    async fn get_task_tag(&self, work_id: Uuid) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT tag FROM task_tags WHERE work_id = ?1",
                params![work_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task_tag: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_task_tag: {e}"))),
        }
    }

    async fn find_latest_work_id(&self, task_id: &str) -> Result<Option<Uuid>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT work_id FROM task_ids WHERE task_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![task_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_latest_work_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let id: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("find_latest_work_id: {e}")))?;
                Ok(Some(parse_uuid(&id)?))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_latest_work_id: {e}"))),
        }
    }

    async fn forget_task(&self, work_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let id = work_id.to_string();
        let ids = conn
            .execute("DELETE FROM task_ids WHERE work_id = ?1", params![id.clone()])
            .await
            .map_err(|e| DatabaseError::Query(format!("forget_task: {e}")))?;
        let tags = conn
            .execute("DELETE FROM task_tags WHERE work_id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("forget_task: {e}")))?;

        if ids + tags > 0 {
            debug!(work_id = %work_id, "Task record evicted");
        }
        Ok(ids + tags > 0)
    }

    async fn list_task_records(&self) -> Result<Vec<WorkRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT t.work_id, t.task_id, g.tag FROM task_ids t
                 LEFT JOIN task_tags g ON g.work_id = t.work_id
                 ORDER BY t.seq ASC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_task_records: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_task_records: {e}")))?
        {
            let work_id: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("list_task_records: {e}")))?;
            records.push(WorkRecord {
                work_id: parse_uuid(&work_id)?,
                task_id: row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("list_task_records: {e}")))?,
                tag: row.get(2).ok(),
            });
        }
        Ok(records)
    }

    // ── Jobs ────────────────────────────────────────────────────────

    async fn insert_job(&self, job: &JobRecord) -> Result<(), DatabaseError> {
        let tags = serde_json::to_string(&job.tags)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let prerequisite = job.prerequisite.map(|p| p.to_string());

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    job.id.to_string(),
                    job.state.as_str(),
                    job.input.to_json()?,
                    job.progress.to_json()?,
                    job.output.to_json()?,
                    tags,
                    opt_text(job.unique_name.as_deref()),
                    opt_text(prerequisite.as_deref()),
                    job.run_attempt_count as i64,
                    job.seq,
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_job: {e}")))?;

        debug!(work_id = %job.id, state = %job.state, "Job inserted into DB");
        Ok(())
    }

    async fn update_job(&self, job: &JobRecord) -> Result<(), DatabaseError> {
        let prerequisite = job.prerequisite.map(|p| p.to_string());

        self.conn()
            .execute(
                "UPDATE jobs SET state = ?1, progress = ?2, output = ?3, prerequisite = ?4,
                    run_attempt_count = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    job.state.as_str(),
                    job.progress.to_json()?,
                    job.output.to_json()?,
                    opt_text(prerequisite.as_deref()),
                    job.run_attempt_count as i64,
                    job.updated_at.to_rfc3339(),
                    job.id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_job: {e}")))?;
        Ok(())
    }

    async fn load_jobs(&self) -> Result<Vec<JobRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY seq ASC"), ())
            .await
            .map_err(|e| DatabaseError::Query(format!("load_jobs: {e}")))?;

        let mut jobs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_jobs: {e}")))?
        {
            match row_to_job(&row) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    let id = row.get::<String>(0).unwrap_or_default();
                    warn!(work_id = %id, error = %e, "Skipping unreadable job row");
                }
            }
        }
        Ok(jobs)
    }
}
