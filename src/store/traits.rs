//! Unified `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::scheduler::job::JobRecord;

/// One registry row: which caller task a work id belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkRecord {
    pub work_id: Uuid,
    pub task_id: String,
    pub tag: Option<String>,
}

/// Backend-agnostic database trait covering the task registry and job rows.
///
/// Implementations must serialize writes to the same key.
#[async_trait]
pub trait Database: Send + Sync {
    // ── Task registry ───────────────────────────────────────────────

    /// Upsert the task id and tag for a work id. A `None` tag clears any
    /// previously stored tag.
    async fn record_task(
        &self,
        work_id: Uuid,
        task_id: &str,
        tag: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Task id stored for a work id.
    async fn get_task_id(&self, work_id: Uuid) -> Result<Option<String>, DatabaseError>;

    /// Tag stored for a work id.
    async fn get_task_tag(&self, work_id: Uuid) -> Result<Option<String>, DatabaseError>;

    /// Most recently recorded work id for a task id.
    async fn find_latest_work_id(&self, task_id: &str) -> Result<Option<Uuid>, DatabaseError>;

    /// Remove both namespaces' entries for a work id. Returns whether
    /// anything was removed.
    async fn forget_task(&self, work_id: Uuid) -> Result<bool, DatabaseError>;

    /// All registry rows in insertion order.
    async fn list_task_records(&self) -> Result<Vec<WorkRecord>, DatabaseError>;

    // ── Jobs ────────────────────────────────────────────────────────

    /// Insert a new job row.
    async fn insert_job(&self, job: &JobRecord) -> Result<(), DatabaseError>;

    /// Persist the mutable columns of a job row.
    async fn update_job(&self, job: &JobRecord) -> Result<(), DatabaseError>;

    /// Load every job row ordered by enqueue sequence.
    async fn load_jobs(&self) -> Result<Vec<JobRecord>, DatabaseError>;
}
