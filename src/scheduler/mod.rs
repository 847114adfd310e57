//! Job scheduler port and the in-process implementation.
//!
//! Core components:
//! - `state`: execution states (Enqueued/Running/Blocked → Succeeded/Failed/Cancelled)
//! - `job`: requests, persisted rows, snapshots, query filters
//! - `local`: `LocalScheduler`, a persisted worker pool with unique-name chains
//!
//! The bridge only talks to `JobScheduler`; anything that can enqueue jobs,
//! report their state and redeliver snapshots can stand in for it.

pub mod job;
pub mod local;
pub mod state;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::codec::WorkData;
use crate::error::SchedulerError;

pub use job::{ExistingWorkPolicy, JobRequest, WorkInfo, WorkQuery, WorkResult};
pub use local::LocalScheduler;
pub use state::ExecutionState;

/// Live subscription: yields the full matching set now and again after
/// every change, including changes to unrelated fields of matching jobs.
pub type LiveQuery = BoxStream<'static, Vec<WorkInfo>>;

/// Enqueue, observe and cancel jobs.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Enqueue a one-time job. Returns its work id once accepted.
    async fn enqueue(&self, request: JobRequest) -> Result<Uuid, SchedulerError>;

    /// Enqueue a job under a unique name, resolving conflicts with `policy`.
    async fn enqueue_unique(
        &self,
        name: &str,
        policy: ExistingWorkPolicy,
        request: JobRequest,
    ) -> Result<Uuid, SchedulerError>;

    /// One-shot query.
    async fn get_work_infos(&self, query: &WorkQuery) -> Result<Vec<WorkInfo>, SchedulerError>;

    /// Live query; see [`LiveQuery`].
    fn watch(&self, query: WorkQuery) -> LiveQuery;

    /// Cancel a job that has not finished.
    async fn cancel_work(&self, work_id: Uuid) -> Result<(), SchedulerError>;

    /// Cancel every unfinished job under a unique name.
    async fn cancel_unique_work(&self, name: &str) -> Result<(), SchedulerError>;
}

/// Receives progress updates from a running job.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn set_progress(&self, work_id: Uuid, progress: WorkData) -> Result<(), SchedulerError>;
}

/// Everything a worker gets for one run of one job.
#[derive(Clone)]
pub struct WorkerContext {
    pub work_id: Uuid,
    pub input: WorkData,
    pub run_attempt_count: u32,
    progress: Arc<dyn ProgressSink>,
}

impl WorkerContext {
    pub fn new(
        work_id: Uuid,
        input: WorkData,
        run_attempt_count: u32,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            work_id,
            input,
            run_attempt_count,
            progress,
        }
    }

    /// Publish progress on the scheduler's progress channel.
    pub async fn set_progress(&self, progress: WorkData) -> Result<(), SchedulerError> {
        self.progress.set_progress(self.work_id, progress).await
    }

    /// Detached progress reporter usable from other tasks.
    pub fn progress_sink(&self) -> Arc<dyn ProgressSink> {
        Arc::clone(&self.progress)
    }
}

/// Per-job logic invoked by the scheduler.
#[async_trait]
pub trait JobWorker: Send + Sync {
    async fn do_work(&self, ctx: WorkerContext) -> WorkResult;
}
