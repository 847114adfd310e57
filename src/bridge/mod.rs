//! Execution bridge.
//!
//! Submission side: validate, encode, enqueue, then record the work id in
//! the task registry. Execution side: `BridgeWorker` boots one isolated
//! context per invocation on the coordination thread, dispatches a single
//! call into it and waits for the call's one answer.

pub mod callback;
pub mod completion;
pub mod coordinator;
pub mod execution;
pub mod submission;
pub mod worker;

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::Error;
use crate::registry::TaskRegistry;
use crate::scheduler::JobScheduler;

pub use callback::{
    CallbackCall, CallbackDispatcher, CallbackRegistry, CallbackReply, ProgressSender, Reply,
};
pub use coordinator::Coordinator;
pub use submission::{TaskSubmission, UniqueWork};
pub use worker::BridgeWorker;

/// Enqueues submissions and records their work ids.
#[derive(Clone)]
pub struct TaskBridge {
    scheduler: Arc<dyn JobScheduler>,
    registry: TaskRegistry,
}

impl TaskBridge {
    pub fn new(scheduler: Arc<dyn JobScheduler>, registry: TaskRegistry) -> Self {
        Self {
            scheduler,
            registry,
        }
    }

    /// Enqueue `submission` and return its work id.
    ///
    /// Validation and encoding happen before the scheduler is touched, so a
    /// rejected submission leaves no registry record.
    pub async fn submit(&self, submission: &TaskSubmission) -> Result<Uuid, Error> {
        let request = submission.to_request()?;

        let work_id = match &submission.unique {
            Some(unique) => {
                self.scheduler
                    .enqueue_unique(&unique.name, unique.policy, request)
                    .await?
            }
            None => self.scheduler.enqueue(request).await?,
        };

        self.registry
            .record_task(work_id, &submission.task_id, submission.tag.as_deref())
            .await?;

        info!(
            work_id = %work_id,
            task_id = %submission.task_id,
            tag = submission.tag.as_deref().unwrap_or(""),
            unique_name = submission.unique.as_ref().map(|u| u.name.as_str()).unwrap_or(""),
            "Task queued"
        );
        Ok(work_id)
    }
}
