//! Caller-facing facade wiring storage, scheduler, bridge and events.

use std::sync::Arc;

use futures::stream::BoxStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bridge::{
    BridgeWorker, CallbackDispatcher, CallbackRegistry, TaskBridge, TaskSubmission,
};
use crate::config::BridgeConfig;
use crate::context::BridgeContext;
use crate::error::Result;
use crate::events::{EventMultiplexer, TaskEvent, TaskSummary};
use crate::registry::TaskRegistry;
use crate::scheduler::{ExecutionState, ExistingWorkPolicy, JobScheduler, LocalScheduler};
use crate::store::{Database, LibSqlBackend};

/// Background task manager.
pub struct TaskManager {
    context: BridgeContext,
    scheduler: Arc<LocalScheduler>,
    registry: TaskRegistry,
    bridge: TaskBridge,
    events: EventMultiplexer,
}

impl TaskManager {
    /// Open the database named by `config` (in memory when unset) and start
    /// the scheduler and event listeners.
    ///
    /// Persisted jobs are loaded but held back until [`resume`](Self::resume)
    /// or the first submission, so subscribe to the event streams in between
    /// to see their results. `callbacks` must hold every entry point they
    /// may name.
    pub async fn open(config: &BridgeConfig, callbacks: Arc<CallbackRegistry>) -> Result<Self> {
        let db: Arc<dyn Database> = match &config.db_path {
            Some(path) => Arc::new(LibSqlBackend::new_local(path).await?),
            None => Arc::new(LibSqlBackend::new_memory().await?),
        };
        let context = BridgeContext::new(db)?.with_callbacks(callbacks);
        Self::with_context(config, context).await
    }

    /// Start over an existing context.
    pub async fn with_context(config: &BridgeConfig, context: BridgeContext) -> Result<Self> {
        let worker = Arc::new(BridgeWorker::new(&context));
        let scheduler = Arc::new(
            LocalScheduler::open(Arc::clone(&context.db), worker, config.max_parallel_jobs).await?,
        );
        let registry = context.registry();
        let bridge = TaskBridge::new(scheduler.clone(), registry.clone());
        let events = EventMultiplexer::new(
            scheduler.clone(),
            registry.clone(),
            config.event_capacity,
            config.evict_on_terminal,
        );
        events.start().await?;

        info!(
            persistent = config.db_path.is_some(),
            max_parallel_jobs = config.max_parallel_jobs,
            evict_on_terminal = config.evict_on_terminal,
            "Task manager ready"
        );

        Ok(Self {
            context,
            scheduler,
            registry,
            bridge,
            events,
        })
    }

    /// Dispatch jobs left over from a previous run of the same database.
    /// The event listeners are already attached, so every resumed job is
    /// reported to current subscribers exactly once.
    pub fn resume(&self) {
        self.scheduler.resume();
    }

    /// Make `dispatcher` reachable under `handle`.
    pub async fn register_callback(&self, handle: i64, dispatcher: Arc<dyn CallbackDispatcher>) {
        self.context.callbacks.register(handle, dispatcher).await;
    }

    /// Enqueue a submission; unique placement is taken from the submission.
    /// Also resumes persisted jobs if `resume` was not called yet.
    pub async fn submit(&self, submission: &TaskSubmission) -> Result<Uuid> {
        self.scheduler.resume();
        let work_id = self.bridge.submit(submission).await?;
        if let Err(e) = self.events.reconcile().await {
            warn!(work_id = %work_id, error = %e, "Event reconcile after submit failed");
        }
        Ok(work_id)
    }

    /// Enqueue under a unique work name.
    pub async fn submit_unique(
        &self,
        submission: TaskSubmission,
        name: &str,
        policy: ExistingWorkPolicy,
    ) -> Result<Uuid> {
        self.submit(&submission.unique(name, policy)).await
    }

    /// Enqueue from the loosely-typed call form.
    pub async fn submit_json(&self, raw: &serde_json::Value) -> Result<Uuid> {
        self.submit(&TaskSubmission::from_json(raw)?).await
    }

    pub async fn query_by_status(&self, states: &[ExecutionState]) -> Result<Vec<TaskSummary>> {
        self.events.query_by_status(states).await
    }

    pub async fn query_by_status_names<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<Vec<TaskSummary>> {
        self.events.query_by_status_names(names).await
    }

    pub async fn query_by_tag(&self, tag: &str) -> Result<Vec<TaskSummary>> {
        self.events.query_by_tag(tag).await
    }

    pub async fn query_by_unique_work_name(&self, name: &str) -> Result<Vec<TaskSummary>> {
        self.events.query_by_unique_work_name(name).await
    }

    pub fn progress_events(&self) -> BoxStream<'static, TaskEvent> {
        self.events.subscribe_progress()
    }

    pub fn result_events(&self) -> BoxStream<'static, TaskEvent> {
        self.events.subscribe_results()
    }

    /// Cancel the most recent work recorded for `task_id`. Returns `false`
    /// when the task id is unknown.
    pub async fn cancel_task(&self, task_id: &str) -> Result<bool> {
        let Some(work_id) = self.registry.lookup_work_id(task_id).await? else {
            return Ok(false);
        };
        self.scheduler.cancel_work(work_id).await?;
        Ok(true)
    }

    pub async fn cancel_unique_work(&self, name: &str) -> Result<()> {
        self.scheduler.cancel_unique_work(name).await?;
        Ok(())
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<LocalScheduler> {
        &self.scheduler
    }

    /// Stop listeners and abort running jobs. Interrupted jobs resume on the
    /// next open of the same database.
    pub fn shutdown(&self) {
        self.events.stop();
        self.scheduler.shutdown();
        info!("Task manager shut down");
    }
}
