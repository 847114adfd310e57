//! Event multiplexer: scheduler snapshots in, task events out.
//!
//! Live queries redeliver the full matching set on every change, so the
//! multiplexer keeps two pieces of state: the set of work ids already
//! reported terminal (never emitted again) and the last progress payload
//! emitted per work id (identical redeliveries are skipped). Batches are
//! processed under one lock, so the listeners and `reconcile` never race
//! each other into duplicate emissions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::WorkData;
use crate::error::{Error, SchedulerError};
use crate::events::{TaskEvent, TaskSummary};
use crate::registry::{TaskInfo, TaskRegistry};
use crate::scheduler::{ExecutionState, JobScheduler, LiveQuery, WorkInfo, WorkQuery};

#[derive(Default)]
struct MuxState {
    finished: HashSet<Uuid>,
    last_progress: HashMap<Uuid, WorkData>,
}

struct Inner {
    scheduler: Arc<dyn JobScheduler>,
    registry: TaskRegistry,
    progress_tx: broadcast::Sender<TaskEvent>,
    result_tx: broadcast::Sender<TaskEvent>,
    state: Mutex<MuxState>,
    evict_on_terminal: bool,
}

/// Republishes scheduler state as progress and result events.
pub struct EventMultiplexer {
    inner: Arc<Inner>,
    listeners: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl EventMultiplexer {
    pub fn new(
        scheduler: Arc<dyn JobScheduler>,
        registry: TaskRegistry,
        capacity: usize,
        evict_on_terminal: bool,
    ) -> Self {
        let (progress_tx, _) = broadcast::channel(capacity.max(1));
        let (result_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                scheduler,
                registry,
                progress_tx,
                result_tx,
                state: Mutex::new(MuxState::default()),
                evict_on_terminal,
            }),
            listeners: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Attach listeners for in-progress and terminal states.
    ///
    /// Work already terminal at this point is treated as reported.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.seed(&WorkQuery::from_states(ExecutionState::TERMINAL))
            .await?;
        let in_progress = self
            .inner
            .scheduler
            .watch(WorkQuery::from_states(ExecutionState::IN_PROGRESS));
        let terminal = self
            .inner
            .scheduler
            .watch(WorkQuery::from_states(ExecutionState::TERMINAL));
        self.listen("in_progress", in_progress);
        self.listen("terminal", terminal);
        info!("Event multiplexer listening");
        Ok(())
    }

    /// Attach one self-filtering listener for work under a unique name.
    pub async fn start_unique(&self, name: &str) -> Result<(), SchedulerError> {
        let query = WorkQuery::from_unique_work_names([name]);
        self.seed(&WorkQuery {
            states: ExecutionState::TERMINAL.to_vec(),
            ..query.clone()
        })
        .await?;
        let stream = self.inner.scheduler.watch(query);
        self.listen("unique", stream);
        info!(unique_name = name, "Event multiplexer listening");
        Ok(())
    }

    /// Abort the listeners. Subscribers stay attached but receive nothing
    /// further.
    pub fn stop(&self) {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for handle in listeners.drain(..) {
            handle.abort();
        }
    }

    /// Push the current state of every job through the emit path once.
    /// Called after a registry record lands, since the job may have changed
    /// state before it was resolvable.
    pub async fn reconcile(&self) -> Result<(), SchedulerError> {
        let batch = self.inner.scheduler.get_work_infos(&WorkQuery::all()).await?;
        self.inner.process(batch).await;
        Ok(())
    }

    pub fn subscribe_progress(&self) -> BoxStream<'static, TaskEvent> {
        subscribe(&self.inner.progress_tx, "progress")
    }

    pub fn subscribe_results(&self) -> BoxStream<'static, TaskEvent> {
        subscribe(&self.inner.result_tx, "result")
    }

    /// Resolvable work in any of `states`. An empty set yields nothing.
    pub async fn query_by_status(
        &self,
        states: &[ExecutionState],
    ) -> Result<Vec<TaskSummary>, Error> {
        if states.is_empty() {
            return Ok(Vec::new());
        }
        self.query(&WorkQuery::from_states(states.iter().copied()))
            .await
    }

    /// Like [`query_by_status`](Self::query_by_status), with state names
    /// (case-insensitive wire names).
    pub async fn query_by_status_names<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<Vec<TaskSummary>, Error> {
        let states: Vec<ExecutionState> = ExecutionState::parse_set(names)?.into_iter().collect();
        self.query_by_status(&states).await
    }

    pub async fn query_by_tag(&self, tag: &str) -> Result<Vec<TaskSummary>, Error> {
        self.query(&WorkQuery::from_tags([tag])).await
    }

    pub async fn query_by_unique_work_name(&self, name: &str) -> Result<Vec<TaskSummary>, Error> {
        self.query(&WorkQuery::from_unique_work_names([name])).await
    }

    async fn query(&self, query: &WorkQuery) -> Result<Vec<TaskSummary>, Error> {
        let infos = self.inner.scheduler.get_work_infos(query).await?;
        let mut rows = Vec::with_capacity(infos.len());
        for info in infos {
            if let Some(task) = self.inner.resolve(info.id).await {
                rows.push(TaskEvent::summary(&info, task));
            }
        }
        Ok(rows)
    }

    async fn seed(&self, query: &WorkQuery) -> Result<(), SchedulerError> {
        let done = self.inner.scheduler.get_work_infos(query).await?;
        let mut state = self.inner.state.lock().await;
        state.finished.extend(done.iter().map(|i| i.id));
        debug!(count = done.len(), "Seeded finished work");
        Ok(())
    }

    fn listen(&self, name: &'static str, mut stream: LiveQuery) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(batch) = stream.next().await {
                inner.process(batch).await;
            }
            debug!(listener = name, "Live query ended");
        });
        self.listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(handle);
    }
}

impl Drop for EventMultiplexer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    async fn resolve(&self, work_id: Uuid) -> Option<TaskInfo> {
        match self.registry.lookup_by_work_id(work_id).await {
            Ok(task) => task,
            Err(e) => {
                warn!(work_id = %work_id, error = %e, "Registry lookup failed");
                None
            }
        }
    }

    async fn process(&self, batch: Vec<WorkInfo>) {
        let mut state = self.state.lock().await;

        for info in batch {
            if state.finished.contains(&info.id) {
                continue;
            }

            if info.state.is_in_progress() {
                if info.progress.is_empty()
                    || state.last_progress.get(&info.id) == Some(&info.progress)
                {
                    continue;
                }
                let Some(task) = self.resolve(info.id).await else {
                    continue;
                };
                state.last_progress.insert(info.id, info.progress.clone());
                debug!(work_id = %info.id, status = %info.state, "Emitting progress");
                let _ = self.progress_tx.send(TaskEvent::progress(&info, task));
                continue;
            }

            // Unresolvable terminal work stays eligible; its record may
            // land after the state change.
            let Some(task) = self.resolve(info.id).await else {
                continue;
            };
            state.finished.insert(info.id);
            state.last_progress.remove(&info.id);

            if !info.output.is_empty() {
                debug!(work_id = %info.id, status = %info.state, "Emitting result");
                let _ = self.result_tx.send(TaskEvent::result(&info, task));
            }

            // An evicted record no longer resolves, so redelivered snapshots
            // are dropped without the finished entry.
            if self.evict_on_terminal {
                match self.registry.forget(info.id).await {
                    Ok(_) => {
                        state.finished.remove(&info.id);
                    }
                    Err(e) => {
                        warn!(work_id = %info.id, error = %e, "Failed to evict registry record");
                    }
                }
            }
        }
    }
}

fn subscribe(tx: &broadcast::Sender<TaskEvent>, channel: &'static str) -> BoxStream<'static, TaskEvent> {
    BroadcastStream::new(tx.subscribe())
        .filter_map(move |item| async move {
            match item {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    warn!(channel, missed = n, "Event subscriber lagged");
                    None
                }
            }
        })
        .boxed()
}
