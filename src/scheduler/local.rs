//! In-process job scheduler backed by the `jobs` table.
//!
//! Jobs run on the tokio runtime, at most `max_parallel_jobs` at a time.
//! Every state or payload change bumps a version counter that drives live
//! queries. Rows left `Running` by a previous process are rescheduled on
//! `open` but only dispatched by `resume`, so observers can attach first.
//!
//! The in-memory table keeps every job for the life of the process, as the
//! `jobs` rows do on disk; terminal rows are needed for status queries and
//! for resolving unique-name chains.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use futures::{FutureExt, StreamExt};
use indexmap::IndexMap;
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::WorkData;
use crate::error::SchedulerError;
use crate::scheduler::job::{ExistingWorkPolicy, JobRecord, JobRequest, WorkInfo, WorkQuery, WorkResult};
use crate::scheduler::state::ExecutionState;
use crate::scheduler::{JobScheduler, JobWorker, LiveQuery, ProgressSink, WorkerContext};
use crate::store::Database;

type JobTable = IndexMap<Uuid, JobRecord>;

/// Persisted worker pool with unique-name chains.
pub struct LocalScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn Database>,
    worker: Arc<dyn JobWorker>,
    /// All known jobs in enqueue order. Held across persistence writes so
    /// row updates land in the same order as in-memory transitions.
    jobs: Mutex<JobTable>,
    /// Spawned run tasks, for cancellation.
    running: StdMutex<HashMap<Uuid, JoinHandle<()>>>,
    permits: Arc<Semaphore>,
    version: watch::Sender<u64>,
    next_seq: AtomicI64,
    shut_down: AtomicBool,
    /// Persisted jobs found runnable by `open`, waiting for `resume`.
    resumable: StdMutex<Vec<Uuid>>,
}

impl LocalScheduler {
    /// Load persisted jobs and reschedule interrupted ones. Nothing loaded
    /// here runs until [`resume`](Self::resume); new work runs immediately.
    pub async fn open(
        store: Arc<dyn Database>,
        worker: Arc<dyn JobWorker>,
        max_parallel_jobs: usize,
    ) -> Result<Self, SchedulerError> {
        let rows = store.load_jobs().await?;
        let next_seq = rows.iter().map(|j| j.seq).max().unwrap_or(0) + 1;
        let (version, _) = watch::channel(0u64);

        let inner = Arc::new(Inner {
            store,
            worker,
            jobs: Mutex::new(IndexMap::new()),
            running: StdMutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(max_parallel_jobs.max(1))),
            version,
            next_seq: AtomicI64::new(next_seq),
            shut_down: AtomicBool::new(false),
            resumable: StdMutex::new(Vec::new()),
        });

        let mut ready = Vec::new();
        {
            let mut jobs = inner.jobs.lock().await;
            for mut job in rows {
                if job.state == ExecutionState::Running {
                    job.transition_to(ExecutionState::Enqueued);
                    inner.store.update_job(&job).await?;
                    info!(work_id = %job.id, "Rescheduling interrupted job");
                }
                if job.state == ExecutionState::Enqueued {
                    ready.push(job.id);
                }
                jobs.insert(job.id, job);
            }

            // Prerequisites that finished while nothing was observing them.
            let finished: Vec<Uuid> = jobs
                .values()
                .filter(|j| j.state == ExecutionState::Blocked)
                .filter_map(|j| j.prerequisite)
                .filter(|p| jobs.get(p).is_some_and(|p| p.state.is_terminal()))
                .collect();
            for parent in finished {
                ready.extend(inner.settle_dependents(&mut jobs, parent).await?);
            }
        }

        if !ready.is_empty() {
            info!(count = ready.len(), "Persisted jobs waiting for resume");
        }
        *inner.resumable.lock().unwrap_or_else(PoisonError::into_inner) = ready;

        Ok(Self { inner })
    }

    /// Start dispatching the persisted jobs loaded by `open`. Later calls
    /// are no-ops.
    pub fn resume(&self) {
        let ready = std::mem::take(
            &mut *self
                .inner
                .resumable
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if ready.is_empty() {
            return;
        }
        info!(count = ready.len(), "Dispatching persisted jobs");
        for id in ready {
            self.inner.spawn_run(id);
        }
    }

    /// Stop dispatching and abort running jobs. Their rows stay `Running`
    /// and are rescheduled by the next `open`, as after a process crash.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.permits.close();
        let mut running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in running.drain() {
            handle.abort();
        }
        info!("Local scheduler shut down");
    }

    fn ensure_open(&self) -> Result<(), SchedulerError> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutDown);
        }
        Ok(())
    }
}

impl Inner {
    fn notify(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    fn next_seq(&self) -> i64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    async fn snapshot(&self, query: &WorkQuery) -> Vec<WorkInfo> {
        self.jobs
            .lock()
            .await
            .values()
            .map(JobRecord::info)
            .filter(|info| query.matches(info))
            .collect()
    }

    fn spawn_run(self: &Arc<Self>, id: Uuid) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        // Spawn while holding the map so the task cannot untrack itself
        // before it is tracked.
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move { inner.run_job(id).await });
        running.insert(id, handle);
    }

    fn untrack(&self, id: Uuid) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn abort_running(&self, ids: &[Uuid]) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            if let Some(handle) = running.remove(id) {
                handle.abort();
                debug!(work_id = %id, "Aborted running job");
            }
        }
    }

    async fn run_job(self: Arc<Self>, id: Uuid) {
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            self.untrack(id);
            return;
        };

        let ctx = {
            let mut jobs = self.jobs.lock().await;
            let Some(job) = jobs.get_mut(&id) else {
                self.untrack(id);
                return;
            };
            if !job.transition_to(ExecutionState::Running) {
                debug!(work_id = %id, state = %job.state, "Job no longer runnable");
                self.untrack(id);
                return;
            }
            job.run_attempt_count += 1;
            if let Err(e) = self.store.update_job(job).await {
                warn!(work_id = %id, error = %e, "Failed to persist job start");
            }
            let sink: Arc<dyn ProgressSink> = self.clone();
            WorkerContext::new(id, job.input.clone(), job.run_attempt_count, sink)
        };
        self.notify();
        debug!(work_id = %id, attempt = ctx.run_attempt_count, "Job started");

        let result = AssertUnwindSafe(self.worker.do_work(ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(work_id = %id, reason = %reason, "Job worker panicked");
                let mut data = WorkData::builder();
                data.put_string("error", format!("worker panicked: {reason}"));
                WorkResult::Failure(data.build().unwrap_or_default())
            });
        drop(permit);

        self.finish(id, result).await;
        self.untrack(id);
    }

    async fn finish(self: &Arc<Self>, id: Uuid, result: WorkResult) {
        let ready = {
            let mut jobs = self.jobs.lock().await;
            let Some(job) = jobs.get_mut(&id) else {
                return;
            };
            if job.state != ExecutionState::Running {
                debug!(work_id = %id, state = %job.state, "Discarding result of finished job");
                return;
            }
            let state = result.state();
            job.output = result.into_data();
            job.transition_to(state);
            if let Err(e) = self.store.update_job(job).await {
                warn!(work_id = %id, error = %e, "Failed to persist job result");
            }
            info!(work_id = %id, state = %state, "Job finished");

            match self.settle_dependents(&mut jobs, id).await {
                Ok(ready) => ready,
                Err(e) => {
                    warn!(work_id = %id, error = %e, "Failed to release dependent jobs");
                    Vec::new()
                }
            }
        };
        self.notify();
        for next in ready {
            self.spawn_run(next);
        }
    }

    /// Propagate a finished job's outcome to jobs blocked on it. Success
    /// releases them; failure and cancellation cascade down the chain.
    /// Returns jobs that became runnable.
    async fn settle_dependents(
        &self,
        jobs: &mut JobTable,
        finished: Uuid,
    ) -> Result<Vec<Uuid>, SchedulerError> {
        let mut ready = Vec::new();
        let mut stack = vec![finished];

        while let Some(parent_id) = stack.pop() {
            let Some(parent_state) = jobs.get(&parent_id).map(|j| j.state) else {
                continue;
            };
            let next = match parent_state {
                ExecutionState::Succeeded => ExecutionState::Enqueued,
                ExecutionState::Failed => ExecutionState::Failed,
                ExecutionState::Cancelled => ExecutionState::Cancelled,
                _ => continue,
            };
            let children: Vec<Uuid> = jobs
                .values()
                .filter(|j| j.state == ExecutionState::Blocked && j.prerequisite == Some(parent_id))
                .map(|j| j.id)
                .collect();

            for child_id in children {
                let Some(child) = jobs.get_mut(&child_id) else {
                    continue;
                };
                child.transition_to(next);
                self.store.update_job(child).await?;
                debug!(work_id = %child_id, prerequisite = %parent_id, state = %next, "Dependent job settled");
                if next == ExecutionState::Enqueued {
                    ready.push(child_id);
                } else {
                    stack.push(child_id);
                }
            }
        }
        Ok(ready)
    }

    /// Cancel unfinished jobs among `ids`. Returns the ids actually cancelled.
    async fn cancel_locked(
        &self,
        jobs: &mut JobTable,
        ids: &[Uuid],
    ) -> Result<Vec<Uuid>, SchedulerError> {
        let mut cancelled = Vec::new();
        for id in ids {
            let Some(job) = jobs.get_mut(id) else {
                continue;
            };
            if !job.transition_to(ExecutionState::Cancelled) {
                continue;
            }
            self.store.update_job(job).await?;
            info!(work_id = %id, "Job cancelled");
            cancelled.push(*id);
            self.settle_dependents(jobs, *id).await?;
        }
        Ok(cancelled)
    }

    async fn cancel(&self, ids: &[Uuid]) -> Result<(), SchedulerError> {
        let cancelled = {
            let mut jobs = self.jobs.lock().await;
            self.cancel_locked(&mut jobs, ids).await?
        };
        self.abort_running(&cancelled);
        if !cancelled.is_empty() {
            self.notify();
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressSink for Inner {
    async fn set_progress(&self, work_id: Uuid, progress: WorkData) -> Result<(), SchedulerError> {
        {
            let mut jobs = self.jobs.lock().await;
            let job = jobs
                .get_mut(&work_id)
                .ok_or(SchedulerError::NotFound { id: work_id })?;
            if job.state != ExecutionState::Running {
                debug!(work_id = %work_id, state = %job.state, "Ignoring progress for job not running");
                return Ok(());
            }
            job.progress = progress;
            job.updated_at = Utc::now();
            self.store.update_job(job).await?;
        }
        self.notify();
        Ok(())
    }
}

#[async_trait]
impl JobScheduler for LocalScheduler {
    async fn enqueue(&self, request: JobRequest) -> Result<Uuid, SchedulerError> {
        self.ensure_open()?;
        let id = Uuid::new_v4();
        let job = JobRecord::new(id, request, self.inner.next_seq());
        {
            let mut jobs = self.inner.jobs.lock().await;
            self.inner.store.insert_job(&job).await?;
            jobs.insert(id, job);
        }
        info!(work_id = %id, "Job enqueued");
        self.inner.notify();
        self.inner.spawn_run(id);
        Ok(id)
    }

    async fn enqueue_unique(
        &self,
        name: &str,
        policy: ExistingWorkPolicy,
        request: JobRequest,
    ) -> Result<Uuid, SchedulerError> {
        self.ensure_open()?;
        let id = Uuid::new_v4();
        let mut job = JobRecord::new(id, request, self.inner.next_seq());
        job.unique_name = Some(name.to_string());

        let (cancelled, runnable) = {
            let mut jobs = self.inner.jobs.lock().await;
            let chain: Vec<(Uuid, ExecutionState)> = jobs
                .values()
                .filter(|j| j.unique_name.as_deref() == Some(name))
                .map(|j| (j.id, j.state))
                .collect();
            let tail = chain.last().copied();

            let mut cancelled = Vec::new();
            match policy {
                ExistingWorkPolicy::Replace => {
                    let pending: Vec<Uuid> = chain
                        .iter()
                        .filter(|(_, s)| s.is_in_progress())
                        .map(|(id, _)| *id)
                        .collect();
                    cancelled = self.inner.cancel_locked(&mut jobs, &pending).await?;
                }
                ExistingWorkPolicy::Append => {
                    if let Some((tail_id, tail_state)) = tail
                        && tail_state != ExecutionState::Succeeded
                    {
                        job.prerequisite = Some(tail_id);
                        job.state = match tail_state {
                            ExecutionState::Failed => ExecutionState::Failed,
                            ExecutionState::Cancelled => ExecutionState::Cancelled,
                            _ => ExecutionState::Blocked,
                        };
                    }
                }
                ExistingWorkPolicy::AppendOrReplace => {
                    if let Some((tail_id, tail_state)) = tail
                        && tail_state.is_in_progress()
                    {
                        job.prerequisite = Some(tail_id);
                        job.state = ExecutionState::Blocked;
                    }
                }
            }

            self.inner.store.insert_job(&job).await?;
            let runnable = job.state == ExecutionState::Enqueued;
            info!(
                work_id = %id,
                unique_name = name,
                policy = ?policy,
                state = %job.state,
                "Unique job enqueued"
            );
            jobs.insert(id, job);
            (cancelled, runnable)
        };

        self.inner.abort_running(&cancelled);
        self.inner.notify();
        if runnable {
            self.inner.spawn_run(id);
        }
        Ok(id)
    }

    async fn get_work_infos(&self, query: &WorkQuery) -> Result<Vec<WorkInfo>, SchedulerError> {
        Ok(self.inner.snapshot(query).await)
    }

    fn watch(&self, query: WorkQuery) -> LiveQuery {
        let inner = Arc::clone(&self.inner);
        WatchStream::new(self.inner.version.subscribe())
            .then(move |_| {
                let inner = Arc::clone(&inner);
                let query = query.clone();
                async move { inner.snapshot(&query).await }
            })
            .boxed()
    }

    async fn cancel_work(&self, work_id: Uuid) -> Result<(), SchedulerError> {
        if !self.inner.jobs.lock().await.contains_key(&work_id) {
            return Err(SchedulerError::NotFound { id: work_id });
        }
        self.inner.cancel(&[work_id]).await
    }

    async fn cancel_unique_work(&self, name: &str) -> Result<(), SchedulerError> {
        let pending: Vec<Uuid> = self
            .inner
            .jobs
            .lock()
            .await
            .values()
            .filter(|j| j.unique_name.as_deref() == Some(name) && j.state.is_in_progress())
            .map(|j| j.id)
            .collect();
        self.inner.cancel(&pending).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::Notify;

    use crate::store::LibSqlBackend;

    /// Worker that echoes its input, records run order, and hangs on a
    /// `hang` input key until released.
    #[derive(Default)]
    struct TestWorker {
        order: StdMutex<Vec<i64>>,
        release: Notify,
    }

    #[async_trait]
    impl JobWorker for TestWorker {
        async fn do_work(&self, ctx: WorkerContext) -> WorkResult {
            if let Some(n) = ctx.input.get_long("n") {
                self.order.lock().unwrap().push(n);
            }
            if ctx.input.get_long("hang").is_some() {
                self.release.notified().await;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            if ctx.input.get_long("fail").is_some() {
                return WorkResult::Failure(WorkData::empty());
            }
            WorkResult::Success(ctx.input)
        }
    }

    fn input(pairs: &[(&str, i64)]) -> JobRequest {
        let mut b = WorkData::builder();
        for (k, v) in pairs {
            b.put_long(*k, *v);
        }
        JobRequest::new(b.build().unwrap())
    }

    async fn state_of(s: &LocalScheduler, id: Uuid) -> ExecutionState {
        s.get_work_infos(&WorkQuery::from_ids([id])).await.unwrap()[0].state
    }

    async fn wait_for_state(s: &LocalScheduler, id: Uuid, want: ExecutionState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if state_of(s, id).await == want {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("job {id} never reached {want}"));
    }

    async fn setup(worker: Arc<TestWorker>) -> (LocalScheduler, Arc<dyn Database>) {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let s = LocalScheduler::open(Arc::clone(&store), worker, 4).await.unwrap();
        (s, store)
    }

    #[tokio::test]
    async fn enqueue_runs_to_success() {
        let (s, _) = setup(Arc::new(TestWorker::default())).await;
        let id = s.enqueue(input(&[("n", 1)]).with_tag("t")).await.unwrap();
        wait_for_state(&s, id, ExecutionState::Succeeded).await;

        let info = &s.get_work_infos(&WorkQuery::from_tags(["t"])).await.unwrap()[0];
        assert_eq!(info.output.get_long("n"), Some(1));
        assert_eq!(info.run_attempt_count, 1);
    }

    #[tokio::test]
    async fn append_runs_fifo() {
        let worker = Arc::new(TestWorker::default());
        let (s, _) = setup(Arc::clone(&worker)).await;

        let mut ids = Vec::new();
        for n in 1..=3 {
            ids.push(
                s.enqueue_unique("chain", ExistingWorkPolicy::Append, input(&[("n", n)]))
                    .await
                    .unwrap(),
            );
        }
        for id in &ids {
            wait_for_state(&s, *id, ExecutionState::Succeeded).await;
        }
        assert_eq!(*worker.order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn replace_cancels_running_predecessor() {
        let worker = Arc::new(TestWorker::default());
        let (s, _) = setup(Arc::clone(&worker)).await;

        let a = s
            .enqueue_unique("sync", ExistingWorkPolicy::Replace, input(&[("hang", 1)]))
            .await
            .unwrap();
        wait_for_state(&s, a, ExecutionState::Running).await;
        let b = s
            .enqueue_unique("sync", ExistingWorkPolicy::Replace, input(&[("n", 2)]))
            .await
            .unwrap();

        wait_for_state(&s, b, ExecutionState::Succeeded).await;
        assert_eq!(state_of(&s, a).await, ExecutionState::Cancelled);
    }

    #[tokio::test]
    async fn append_after_failure_fails_but_append_or_replace_starts_fresh() {
        let (s, _) = setup(Arc::new(TestWorker::default())).await;

        let failed = s
            .enqueue_unique("c", ExistingWorkPolicy::Append, input(&[("fail", 1)]))
            .await
            .unwrap();
        wait_for_state(&s, failed, ExecutionState::Failed).await;

        let appended = s
            .enqueue_unique("c", ExistingWorkPolicy::Append, input(&[("n", 1)]))
            .await
            .unwrap();
        assert_eq!(state_of(&s, appended).await, ExecutionState::Failed);

        let fresh = s
            .enqueue_unique("c", ExistingWorkPolicy::AppendOrReplace, input(&[("n", 2)]))
            .await
            .unwrap();
        wait_for_state(&s, fresh, ExecutionState::Succeeded).await;
    }

    #[tokio::test]
    async fn cancelling_blocked_chain_cascades() {
        let worker = Arc::new(TestWorker::default());
        let (s, _) = setup(Arc::clone(&worker)).await;

        let head = s
            .enqueue_unique("c", ExistingWorkPolicy::Append, input(&[("hang", 1)]))
            .await
            .unwrap();
        let next = s
            .enqueue_unique("c", ExistingWorkPolicy::Append, input(&[("n", 1)]))
            .await
            .unwrap();
        assert_eq!(state_of(&s, next).await, ExecutionState::Blocked);

        s.cancel_work(head).await.unwrap();
        assert_eq!(state_of(&s, head).await, ExecutionState::Cancelled);
        assert_eq!(state_of(&s, next).await, ExecutionState::Cancelled);
        assert!(worker.order.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn watch_redelivers_full_snapshots() {
        let (s, _) = setup(Arc::new(TestWorker::default())).await;
        let mut live = s.watch(WorkQuery::from_states(ExecutionState::TERMINAL));

        let initial = live.next().await.unwrap();
        assert!(initial.is_empty());

        let id = s.enqueue(input(&[("n", 1)])).await.unwrap();
        wait_for_state(&s, id, ExecutionState::Succeeded).await;
        let second = s.enqueue(input(&[("n", 2)])).await.unwrap();
        wait_for_state(&s, second, ExecutionState::Succeeded).await;

        let latest = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snap = live.next().await.unwrap();
                if snap.len() == 2 {
                    return snap;
                }
            }
        })
        .await
        .unwrap();
        assert!(latest.iter().any(|i| i.id == id));
    }

    #[tokio::test]
    async fn interrupted_job_is_rescheduled_on_open() {
        let worker = Arc::new(TestWorker::default());
        let (s, store) = setup(Arc::clone(&worker)).await;
        let id = s.enqueue(input(&[("hang", 1)])).await.unwrap();
        wait_for_state(&s, id, ExecutionState::Running).await;
        s.shutdown();
        assert!(matches!(
            s.enqueue(JobRequest::default()).await,
            Err(SchedulerError::ShutDown)
        ));

        let mut p = WorkData::builder();
        p.put_long("pct", 40);
        s.inner.set_progress(id, p.build().unwrap()).await.unwrap();
        let reopened = LocalScheduler::open(store, Arc::new(TestWorker::default()), 4)
            .await
            .unwrap();

        // Loaded but parked until resume, with the old run's progress gone.
        let info = &reopened
            .get_work_infos(&WorkQuery::from_ids([id]))
            .await
            .unwrap()[0];
        assert_eq!(info.state, ExecutionState::Enqueued);
        assert!(info.progress.is_empty());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(state_of(&reopened, id).await, ExecutionState::Enqueued);

        reopened.resume();
        wait_for_state(&reopened, id, ExecutionState::Running).await;
        let info = &reopened
            .get_work_infos(&WorkQuery::from_ids([id]))
            .await
            .unwrap()[0];
        assert_eq!(info.run_attempt_count, 2);
        assert!(info.progress.is_empty());
    }

    #[tokio::test]
    async fn progress_only_while_running() {
        let worker = Arc::new(TestWorker::default());
        let (s, _) = setup(Arc::clone(&worker)).await;
        let id = s.enqueue(input(&[("hang", 1)])).await.unwrap();
        wait_for_state(&s, id, ExecutionState::Running).await;

        let mut p = WorkData::builder();
        p.put_long("pct", 10);
        s.inner.set_progress(id, p.build().unwrap()).await.unwrap();
        let info = &s.get_work_infos(&WorkQuery::from_ids([id])).await.unwrap()[0];
        assert_eq!(info.progress.get_long("pct"), Some(10));

        worker.release.notify_one();
        wait_for_state(&s, id, ExecutionState::Succeeded).await;
        let info = &s.get_work_infos(&WorkQuery::from_ids([id])).await.unwrap()[0];
        assert!(info.progress.is_empty());
    }
}
