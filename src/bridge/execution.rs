//! Isolated execution context: one per task invocation.
//!
//! A context is booted on the coordination thread, receives exactly one
//! dispatched call on its own tokio task, and is torn down when dropped.
//! Dropping covers every exit path, including the scheduler aborting the
//! invocation while boot is still running on the coordinator.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::bridge::callback::{
    CallbackCall, CallbackDispatcher, CallbackRegistry, CallbackReply, ProgressSender, Reply,
};
use crate::bridge::completion::Completer;
use crate::bridge::coordinator::Coordinator;
use crate::codec::CALLBACK_HANDLE_KEY;
use crate::error::BridgeError;

/// Work ids that currently own a live context.
#[derive(Debug, Default)]
pub struct ActiveContexts {
    ids: Mutex<HashSet<Uuid>>,
}

impl ActiveContexts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `work_id`; fails if a context is already active for it.
    pub fn claim(self: &Arc<Self>, work_id: Uuid) -> Result<ActiveGuard, BridgeError> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(work_id) {
            return Err(BridgeError::AlreadyActive { id: work_id });
        }
        Ok(ActiveGuard {
            owner: Arc::clone(self),
            work_id,
        })
    }

    pub fn is_active(&self, work_id: Uuid) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&work_id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the reservation on drop.
#[derive(Debug)]
pub struct ActiveGuard {
    owner: Arc<ActiveContexts>,
    work_id: Uuid,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.owner
            .ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.work_id);
    }
}

/// A booted entry point. Dropping it posts the entry point's teardown,
/// wherever that happens: inside the context, or on the coordinator when
/// the invocation went away while boot was still running.
struct Booted {
    work_id: Uuid,
    entry: Arc<dyn CallbackDispatcher>,
    coordinator: Coordinator,
}

impl Drop for Booted {
    fn drop(&mut self) {
        let entry = Arc::clone(&self.entry);
        let work_id = self.work_id;
        self.coordinator
            .post(move || async move { entry.teardown(work_id).await });
        debug!(work_id = %work_id, "Execution context torn down");
    }
}

/// A booted execution context.
pub struct ExecutionContext {
    work_id: Uuid,
    task: Option<JoinHandle<()>>,
    // Dropped after `task` is aborted in `Drop`.
    booted: Booted,
    _active: ActiveGuard,
}

impl ExecutionContext {
    /// Boot a context for `work_id`.
    ///
    /// Fails if a context is already active for the invocation, if no
    /// callback handle was supplied, or if the handle does not resolve.
    pub async fn boot(
        active: &Arc<ActiveContexts>,
        coordinator: &Coordinator,
        callbacks: &Arc<CallbackRegistry>,
        work_id: Uuid,
        callback_handle: Option<i64>,
    ) -> Result<Self, BridgeError> {
        let guard = active.claim(work_id)?;
        let handle = callback_handle.ok_or(BridgeError::MissingHandle {
            handle: CALLBACK_HANDLE_KEY,
        })?;

        let callbacks = Arc::clone(callbacks);
        let owner = coordinator.clone();
        let booted = coordinator
            .run(move || async move {
                let entry = callbacks
                    .resolve(handle)
                    .await
                    .ok_or(BridgeError::UnknownCallback { handle })?;
                entry.boot(work_id).await.map_err(BridgeError::Boot)?;
                Ok::<_, BridgeError>(Booted {
                    work_id,
                    entry,
                    coordinator: owner,
                })
            })
            .await??;

        debug!(work_id = %work_id, callback_handle = handle, "Execution context booted");
        Ok(Self {
            work_id,
            task: None,
            booted,
            _active: guard,
        })
    }

    pub fn work_id(&self) -> Uuid {
        self.work_id
    }

    /// Deliver the single call and wait for its answer. There is no
    /// timeout; the wait ends when the entry point answers, crashes, or
    /// drops every reply handle.
    pub async fn dispatch(&mut self, call: CallbackCall, progress: ProgressSender) -> CallbackReply {
        if self.task.is_some() {
            return CallbackReply::DispatchFailed(format!(
                "execution context for {} already dispatched",
                self.work_id
            ));
        }

        let (completer, completion) = Completer::new();
        let reply = Reply::new(completer);
        let entry = Arc::clone(&self.booted.entry);
        let task_handle = call.task_handle;

        self.task = Some(tokio::spawn(async move {
            let outcome = AssertUnwindSafe(entry.execute(call, reply.clone(), progress))
                .catch_unwind()
                .await;
            if let Err(panic) = outcome {
                reply.dispatch_failed(format!("entry point panicked: {}", panic_message(&*panic)));
            }
        }));
        debug!(work_id = %self.work_id, task_handle, "Dispatched callback");

        completion.await.unwrap_or_else(|_| {
            CallbackReply::DispatchFailed("entry point finished without answering".to_string())
        })
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::codec::{Args, TypedValue, WorkData};
    use crate::error::SchedulerError;
    use crate::scheduler::ProgressSink;

    #[derive(Default)]
    struct Recorder {
        booted: AtomicUsize,
        torn_down: AtomicUsize,
    }

    /// Behaviour is picked by the task handle.
    #[async_trait]
    impl CallbackDispatcher for Recorder {
        async fn boot(&self, _work_id: Uuid) -> Result<(), String> {
            self.booted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn execute(&self, call: CallbackCall, reply: Reply, _progress: ProgressSender) {
            match call.task_handle {
                1 => {
                    reply.success(call.args);
                }
                2 => panic!("callback blew up"),
                3 => {}
                4 => {
                    reply.success(Args::new());
                    reply.error(None, Some("too late".into()), None);
                }
                _ => {
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        reply.not_implemented();
                    });
                }
            }
        }

        async fn teardown(&self, _work_id: Uuid) {
            self.torn_down.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NullSink;

    #[async_trait]
    impl ProgressSink for NullSink {
        async fn set_progress(&self, _id: Uuid, _p: WorkData) -> Result<(), SchedulerError> {
            Ok(())
        }
    }

    struct Harness {
        active: Arc<ActiveContexts>,
        coordinator: Coordinator,
        callbacks: Arc<CallbackRegistry>,
        recorder: Arc<Recorder>,
    }

    async fn harness() -> Harness {
        let recorder = Arc::new(Recorder::default());
        let callbacks = Arc::new(CallbackRegistry::new());
        callbacks.register(10, recorder.clone()).await;
        Harness {
            active: Arc::new(ActiveContexts::new()),
            coordinator: Coordinator::start().unwrap(),
            callbacks,
            recorder,
        }
    }

    async fn run(h: &Harness, task_handle: i64, args: Args) -> CallbackReply {
        let work_id = Uuid::new_v4();
        let mut ctx = ExecutionContext::boot(&h.active, &h.coordinator, &h.callbacks, work_id, Some(10))
            .await
            .unwrap();
        let call = CallbackCall {
            work_id,
            task_handle,
            args,
        };
        ctx.dispatch(call, ProgressSender::new(work_id, Arc::new(NullSink)))
            .await
    }

    async fn wait_for_teardowns(h: &Harness, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while h.recorder.torn_down.load(Ordering::SeqCst) < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn success_round_trip_and_teardown() {
        let h = harness().await;
        let mut args = Args::new();
        args.insert("count".into(), TypedValue::Int(5));

        let reply = run(&h, 1, args.clone()).await;
        assert_eq!(reply, CallbackReply::Success(args));
        assert_eq!(h.recorder.booted.load(Ordering::SeqCst), 1);
        wait_for_teardowns(&h, 1).await;
        assert!(h.active.is_empty());
    }

    #[tokio::test]
    async fn panic_resolves_as_dispatch_failure() {
        let h = harness().await;
        match run(&h, 2, Args::new()).await {
            CallbackReply::DispatchFailed(reason) => assert!(reason.contains("callback blew up")),
            other => panic!("unexpected reply {other:?}"),
        }
        wait_for_teardowns(&h, 1).await;
    }

    #[tokio::test]
    async fn missing_answer_is_a_failure_not_a_hang() {
        let h = harness().await;
        assert!(matches!(
            run(&h, 3, Args::new()).await,
            CallbackReply::DispatchFailed(_)
        ));
    }

    #[tokio::test]
    async fn first_answer_wins_and_late_answers_work() {
        let h = harness().await;
        assert_eq!(run(&h, 4, Args::new()).await, CallbackReply::Success(Args::new()));
        assert_eq!(run(&h, 99, Args::new()).await, CallbackReply::NotImplemented);
    }

    #[tokio::test]
    async fn double_boot_is_rejected() {
        let h = harness().await;
        let work_id = Uuid::new_v4();
        let _first = ExecutionContext::boot(&h.active, &h.coordinator, &h.callbacks, work_id, Some(10))
            .await
            .unwrap();
        let second =
            ExecutionContext::boot(&h.active, &h.coordinator, &h.callbacks, work_id, Some(10)).await;
        assert!(matches!(second, Err(BridgeError::AlreadyActive { .. })));
    }

    /// Boot parks until released.
    #[derive(Default)]
    struct SlowBoot {
        started: Notify,
        release: Notify,
        torn_down: AtomicUsize,
    }

    #[async_trait]
    impl CallbackDispatcher for SlowBoot {
        async fn boot(&self, _work_id: Uuid) -> Result<(), String> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(())
        }

        async fn execute(&self, _call: CallbackCall, reply: Reply, _progress: ProgressSender) {
            reply.success(Args::new());
        }

        async fn teardown(&self, _work_id: Uuid) {
            self.torn_down.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn invocation_aborted_during_boot_still_tears_down() {
        let h = harness().await;
        let slow = Arc::new(SlowBoot::default());
        h.callbacks.register(20, slow.clone()).await;

        let (active, coordinator, callbacks) =
            (Arc::clone(&h.active), h.coordinator.clone(), Arc::clone(&h.callbacks));
        let invocation = tokio::spawn(async move {
            ExecutionContext::boot(&active, &coordinator, &callbacks, Uuid::new_v4(), Some(20))
                .await
                .map(|_| ())
        });
        slow.started.notified().await;
        invocation.abort();
        assert!(invocation.await.unwrap_err().is_cancelled());

        slow.release.notify_one();
        tokio::time::timeout(Duration::from_secs(5), async {
            while slow.torn_down.load(Ordering::SeqCst) < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(h.active.is_empty());
    }

    #[tokio::test]
    async fn boot_guards() {
        let h = harness().await;
        let missing =
            ExecutionContext::boot(&h.active, &h.coordinator, &h.callbacks, Uuid::new_v4(), None).await;
        assert!(matches!(missing, Err(BridgeError::MissingHandle { .. })));

        let unknown =
            ExecutionContext::boot(&h.active, &h.coordinator, &h.callbacks, Uuid::new_v4(), Some(11))
                .await;
        assert!(matches!(unknown, Err(BridgeError::UnknownCallback { handle: 11 })));
        assert!(h.active.is_empty());
    }
}
