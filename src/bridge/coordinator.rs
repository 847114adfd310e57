//! Coordination thread for execution-context boot and teardown.
//!
//! Boot must be issued from one designated thread but awaited without
//! blocking it. The coordinator owns a dedicated OS thread running a
//! current-thread runtime with a `LocalSet`; callers hand closures over an
//! unbounded channel and await their output through a oneshot.

use std::future::Future;
use std::thread;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;
use tracing::{debug, error};

use crate::error::BridgeError;

/// Name of the coordinator's OS thread.
pub const COORDINATOR_THREAD_NAME: &str = "task-bridge-coordinator";

type Job = Box<dyn FnOnce() -> LocalBoxFuture<'static, ()> + Send>;

/// Handle to the coordination thread. The thread exits once every handle
/// is dropped.
#[derive(Debug, Clone)]
pub struct Coordinator {
    tx: mpsc::UnboundedSender<Job>,
}

impl Coordinator {
    /// Spawn the coordination thread.
    pub fn start() -> Result<Self, BridgeError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BridgeError::Boot(format!("coordinator runtime: {e}")))?;

        thread::Builder::new()
            .name(COORDINATOR_THREAD_NAME.to_string())
            .spawn(move || {
                let local = LocalSet::new();
                local.block_on(&runtime, async move {
                    while let Some(job) = rx.recv().await {
                        tokio::task::spawn_local(job());
                    }
                });
                debug!("Coordinator thread exiting");
            })
            .map_err(|e| BridgeError::Boot(format!("coordinator thread: {e}")))?;

        Ok(Self { tx })
    }

    /// Run `f` on the coordination thread and await its output.
    ///
    /// The future produced by `f` runs on the coordinator's `LocalSet`, so it
    /// need not be `Send`; it must not block.
    pub async fn run<F, Fut, T>(&self, f: F) -> Result<T, BridgeError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            async move {
                let _ = done_tx.send(f().await);
            }
            .boxed_local()
        });
        self.tx.send(job).map_err(|_| BridgeError::CoordinatorGone)?;
        done_rx.await.map_err(|_| BridgeError::CoordinatorGone)
    }

    /// Fire-and-forget variant of [`run`](Self::run).
    pub fn post<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let job: Job = Box::new(move || f().boxed_local());
        if self.tx.send(job).is_err() {
            error!("Coordinator thread is gone; dropping posted task");
        }
    }
}
