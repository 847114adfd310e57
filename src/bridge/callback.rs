//! Callback entry points and the handles they are invoked with.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::bridge::completion::Completer;
use crate::codec::{self, Args};
use crate::error::Result;
use crate::scheduler::ProgressSink;

/// One `executeCallback` call delivered into an execution context.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackCall {
    pub work_id: Uuid,
    pub task_handle: i64,
    pub args: Args,
}

/// How a callback answered its call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackReply {
    Success(Args),
    Error {
        code: Option<String>,
        message: Option<String>,
        details: Option<serde_json::Value>,
    },
    NotImplemented,
    /// The call could not be delivered or the entry point crashed.
    DispatchFailed(String),
}

/// Answer handle given to the entry point. Clones share one completion; the
/// first answer wins.
#[derive(Clone)]
pub struct Reply {
    completer: Arc<Completer<CallbackReply>>,
}

impl Reply {
    pub(crate) fn new(completer: Completer<CallbackReply>) -> Self {
        Self {
            completer: Arc::new(completer),
        }
    }

    pub fn success(&self, output: Args) -> bool {
        self.resolve(CallbackReply::Success(output))
    }

    pub fn error(
        &self,
        code: Option<String>,
        message: Option<String>,
        details: Option<serde_json::Value>,
    ) -> bool {
        self.resolve(CallbackReply::Error {
            code,
            message,
            details,
        })
    }

    pub fn not_implemented(&self) -> bool {
        self.resolve(CallbackReply::NotImplemented)
    }

    pub(crate) fn dispatch_failed(&self, reason: impl Into<String>) -> bool {
        self.resolve(CallbackReply::DispatchFailed(reason.into()))
    }

    /// `true` until the call has been answered.
    pub fn is_active(&self) -> bool {
        self.completer.is_active()
    }

    fn resolve(&self, reply: CallbackReply) -> bool {
        let accepted = self.completer.complete(reply);
        if !accepted {
            tracing::debug!("Ignoring reply to an already answered call");
        }
        accepted
    }
}

/// Progress channel from an execution context to the scheduler.
#[derive(Clone)]
pub struct ProgressSender {
    work_id: Uuid,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressSender {
    pub fn new(work_id: Uuid, sink: Arc<dyn ProgressSink>) -> Self {
        Self { work_id, sink }
    }

    /// Encode `progress` and publish it on the job's progress channel.
    pub async fn send(&self, progress: &Args) -> Result<()> {
        let data = codec::encode_args(progress)?;
        self.sink.set_progress(self.work_id, data).await?;
        Ok(())
    }
}

/// Top-level entry point a callback handle resolves to.
#[async_trait]
pub trait CallbackDispatcher: Send + Sync {
    /// Prepare the context. Runs on the coordination thread.
    async fn boot(&self, _work_id: Uuid) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Handle one call. Answer through `reply` exactly once; the call may
    /// also be answered later from another task holding a clone.
    async fn execute(&self, call: CallbackCall, reply: Reply, progress: ProgressSender);

    /// Release context resources. Runs on the coordination thread.
    async fn teardown(&self, _work_id: Uuid) {}
}

/// Resolves callback handles to entry points.
#[derive(Default)]
pub struct CallbackRegistry {
    entries: RwLock<HashMap<i64, Arc<dyn CallbackDispatcher>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry point, replacing any previous one under `handle`.
    pub async fn register(&self, handle: i64, dispatcher: Arc<dyn CallbackDispatcher>) {
        if self
            .entries
            .write()
            .await
            .insert(handle, dispatcher)
            .is_some()
        {
            tracing::warn!(handle, "Replaced callback entry point");
        } else {
            tracing::debug!(handle, "Registered callback entry point");
        }
    }

    pub async fn unregister(&self, handle: i64) -> Option<Arc<dyn CallbackDispatcher>> {
        self.entries.write().await.remove(&handle)
    }

    pub async fn resolve(&self, handle: i64) -> Option<Arc<dyn CallbackDispatcher>> {
        self.entries.read().await.get(&handle).cloned()
    }

    pub async fn handles(&self) -> Vec<i64> {
        let mut handles: Vec<i64> = self.entries.read().await.keys().copied().collect();
        handles.sort_unstable();
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl CallbackDispatcher for Noop {
        async fn execute(&self, _call: CallbackCall, reply: Reply, _progress: ProgressSender) {
            reply.not_implemented();
        }
    }

    #[tokio::test]
    async fn register_and_resolve() {
        let registry = CallbackRegistry::new();
        registry.register(7, Arc::new(Noop)).await;
        registry.register(3, Arc::new(Noop)).await;

        assert!(registry.resolve(7).await.is_some());
        assert!(registry.resolve(8).await.is_none());
        assert_eq!(registry.handles().await, vec![3, 7]);

        assert!(registry.unregister(7).await.is_some());
        assert!(registry.resolve(7).await.is_none());
    }

    #[tokio::test]
    async fn reply_clones_share_one_answer() {
        let (completer, rx) = Completer::new();
        let reply = Reply::new(completer);
        let other = reply.clone();

        assert!(other.error(Some("E".into()), Some("boom".into()), None));
        assert!(!reply.success(Args::new()));
        assert!(!reply.is_active());
        assert!(matches!(rx.await.unwrap(), CallbackReply::Error { .. }));
    }
}
