//! Job worker that runs each invocation through an execution context.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bridge::callback::{CallbackCall, CallbackRegistry, CallbackReply, ProgressSender};
use crate::bridge::coordinator::Coordinator;
use crate::bridge::execution::{ActiveContexts, ExecutionContext};
use crate::codec::{self, CALLBACK_HANDLE_KEY, TASK_HANDLE_KEY, WorkData};
use crate::context::BridgeContext;
use crate::error::BridgeError;
use crate::scheduler::{JobWorker, WorkResult, WorkerContext};

/// Output key for a callback's own error message.
pub const RESULT_KEY: &str = "result";
/// Output key for diagnostics produced by the bridge itself.
pub const ERROR_KEY: &str = "error";

/// Runs jobs by booting a context, dispatching one call and awaiting it.
pub struct BridgeWorker {
    callbacks: Arc<CallbackRegistry>,
    coordinator: Coordinator,
    active: Arc<ActiveContexts>,
}

impl BridgeWorker {
    pub fn new(ctx: &BridgeContext) -> Self {
        Self {
            callbacks: Arc::clone(&ctx.callbacks),
            coordinator: ctx.coordinator.clone(),
            active: Arc::new(ActiveContexts::new()),
        }
    }

    /// Work ids with a live execution context.
    pub fn active_contexts(&self) -> &Arc<ActiveContexts> {
        &self.active
    }

    async fn invoke(&self, ctx: &WorkerContext) -> Result<CallbackReply, BridgeError> {
        let mut context = ExecutionContext::boot(
            &self.active,
            &self.coordinator,
            &self.callbacks,
            ctx.work_id,
            ctx.input.get_long(CALLBACK_HANDLE_KEY),
        )
        .await?;

        // Checked after boot; the context is torn down on return.
        let task_handle = ctx
            .input
            .get_long(TASK_HANDLE_KEY)
            .ok_or(BridgeError::MissingHandle {
                handle: TASK_HANDLE_KEY,
            })?;

        let call = CallbackCall {
            work_id: ctx.work_id,
            task_handle,
            args: codec::decode(&ctx.input, &[]),
        };
        let progress = ProgressSender::new(ctx.work_id, ctx.progress_sink());
        Ok(context.dispatch(call, progress).await)
    }
}

#[async_trait]
impl JobWorker for BridgeWorker {
    async fn do_work(&self, ctx: WorkerContext) -> WorkResult {
        let work_id = ctx.work_id;
        match self.invoke(&ctx).await {
            Ok(reply) => into_result(work_id, reply),
            Err(e) => {
                warn!(work_id = %work_id, error = %e, "Invocation failed before dispatch");
                failure(ERROR_KEY, e.to_string())
            }
        }
    }
}

fn into_result(work_id: Uuid, reply: CallbackReply) -> WorkResult {
    match reply {
        CallbackReply::Success(output) => match codec::encode_args(&output) {
            Ok(data) => {
                info!(work_id = %work_id, "Task succeeded");
                WorkResult::Success(data)
            }
            Err(e) => {
                warn!(work_id = %work_id, error = %e, "Task output could not be encoded");
                failure(ERROR_KEY, format!("output could not be encoded: {e}"))
            }
        },
        CallbackReply::Error {
            code,
            message,
            details,
        } => {
            info!(
                work_id = %work_id,
                code = code.as_deref().unwrap_or(""),
                message = message.as_deref().unwrap_or(""),
                details = ?details,
                "Task reported an error"
            );
            let text = message
                .or(code)
                .unwrap_or_else(|| "task reported an error".to_string());
            failure(RESULT_KEY, text)
        }
        CallbackReply::NotImplemented => {
            warn!(work_id = %work_id, "Entry point does not implement the call");
            failure(
                ERROR_KEY,
                "callback not implemented; check the entry point's handled call names",
            )
        }
        CallbackReply::DispatchFailed(reason) => {
            warn!(work_id = %work_id, reason = %reason, "Dispatch failed");
            failure(ERROR_KEY, reason)
        }
    }
}

fn failure(key: &str, message: impl Into<String>) -> WorkResult {
    let mut message: String = message.into();
    // Keep well inside the payload limit.
    if message.len() > 2048 {
        let mut cut = 2048;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    let mut data = WorkData::builder();
    data.put_string(key, message);
    WorkResult::Failure(data.build().unwrap_or_default())
}
