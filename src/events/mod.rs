//! Task events and the multiplexer that produces them.

pub mod multiplexer;

use serde::Serialize;
use uuid::Uuid;

use crate::codec::{self, Args};
use crate::registry::TaskInfo;
use crate::scheduler::{ExecutionState, WorkInfo};

pub use multiplexer::EventMultiplexer;

/// A progress or result notification, or a query row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    #[serde(skip)]
    pub work_id: Uuid,
    pub task_id: Option<String>,
    pub tag: Option<String>,
    pub status: ExecutionState,
    /// Decoded progress while in progress, decoded output once terminal.
    pub event: Args,
}

/// Query rows share the event shape.
pub type TaskSummary = TaskEvent;

impl TaskEvent {
    pub(crate) fn progress(info: &WorkInfo, task: TaskInfo) -> Self {
        Self::with_payload(info, task, codec::decode(&info.progress, &[]))
    }

    pub(crate) fn result(info: &WorkInfo, task: TaskInfo) -> Self {
        Self::with_payload(info, task, codec::decode(&info.output, &[]))
    }

    /// Payload picked by state.
    pub(crate) fn summary(info: &WorkInfo, task: TaskInfo) -> Self {
        if info.state.is_terminal() {
            Self::result(info, task)
        } else {
            Self::progress(info, task)
        }
    }

    fn with_payload(info: &WorkInfo, task: TaskInfo, event: Args) -> Self {
        Self {
            work_id: info.id,
            task_id: task.task_id,
            tag: task.tag,
            status: info.state,
            event,
        }
    }
}
