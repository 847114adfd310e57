//! Job requests, persisted job rows and query filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::WorkData;
use crate::scheduler::state::ExecutionState;

/// How a unique-name submission interacts with work already queued under
/// that name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingWorkPolicy {
    /// Run after everything currently queued under the name (FIFO). If the
    /// predecessor fails or is cancelled, the new work inherits that outcome.
    Append,
    /// Cancel everything under the name and start the new work fresh.
    Replace,
    /// Append while the chain is still pending; otherwise start a fresh chain.
    AppendOrReplace,
}

/// A one-time job to enqueue.
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    pub input: WorkData,
    pub tags: Vec<String>,
}

impl JobRequest {
    pub fn new(input: WorkData) -> Self {
        Self {
            input,
            tags: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Persisted job row owned by the local scheduler.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: Uuid,
    pub state: ExecutionState,
    pub input: WorkData,
    pub progress: WorkData,
    pub output: WorkData,
    pub tags: Vec<String>,
    pub unique_name: Option<String>,
    /// Job that must finish before this one leaves `Blocked`.
    pub prerequisite: Option<Uuid>,
    pub run_attempt_count: u32,
    /// Enqueue order; assigned by the scheduler.
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(id: Uuid, request: JobRequest, seq: i64) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: ExecutionState::Enqueued,
            input: request.input,
            progress: WorkData::empty(),
            output: WorkData::empty(),
            tags: request.tags,
            unique_name: None,
            prerequisite: None,
            run_attempt_count: 0,
            seq,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `target` if the transition is allowed. Progress belongs to a
    /// single run, so every transition discards it.
    pub fn transition_to(&mut self, target: ExecutionState) -> bool {
        if !self.state.can_transition_to(target) {
            return false;
        }
        self.state = target;
        self.updated_at = Utc::now();
        self.progress = WorkData::empty();
        true
    }

    pub fn info(&self) -> WorkInfo {
        WorkInfo {
            id: self.id,
            state: self.state,
            tags: self.tags.clone(),
            unique_name: self.unique_name.clone(),
            progress: self.progress.clone(),
            output: self.output.clone(),
            run_attempt_count: self.run_attempt_count,
        }
    }
}

/// Snapshot of one job as seen by observers.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkInfo {
    pub id: Uuid,
    pub state: ExecutionState,
    pub tags: Vec<String>,
    pub unique_name: Option<String>,
    pub progress: WorkData,
    pub output: WorkData,
    pub run_attempt_count: u32,
}

/// Filter over jobs. Empty criteria match everything; criteria are ANDed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkQuery {
    pub ids: Vec<Uuid>,
    pub states: Vec<ExecutionState>,
    pub tags: Vec<String>,
    pub unique_names: Vec<String>,
}

impl WorkQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn from_states(states: impl IntoIterator<Item = ExecutionState>) -> Self {
        Self {
            states: states.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn from_tags(tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn from_unique_work_names(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            unique_names: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn from_ids(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn matches(&self, info: &WorkInfo) -> bool {
        (self.ids.is_empty() || self.ids.contains(&info.id))
            && (self.states.is_empty() || self.states.contains(&info.state))
            && (self.tags.is_empty() || info.tags.iter().any(|t| self.tags.contains(t)))
            && (self.unique_names.is_empty()
                || info
                    .unique_name
                    .as_ref()
                    .is_some_and(|n| self.unique_names.contains(n)))
    }
}

/// Terminal outcome reported by a job worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkResult {
    Success(WorkData),
    Failure(WorkData),
}

impl WorkResult {
    pub fn state(&self) -> ExecutionState {
        match self {
            Self::Success(_) => ExecutionState::Succeeded,
            Self::Failure(_) => ExecutionState::Failed,
        }
    }

    pub fn data(&self) -> &WorkData {
        match self {
            Self::Success(d) | Self::Failure(d) => d,
        }
    }

    pub fn into_data(self) -> WorkData {
        match self {
            Self::Success(d) | Self::Failure(d) => d,
        }
    }
}
