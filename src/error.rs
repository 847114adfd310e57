//! Error types for the task bridge.

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

impl Error {
    /// Short, stable code for reporting a boundary failure to the caller.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Database(_) => "storage",
            Self::Submit(e) => e.code(),
            Self::Codec(_) => "codec",
            Self::Scheduler(_) => "scheduler",
            Self::Bridge(_) => "bridge",
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Rejections raised synchronously by `submit` before the scheduler is touched.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Missing {handle}; task could not be queued")]
    MissingHandle { handle: &'static str },

    #[error("Task id must not be empty")]
    EmptyTaskId,

    #[error("Unique work name must not be empty")]
    EmptyUniqueName,

    #[error("Unknown execution state: {0}")]
    UnknownState(String),
}

impl SubmitError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingHandle { .. } => "invalid_handle",
            Self::EmptyTaskId => "invalid_task_id",
            Self::EmptyUniqueName => "invalid_unique_name",
            Self::UnknownState(_) => "invalid_status",
        }
    }
}

/// Failures converting between typed values and the primitive payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("Field {field}: unsupported type tag {tag:?}")]
    UnsupportedTag { field: String, tag: String },

    #[error("Field {field}: value does not match declared type {tag}")]
    Mismatch { field: String, tag: String },

    #[error("Field {field}: expected a {{platformKey, value}} object")]
    Malformed { field: String },

    #[error("Field {field} is reserved for control data")]
    ReservedKey { field: String },

    #[error("Payload too large: {size} bytes > {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Field {field}: doubles must be finite")]
    NonFinite { field: String },
}

/// Job scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Work {id} not found")]
    NotFound { id: Uuid },

    #[error("Scheduler is shut down")]
    ShutDown,

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Per-invocation failures inside the execution bridge.
///
/// These never cross the `submit` boundary; the worker encodes them into the
/// job's failure payload.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Execution context already active for work {id}")]
    AlreadyActive { id: Uuid },

    #[error("Missing {handle} in job input")]
    MissingHandle { handle: &'static str },

    #[error("No entry point registered for callback handle {handle}")]
    UnknownCallback { handle: i64 },

    #[error("Execution context failed to boot: {0}")]
    Boot(String),

    #[error("Coordinator thread is gone")]
    CoordinatorGone,
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_codes() {
        let err: Error = SubmitError::MissingHandle {
            handle: "callbackHandle",
        }
        .into();
        assert_eq!(err.code(), "invalid_handle");
        assert!(err.to_string().contains("callbackHandle"));

        let err: Error = CodecError::UnsupportedTag {
            field: "x".into(),
            tag: "Map".into(),
        }
        .into();
        assert_eq!(err.code(), "codec");
    }
}
