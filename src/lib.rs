//! Task Bridge: background task execution with persisted task identity.

pub mod bridge;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod manager;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use bridge::{
    CallbackCall, CallbackDispatcher, CallbackRegistry, ProgressSender, Reply, TaskSubmission,
};
pub use codec::{Args, TypedValue};
pub use config::BridgeConfig;
pub use error::{Error, Result};
pub use events::{TaskEvent, TaskSummary};
pub use manager::TaskManager;
pub use scheduler::{ExecutionState, ExistingWorkPolicy};
