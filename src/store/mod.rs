//! Persistence layer: libSQL-backed storage for the task registry and job rows.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, WorkRecord};
