//! Shared environment handle passed into bridge components.

use std::sync::Arc;

use crate::bridge::callback::CallbackRegistry;
use crate::bridge::coordinator::Coordinator;
use crate::error::BridgeError;
use crate::registry::TaskRegistry;
use crate::store::Database;

/// Dependencies every bridge component is built from. Cheap to clone.
#[derive(Clone)]
pub struct BridgeContext {
    pub db: Arc<dyn Database>,
    pub callbacks: Arc<CallbackRegistry>,
    pub coordinator: Coordinator,
}

impl BridgeContext {
    /// Build a context over `db` with an empty callback registry and a
    /// freshly started coordination thread.
    pub fn new(db: Arc<dyn Database>) -> Result<Self, BridgeError> {
        Ok(Self {
            db,
            callbacks: Arc::new(CallbackRegistry::new()),
            coordinator: Coordinator::start()?,
        })
    }

    pub fn with_callbacks(mut self, callbacks: Arc<CallbackRegistry>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn registry(&self) -> TaskRegistry {
        TaskRegistry::new(Arc::clone(&self.db))
    }
}
