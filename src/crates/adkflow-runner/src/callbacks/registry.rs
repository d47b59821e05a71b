//! Per-agent callback registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::types::{CallbackError, CallbackHandler, CallbackMethod};

/// Ordered handler storage for one agent. Freezes the moment SDK-facing
/// callbacks are materialized; late registrations are rejected.
pub struct CallbackRegistry {
    agent_name: String,
    handlers: RwLock<Vec<Arc<dyn CallbackHandler>>>,
    frozen: AtomicBool,
}

impl CallbackRegistry {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            handlers: RwLock::new(Vec::new()),
            frozen: AtomicBool::new(false),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn register(&self, handler: Arc<dyn CallbackHandler>) -> Result<(), CallbackError> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(CallbackError::Frozen(self.agent_name.clone()));
        }
        tracing::debug!(
            agent = %self.agent_name,
            handler = handler.name(),
            priority = handler.priority(),
            "Registered callback handler"
        );
        self.handlers.write().push(handler);
        Ok(())
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Handlers implementing `method`, priority-descending; registration
    /// order breaks ties.
    pub fn get_handlers_for(&self, method: CallbackMethod) -> Vec<Arc<dyn CallbackHandler>> {
        let mut handlers: Vec<Arc<dyn CallbackHandler>> = self
            .handlers
            .read()
            .iter()
            .filter(|h| h.capabilities().implements(method))
            .cloned()
            .collect();
        handlers.sort_by(|a, b| b.priority().cmp(&a.priority()));
        handlers
    }
}
