//! Task type to handler mapping.

use std::collections::HashMap;
use std::sync::Arc;

use job_queue::JobQueue;

use crate::error::{ChainError, Result};
use crate::handler::{DynHandler, Handler, TypedHandler};
use crate::orchestrator::{ChainOrchestrator, OrchestratorOptions};
use crate::task::{CHAIN_TASK_TYPE, Task, validate_task_type};

/// Handlers keyed by task type.
///
/// Filled once at startup, then frozen with [`into_shared`], which also
/// installs the chain orchestrator under its reserved type. Lookups after
/// that are read-only.
///
/// [`into_shared`]: HandlerRegistry::into_shared
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn DynHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for task type `T`.
    ///
    /// Fails if `T::TYPE` is malformed, reserved, or already taken.
    pub fn register<T: Task, H: Handler<T> + 'static>(&mut self, handler: H) -> Result<()> {
        self.register_dyn(Arc::new(TypedHandler::<T, H>::new(handler)))
    }

    /// Registers an already type-erased handler under its own task type.
    pub fn register_dyn(&mut self, handler: Arc<dyn DynHandler>) -> Result<()> {
        let task_type = handler.task_type().to_string();
        validate_task_type(&task_type)?;
        if task_type == CHAIN_TASK_TYPE {
            return Err(ChainError::ReservedTaskType(task_type));
        }
        if self.handlers.contains_key(&task_type) {
            return Err(ChainError::DuplicateHandler(task_type));
        }

        tracing::debug!(task_type = %task_type, "Handler registered");
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Registered task types in sorted order.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Freezes the registry and installs the chain orchestrator, which
    /// dispatches chain steps back into this same registry and enqueues
    /// continuations on `queue`.
    pub fn into_shared(
        mut self,
        queue: Arc<dyn JobQueue>,
        options: OrchestratorOptions,
    ) -> Arc<HandlerRegistry> {
        Arc::new_cyclic(|registry| {
            let orchestrator = ChainOrchestrator::new(registry.clone(), queue, options);
            self.handlers
                .insert(CHAIN_TASK_TYPE.to_string(), Arc::new(orchestrator));
            self
        })
    }
}
