//! Task handlers and the type-keyed handler registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::{Task, TaskContext};
use crate::error::{Error, HandlerResult};

/// Processes one task. The returned error, if any, goes back to the broker
/// for its redelivery decision.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn process_task(&self, ctx: &TaskContext, task: Task) -> HandlerResult;
}

/// Adapter that turns an async closure into a [`Handler`].
pub struct HandlerFunc<F> {
    func: F,
}

impl<F> HandlerFunc<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFunc<F>
where
    F: Fn(TaskContext, Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn process_task(&self, ctx: &TaskContext, task: Task) -> HandlerResult {
        (self.func)(ctx.clone(), task).await
    }
}

/// Routes tasks to handlers by task type.
///
/// Patterns match task types by prefix; the longest matching pattern wins,
/// so `"email:"` catches `"email:welcome"` unless `"email:welcome"` is
/// registered itself.
#[derive(Default)]
pub struct ServeMux {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl ServeMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. A second registration for the same pattern
    /// replaces the first.
    pub fn handle(&mut self, pattern: impl Into<String>, handler: impl Handler + 'static) {
        self.handlers.insert(pattern.into(), Arc::new(handler));
    }

    /// Register an async closure.
    pub fn handle_func<F, Fut>(&mut self, pattern: impl Into<String>, func: F)
    where
        F: Fn(TaskContext, Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handle(pattern, HandlerFunc::new(func));
    }

    /// Registered patterns, unordered.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    fn route(&self, task_type: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers
            .iter()
            .filter(|(pattern, _)| task_type.starts_with(pattern.as_str()))
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(_, handler)| handler)
    }
}

#[async_trait]
impl Handler for ServeMux {
    async fn process_task(&self, ctx: &TaskContext, task: Task) -> HandlerResult {
        match self.route(task.task_type()) {
            Some(handler) => handler.process_task(ctx, task).await,
            None => Err(Box::new(Error::HandlerNotFound(task.task_type().to_string()))),
        }
    }
}
