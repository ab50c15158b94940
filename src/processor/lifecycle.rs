//! Lifecycle tracking around a handler.
//!
//! Marks a task `in_progress` before the inner handler runs, then
//! `completed` or `failed` after. Every store write is best-effort: the
//! handler's own result goes back to the broker unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::handler::Handler;
use crate::broker::{Task, TaskContext};
use crate::error::HandlerResult;
use crate::store::TaskStore;
use crate::store::audit::best_effort;

/// Wraps a handler with lifecycle writes to a [`TaskStore`].
pub struct Lifecycle<H> {
    inner: H,
    store: Option<Arc<dyn TaskStore>>,
}

impl<H: Handler> Lifecycle<H> {
    pub fn new(inner: H, store: Option<Arc<dyn TaskStore>>) -> Self {
        Self { inner, store }
    }
}

#[async_trait]
impl<H: Handler> Handler for Lifecycle<H> {
    async fn process_task(&self, ctx: &TaskContext, task: Task) -> HandlerResult {
        let tracked = self.store.as_deref().zip(ctx.task_id());

        if let Some((store, id)) = tracked {
            best_effort("mark_started", id, store.mark_started(id, Utc::now())).await;
        }

        let result = self.inner.process_task(ctx, task).await;

        if let Some((store, id)) = tracked {
            match &result {
                Ok(()) => {
                    best_effort(
                        "mark_completed",
                        id,
                        store.mark_completed(id, None, Utc::now()),
                    )
                    .await;
                }
                Err(e) => {
                    best_effort(
                        "mark_failed",
                        id,
                        store.mark_failed(id, &e.to_string(), Utc::now()),
                    )
                    .await;
                }
            }
        }

        result
    }
}
