//! Task submission with an audit trail.
//!
//! The broker decides whether a task was submitted. Store writes that
//! follow a successful submission are best-effort and never fail
//! [`Client::enqueue`].

use std::sync::Arc;

use chrono::Utc;
use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{debug, info};

use crate::broker::{Broker, DEFAULT_MAX_RETRY, Task, TaskInfo};
use crate::error::Result;
use crate::model::TaskRecord;
use crate::store::TaskStore;
use crate::store::audit::best_effort;
use crate::telemetry::metrics;

/// Queue used when neither the client nor the submission names one.
pub const DEFAULT_QUEUE: &str = "default";

#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Queue for submissions that don't name one. Empty means `"default"`.
    pub default_queue: String,
}

/// Per-submission overrides.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub queue: Option<String>,
    pub max_retry: Option<u32>,
}

impl EnqueueOptions {
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn max_retry(mut self, n: u32) -> Self {
        self.max_retry = Some(n);
        self
    }
}

/// Submits tasks to a broker and records their creation.
pub struct Client {
    broker: Arc<dyn Broker>,
    store: Option<Arc<dyn TaskStore>>,
    default_queue: String,
}

impl Client {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Option<Arc<dyn TaskStore>>,
        options: ClientOptions,
    ) -> Self {
        let default_queue = if options.default_queue.is_empty() {
            DEFAULT_QUEUE.to_string()
        } else {
            options.default_queue
        };
        Self {
            broker,
            store,
            default_queue,
        }
    }

    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }

    /// Serialize `payload` as JSON, submit it, then record it.
    ///
    /// Serialization and broker errors are returned; nothing is written to
    /// the store in that case. Store errors after a successful submission
    /// are logged and dropped.
    pub async fn enqueue<P>(
        &self,
        task_type: &str,
        payload: &P,
        options: EnqueueOptions,
    ) -> Result<TaskInfo>
    where
        P: Serialize + ?Sized,
    {
        let payload = serde_json::to_string(payload)?;
        let queue = options
            .queue
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| self.default_queue.clone());
        let max_retry = options.max_retry.unwrap_or(DEFAULT_MAX_RETRY);

        let task = Task::new(task_type, payload.clone().into_bytes());
        let info = match self.broker.enqueue(&task, &queue, max_retry).await {
            Ok(info) => info,
            Err(e) => {
                metrics::tasks_enqueued().add(
                    1,
                    &[
                        KeyValue::new("task_type", task_type.to_string()),
                        KeyValue::new("result", "error"),
                    ],
                );
                return Err(e);
            }
        };
        metrics::tasks_enqueued().add(
            1,
            &[
                KeyValue::new("task_type", task_type.to_string()),
                KeyValue::new("result", "ok"),
            ],
        );
        info!(task_id = %info.id, task_type, queue = %info.queue, "task enqueued");

        if let Some(ref store) = self.store {
            let now = Utc::now();
            let record = TaskRecord::created(&info.id, task_type, &info.queue, payload, now);
            best_effort("insert_created", &info.id, store.insert_created(&record)).await;
            best_effort(
                "mark_enqueued",
                &info.id,
                store.mark_enqueued(&info.id, &info.queue, Utc::now()),
            )
            .await;
        } else {
            debug!(task_id = %info.id, "no store configured, skipping audit record");
        }

        Ok(info)
    }

    /// Release the broker.
    pub async fn close(&self) -> Result<()> {
        self.broker.close().await
    }
}
