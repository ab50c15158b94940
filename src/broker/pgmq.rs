//! pgmq broker via direct SQLx.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.read,
//! pgmq.set_vt, pgmq.archive. Messages are JSON envelopes carrying the
//! task ID, type, payload and retry budget.

use async_trait::async_trait;
use chrono::Utc;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::warn;
use uuid::Uuid;

use super::{Broker, DEFAULT_MAX_RETRY, Delivery, Receipt, Task, TaskContext, TaskInfo};
use crate::error::{Error, Result};
use crate::telemetry::metrics;

/// Message body stored in a pgmq queue.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    /// Absent for messages sent straight to pgmq by other producers.
    #[serde(default)]
    task_id: Option<String>,
    task_type: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default = "default_max_retry")]
    max_retry: u32,
}

fn default_max_retry() -> u32 {
    DEFAULT_MAX_RETRY
}

/// Broker backed by the Postgres pgmq extension.
pub struct PgmqBroker {
    pool: PgPool,
    /// Seconds a read message stays invisible to other workers.
    visibility_timeout: i32,
    /// Seconds before a failed message becomes visible again.
    retry_delay: i32,
}

impl PgmqBroker {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            visibility_timeout: 60,
            retry_delay: 10,
        }
    }

    pub fn visibility_timeout(mut self, seconds: i32) -> Self {
        self.visibility_timeout = seconds;
        self
    }

    pub fn retry_delay(mut self, seconds: i32) -> Self {
        self.retry_delay = seconds;
        self
    }

    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue)
            .execute(&self.pool)
            .await?;
        record_operation(queue, "create");
        Ok(())
    }

    async fn read_one(&self, queue: &str) -> Result<Option<PgmqMessage>> {
        let row = sqlx::query_as::<_, (i64, i32, serde_json::Value)>(
            "SELECT msg_id, read_ct, message FROM pgmq.read($1, $2, 1)",
        )
        .bind(queue)
        .bind(self.visibility_timeout)
        .fetch_optional(&self.pool)
        .await?;

        record_operation(queue, if row.is_some() { "read" } else { "read_empty" });

        Ok(row.map(|(msg_id, read_ct, message)| PgmqMessage {
            msg_id,
            read_ct,
            message,
        }))
    }

    async fn archive(&self, queue: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(queue)
            .bind(msg_id)
            .execute(&self.pool)
            .await?;
        record_operation(queue, "archive");
        Ok(())
    }
}

/// A raw message read from a pgmq queue.
#[derive(Debug, Clone)]
struct PgmqMessage {
    msg_id: i64,
    read_ct: i32,
    message: serde_json::Value,
}

fn record_operation(queue: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

#[async_trait]
impl Broker for PgmqBroker {
    async fn enqueue(&self, task: &Task, queue: &str, max_retry: u32) -> Result<TaskInfo> {
        let id = Uuid::new_v4().to_string();
        let envelope = Envelope {
            task_id: Some(id.clone()),
            task_type: task.task_type().to_string(),
            payload: serde_json::from_slice(task.payload())?,
            max_retry,
        };
        let body = serde_json::to_value(&envelope)?;

        let _msg_id: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
            .bind(queue)
            .bind(&body)
            .bind(0i32)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Broker(format!("pgmq.send to {queue} failed: {e}")))?;
        record_operation(queue, "send");

        Ok(TaskInfo {
            id,
            queue: queue.to_string(),
            task_type: envelope.task_type,
            max_retry,
            enqueued_at: Utc::now(),
        })
    }

    async fn dequeue(&self, queues: &[String]) -> Result<Option<Delivery>> {
        for queue in queues {
            let Some(msg) = self.read_one(queue).await? else {
                continue;
            };

            let envelope: Envelope = match serde_json::from_value(msg.message) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(queue = %queue, msg_id = msg.msg_id, "unroutable pgmq message, archiving: {e}");
                    self.archive(queue, msg.msg_id).await?;
                    continue;
                }
            };

            let payload = serde_json::to_vec(&envelope.payload)?;
            let retry_count = msg.read_ct.saturating_sub(1).max(0) as u32;
            return Ok(Some(Delivery {
                task: Task::new(envelope.task_type, payload),
                context: TaskContext::new(
                    envelope.task_id,
                    queue.clone(),
                    retry_count,
                    envelope.max_retry,
                ),
                receipt: Receipt {
                    queue: queue.clone(),
                    msg_id: msg.msg_id,
                    retry_count,
                    max_retry: envelope.max_retry,
                },
            }));
        }
        Ok(None)
    }

    async fn ack(&self, receipt: &Receipt) -> Result<()> {
        self.archive(&receipt.queue, receipt.msg_id).await
    }

    async fn fail(&self, receipt: &Receipt, error: &str) -> Result<()> {
        if receipt.retry_count >= receipt.max_retry {
            warn!(
                queue = %receipt.queue,
                msg_id = receipt.msg_id,
                retry_count = receipt.retry_count,
                error,
                "retries exhausted, archiving"
            );
            return self.archive(&receipt.queue, receipt.msg_id).await;
        }

        sqlx::query("SELECT pgmq.set_vt($1, $2, $3)")
            .bind(&receipt.queue)
            .bind(receipt.msg_id)
            .bind(self.retry_delay)
            .execute(&self.pool)
            .await?;
        record_operation(&receipt.queue, "retry");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
