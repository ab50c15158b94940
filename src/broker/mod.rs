//! Queue collaborator port.
//!
//! A [`Broker`] accepts tasks, hands them out to workers, and decides on
//! redelivery when a handler fails. [`PgmqBroker`] talks to the Postgres
//! `pgmq` extension; [`MemoryBroker`] keeps everything in-process.

pub mod memory;
pub mod pgmq;

pub use memory::MemoryBroker;
pub use pgmq::PgmqBroker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Redeliveries allowed after a failure unless the submitter says otherwise.
pub const DEFAULT_MAX_RETRY: u32 = 25;

/// A unit of work: a type used for handler dispatch plus opaque payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    task_type: String,
    payload: Vec<u8>,
}

impl Task {
    pub fn new(task_type: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            task_type: task_type.into(),
            payload: payload.into(),
        }
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Broker acknowledgement of a submitted task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInfo {
    /// Broker-assigned task ID.
    pub id: String,
    pub queue: String,
    pub task_type: String,
    pub max_retry: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// What a handler can learn about the delivery it is running.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    task_id: Option<String>,
    queue: String,
    retry_count: u32,
    max_retry: u32,
}

impl TaskContext {
    pub fn new(
        task_id: Option<String>,
        queue: impl Into<String>,
        retry_count: u32,
        max_retry: u32,
    ) -> Self {
        Self {
            task_id,
            queue: queue.into(),
            retry_count,
            max_retry,
        }
    }

    /// The task ID, when the delivery carried one.
    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// How many times this task was delivered before this attempt.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }
}

/// Broker-specific handle used to ack or fail one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub queue: String,
    pub msg_id: i64,
    /// Deliveries before this one.
    pub retry_count: u32,
    pub max_retry: u32,
}

/// A task handed to a worker.
#[derive(Debug)]
pub struct Delivery {
    pub task: Task,
    pub context: TaskContext,
    pub receipt: Receipt,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Submit a task to `queue`. Returns the assigned ID.
    async fn enqueue(&self, task: &Task, queue: &str, max_retry: u32) -> Result<TaskInfo>;

    /// Take the next ready task from the first non-empty queue, in order.
    async fn dequeue(&self, queues: &[String]) -> Result<Option<Delivery>>;

    /// The handler succeeded; the task is done.
    async fn ack(&self, receipt: &Receipt) -> Result<()>;

    /// The handler failed; redeliver later or give up per the task's
    /// retry budget.
    async fn fail(&self, receipt: &Receipt, error: &str) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
