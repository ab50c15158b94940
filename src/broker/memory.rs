//! In-process broker for development and tests.
//!
//! Per-queue FIFO under a single mutex. The lock is never held across an
//! `.await`. Failed tasks go back to the end of their queue after
//! `retry_delay` until their retry budget runs out, then move to a dead
//! list.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Broker, Delivery, Receipt, Task, TaskContext, TaskInfo};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct Entry {
    task_id: String,
    task: Task,
    max_retry: u32,
    retry_count: u32,
    ready_at: Instant,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<Entry>>,
    in_flight: HashMap<i64, Entry>,
    dead: Vec<Entry>,
    next_msg_id: i64,
    closed: bool,
}

/// Broker that keeps every queue in memory.
pub struct MemoryBroker {
    state: Mutex<State>,
    retry_delay: Duration,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Delay before a failed task becomes visible again.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Tasks waiting in `queue`, ready or not.
    pub fn len(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    /// Tasks handed out and not yet acked or failed.
    pub fn in_flight_count(&self) -> usize {
        self.state().in_flight.len()
    }

    /// Tasks that exhausted their retries.
    pub fn dead_count(&self) -> usize {
        self.state().dead.len()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(&self, task: &Task, queue: &str, max_retry: u32) -> Result<TaskInfo> {
        let mut state = self.state();
        if state.closed {
            return Err(Error::Broker("memory broker is closed".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(Entry {
                task_id: id.clone(),
                task: task.clone(),
                max_retry,
                retry_count: 0,
                ready_at: Instant::now(),
            });

        Ok(TaskInfo {
            id,
            queue: queue.to_string(),
            task_type: task.task_type().to_string(),
            max_retry,
            enqueued_at: Utc::now(),
        })
    }

    async fn dequeue(&self, queues: &[String]) -> Result<Option<Delivery>> {
        let mut state = self.state();
        if state.closed {
            return Ok(None);
        }

        let now = Instant::now();
        for queue in queues {
            let Some(pending) = state.queues.get_mut(queue) else {
                continue;
            };
            let Some(pos) = pending.iter().position(|e| e.ready_at <= now) else {
                continue;
            };
            let Some(entry) = pending.remove(pos) else {
                continue;
            };

            state.next_msg_id += 1;
            let msg_id = state.next_msg_id;
            let delivery = Delivery {
                task: entry.task.clone(),
                context: TaskContext::new(
                    Some(entry.task_id.clone()),
                    queue.clone(),
                    entry.retry_count,
                    entry.max_retry,
                ),
                receipt: Receipt {
                    queue: queue.clone(),
                    msg_id,
                    retry_count: entry.retry_count,
                    max_retry: entry.max_retry,
                },
            };
            state.in_flight.insert(msg_id, entry);
            return Ok(Some(delivery));
        }
        Ok(None)
    }

    async fn ack(&self, receipt: &Receipt) -> Result<()> {
        if self.state().in_flight.remove(&receipt.msg_id).is_none() {
            debug!(msg_id = receipt.msg_id, "ack for unknown delivery");
        }
        Ok(())
    }

    async fn fail(&self, receipt: &Receipt, error: &str) -> Result<()> {
        let mut state = self.state();
        let Some(mut entry) = state.in_flight.remove(&receipt.msg_id) else {
            debug!(msg_id = receipt.msg_id, "fail for unknown delivery");
            return Ok(());
        };

        if entry.retry_count >= entry.max_retry {
            warn!(task_id = %entry.task_id, queue = %receipt.queue, error, "retries exhausted");
            state.dead.push(entry);
            return Ok(());
        }

        entry.retry_count += 1;
        entry.ready_at = Instant::now() + self.retry_delay;
        state
            .queues
            .entry(receipt.queue.clone())
            .or_default()
            .push_back(entry);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queues(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_in_order() {
        let broker = MemoryBroker::new();
        let first = broker
            .enqueue(&Task::new("a", b"1".to_vec()), "default", 0)
            .await
            .unwrap();
        broker
            .enqueue(&Task::new("b", b"2".to_vec()), "default", 0)
            .await
            .unwrap();

        let delivery = broker
            .dequeue(&queues(&["default"]))
            .await
            .unwrap()
            .expect("a task should be ready");
        assert_eq!(delivery.context.task_id(), Some(first.id.as_str()));
        assert_eq!(delivery.task.task_type(), "a");
        assert_eq!(broker.len("default"), 1);
        assert_eq!(broker.in_flight_count(), 1);

        broker.ack(&delivery.receipt).await.unwrap();
        assert_eq!(broker.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn dequeue_follows_queue_order() {
        let broker = MemoryBroker::new();
        broker
            .enqueue(&Task::new("low", Vec::new()), "low", 0)
            .await
            .unwrap();
        broker
            .enqueue(&Task::new("high", Vec::new()), "high", 0)
            .await
            .unwrap();

        let delivery = broker
            .dequeue(&queues(&["high", "low"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.task.task_type(), "high");
        assert_eq!(delivery.context.queue(), "high");
    }

    #[tokio::test]
    async fn failed_task_is_redelivered_until_budget_spent() {
        let broker = MemoryBroker::new().retry_delay(Duration::ZERO);
        broker
            .enqueue(&Task::new("flaky", Vec::new()), "default", 1)
            .await
            .unwrap();
        let q = queues(&["default"]);

        let first = broker.dequeue(&q).await.unwrap().unwrap();
        assert_eq!(first.context.retry_count(), 0);
        broker.fail(&first.receipt, "boom").await.unwrap();

        let second = broker.dequeue(&q).await.unwrap().unwrap();
        assert_eq!(second.context.retry_count(), 1);
        broker.fail(&second.receipt, "boom").await.unwrap();

        assert!(broker.dequeue(&q).await.unwrap().is_none());
        assert_eq!(broker.dead_count(), 1);
    }

    #[tokio::test]
    async fn retry_waits_for_delay() {
        let broker = MemoryBroker::new().retry_delay(Duration::from_secs(60));
        broker
            .enqueue(&Task::new("flaky", Vec::new()), "default", 3)
            .await
            .unwrap();
        let q = queues(&["default"]);

        let first = broker.dequeue(&q).await.unwrap().unwrap();
        broker.fail(&first.receipt, "boom").await.unwrap();

        assert_eq!(broker.len("default"), 1);
        assert!(broker.dequeue(&q).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn closed_broker_rejects_submissions() {
        let broker = MemoryBroker::new();
        broker.close().await.unwrap();
        let result = broker
            .enqueue(&Task::new("a", Vec::new()), "default", 0)
            .await;
        assert!(matches!(result, Err(Error::Broker(_))));
    }
}
