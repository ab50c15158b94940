//! Shared fixtures: an in-memory SQLite store and collaborators that fail
//! or record on demand.

#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use tasktrail::broker::{Broker, Delivery, Receipt, Task, TaskInfo};
use tasktrail::model::{RecordFilter, TaskRecord};
use tasktrail::store::{Dialect, SqlStore, TaskStore};
use tasktrail::{Error, Result};

/// Pool over one long-lived in-memory SQLite connection. Every SQLite
/// in-memory connection is its own database.
pub async fn sqlite_pool() -> AnyPool {
    sqlx::any::install_default_drivers();
    AnyPoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

/// Fresh in-memory SQLite store with the schema applied.
pub async fn sqlite_store() -> SqlStore {
    let store = SqlStore::with_dialect(sqlite_pool().await, Dialect::Positional);
    store.migrate().await.unwrap();
    store
}

/// Poll `check` every 20ms until it returns true or `timeout` elapses.
pub async fn poll_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Store whose every call fails.
pub struct FailingStore;

fn unavailable() -> Error {
    Error::Other("store unavailable".to_string())
}

#[async_trait]
impl TaskStore for FailingStore {
    async fn insert_created(&self, _record: &TaskRecord) -> Result<()> {
        Err(unavailable())
    }

    async fn mark_enqueued(&self, _id: &str, _queue: &str, _at: DateTime<Utc>) -> Result<()> {
        Err(unavailable())
    }

    async fn mark_started(&self, _id: &str, _at: DateTime<Utc>) -> Result<()> {
        Err(unavailable())
    }

    async fn mark_completed(
        &self,
        _id: &str,
        _result: Option<&str>,
        _at: DateTime<Utc>,
    ) -> Result<()> {
        Err(unavailable())
    }

    async fn mark_failed(&self, _id: &str, _message: &str, _at: DateTime<Utc>) -> Result<()> {
        Err(unavailable())
    }

    async fn get_by_id(&self, _id: &str) -> Result<TaskRecord> {
        Err(unavailable())
    }

    async fn list_recent(&self, _filter: &RecordFilter, _limit: i64) -> Result<Vec<TaskRecord>> {
        Err(unavailable())
    }
}

/// Store that records the order of calls as "operation:id[:detail]".
#[derive(Default)]
pub struct RecordingStore {
    calls: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl TaskStore for RecordingStore {
    async fn insert_created(&self, record: &TaskRecord) -> Result<()> {
        self.push(format!("insert_created:{}", record.id));
        Ok(())
    }

    async fn mark_enqueued(&self, id: &str, queue: &str, _at: DateTime<Utc>) -> Result<()> {
        self.push(format!("mark_enqueued:{id}:{queue}"));
        Ok(())
    }

    async fn mark_started(&self, id: &str, _at: DateTime<Utc>) -> Result<()> {
        self.push(format!("mark_started:{id}"));
        Ok(())
    }

    async fn mark_completed(
        &self,
        id: &str,
        result: Option<&str>,
        _at: DateTime<Utc>,
    ) -> Result<()> {
        self.push(format!("mark_completed:{id}:{}", result.unwrap_or("-")));
        Ok(())
    }

    async fn mark_failed(&self, id: &str, message: &str, _at: DateTime<Utc>) -> Result<()> {
        self.push(format!("mark_failed:{id}:{message}"));
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<TaskRecord> {
        Err(Error::NotFound(id.to_string()))
    }

    async fn list_recent(&self, _filter: &RecordFilter, _limit: i64) -> Result<Vec<TaskRecord>> {
        Ok(Vec::new())
    }
}

/// Broker that rejects every submission.
pub struct RejectingBroker;

#[async_trait]
impl Broker for RejectingBroker {
    async fn enqueue(&self, _task: &Task, queue: &str, _max_retry: u32) -> Result<TaskInfo> {
        Err(Error::Broker(format!("queue {queue} unavailable")))
    }

    async fn dequeue(&self, _queues: &[String]) -> Result<Option<Delivery>> {
        Ok(None)
    }

    async fn ack(&self, _receipt: &Receipt) -> Result<()> {
        Ok(())
    }

    async fn fail(&self, _receipt: &Receipt, _error: &str) -> Result<()> {
        Ok(())
    }
}
