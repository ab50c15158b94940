//! Persistence port for task lifecycle records.
//!
//! [`TaskStore`] is the narrow interface the client and processor write
//! through. [`SqlStore`] is the relational implementation; [`audit`] holds
//! the best-effort wrapper used wherever a failed write must not affect
//! task submission or execution.

pub mod audit;
pub mod dialect;
pub mod sql;

pub use dialect::Dialect;
pub use sql::{SqlStore, StoreConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{RecordFilter, TaskRecord};

/// Abstract persistence for task lifecycle records.
///
/// Implementations must tolerate concurrent calls from many workers.
/// `mark_*` operations are unconditional updates keyed by id: an id with
/// no row is not an error.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a brand-new record with status `created`. A duplicate id is
    /// an error, never merged.
    async fn insert_created(&self, record: &TaskRecord) -> Result<()>;

    /// Record the queue a task landed on and when. Status stays `created`.
    async fn mark_enqueued(&self, id: &str, queue: &str, at: DateTime<Utc>) -> Result<()>;

    async fn mark_started(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Mark completed. `result` overwrites the stored result payload.
    async fn mark_completed(&self, id: &str, result: Option<&str>, at: DateTime<Utc>)
    -> Result<()>;

    async fn mark_failed(&self, id: &str, message: &str, at: DateTime<Utc>) -> Result<()>;

    /// Fetch a record. Missing ids are [`Error::NotFound`](crate::error::Error::NotFound).
    async fn get_by_id(&self, id: &str) -> Result<TaskRecord>;

    /// Newest records first, optionally filtered.
    async fn list_recent(&self, filter: &RecordFilter, limit: i64) -> Result<Vec<TaskRecord>>;
}
