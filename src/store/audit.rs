//! Best-effort audit writes.
//!
//! The queue is the source of truth for whether a task was submitted and
//! how it ran. Store writes made on its behalf go through [`best_effort`]:
//! a failure is logged and counted, then dropped.

use std::future::Future;

use opentelemetry::KeyValue;
use tracing::warn;

use crate::error::Result;
use crate::telemetry::metrics;

/// Await an audit write and swallow its error.
///
/// Returns `true` when the write succeeded, for callers that want to log
/// or test the outcome.
pub async fn best_effort<F>(operation: &'static str, task_id: &str, write: F) -> bool
where
    F: Future<Output = Result<()>>,
{
    match write.await {
        Ok(()) => true,
        Err(e) => {
            warn!(operation, task_id, error = %e, "audit write failed, continuing");
            metrics::audit_write_failures().add(1, &[KeyValue::new("operation", operation)]);
            false
        }
    }
}
