//! Core data model.
//!
//! A task record is the audit row for one unit of queued work: what it is,
//! where it was queued, and how far through its lifecycle it got.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Submitted to the queue, not yet picked up by a worker.
    Created,
    /// A worker is running the handler.
    InProgress,
    /// Handler returned success. Terminal.
    Completed,
    /// Handler returned an error. Terminal for this attempt.
    Failed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Created => "created",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Status::Created),
            "in_progress" => Ok(Status::InProgress),
            "completed" => Ok(Status::Completed),
            "failed" => Ok(Status::Failed),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Task Record
// ---------------------------------------------------------------------------

/// The persisted lifecycle snapshot of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Broker-assigned task ID. Primary key.
    pub id: String,

    /// Logical task kind, used for handler dispatch.
    pub task_type: String,

    /// Queue the task was placed on.
    pub queue: String,

    /// Serialized JSON payload. Never rewritten after insert.
    pub payload: String,

    pub status: Status,

    /// Last handler error message, if the task failed.
    pub error_message: Option<String>,

    /// Result JSON, only when a caller recorded one explicitly.
    pub result_payload: Option<String>,

    pub created_at: DateTime<Utc>,
    /// Unix epoch when the row carries no enqueue time.
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// A fresh `created` record for a task the broker just accepted.
    pub fn created(
        id: impl Into<String>,
        task_type: impl Into<String>,
        queue: impl Into<String>,
        payload: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            queue: queue.into(),
            payload: payload.into(),
            status: Status::Created,
            error_message: None,
            result_payload: None,
            created_at: now,
            enqueued_at: now,
            started_at: None,
            finished_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Filters for listing task records.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub status: Option<Status>,
    pub task_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_its_own_display() {
        for status in [
            Status::Created,
            Status::InProgress,
            Status::Completed,
            Status::Failed,
        ] {
            assert_eq!(status.to_string().parse::<Status>().unwrap(), status);
        }
    }

    #[test]
    fn status_rejects_unknown_values() {
        let err = "enqueued".parse::<Status>().unwrap_err();
        assert!(matches!(err, Error::InvalidStatus(s) if s == "enqueued"));
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!Status::Created.is_terminal());
        assert!(!Status::InProgress.is_terminal());
        assert!(Status::Completed.is_terminal());
        assert!(Status::Failed.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&Status::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
