//! Metric instrument factories for tasktrail.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"tasktrail"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for tasktrail instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("tasktrail")
}

/// Counter: tasks submitted through the client.
/// Labels: `task_type`, `result` ("ok" | "error").
pub fn tasks_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("tasktrail.tasks.enqueued")
        .with_description("Number of tasks submitted to the broker")
        .build()
}

/// Counter: lifecycle writes that matched a task record.
/// Labels: `to`.
pub fn lifecycle_transitions() -> Counter<u64> {
    meter()
        .u64_counter("tasktrail.lifecycle.transitions")
        .with_description("Number of task lifecycle writes")
        .build()
}

/// Counter: best-effort audit writes that failed and were dropped.
/// Labels: `operation`.
pub fn audit_write_failures() -> Counter<u64> {
    meter()
        .u64_counter("tasktrail.audit.write_failures")
        .with_description("Audit writes that failed and were skipped")
        .build()
}

/// Counter: broker-level queue operations (send, read, archive, retry).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("tasktrail.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Histogram: handler duration in milliseconds, lifecycle writes included.
/// Labels: `task_type`, `outcome`.
pub fn task_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("tasktrail.task.duration_ms")
        .with_description("Task processing duration in milliseconds")
        .with_unit("ms")
        .build()
}
