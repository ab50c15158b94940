//! Task execution span helpers.

use tracing::Span;

/// Start a span for one task delivery.
///
/// The `task.outcome` field is declared empty and filled by
/// [`record_outcome`].
pub fn start_task_span(task_type: &str, task_id: &str, queue: &str) -> Span {
    tracing::info_span!(
        "task.process",
        "task.type" = task_type,
        "task.id" = task_id,
        "task.queue" = queue,
        "task.outcome" = tracing::field::Empty,
    )
}

/// Record how the handler finished on the task span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("task.outcome", outcome);
}
