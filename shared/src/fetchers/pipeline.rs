//! Bounded fan-out over fetch targets.
//!
//! Streaming backends read one target (a container, a pod container) per
//! task. Tasks run with bounded concurrency, and a failing target is recorded
//! as skipped instead of failing the whole request.

use super::stream::StreamError;
use crate::models::{Row, SkipReason, SkippedTarget};
use futures::stream::{self, StreamExt};
use std::future::Future;

/// Something a pipeline task reads from.
pub trait FetchTarget: Send {
    /// Human-readable label used in logs and skip reports.
    fn label(&self) -> String;
}

/// The result of one task.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    /// The task produced a value.
    Completed(T),
    /// The target refused access.
    PermissionDenied(String),
    /// The target does not exist (any more).
    NotFound(String),
    /// Any other failure.
    Failed(String),
}

impl<T> From<Result<T, StreamError>> for TaskOutcome<T> {
    fn from(result: Result<T, StreamError>) -> Self {
        match result {
            Ok(value) => Self::Completed(value),
            Err(StreamError::PermissionDenied(msg)) => Self::PermissionDenied(msg),
            Err(StreamError::NotFound(msg)) => Self::NotFound(msg),
            Err(StreamError::Other(msg)) => Self::Failed(msg),
        }
    }
}

/// Combined results of a pipeline run.
#[derive(Debug)]
pub struct PipelineReport<T> {
    /// Values of completed tasks, in completion order.
    pub results: Vec<T>,
    /// Targets whose task did not complete.
    pub skipped: Vec<SkippedTarget>,
}

/// Runs `task` for every target with at most `workers` in flight.
///
/// A `workers` value of zero is treated as one.
pub async fn run<T, R, F, Fut>(targets: Vec<T>, workers: usize, task: F) -> PipelineReport<R>
where
    T: FetchTarget,
    F: Fn(T) -> Fut,
    Fut: Future<Output = TaskOutcome<R>>,
{
    let total = targets.len();
    let outcomes: Vec<(String, TaskOutcome<R>)> = stream::iter(targets)
        .map(|target| {
            let label = target.label();
            let fut = task(target);
            async move { (label, fut.await) }
        })
        .buffer_unordered(workers.max(1))
        .collect()
        .await;

    let mut report = PipelineReport {
        results: Vec::with_capacity(total),
        skipped: Vec::new(),
    };

    for (label, outcome) in outcomes {
        match outcome {
            TaskOutcome::Completed(value) => report.results.push(value),
            TaskOutcome::PermissionDenied(detail) => {
                tracing::warn!(target_label = %label, error = %detail, "Skipping target: permission denied");
                report.skipped.push(SkippedTarget {
                    target: label,
                    reason: SkipReason::PermissionDenied,
                    detail,
                });
            }
            TaskOutcome::NotFound(detail) => {
                tracing::warn!(target_label = %label, error = %detail, "Skipping target: not found");
                report.skipped.push(SkippedTarget {
                    target: label,
                    reason: SkipReason::NotFound,
                    detail,
                });
            }
            TaskOutcome::Failed(detail) => {
                tracing::error!(target_label = %label, error = %detail, "Target failed");
                report.skipped.push(SkippedTarget {
                    target: label,
                    reason: SkipReason::Failed,
                    detail,
                });
            }
        }
    }

    tracing::debug!(
        targets = total,
        completed = report.results.len(),
        skipped = report.skipped.len(),
        "Pipeline finished"
    );

    report
}

/// Records a target that failed before any task could run for it.
#[must_use]
pub fn skip(label: impl Into<String>, err: StreamError) -> SkippedTarget {
    let target = label.into();
    let (reason, detail) = match err {
        StreamError::PermissionDenied(detail) => (SkipReason::PermissionDenied, detail),
        StreamError::NotFound(detail) => (SkipReason::NotFound, detail),
        StreamError::Other(detail) => (SkipReason::Failed, detail),
    };
    tracing::warn!(target_label = %target, reason = ?reason, error = %detail, "Skipping target");
    SkippedTarget {
        target,
        reason,
        detail,
    }
}

/// Merges per-target rows into one list ordered newest first.
///
/// Ties on time are broken by record id so the order is the same however the
/// tasks interleaved. At most `limit` rows are kept.
#[must_use]
pub fn merge_rows(batches: Vec<Vec<Row>>, limit: usize) -> Vec<Row> {
    let mut rows: Vec<Row> = batches.into_iter().flatten().collect();
    rows.sort_by(|a, b| {
        b.time
            .unixtime
            .cmp(&a.time.unixtime)
            .then_with(|| b.time.microseconds.cmp(&a.time.microseconds))
            .then_with(|| a.record_id.cmp(&b.record_id))
    });
    rows.truncate(limit);
    rows
}
