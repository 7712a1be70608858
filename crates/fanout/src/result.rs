//! Per-task outcome records.
//!
//! Every submitted task produces exactly one [`TaskResult`], positioned at
//! the task's submission index in the output sequence regardless of
//! completion order.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Why a task failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskFailure {
    /// The task's own logic returned an error or panicked.
    #[error("task error: {0}")]
    Error(String),

    /// The task exceeded its per-task budget.
    #[error("task timed out after {limit:?}")]
    Timeout {
        /// The configured budget that was exceeded.
        limit: Duration,
    },

    /// The task payload cannot cross the process boundary.
    #[error("payload cannot cross the process boundary: {0}")]
    Serialization(String),

    /// The task was cancelled before it completed.
    #[error("task was cancelled")]
    Cancelled,
}

/// Failure classification, for matching without the carried detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Task logic error.
    Error,
    /// Per-task budget exceeded.
    Timeout,
    /// Payload not transferable across the process boundary.
    Serialization,
    /// Cancelled before completion.
    Cancelled,
}

impl TaskFailure {
    /// The failure's classification.
    pub fn kind(&self) -> FailureKind {
        match self {
            TaskFailure::Error(_) => FailureKind::Error,
            TaskFailure::Timeout { .. } => FailureKind::Timeout,
            TaskFailure::Serialization(_) => FailureKind::Serialization,
            TaskFailure::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// The outcome record for one task.
///
/// Created exactly once per task and immutable afterwards.
#[derive(Debug)]
pub struct TaskResult {
    index: usize,
    name: String,
    outcome: Result<Value, TaskFailure>,
    elapsed: Duration,
}

impl TaskResult {
    /// Record a successful task.
    pub fn success(index: usize, name: impl Into<String>, value: Value, elapsed: Duration) -> Self {
        Self {
            index,
            name: name.into(),
            outcome: Ok(value),
            elapsed,
        }
    }

    /// Record a failed task.
    pub fn failed(
        index: usize,
        name: impl Into<String>,
        failure: TaskFailure,
        elapsed: Duration,
    ) -> Self {
        Self {
            index,
            name: name.into(),
            outcome: Err(failure),
            elapsed,
        }
    }

    /// The task's submission index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The task's resolved name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the task completed successfully.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The task's return value, if it succeeded.
    pub fn value(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    /// The failure descriptor, if the task failed.
    pub fn failure(&self) -> Option<&TaskFailure> {
        self.outcome.as_ref().err()
    }

    /// The full outcome.
    pub fn outcome(&self) -> &Result<Value, TaskFailure> {
        &self.outcome
    }

    /// Consume the record, yielding the outcome.
    pub fn into_outcome(self) -> Result<Value, TaskFailure> {
        self.outcome
    }

    /// Wall-clock duration the task ran for.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}
