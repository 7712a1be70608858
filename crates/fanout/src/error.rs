//! Errors surfaced from `execute` and context operations.
//!
//! Per-task failures live in [`TaskFailure`] and are embedded in results
//! under capture modes; the variants here are the ones that interrupt a call.

use thiserror::Error;

use crate::result::TaskFailure;

/// Errors returned from strategy and context operations.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The call cannot proceed with the given configuration. Always raised
    /// before any task runs, regardless of error mode.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Operation attempted on a disposed strategy or context.
    #[error("strategy has been closed")]
    Closed,

    /// Raise-mode propagation: the lowest-index failure in the batch, after
    /// all submitted tasks completed or reached their timeout.
    #[error("task '{name}' (index {index}) failed: {failure}")]
    TaskFailed {
        /// Submission index of the failing task.
        index: usize,
        /// Resolved name of the failing task.
        name: String,
        /// The underlying failure.
        failure: TaskFailure,
    },
}

impl ExecuteError {
    /// The failing task's index, when the error carries one.
    pub fn failed_index(&self) -> Option<usize> {
        match self {
            ExecuteError::TaskFailed { index, .. } => Some(*index),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ExecuteError::Configuration("worker_count must be positive".into());
        assert_eq!(
            err.to_string(),
            "invalid configuration: worker_count must be positive"
        );

        let err = ExecuteError::TaskFailed {
            index: 1,
            name: "task-1".into(),
            failure: TaskFailure::Error("x".into()),
        };
        assert_eq!(err.to_string(), "task 'task-1' (index 1) failed: task error: x");
        assert_eq!(err.failed_index(), Some(1));
    }

    #[test]
    fn test_failed_index_absent() {
        assert_eq!(ExecuteError::Closed.failed_index(), None);
    }
}
