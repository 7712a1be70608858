//! Execution strategies.
//!
//! Three engines implement one contract: fan a flat batch of independent
//! tasks out across a concurrency mechanism, collect outcomes as they
//! complete, and return them in submission order.

pub mod coroutine;
pub mod process;
pub mod thread;

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{ErrorMode, ExecutionConfig};
use crate::error::ExecuteError;
use crate::registry::TaskRegistry;
use crate::result::{FailureKind, TaskFailure, TaskResult};
use crate::task::{Task, TaskOutput, TaskPayload};

pub use coroutine::CoroutineStrategy;
pub use process::ProcessStrategy;
pub use thread::ThreadStrategy;

/// A concrete concurrency engine.
///
/// `execute` is a synchronous call boundary for all engines: the coroutine
/// strategy drives its scheduler to completion internally, so callers never
/// participate in cooperative scheduling. Pool-backed strategies are safe to
/// share across threads and call concurrently.
pub trait Strategy: Send + Sync {
    /// Which engine this is.
    fn kind(&self) -> StrategyKind;

    /// Run the batch and return one result per task, in submission order.
    fn execute(
        &self,
        tasks: Vec<Task>,
        config: &ExecutionConfig,
    ) -> Result<Vec<TaskResult>, ExecuteError>;

    /// Release pooled workers. Idempotent; `execute` afterwards returns
    /// [`ExecuteError::Closed`].
    fn close(&self) -> Result<(), ExecuteError>;
}

/// Which execution engine to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Bounded pool of OS threads, for blocking I/O-bound work.
    #[default]
    Thread,
    /// Bounded pool of isolated OS processes, for CPU-bound work.
    Process,
    /// Single-threaded cooperative scheduler, for high-fan-out async work.
    Coroutine,
}

impl std::str::FromStr for StrategyKind {
    type Err = ExecuteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "thread" | "threads" | "" => Ok(StrategyKind::Thread),
            "process" | "processes" => Ok(StrategyKind::Process),
            "coroutine" | "async" => Ok(StrategyKind::Coroutine),
            other => Err(ExecuteError::Configuration(format!(
                "unknown strategy: {other}. Use 'thread', 'process' or 'coroutine'"
            ))),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Thread => f.write_str("thread"),
            StrategyKind::Process => f.write_str("process"),
            StrategyKind::Coroutine => f.write_str("coroutine"),
        }
    }
}

impl StrategyKind {
    /// Read the strategy selection from the `FANOUT_STRATEGY` environment
    /// variable, defaulting to the thread strategy.
    pub fn from_env() -> Result<Self, ExecuteError> {
        std::env::var("FANOUT_STRATEGY").unwrap_or_default().parse()
    }
}

/// Construct a strategy of the given kind.
///
/// Validates the configuration before any worker is allocated.
pub fn create_strategy(
    kind: StrategyKind,
    config: &ExecutionConfig,
    registry: Arc<TaskRegistry>,
) -> Result<Box<dyn Strategy>, ExecuteError> {
    config.validate_for(kind)?;

    match kind {
        StrategyKind::Thread => {
            info!(
                workers = config.worker_count,
                name_prefix = %config.name_prefix,
                "using thread pool strategy"
            );
            Ok(Box::new(ThreadStrategy::new(config, registry)?))
        }
        StrategyKind::Process => {
            info!(
                workers = config.worker_count,
                max_tasks_per_worker = ?config.max_tasks_per_worker,
                "using process pool strategy"
            );
            Ok(Box::new(ProcessStrategy::new(config, registry)?))
        }
        StrategyKind::Coroutine => {
            info!(
                concurrency_limit = config.concurrency_limit,
                "using coroutine strategy"
            );
            Ok(Box::new(CoroutineStrategy::new(config, registry)?))
        }
    }
}

/// Run a payload to completion on the calling thread, catching panics.
pub(crate) fn run_payload_sync(payload: TaskPayload, registry: &TaskRegistry) -> TaskOutput {
    let run = move || match payload {
        TaskPayload::Blocking(f) => f(),
        TaskPayload::Future(f) => futures::executor::block_on(f()),
        TaskPayload::Invoke { function, args } => registry.dispatch(&function, args),
    };

    match catch_unwind(AssertUnwindSafe(run)) {
        Ok(output) => output,
        Err(panic) => Err(format!("task panicked: {}", panic_message(panic))),
    }
}

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

pub(crate) fn output_to_result(
    index: usize,
    name: String,
    output: TaskOutput,
    elapsed: std::time::Duration,
) -> TaskResult {
    match output {
        Ok(value) => TaskResult::success(index, name, value, elapsed),
        Err(message) => TaskResult::failed(index, name, TaskFailure::Error(message), elapsed),
    }
}

/// Wait for one pooled task's reply, applying the per-task budget.
///
/// On timeout the worker is left running; its eventual reply lands in a
/// dropped channel and is discarded.
pub(crate) fn await_reply(
    index: usize,
    label: String,
    receiver: std::sync::mpsc::Receiver<(TaskOutput, std::time::Duration)>,
    timeout: Option<std::time::Duration>,
) -> TaskResult {
    use std::sync::mpsc::RecvTimeoutError;

    let disconnected = |label: String| {
        TaskResult::failed(
            index,
            label,
            TaskFailure::Error("worker terminated before task completed".to_string()),
            std::time::Duration::ZERO,
        )
    };

    match timeout {
        Some(limit) => match receiver.recv_timeout(limit) {
            Ok((output, elapsed)) => output_to_result(index, label, output, elapsed),
            Err(RecvTimeoutError::Timeout) => {
                TaskResult::failed(index, label, TaskFailure::Timeout { limit }, limit)
            }
            Err(RecvTimeoutError::Disconnected) => disconnected(label),
        },
        None => match receiver.recv() {
            Ok((output, elapsed)) => output_to_result(index, label, output, elapsed),
            Err(_) => disconnected(label),
        },
    }
}

/// Log every failure, emit the completion summary, and apply the failure
/// propagation policy.
///
/// Under [`ErrorMode::Raise`] the lowest-index failure is returned, skipping
/// cancelled tasks when a concrete originating failure exists.
pub(crate) fn finalize(
    kind: StrategyKind,
    results: Vec<TaskResult>,
    error_mode: ErrorMode,
) -> Result<Vec<TaskResult>, ExecuteError> {
    let mut failed = 0usize;
    for result in results.iter().filter(|r| !r.is_success()) {
        failed += 1;
        if let Some(failure) = result.failure() {
            warn!(task = %result.name(), error = %failure, "task failed");
        }
    }

    info!(
        strategy = %kind,
        total = results.len(),
        successful = results.len() - failed,
        failed,
        "batch execution completed"
    );

    if error_mode == ErrorMode::Raise {
        let first = results
            .iter()
            .filter(|r| !r.is_success())
            .find(|r| {
                r.failure()
                    .map(|f| f.kind() != FailureKind::Cancelled)
                    .unwrap_or(false)
            })
            .or_else(|| results.iter().find(|r| !r.is_success()));

        if let Some(result) = first {
            if let Some(failure) = result.failure() {
                return Err(ExecuteError::TaskFailed {
                    index: result.index(),
                    name: result.name().to_string(),
                    failure: failure.clone(),
                });
            }
        }
    }

    Ok(results)
}
