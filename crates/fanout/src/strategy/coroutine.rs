//! Coroutine strategy, for high-fan-out I/O-bound work.
//!
//! A single-threaded cooperative scheduler admits at most
//! `concurrency_limit` tasks at a time through a semaphore. Tasks waiting
//! for admission consume no worker resources, so batches far larger than
//! any sensible pool size are cheap.
//!
//! The strategy owns its runtime; `execute` drives the whole batch to
//! completion before returning, so callers stay synchronous. Blocking and
//! registry payloads are shifted onto the runtime's blocking pool so they
//! cannot stall the scheduler.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{ErrorMode, ExecutionConfig};
use crate::error::ExecuteError;
use crate::registry::TaskRegistry;
use crate::result::{TaskFailure, TaskResult};
use crate::task::{Task, TaskOutput, TaskPayload};

use super::{finalize, panic_message, run_payload_sync, Strategy, StrategyKind};

enum WorkOutcome {
    Finished(TaskOutput),
    TimedOut(Duration),
    Cancelled,
}

/// Semaphore-limited cooperative execution on a private current-thread
/// runtime.
pub struct CoroutineStrategy {
    runtime: Mutex<Option<Runtime>>,
    registry: Arc<TaskRegistry>,
}

impl CoroutineStrategy {
    pub fn new(config: &ExecutionConfig, registry: Arc<TaskRegistry>) -> Result<Self, ExecuteError> {
        config.validate_for(StrategyKind::Coroutine)?;

        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                ExecuteError::Configuration(format!("failed to build coroutine runtime: {e}"))
            })?;

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            registry,
        })
    }
}

impl Strategy for CoroutineStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Coroutine
    }

    fn execute(
        &self,
        tasks: Vec<Task>,
        config: &ExecutionConfig,
    ) -> Result<Vec<TaskResult>, ExecuteError> {
        config.validate_for(StrategyKind::Coroutine)?;

        // Holding the lock across the batch serializes concurrent callers,
        // which a single-threaded scheduler does anyway.
        let guard = self.runtime.lock().unwrap();
        let runtime = guard.as_ref().ok_or(ExecuteError::Closed)?;

        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            tasks = tasks.len(),
            limit = config.concurrency_limit,
            "scheduling coroutine batch"
        );

        let results = runtime.block_on(run_batch(tasks, config, Arc::clone(&self.registry)));
        // return_exceptions = false re-raises the first failure even in log
        // mode; the caller opted out of per-task failure capture entirely.
        let mode = if config.return_exceptions {
            config.error_mode
        } else {
            ErrorMode::Raise
        };
        finalize(StrategyKind::Coroutine, results, mode)
    }

    fn close(&self) -> Result<(), ExecuteError> {
        if let Some(runtime) = self.runtime.lock().unwrap().take() {
            runtime.shutdown_background();
            debug!("coroutine runtime shut down");
        }
        Ok(())
    }
}

async fn run_batch(
    tasks: Vec<Task>,
    config: &ExecutionConfig,
    registry: Arc<TaskRegistry>,
) -> Vec<TaskResult> {
    let semaphore = Arc::new(Semaphore::new(config.concurrency_limit));
    let token = CancellationToken::new();
    // Capture failures in results only when both knobs ask for it;
    // otherwise the first failure cancels everything still pending.
    let propagate = config.error_mode == ErrorMode::Raise || !config.return_exceptions;
    let timeout = config.timeout;

    let mut handles = Vec::with_capacity(tasks.len());
    for (index, task) in tasks.into_iter().enumerate() {
        let label = task.label(index);
        let handle = tokio::spawn(run_one(
            index,
            label.clone(),
            task.into_payload(),
            Arc::clone(&registry),
            Arc::clone(&semaphore),
            token.clone(),
            timeout,
            propagate,
        ));
        handles.push((index, label, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (index, label, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            // Panics are caught inside run_one; a join error here means the
            // task was aborted by runtime shutdown.
            Err(e) => TaskResult::failed(
                index,
                label,
                TaskFailure::Error(format!("task aborted: {e}")),
                Duration::ZERO,
            ),
        };
        results.push(result);
    }
    results
}

#[allow(clippy::too_many_arguments)]
async fn run_one(
    index: usize,
    label: String,
    payload: TaskPayload,
    registry: Arc<TaskRegistry>,
    semaphore: Arc<Semaphore>,
    token: CancellationToken,
    timeout: Option<Duration>,
    propagate: bool,
) -> TaskResult {
    let cancelled = |label| {
        TaskResult::failed(index, label, TaskFailure::Cancelled, Duration::ZERO)
    };

    // Admission: tasks past the concurrency limit wait here, where
    // cancellation can still reach them before any work starts.
    let permit = tokio::select! {
        biased;
        _ = token.cancelled() => return cancelled(label),
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return cancelled(label),
        },
    };

    let started = Instant::now();
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => WorkOutcome::Cancelled,
        outcome = bounded(payload, registry, timeout) => outcome,
    };
    drop(permit);
    let elapsed = started.elapsed();

    let result = match outcome {
        WorkOutcome::Finished(Ok(value)) => TaskResult::success(index, label, value, elapsed),
        WorkOutcome::Finished(Err(message)) => {
            TaskResult::failed(index, label, TaskFailure::Error(message), elapsed)
        }
        WorkOutcome::TimedOut(limit) => {
            TaskResult::failed(index, label, TaskFailure::Timeout { limit }, elapsed)
        }
        WorkOutcome::Cancelled => {
            TaskResult::failed(index, label, TaskFailure::Cancelled, elapsed)
        }
    };

    if propagate && !result.is_success() {
        token.cancel();
    }
    result
}

/// Run the payload with the per-task budget applied.
async fn bounded(
    payload: TaskPayload,
    registry: Arc<TaskRegistry>,
    timeout: Option<Duration>,
) -> WorkOutcome {
    let work = run_payload(payload, registry);
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(output) => WorkOutcome::Finished(output),
            Err(_) => WorkOutcome::TimedOut(limit),
        },
        None => WorkOutcome::Finished(work.await),
    }
}

async fn run_payload(payload: TaskPayload, registry: Arc<TaskRegistry>) -> TaskOutput {
    match payload {
        // Futures run on the scheduler thread, panics contained.
        TaskPayload::Future(f) => match AssertUnwindSafe(f()).catch_unwind().await {
            Ok(output) => output,
            Err(panic) => Err(format!("task panicked: {}", panic_message(panic))),
        },
        // Blocking work must not stall the scheduler.
        payload => {
            let joined =
                tokio::task::spawn_blocking(move || run_payload_sync(payload, &registry)).await;
            match joined {
                Ok(output) => output,
                Err(e) => Err(format!("blocking task aborted: {e}")),
            }
        }
    }
}

impl Drop for CoroutineStrategy {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::FailureKind;
    use rand::Rng;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn strategy() -> CoroutineStrategy {
        CoroutineStrategy::new(&ExecutionConfig::default(), Arc::new(TaskRegistry::new())).unwrap()
    }

    #[test]
    fn test_results_keep_submission_order() {
        let strategy = strategy();
        let config = ExecutionConfig::default();

        let mut rng = rand::thread_rng();
        let tasks: Vec<Task> = (0..8u64)
            .map(|i| {
                let delay = Duration::from_millis(rng.gen_range(0..40));
                Task::future(move || async move {
                    tokio::time::sleep(delay).await;
                    Ok(json!(i))
                })
            })
            .collect();

        let results = strategy.execute(tasks, &config).unwrap();
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.index(), i);
            assert_eq!(result.value(), Some(&json!(i as u64)));
        }
    }

    #[test_log::test]
    fn test_concurrency_limit_is_enforced() {
        let strategy = strategy();
        let config = ExecutionConfig::default().with_concurrency_limit(2);

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<Task> = (0..6)
            .map(|i| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                Task::future(move || async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(json!(i))
                })
            })
            .collect();

        let results = strategy.execute(tasks, &config).unwrap();
        assert_eq!(results.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak {:?}", peak);
    }

    #[test]
    fn test_capture_mode_embeds_failures() {
        let strategy = strategy();
        let config = ExecutionConfig::default(); // log + return_exceptions

        let tasks = vec![
            Task::future(|| async { Ok(json!(1)) }),
            Task::future(|| async { Err("boom".to_string()) }),
            Task::future(|| async { Ok(json!(3)) }),
        ];

        let results = strategy.execute(tasks, &config).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].value(), Some(&json!(1)));
        assert_eq!(
            results[1].failure(),
            Some(&TaskFailure::Error("boom".to_string()))
        );
        assert_eq!(results[2].value(), Some(&json!(3)));
    }

    #[test]
    fn test_raise_mode_returns_lowest_index_failure() {
        let strategy = strategy();
        let config = ExecutionConfig::default().with_error_mode(ErrorMode::Raise);

        let tasks = vec![
            Task::future(|| async { Ok(json!(0)) }),
            Task::future(|| async { Err("first".to_string()) }).with_name("bad"),
            Task::future(|| async { Ok(json!(2)) }),
        ];

        let err = strategy.execute(tasks, &config).unwrap_err();
        match err {
            ExecuteError::TaskFailed { index, name, .. } => {
                assert_eq!(index, 1);
                assert_eq!(name, "bad");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_first_failure_raises_when_not_capturing() {
        let strategy = strategy();
        // log mode alone would embed the failure; opting out of capture
        // must cancel the pending tasks and re-raise the originating error
        let config = ExecutionConfig::default()
            .with_concurrency_limit(1)
            .with_return_exceptions(false);

        let tasks = vec![
            Task::future(|| async { Err("origin".to_string()) }),
            Task::future(|| async { Ok(json!(1)) }),
            Task::future(|| async { Ok(json!(2)) }),
        ];

        let err = strategy.execute(tasks, &config).unwrap_err();
        match err {
            ExecuteError::TaskFailed { index, failure, .. } => {
                assert_eq!(index, 0);
                assert_eq!(failure, TaskFailure::Error("origin".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_not_capturing_never_reports_success_for_a_failed_batch() {
        let strategy = strategy();
        let config = ExecutionConfig::default().with_return_exceptions(false);

        let tasks = vec![
            Task::future(|| async { Err("boom".to_string()) }),
            Task::future(|| async { Ok(json!("healthy")) }),
        ];

        // the healthy sibling may have been cancelled, so the call as a
        // whole must not come back Ok
        assert!(strategy.execute(tasks, &config).is_err());
    }

    #[test]
    fn test_per_task_timeout() {
        let strategy = strategy();
        let config = ExecutionConfig::default().with_timeout(Duration::from_millis(50));

        let tasks = vec![
            Task::future(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(json!("slow"))
            }),
            Task::future(|| async { Ok(json!("fast")) }),
        ];

        let results = strategy.execute(tasks, &config).unwrap();
        assert_eq!(
            results[0].failure().map(TaskFailure::kind),
            Some(FailureKind::Timeout)
        );
        assert_eq!(results[1].value(), Some(&json!("fast")));
    }

    #[test]
    fn test_blocking_payload_uses_blocking_adapter() {
        let strategy = strategy();
        let config = ExecutionConfig::default();

        let tasks = vec![
            Task::blocking(|| {
                std::thread::sleep(Duration::from_millis(20));
                Ok(json!("blocked"))
            }),
            Task::future(|| async { Ok(json!("async")) }),
        ];

        let results = strategy.execute(tasks, &config).unwrap();
        assert_eq!(results[0].value(), Some(&json!("blocked")));
        assert_eq!(results[1].value(), Some(&json!("async")));
    }

    #[test]
    fn test_invoke_payload_dispatches_through_registry() {
        let mut registry = TaskRegistry::new();
        registry.register("double", |args| {
            let n = args.as_i64().ok_or("expected a number")?;
            Ok(json!(n * 2))
        });
        let strategy =
            CoroutineStrategy::new(&ExecutionConfig::default(), Arc::new(registry)).unwrap();

        let results = strategy
            .execute(vec![Task::invoke("double", json!(21))], &ExecutionConfig::default())
            .unwrap();
        assert_eq!(results[0].value(), Some(&json!(42)));
    }

    #[test]
    fn test_panicking_future_is_contained() {
        let strategy = strategy();
        let config = ExecutionConfig::default();

        let tasks = vec![
            Task::future(|| async { panic!("async kaboom") }),
            Task::future(|| async { Ok(json!("survivor")) }),
        ];

        let results = strategy.execute(tasks, &config).unwrap();
        match results[0].failure() {
            Some(TaskFailure::Error(msg)) => assert!(msg.contains("async kaboom")),
            other => panic!("expected panic failure, got {other:?}"),
        }
        assert_eq!(results[1].value(), Some(&json!("survivor")));
    }

    #[test]
    fn test_empty_batch() {
        let strategy = strategy();
        let results = strategy
            .execute(Vec::new(), &ExecutionConfig::default())
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_zero_limit_is_configuration_error() {
        let config = ExecutionConfig::default().with_concurrency_limit(0);
        assert!(matches!(
            CoroutineStrategy::new(&config, Arc::new(TaskRegistry::new())),
            Err(ExecuteError::Configuration(_))
        ));
    }

    #[test]
    fn test_execute_after_close_fails() {
        let strategy = strategy();
        strategy.close().unwrap();
        strategy.close().unwrap(); // idempotent

        let err = strategy
            .execute(
                vec![Task::future(|| async { Ok(json!(1)) })],
                &ExecutionConfig::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ExecuteError::Closed));
    }
}
