//! Execution configuration.
//!
//! One config type covers all three strategies; strategy-specific fields are
//! ignored by the engines that do not use them. Structural fields
//! (`worker_count`, `name_prefix`, `max_tasks_per_worker`, `worker_program`)
//! bind when a strategy is constructed; behavioral fields can additionally be
//! overridden per call through [`RunOptions`].

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecuteError;
use crate::strategy::StrategyKind;

/// Failure propagation policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Log the failure, record it in the task's result, keep going.
    #[default]
    Log,
    /// Await completion or timeout of all submitted tasks, then return the
    /// lowest-index failure from `execute`.
    Raise,
}

impl std::str::FromStr for ErrorMode {
    type Err = ExecuteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "log" | "" => Ok(ErrorMode::Log),
            "raise" => Ok(ErrorMode::Raise),
            other => Err(ExecuteError::Configuration(format!(
                "unknown error mode: {other}. Use 'log' or 'raise'"
            ))),
        }
    }
}

impl std::fmt::Display for ErrorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorMode::Log => f.write_str("log"),
            ErrorMode::Raise => f.write_str("raise"),
        }
    }
}

/// Per-context or per-call execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Pool size for the thread and process strategies. Zero is a
    /// configuration error.
    pub worker_count: usize,

    /// Failure propagation policy.
    pub error_mode: ErrorMode,

    /// Per-task budget. `None` means unbounded.
    #[serde(with = "option_duration_millis")]
    pub timeout: Option<Duration>,

    /// Prefix for worker thread names, for observability.
    pub name_prefix: String,

    /// Process strategy only: number of tasks a worker process executes
    /// before being recycled. `None` or `Some(0)` disables recycling.
    pub max_tasks_per_worker: Option<u32>,

    /// Coroutine strategy only: maximum simultaneously in-flight tasks.
    /// Zero is a configuration error.
    pub concurrency_limit: usize,

    /// Coroutine strategy only: when true, a failing task's error is
    /// embedded in its result instead of propagated.
    pub return_exceptions: bool,

    /// Process strategy only: worker executable to spawn. `None` means the
    /// current executable, which must route into [`crate::worker::run`].
    pub worker_program: Option<PathBuf>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            error_mode: ErrorMode::Log,
            timeout: None,
            name_prefix: "fanout".to_string(),
            max_tasks_per_worker: None,
            concurrency_limit: 16,
            return_exceptions: true,
            worker_program: None,
        }
    }
}

impl ExecutionConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from `FANOUT_*` environment variables.
    ///
    /// Recognized: `FANOUT_WORKERS`, `FANOUT_ERROR_MODE`, `FANOUT_TIMEOUT_MS`,
    /// `FANOUT_NAME_PREFIX`, `FANOUT_MAX_TASKS_PER_WORKER`,
    /// `FANOUT_CONCURRENCY_LIMIT`, `FANOUT_RETURN_EXCEPTIONS`,
    /// `FANOUT_WORKER_PROGRAM`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ExecuteError> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("FANOUT_WORKERS") {
            config.worker_count = parse_env("FANOUT_WORKERS", &v)?;
        }
        if let Ok(v) = std::env::var("FANOUT_ERROR_MODE") {
            config.error_mode = v.parse()?;
        }
        if let Ok(v) = std::env::var("FANOUT_TIMEOUT_MS") {
            let millis: u64 = parse_env("FANOUT_TIMEOUT_MS", &v)?;
            config.timeout = Some(Duration::from_millis(millis));
        }
        if let Ok(v) = std::env::var("FANOUT_NAME_PREFIX") {
            config.name_prefix = v;
        }
        if let Ok(v) = std::env::var("FANOUT_MAX_TASKS_PER_WORKER") {
            config.max_tasks_per_worker = Some(parse_env("FANOUT_MAX_TASKS_PER_WORKER", &v)?);
        }
        if let Ok(v) = std::env::var("FANOUT_CONCURRENCY_LIMIT") {
            config.concurrency_limit = parse_env("FANOUT_CONCURRENCY_LIMIT", &v)?;
        }
        if let Ok(v) = std::env::var("FANOUT_RETURN_EXCEPTIONS") {
            config.return_exceptions = parse_env("FANOUT_RETURN_EXCEPTIONS", &v)?;
        }
        if let Ok(v) = std::env::var("FANOUT_WORKER_PROGRAM") {
            config.worker_program = Some(PathBuf::from(v));
        }

        Ok(config)
    }

    /// Set the pool size.
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the failure propagation policy.
    pub fn with_error_mode(mut self, mode: ErrorMode) -> Self {
        self.error_mode = mode;
        self
    }

    /// Set the per-task budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Remove the per-task budget.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Set the worker thread name prefix.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Set the process-worker recycling threshold.
    pub fn with_max_tasks_per_worker(mut self, max: u32) -> Self {
        self.max_tasks_per_worker = Some(max);
        self
    }

    /// Set the coroutine concurrency limit.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Set whether the coroutine strategy embeds failures in results.
    pub fn with_return_exceptions(mut self, capture: bool) -> Self {
        self.return_exceptions = capture;
        self
    }

    /// Set the worker executable for the process strategy.
    pub fn with_worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker_program = Some(program.into());
        self
    }

    /// Validate the fields the given strategy kind relies on.
    pub fn validate_for(&self, kind: StrategyKind) -> Result<(), ExecuteError> {
        match kind {
            StrategyKind::Thread | StrategyKind::Process => {
                if self.worker_count == 0 {
                    return Err(ExecuteError::Configuration(
                        "worker_count must be positive".to_string(),
                    ));
                }
            }
            StrategyKind::Coroutine => {
                if self.concurrency_limit == 0 {
                    return Err(ExecuteError::Configuration(
                        "concurrency_limit must be positive".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T, ExecuteError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ExecuteError::Configuration(format!("invalid {name}: {e}")))
}

/// Per-call overrides merged onto the context's stored config.
///
/// Only behavioral fields are overridable per call; structural fields
/// (pool size, thread names, worker program, recycling threshold) bind when
/// the strategy is constructed and change via
/// [`ConcurrencyContext::reconfigure`](crate::context::ConcurrencyContext::reconfigure).
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Override the failure propagation policy.
    pub error_mode: Option<ErrorMode>,
    /// Override the per-task budget.
    pub timeout: Option<Duration>,
    /// Override the coroutine concurrency limit.
    pub concurrency_limit: Option<usize>,
    /// Override the coroutine capture mode.
    pub return_exceptions: Option<bool>,
}

impl RunOptions {
    /// No overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the failure propagation policy.
    pub fn with_error_mode(mut self, mode: ErrorMode) -> Self {
        self.error_mode = Some(mode);
        self
    }

    /// Override the per-task budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the coroutine concurrency limit.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    /// Override the coroutine capture mode.
    pub fn with_return_exceptions(mut self, capture: bool) -> Self {
        self.return_exceptions = Some(capture);
        self
    }

    /// Merge these overrides onto `base`.
    pub fn apply(&self, base: &ExecutionConfig) -> ExecutionConfig {
        let mut merged = base.clone();
        if let Some(mode) = self.error_mode {
            merged.error_mode = mode;
        }
        if let Some(timeout) = self.timeout {
            merged.timeout = Some(timeout);
        }
        if let Some(limit) = self.concurrency_limit {
            merged.concurrency_limit = limit;
        }
        if let Some(capture) = self.return_exceptions {
            merged.return_exceptions = capture;
        }
        merged
    }
}

/// Serde support for Option<Duration> as milliseconds
mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => (d.as_millis() as u64).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
