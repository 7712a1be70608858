//! Task model: one unit of submitted work.
//!
//! A task is a payload plus an optional human-readable name used for logging
//! and tracing. Tasks are immutable once submitted; ownership moves into the
//! executing strategy for the duration of the call and is never retained.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use serde_json::Value;

/// Outcome of running a task's payload: a JSON value or an error message.
pub type TaskOutput = Result<Value, String>;

pub(crate) type BlockingFn = Box<dyn FnOnce() -> TaskOutput + Send + 'static>;
pub(crate) type FutureFn = Box<dyn FnOnce() -> BoxFuture<'static, TaskOutput> + Send + 'static>;

/// The work carried by a [`Task`].
pub enum TaskPayload {
    /// A blocking callable. Runs directly on thread-pool workers; the
    /// coroutine strategy routes it through the explicit blocking adapter.
    Blocking(BlockingFn),
    /// A cooperatively suspending unit of work.
    Future(FutureFn),
    /// A call to a function registered in a [`TaskRegistry`]. The only
    /// payload that can cross the process boundary.
    ///
    /// [`TaskRegistry`]: crate::registry::TaskRegistry
    Invoke {
        /// Registered function name.
        function: String,
        /// JSON arguments handed to the function.
        args: Value,
    },
}

impl fmt::Debug for TaskPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPayload::Blocking(_) => f.write_str("Blocking"),
            TaskPayload::Future(_) => f.write_str("Future"),
            TaskPayload::Invoke { function, .. } => {
                f.debug_struct("Invoke").field("function", function).finish()
            }
        }
    }
}

/// One unit of submitted work.
///
/// # Example
///
/// ```
/// use fanout::Task;
/// use serde_json::json;
///
/// let a = Task::blocking(|| Ok(json!(1))).with_name("fetch-page");
/// let b = Task::invoke("resize_image", json!({ "width": 64 }));
/// assert_eq!(a.name(), Some("fetch-page"));
/// assert_eq!(b.name(), None);
/// ```
#[derive(Debug)]
pub struct Task {
    name: Option<String>,
    payload: TaskPayload,
}

impl Task {
    /// Create a task from a blocking callable.
    pub fn blocking<F>(f: F) -> Self
    where
        F: FnOnce() -> TaskOutput + Send + 'static,
    {
        Self {
            name: None,
            payload: TaskPayload::Blocking(Box::new(f)),
        }
    }

    /// Create a task from a closure producing a future.
    ///
    /// The closure is invoked by the executing strategy, so no work starts
    /// before the task is admitted by the concurrency limiter.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = TaskOutput> + Send + 'static,
    {
        Self {
            name: None,
            payload: TaskPayload::Future(Box::new(move || Box::pin(f()))),
        }
    }

    /// Create a task calling a registered function with JSON arguments.
    ///
    /// This is the only task form accepted by the process strategy, since
    /// closures cannot cross the process boundary.
    pub fn invoke(function: impl Into<String>, args: Value) -> Self {
        Self {
            name: None,
            payload: TaskPayload::Invoke {
                function: function.into(),
                args,
            },
        }
    }

    /// Attach a human-readable name used for logging and tracing.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The task's name, if one was set.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Resolved label used in logs and results: the explicit name, the
    /// invoked function name, or `task-{index}`.
    pub(crate) fn label(&self, index: usize) -> String {
        match (&self.name, &self.payload) {
            (Some(name), _) => name.clone(),
            (None, TaskPayload::Invoke { function, .. }) => function.clone(),
            _ => format!("task-{index}"),
        }
    }

    pub(crate) fn into_payload(self) -> TaskPayload {
        self.payload
    }
}
