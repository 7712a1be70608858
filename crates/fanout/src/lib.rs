//! # Fanout
//!
//! A batch execution core: submit a flat list of independent tasks, pick a
//! concurrency strategy, get one result per task back in submission order.
//!
//! ## Features
//!
//! - **Three interchangeable strategies**: thread pool for blocking I/O,
//!   process pool for CPU-bound work, semaphore-limited coroutines for
//!   high-fan-out async work
//! - **Deterministic results**: output order always matches submission order,
//!   regardless of completion order
//! - **Failure isolation**: one task's error, timeout, or panic never
//!   corrupts its siblings' results
//! - **Per-task timeouts** and a log-or-raise failure propagation policy
//! - **Runtime strategy switching** without touching call sites
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ConcurrencyContext                        │
//! │  (owns the active strategy, merges per-call overrides)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Strategy                              │
//! │  (thread pool │ process pool │ coroutine scheduler)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Vec<TaskResult>                          │
//! │  (submission order, one entry per task, success or failure) │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use fanout::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(TaskRegistry::new());
//! let ctx = ConcurrencyContext::new(
//!     StrategyKind::Thread,
//!     ExecutionConfig::new().with_worker_count(2),
//!     registry,
//! )?;
//!
//! let results = ctx.run(vec![
//!     Task::blocking(|| Ok(json!(1))).with_name("first"),
//!     Task::blocking(|| Ok(json!(2))).with_name("second"),
//! ])?;
//!
//! assert_eq!(results[0].value(), Some(&json!(1)));
//! assert_eq!(results[1].value(), Some(&json!(2)));
//! # Ok::<(), fanout::ExecuteError>(())
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod result;
pub mod strategy;
pub mod task;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ErrorMode, ExecutionConfig, RunOptions};
    pub use crate::context::ConcurrencyContext;
    pub use crate::error::ExecuteError;
    pub use crate::registry::{TaskHandler, TaskRegistry};
    pub use crate::result::{FailureKind, TaskFailure, TaskResult};
    pub use crate::strategy::{create_strategy, Strategy, StrategyKind};
    pub use crate::task::{Task, TaskOutput, TaskPayload};
}

pub use config::{ErrorMode, ExecutionConfig, RunOptions};
pub use context::ConcurrencyContext;
pub use error::ExecuteError;
pub use registry::TaskRegistry;
pub use result::{FailureKind, TaskFailure, TaskResult};
pub use strategy::{
    CoroutineStrategy, ProcessStrategy, Strategy, StrategyKind, ThreadStrategy,
};
pub use task::{Task, TaskOutput};
