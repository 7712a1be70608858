//! Strategy selection and lifecycle management.
//!
//! [`ConcurrencyContext`] owns one live strategy at a time and exposes the
//! batch API callers actually use. Swapping strategies at runtime goes
//! through [`reconfigure`](ConcurrencyContext::reconfigure), which builds the
//! replacement before disposing of the incumbent so a construction failure
//! leaves the context usable.

use std::sync::{Arc, RwLock};

use tracing::info;

use crate::config::{ExecutionConfig, RunOptions};
use crate::error::ExecuteError;
use crate::registry::TaskRegistry;
use crate::result::TaskResult;
use crate::strategy::{create_strategy, Strategy, StrategyKind};
use crate::task::Task;

struct ContextInner {
    kind: StrategyKind,
    config: ExecutionConfig,
    strategy: Option<Box<dyn Strategy>>,
}

/// Owner of the active execution strategy.
///
/// Cheap to share behind an `Arc`; `run` takes a read lock so batches on the
/// same strategy proceed concurrently, while `reconfigure` and `close` take
/// the write lock and wait for in-flight batches to drain.
pub struct ConcurrencyContext {
    inner: RwLock<ContextInner>,
    registry: Arc<TaskRegistry>,
}

impl ConcurrencyContext {
    /// Create a context with an immediately usable strategy.
    pub fn new(
        kind: StrategyKind,
        config: ExecutionConfig,
        registry: Arc<TaskRegistry>,
    ) -> Result<Self, ExecuteError> {
        let strategy = create_strategy(kind, &config, Arc::clone(&registry))?;
        Ok(Self {
            inner: RwLock::new(ContextInner {
                kind,
                config,
                strategy: Some(strategy),
            }),
            registry,
        })
    }

    /// Create a context from `FANOUT_*` environment variables.
    pub fn from_env(registry: Arc<TaskRegistry>) -> Result<Self, ExecuteError> {
        let kind = StrategyKind::from_env()?;
        let config = ExecutionConfig::from_env()?;
        Self::new(kind, config, registry)
    }

    /// Run a batch with the stored configuration.
    pub fn run(&self, tasks: Vec<Task>) -> Result<Vec<TaskResult>, ExecuteError> {
        self.run_with(tasks, &RunOptions::default())
    }

    /// Run a batch with per-call overrides applied on top of the stored
    /// configuration. The stored configuration is not modified.
    pub fn run_with(
        &self,
        tasks: Vec<Task>,
        options: &RunOptions,
    ) -> Result<Vec<TaskResult>, ExecuteError> {
        let inner = self.inner.read().unwrap();
        let strategy = inner.strategy.as_ref().ok_or(ExecuteError::Closed)?;
        let config = options.apply(&inner.config);
        strategy.execute(tasks, &config)
    }

    /// Replace the active strategy.
    ///
    /// The replacement is constructed first; on failure the incumbent keeps
    /// serving. In-flight batches on the old strategy complete before the
    /// swap happens.
    pub fn reconfigure(
        &self,
        kind: StrategyKind,
        config: ExecutionConfig,
    ) -> Result<(), ExecuteError> {
        let replacement = create_strategy(kind, &config, Arc::clone(&self.registry))?;

        let mut inner = self.inner.write().unwrap();
        if inner.strategy.is_none() {
            replacement.close()?;
            return Err(ExecuteError::Closed);
        }

        info!(from = %inner.kind, to = %kind, "switching execution strategy");
        let old = inner.strategy.replace(replacement);
        inner.kind = kind;
        inner.config = config;
        drop(inner);

        if let Some(old) = old {
            old.close()?;
        }
        Ok(())
    }

    /// Update the stored configuration, keeping the current strategy kind.
    ///
    /// Rebuilds the strategy only when a structural field changed; purely
    /// behavioral changes take effect on the next `run` without disturbing
    /// pooled workers.
    pub fn set_config(&self, config: ExecutionConfig) -> Result<(), ExecuteError> {
        // Decide and swap under one write lock so a concurrent reconfigure
        // cannot slip in between the comparison and the rebuild.
        let mut inner = self.inner.write().unwrap();
        if inner.strategy.is_none() {
            return Err(ExecuteError::Closed);
        }

        let stored = &inner.config;
        let structural = stored.worker_count != config.worker_count
            || stored.name_prefix != config.name_prefix
            || stored.max_tasks_per_worker != config.max_tasks_per_worker
            || stored.worker_program != config.worker_program;

        if !structural {
            inner.config = config;
            return Ok(());
        }

        // Build first; a construction failure leaves the incumbent serving.
        let replacement = create_strategy(inner.kind, &config, Arc::clone(&self.registry))?;
        let old = inner.strategy.replace(replacement);
        inner.config = config;
        drop(inner);

        if let Some(old) = old {
            old.close()?;
        }
        Ok(())
    }

    /// The active strategy kind, or `None` after `close`.
    pub fn strategy_kind(&self) -> Option<StrategyKind> {
        let inner = self.inner.read().unwrap();
        inner.strategy.as_ref().map(|s| s.kind())
    }

    /// A copy of the stored configuration.
    pub fn config(&self) -> ExecutionConfig {
        self.inner.read().unwrap().config.clone()
    }

    /// The registry this context dispatches `invoke` tasks against.
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Dispose of the active strategy. Idempotent; later calls to `run` or
    /// `reconfigure` return [`ExecuteError::Closed`].
    pub fn close(&self) -> Result<(), ExecuteError> {
        let strategy = self.inner.write().unwrap().strategy.take();
        match strategy {
            Some(strategy) => strategy.close(),
            None => Ok(()),
        }
    }
}

impl Drop for ConcurrencyContext {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for ConcurrencyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().unwrap();
        f.debug_struct("ConcurrencyContext")
            .field("kind", &inner.kind)
            .field("closed", &inner.strategy.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ErrorMode;
    use serde_json::json;
    use std::time::Duration;

    fn context(kind: StrategyKind) -> ConcurrencyContext {
        ConcurrencyContext::new(
            kind,
            ExecutionConfig::default().with_worker_count(2),
            Arc::new(TaskRegistry::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_run_on_thread_strategy() {
        let ctx = context(StrategyKind::Thread);
        assert_eq!(ctx.strategy_kind(), Some(StrategyKind::Thread));

        let tasks = vec![
            Task::blocking(|| Ok(json!(1))),
            Task::blocking(|| Ok(json!(2))),
        ];
        let results = ctx.run(tasks).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].value(), Some(&json!(1)));
        assert_eq!(results[1].value(), Some(&json!(2)));
    }

    #[test]
    fn test_run_with_overrides_do_not_stick() {
        let ctx = context(StrategyKind::Thread);

        let options = RunOptions::new().with_error_mode(ErrorMode::Raise);
        let err = ctx
            .run_with(
                vec![Task::blocking(|| Err("boom".to_string()))],
                &options,
            )
            .unwrap_err();
        assert!(matches!(err, ExecuteError::TaskFailed { .. }));

        // stored config still logs instead of raising
        assert_eq!(ctx.config().error_mode, ErrorMode::Log);
        let results = ctx
            .run(vec![Task::blocking(|| Err("boom".to_string()))])
            .unwrap();
        assert!(!results[0].is_success());
    }

    #[test]
    fn test_reconfigure_swaps_strategy() {
        let ctx = context(StrategyKind::Thread);
        ctx.reconfigure(StrategyKind::Coroutine, ExecutionConfig::default())
            .unwrap();
        assert_eq!(ctx.strategy_kind(), Some(StrategyKind::Coroutine));

        let results = ctx
            .run(vec![Task::future(|| async { Ok(json!("ok")) })])
            .unwrap();
        assert_eq!(results[0].value(), Some(&json!("ok")));
    }

    #[test]
    fn test_reconfigure_failure_keeps_incumbent() {
        let ctx = context(StrategyKind::Thread);
        let bad = ExecutionConfig::default().with_worker_count(0);
        assert!(ctx.reconfigure(StrategyKind::Thread, bad).is_err());

        // the old strategy still serves
        assert_eq!(ctx.strategy_kind(), Some(StrategyKind::Thread));
        let results = ctx.run(vec![Task::blocking(|| Ok(json!(1)))]).unwrap();
        assert!(results[0].is_success());
    }

    #[test]
    fn test_set_config_behavioral_change_keeps_strategy() {
        let ctx = context(StrategyKind::Thread);
        let updated = ctx.config().with_timeout(Duration::from_secs(1));
        ctx.set_config(updated).unwrap();
        assert_eq!(ctx.config().timeout, Some(Duration::from_secs(1)));
        assert_eq!(ctx.strategy_kind(), Some(StrategyKind::Thread));
    }

    #[test]
    fn test_set_config_structural_change_rebuilds() {
        let ctx = context(StrategyKind::Thread);
        let updated = ctx.config().with_worker_count(3);
        ctx.set_config(updated).unwrap();
        assert_eq!(ctx.config().worker_count, 3);

        let results = ctx.run(vec![Task::blocking(|| Ok(json!(1)))]).unwrap();
        assert!(results[0].is_success());
    }

    #[test]
    fn test_set_config_build_failure_keeps_incumbent() {
        let ctx = context(StrategyKind::Thread);
        let bad = ctx.config().with_worker_count(0);
        assert!(matches!(
            ctx.set_config(bad),
            Err(ExecuteError::Configuration(_))
        ));

        // the old strategy and config still serve
        assert_eq!(ctx.config().worker_count, 2);
        let results = ctx.run(vec![Task::blocking(|| Ok(json!(1)))]).unwrap();
        assert!(results[0].is_success());
    }

    #[test]
    fn test_set_config_preserves_current_kind() {
        let ctx = context(StrategyKind::Thread);
        ctx.reconfigure(StrategyKind::Coroutine, ExecutionConfig::default())
            .unwrap();

        // structural change rebuilds the strategy without changing its kind
        let updated = ctx.config().with_worker_count(8);
        ctx.set_config(updated).unwrap();
        assert_eq!(ctx.strategy_kind(), Some(StrategyKind::Coroutine));
        assert_eq!(ctx.config().worker_count, 8);

        let results = ctx
            .run(vec![Task::future(|| async { Ok(json!("still async")) })])
            .unwrap();
        assert_eq!(results[0].value(), Some(&json!("still async")));
    }

    #[test]
    fn test_close_is_idempotent_and_terminal() {
        let ctx = context(StrategyKind::Thread);
        ctx.close().unwrap();
        ctx.close().unwrap();
        assert_eq!(ctx.strategy_kind(), None);

        let err = ctx.run(vec![Task::blocking(|| Ok(json!(1)))]).unwrap_err();
        assert!(matches!(err, ExecuteError::Closed));
        let err = ctx
            .reconfigure(StrategyKind::Thread, ExecutionConfig::default())
            .unwrap_err();
        assert!(matches!(err, ExecuteError::Closed));
    }

    #[test]
    fn test_shared_across_threads() {
        let ctx = Arc::new(context(StrategyKind::Thread));

        let handles: Vec<_> = (0..3)
            .map(|i| {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || {
                    ctx.run(vec![Task::blocking(move || Ok(json!(i)))]).unwrap()
                })
            })
            .collect();

        for handle in handles {
            let results = handle.join().unwrap();
            assert_eq!(results.len(), 1);
            assert!(results[0].is_success());
        }
    }
}
