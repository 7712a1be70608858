//! Thread pool strategy, for blocking I/O-bound work.
//!
//! A fixed pool of named OS threads pulls jobs from a shared queue. Each
//! submitted task carries its own reply channel keyed by submission index;
//! collection walks the reply channels in index order, which restores
//! submission order no matter when tasks actually complete.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::debug;

use crate::config::ExecutionConfig;
use crate::error::ExecuteError;
use crate::registry::TaskRegistry;
use crate::result::TaskResult;
use crate::task::{Task, TaskOutput, TaskPayload};

use super::{await_reply, finalize, run_payload_sync, Strategy, StrategyKind};

struct Job {
    payload: TaskPayload,
    reply: mpsc::Sender<(TaskOutput, Duration)>,
}

/// Parallel execution on a bounded pool of OS threads.
///
/// The pool is created at construction and shared by every `execute` call,
/// including concurrent calls from multiple call sites. Worker threads are
/// named `{name_prefix}-{index}` for traceability.
pub struct ThreadStrategy {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadStrategy {
    /// Spawn `config.worker_count` workers.
    pub fn new(
        config: &ExecutionConfig,
        registry: Arc<TaskRegistry>,
    ) -> Result<Self, ExecuteError> {
        config.validate_for(StrategyKind::Thread)?;

        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(config.worker_count);

        for i in 0..config.worker_count {
            let receiver = receiver.clone();
            let registry = Arc::clone(&registry);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", config.name_prefix, i))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        let started = Instant::now();
                        let output = run_payload_sync(job.payload, &registry);
                        // Receiver may be gone if the task already timed out;
                        // the late result is discarded.
                        let _ = job.reply.send((output, started.elapsed()));
                    }
                })
                .map_err(|e| {
                    ExecuteError::Configuration(format!("failed to spawn worker thread: {e}"))
                })?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }
}

impl Strategy for ThreadStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Thread
    }

    fn execute(
        &self,
        tasks: Vec<Task>,
        config: &ExecutionConfig,
    ) -> Result<Vec<TaskResult>, ExecuteError> {
        config.validate_for(StrategyKind::Thread)?;

        let sender = {
            let guard = self.sender.lock().unwrap();
            guard.as_ref().cloned().ok_or(ExecuteError::Closed)?
        };

        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        debug!(tasks = tasks.len(), "submitting batch to thread pool");

        let mut pending = Vec::with_capacity(tasks.len());
        for (index, task) in tasks.into_iter().enumerate() {
            let label = task.label(index);
            let (reply, receiver) = mpsc::channel();
            sender
                .send(Job {
                    payload: task.into_payload(),
                    reply,
                })
                .map_err(|_| ExecuteError::Closed)?;
            pending.push((index, label, receiver));
        }

        // The worker thread behind a timed-out task cannot be force-stopped;
        // it keeps running and its eventual reply is discarded.
        let mut results = Vec::with_capacity(pending.len());
        for (index, label, receiver) in pending {
            results.push(await_reply(index, label, receiver, config.timeout));
        }

        finalize(StrategyKind::Thread, results, config.error_mode)
    }

    fn close(&self) -> Result<(), ExecuteError> {
        let sender = self.sender.lock().unwrap().take();
        if sender.is_none() {
            return Ok(());
        }
        drop(sender);

        for handle in self.workers.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
        debug!("thread pool closed");
        Ok(())
    }
}

impl Drop for ThreadStrategy {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
