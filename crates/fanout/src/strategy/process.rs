//! Process pool strategy, for CPU-bound work.
//!
//! Each of `worker_count` parent-side handler threads owns one child worker
//! process and forwards jobs to it over newline-delimited JSON (see
//! [`crate::protocol`]). Only registry-based [`Task::invoke`] payloads can
//! cross the process boundary; closure payloads fail with a serialization
//! error attributed to that task alone.
//!
//! Children are spawned lazily on first dispatch and respawned transparently
//! when they die. `max_tasks_per_worker` retires a child after that many
//! tasks, bounding memory growth from per-process leaks in long-running
//! workloads.
//!
//! Known limitation: a task that times out leaves its child process busy
//! until the task finishes or `close` kills the child; during that window
//! the worker slot is occupied and the orphan consumes resources.

use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ExecutionConfig;
use crate::error::ExecuteError;
use crate::protocol::{WorkerRequest, WorkerResponse};
use crate::registry::TaskRegistry;
use crate::result::{TaskFailure, TaskResult};
use crate::task::{Task, TaskOutput, TaskPayload};
use crate::worker::WORKER_ENV;

use super::{await_reply, finalize, Strategy, StrategyKind};

struct ProcessJob {
    function: String,
    args: Value,
    reply: mpsc::Sender<(TaskOutput, Duration)>,
}

/// Pipes to a live child worker, parent side.
struct WorkerHandle {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    served: u32,
    next_id: u64,
}

enum Pending {
    Waiting(mpsc::Receiver<(TaskOutput, Duration)>),
    Ready(TaskResult),
}

/// Parallel execution on a bounded pool of isolated OS worker processes.
///
/// Worker processes re-initialize their runtime state from scratch; nothing
/// mutable is inherited from the caller. A crashing task therefore cannot
/// corrupt the caller or sibling workers.
pub struct ProcessStrategy {
    sender: Mutex<Option<Sender<ProcessJob>>>,
    handlers: Mutex<Vec<JoinHandle<()>>>,
    children: Vec<Arc<Mutex<Option<Child>>>>,
    closed: Arc<AtomicBool>,
}

impl ProcessStrategy {
    /// Create the pool. Children are spawned lazily, on first dispatch.
    ///
    /// The registry is accepted for interface parity but dispatch happens in
    /// the worker process, against the registry the worker program built.
    pub fn new(
        config: &ExecutionConfig,
        _registry: Arc<TaskRegistry>,
    ) -> Result<Self, ExecuteError> {
        config.validate_for(StrategyKind::Process)?;

        let program = match &config.worker_program {
            Some(path) => path.clone(),
            None => std::env::current_exe().map_err(|e| {
                ExecuteError::Configuration(format!("cannot resolve worker program: {e}"))
            })?,
        };

        let (sender, receiver) = crossbeam_channel::unbounded::<ProcessJob>();
        let closed = Arc::new(AtomicBool::new(false));
        let mut handlers = Vec::with_capacity(config.worker_count);
        let mut children = Vec::with_capacity(config.worker_count);

        for i in 0..config.worker_count {
            let slot = Arc::new(Mutex::new(None));
            let handle = spawn_handler(
                format!("{}-{}", config.name_prefix, i),
                receiver.clone(),
                program.clone(),
                config.max_tasks_per_worker,
                Arc::clone(&slot),
                Arc::clone(&closed),
            )?;
            children.push(slot);
            handlers.push(handle);
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handlers: Mutex::new(handlers),
            children,
            closed,
        })
    }
}

impl Strategy for ProcessStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Process
    }

    fn execute(
        &self,
        tasks: Vec<Task>,
        config: &ExecutionConfig,
    ) -> Result<Vec<TaskResult>, ExecuteError> {
        config.validate_for(StrategyKind::Process)?;

        let sender = {
            let guard = self.sender.lock().unwrap();
            guard.as_ref().cloned().ok_or(ExecuteError::Closed)?
        };

        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        debug!(tasks = tasks.len(), "submitting batch to process pool");

        let mut pending = Vec::with_capacity(tasks.len());
        for (index, task) in tasks.into_iter().enumerate() {
            let label = task.label(index);
            match task.into_payload() {
                TaskPayload::Invoke { function, args } => {
                    let (reply, receiver) = mpsc::channel();
                    sender
                        .send(ProcessJob {
                            function,
                            args,
                            reply,
                        })
                        .map_err(|_| ExecuteError::Closed)?;
                    pending.push((index, label, Pending::Waiting(receiver)));
                }
                // Closures cannot be serialized; fail this task, not the batch.
                _ => {
                    let failure = TaskFailure::Serialization(
                        "process strategy requires a registered function payload".to_string(),
                    );
                    pending.push((
                        index,
                        label.clone(),
                        Pending::Ready(TaskResult::failed(index, label, failure, Duration::ZERO)),
                    ));
                }
            }
        }

        let mut results = Vec::with_capacity(pending.len());
        for (index, label, entry) in pending {
            let result = match entry {
                Pending::Waiting(receiver) => await_reply(index, label, receiver, config.timeout),
                Pending::Ready(result) => result,
            };
            results.push(result);
        }

        finalize(StrategyKind::Process, results, config.error_mode)
    }

    fn close(&self) -> Result<(), ExecuteError> {
        let sender = self.sender.lock().unwrap().take();
        if sender.is_none() {
            return Ok(());
        }
        self.closed.store(true, Ordering::SeqCst);
        drop(sender);

        // Kill live children so handlers blocked on a reply unblock.
        for slot in &self.children {
            if let Some(child) = slot.lock().unwrap().as_mut() {
                let _ = child.kill();
            }
        }

        for handle in self.handlers.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
        debug!("process pool closed");
        Ok(())
    }
}

impl Drop for ProcessStrategy {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn spawn_handler(
    name: String,
    receiver: Receiver<ProcessJob>,
    program: PathBuf,
    max_tasks: Option<u32>,
    slot: Arc<Mutex<Option<Child>>>,
    closed: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, ExecuteError> {
    thread::Builder::new()
        .name(name)
        .spawn(move || handler_loop(receiver, &program, max_tasks, &slot, &closed))
        .map_err(|e| ExecuteError::Configuration(format!("failed to spawn worker handler: {e}")))
}

fn handler_loop(
    receiver: Receiver<ProcessJob>,
    program: &Path,
    max_tasks: Option<u32>,
    slot: &Arc<Mutex<Option<Child>>>,
    closed: &AtomicBool,
) {
    let mut handle: Option<WorkerHandle> = None;

    while let Ok(job) = receiver.recv() {
        if closed.load(Ordering::SeqCst) {
            let _ = job
                .reply
                .send((Err("strategy closed before task ran".to_string()), Duration::ZERO));
            continue;
        }

        let started = Instant::now();

        if handle.is_none() {
            match spawn_worker(program) {
                Ok((child, worker)) => {
                    debug!(pid = child.id(), "spawned worker process");
                    *slot.lock().unwrap() = Some(child);
                    handle = Some(worker);
                }
                Err(e) => {
                    let _ = job.reply.send((
                        Err(format!("failed to spawn worker process: {e}")),
                        started.elapsed(),
                    ));
                    continue;
                }
            }
        }
        let Some(worker) = handle.as_mut() else {
            continue;
        };

        match dispatch(worker, &job.function, job.args) {
            Ok(output) => {
                // Receiver may be gone if the task already timed out.
                let _ = job.reply.send((output, started.elapsed()));
                worker.served += 1;
                if let Some(max) = max_tasks {
                    if max > 0 && worker.served >= max {
                        debug!(served = worker.served, "recycling worker process");
                        retire(&mut handle, slot, true);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "worker process failed; will respawn on next task");
                retire(&mut handle, slot, false);
                let _ = job.reply.send((
                    Err(format!("worker process terminated unexpectedly: {e}")),
                    started.elapsed(),
                ));
            }
        }
    }

    retire(&mut handle, slot, true);
}

fn spawn_worker(program: &Path) -> io::Result<(Child, WorkerHandle)> {
    let mut child = Command::new(program)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .env(WORKER_ENV, "1")
        .spawn()?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "worker stdin unavailable"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "worker stdout unavailable"))?;

    Ok((
        child,
        WorkerHandle {
            stdin,
            stdout: BufReader::new(stdout),
            served: 0,
            next_id: 1,
        },
    ))
}

/// Send one request and read its response. Any I/O or protocol error means
/// the worker is no longer trustworthy and must be replaced.
fn dispatch(worker: &mut WorkerHandle, function: &str, args: Value) -> io::Result<TaskOutput> {
    let id = worker.next_id;
    worker.next_id += 1;

    let request = WorkerRequest {
        id,
        function: function.to_string(),
        args,
    };
    let line = serde_json::to_string(&request)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(worker.stdin, "{line}")?;
    worker.stdin.flush()?;

    let mut response_line = String::new();
    let read = worker.stdout.read_line(&mut response_line)?;
    if read == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "worker closed its stdout",
        ));
    }

    let response: WorkerResponse = serde_json::from_str(response_line.trim())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if response.id() != id {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("response id {} does not match request id {id}", response.id()),
        ));
    }

    Ok(match response {
        WorkerResponse::Completed { output, .. } => Ok(output),
        WorkerResponse::Failed { error, .. } => Err(error),
    })
}

/// Drop the pipes (EOF retires an idle worker cleanly) and reap the child.
fn retire(handle: &mut Option<WorkerHandle>, slot: &Arc<Mutex<Option<Child>>>, graceful: bool) {
    handle.take();
    if let Some(mut child) = slot.lock().unwrap().take() {
        if !graceful {
            let _ = child.kill();
        }
        let _ = child.wait();
    }
}
