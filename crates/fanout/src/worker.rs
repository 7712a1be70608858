//! Worker-process side of the process strategy.
//!
//! A worker is a plain executable that builds a [`TaskRegistry`] and calls
//! [`run`], which serves newline-delimited JSON requests on stdin until EOF.
//! The shipped `fanout-worker` binary does exactly this; hosts embedding the
//! loop in their own binary can gate on [`requested`] early in `main`:
//!
//! ```ignore
//! fn main() -> anyhow::Result<()> {
//!     if fanout::worker::requested() {
//!         let registry = build_registry();
//!         fanout::worker::run(&registry)?;
//!         return Ok(());
//!     }
//!     // ... normal startup
//! }
//! ```
//!
//! Stdout is the protocol channel; anything the worker wants to log must go
//! to stderr.

use std::io::{self, BufRead, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::debug;

use crate::protocol::{WorkerRequest, WorkerResponse};
use crate::registry::TaskRegistry;
use crate::strategy::panic_message;

/// Environment variable set by the process strategy on spawned workers.
pub const WORKER_ENV: &str = "FANOUT_WORKER";

/// Whether this process was spawned as a worker by the process strategy.
pub fn requested() -> bool {
    std::env::var_os(WORKER_ENV).is_some()
}

/// Serve requests from stdin until EOF.
///
/// Each line is one [`WorkerRequest`]; each response is one line on stdout.
/// Task errors and panics are reported as [`WorkerResponse::Failed`] and do
/// not terminate the loop. EOF on stdin is a clean shutdown, which is how
/// the parent retires a worker during recycling.
pub fn run(registry: &TaskRegistry) -> io::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    debug!(functions = registry.len(), "worker loop started");

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(request) => handle(registry, request),
            Err(e) => WorkerResponse::Failed {
                id: 0,
                error: format!("malformed request: {e}"),
            },
        };

        let text = serde_json::to_string(&response)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(out, "{text}")?;
        out.flush()?;
    }

    debug!("worker loop finished");
    Ok(())
}

fn handle(registry: &TaskRegistry, request: WorkerRequest) -> WorkerResponse {
    let WorkerRequest { id, function, args } = request;
    debug!(id, function = %function, "executing request");

    let outcome = catch_unwind(AssertUnwindSafe(|| registry.dispatch(&function, args)));
    match outcome {
        Ok(Ok(output)) => WorkerResponse::Completed { id, output },
        Ok(Err(error)) => WorkerResponse::Failed { id, error },
        Err(panic) => WorkerResponse::Failed {
            id,
            error: format!("task panicked: {}", panic_message(panic)),
        },
    }
}
