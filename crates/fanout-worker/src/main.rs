//! Standalone worker executable for the process strategy.
//!
//! The parent spawns this binary once per pool slot, sets the worker
//! environment marker, and speaks newline-delimited JSON over stdin/stdout.
//! Logs go to stderr so stdout stays a clean protocol channel.

mod functions;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fanout=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let registry = functions::build_registry();
    fanout::worker::run(&registry)?;
    Ok(())
}
