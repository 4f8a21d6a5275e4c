//! vigil-daemon - the telemetry exporter daemon
//!
//! Runs the two-loop exporter until signalled, or performs a one-shot full
//! backfill with `--backfill`. Supervised by launchd in production; the
//! open/close commands manage its registration.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use vigil_core::daemon::Daemon;
use vigil_core::Config;

#[derive(Parser)]
#[command(name = "vigil-daemon")]
#[command(about = "Facility telemetry exporter daemon")]
#[command(version)]
struct Args {
    /// Recompute everything from the on-disk sources, then exit
    #[arg(long)]
    backfill: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    vigil_core::logging::init("info");

    let config = Config::load().context("failed to load configuration")?;
    let daemon = Daemon::new(config).context("failed to initialize daemon")?;

    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    // Dropping the run future on a signal releases the PID file; in-flight
    // datastore requests are allowed to complete but not awaited.
    tokio::select! {
        result = daemon.run(args.backfill) => {
            result.context("daemon exited with error")?;
        }
        _ = sigint.recv() => {
            tracing::info!("SIGINT received, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("SIGTERM received, shutting down");
        }
    }

    Ok(())
}
