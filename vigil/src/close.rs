//! vigil-close - close the facility and stop the exporter
//!
//! The reverse of vigil-open: flip the flag to closed, stop the daemon
//! gracefully (escalating after a bounded wait), remove the PID file, and
//! unregister the service. Warnings never abort; every step prints its
//! outcome. The daemon's 2 h auto-close timer is an independent fallback
//! for the flag itself.

mod style;

use std::time::{Duration, Instant};

use chrono::Utc;
use vigil_core::daemon::pidfile;
use vigil_core::service;
use vigil_core::{Config, Datastore, SyncLayer};

const STOP_WAIT: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(250);

fn main() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to create runtime");
    runtime.block_on(run());
}

async fn run() {
    style::header("vigil · close facility");

    // 1. Flip the flag to closed.
    match Config::load() {
        Ok(config) => match Datastore::new(&config.datastore) {
            Ok(store) => {
                let sync = SyncLayer::new(store);
                match sync.set_facility_open(false, Utc::now()).await {
                    Ok(()) => style::pass("Close flag", "facility marked closed"),
                    Err(e) => style::warn("Close flag", &e.to_string()),
                }
            }
            Err(e) => style::warn("Close flag", &e.to_string()),
        },
        Err(e) => style::warn("Close flag", &e.to_string()),
    }

    // 2. Stop the daemon gracefully, escalating after the bounded wait.
    let pid_path = Config::pid_file_path();
    match pidfile::live_pid(&pid_path) {
        Some(pid) => {
            terminate(pid, libc::SIGTERM);
            let deadline = Instant::now() + STOP_WAIT;
            while Instant::now() < deadline && pidfile::live_pid(&pid_path).is_some() {
                tokio::time::sleep(STOP_POLL).await;
            }
            if pidfile::live_pid(&pid_path).is_some() {
                terminate(pid, libc::SIGKILL);
                style::warn("Daemon", &format!("pid {pid} forced after {}s", STOP_WAIT.as_secs()));
            } else {
                style::pass("Daemon", &format!("pid {pid} stopped"));
            }
        }
        None => style::pass("Daemon", "not running"),
    }

    // 3. Remove the PID file when the daemon left it behind.
    if pid_path.exists() {
        match std::fs::remove_file(&pid_path) {
            Ok(()) => style::pass("PID file", "removed"),
            Err(e) => style::warn("PID file", &e.to_string()),
        }
    } else {
        style::pass("PID file", "already gone");
    }

    // 4. Unregister from the service manager.
    match service::unload() {
        Ok(()) => style::pass("Service", "unloaded"),
        Err(e) => style::warn("Service", &e.to_string()),
    }

    println!();
    println!("{}Facility closed.{}", style::BOLD, style::RESET);
}

fn terminate(pid: u32, signal: i32) {
    unsafe {
        libc::kill(pid as i32, signal);
    }
}
