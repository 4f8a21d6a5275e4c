//! vigil-open - open the facility after an end-to-end preflight
//!
//! Eight sequential checks walk the whole pipeline: environment, datastore,
//! deployment, site, service registration (self-healing), daemon process,
//! telemetry freshness, and finally the flag flip with read-back. Any FAIL
//! aborts with a reason and a non-zero exit; the flag is only ever flipped
//! by the final step.

mod style;

use std::time::{Duration, Instant};

use chrono::Utc;
use vigil_core::daemon::pidfile;
use vigil_core::service;
use vigil_core::store::rows::FacilityRow;
use vigil_core::tail::tail_lines;
use vigil_core::{Config, Datastore, SyncLayer};

const ERROR_LOG_TAIL: usize = 10;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const DAEMON_WAIT: Duration = Duration::from_secs(5);
const DAEMON_POLL: Duration = Duration::from_millis(500);
const TELEMETRY_FRESH_SECS: i64 = 10;
const TELEMETRY_RECHECK: Duration = Duration::from_secs(6);

fn main() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to create runtime");
    std::process::exit(runtime.block_on(run()));
}

async fn run() -> i32 {
    style::header("vigil · open facility");

    // 1. Environment
    let env_file = Config::env_file_path();
    if !env_file.exists() {
        style::fail("Environment", &format!("{} missing", env_file.display()));
        style::abort(
            "no .env file in the exporter directory",
            "create it with URL=<datastore endpoint> and KEY=<secret>",
        );
        return 1;
    }
    let config = match Config::load() {
        Ok(config) => {
            style::pass("Environment", "URL and KEY loaded");
            config
        }
        Err(e) => {
            style::fail("Environment", &e.to_string());
            style::abort(&e.to_string(), "set URL and KEY in the .env file");
            return 1;
        }
    };

    // 2. Datastore
    let sync = match Datastore::new(&config.datastore) {
        Ok(store) => SyncLayer::new(store),
        Err(e) => {
            style::fail("Datastore", &e.to_string());
            style::abort(&e.to_string(), "");
            return 1;
        }
    };
    let started = Instant::now();
    match sync.get_facility().await {
        Ok(Some(_)) => {
            style::pass(
                "Datastore",
                &format!("facility row read in {}ms", started.elapsed().as_millis()),
            );
        }
        Ok(None) => {
            style::fail("Datastore", "facility row missing");
            style::abort(
                "the facility singleton row does not exist",
                "seed facility_status with the id=1 row",
            );
            return 1;
        }
        Err(e) if e.is_auth() => {
            style::fail("Datastore", &e.to_string());
            style::abort("datastore rejected the credentials", "check KEY in the .env file");
            return 1;
        }
        Err(e) => {
            style::fail("Datastore", &e.to_string());
            style::abort("datastore unreachable", "check URL and network connectivity");
            return 1;
        }
    }

    // 3. Deployment health
    let http = match reqwest::Client::builder().timeout(HTTP_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            style::fail("Deployment", &e.to_string());
            style::abort(&e.to_string(), "");
            return 1;
        }
    };
    let health_url = format!("{}/api/health", config.datastore.site_url);
    match http.get(&health_url).send().await {
        Ok(response) if response.status().is_success() => {
            style::pass("Deployment", &health_url);
        }
        Ok(response) => {
            style::fail("Deployment", &format!("{} → {}", health_url, response.status()));
            style::abort("deployment health endpoint is unhealthy", "check the site deployment");
            return 1;
        }
        Err(e) => {
            style::fail("Deployment", &e.to_string());
            style::abort("deployment health endpoint unreachable", "check the site deployment");
            return 1;
        }
    }

    // 4. Site reachable
    match http.head(&config.datastore.site_url).send().await {
        Ok(response) if response.status().is_success() => {
            style::pass("Site", &config.datastore.site_url);
        }
        Ok(response) => {
            style::fail("Site", &format!("HEAD → {}", response.status()));
            style::abort("public site not responding", "");
            return 1;
        }
        Err(e) => {
            style::fail("Site", &e.to_string());
            style::abort("public site unreachable", "");
            return 1;
        }
    }

    // 5. Service registration (self-healing)
    if !service::plist_installed() {
        match service::install_plist() {
            Ok(()) => style::warn("Service", "plist symlink was missing, reinstalled"),
            Err(e) => {
                style::fail("Service", &e.to_string());
                style::abort(&e.to_string(), "reinstall the exporter directory");
                return 1;
            }
        }
    }
    if service::is_loaded() {
        style::pass("Service", "loaded");
    } else {
        match service::load() {
            Ok(()) => style::pass("Service", "loaded now"),
            Err(e) => {
                style::fail("Service", &e.to_string());
                style::abort(&e.to_string(), "");
                return 1;
            }
        }
    }

    // 6. Daemon process
    let pid_path = Config::pid_file_path();
    let mut pid = pidfile::live_pid(&pid_path);
    if pid.is_none() {
        let deadline = Instant::now() + DAEMON_WAIT;
        while Instant::now() < deadline {
            tokio::time::sleep(DAEMON_POLL).await;
            pid = pidfile::live_pid(&pid_path);
            if pid.is_some() {
                break;
            }
        }
    }
    let daemon_pid = match pid {
        Some(pid) => {
            style::pass("Daemon", &format!("pid {pid}"));
            pid
        }
        None => {
            style::fail("Daemon", "no live daemon process");
            print_error_log_tail();
            style::abort("the service manager did not start the daemon", "");
            return 1;
        }
    };

    // 7. Telemetry flowing
    let fresh = match sync.get_facility().await {
        Ok(Some(facility)) => {
            let age = Utc::now()
                .signed_duration_since(facility.updated_at)
                .num_seconds();
            if age < TELEMETRY_FRESH_SECS {
                style::pass("Telemetry", &format!("last sync {age}s ago"));
                Some(facility)
            } else {
                // Longer than one aggregate period: the instant must move.
                tokio::time::sleep(TELEMETRY_RECHECK).await;
                match sync.get_facility().await {
                    Ok(Some(again)) if again.updated_at > facility.updated_at => {
                        style::pass("Telemetry", "sync instant advanced");
                        Some(again)
                    }
                    _ => None,
                }
            }
        }
        _ => None,
    };
    let Some(facility) = fresh else {
        style::fail("Telemetry", "facility updated_at is not advancing");
        print_error_log_tail();
        style::abort("the daemon is not writing telemetry", "");
        return 1;
    };

    // 8. Flip
    if let Err(e) = sync.set_facility_open(true, Utc::now()).await {
        style::fail("Open flag", &e.to_string());
        style::abort("could not write the open flag", "");
        return 1;
    }
    match sync.get_facility().await {
        Ok(Some(row)) if row.is_open() => style::pass("Open flag", "read-back agrees"),
        _ => {
            style::fail("Open flag", "read-back disagrees");
            style::abort("flag write did not stick", "");
            return 1;
        }
    }

    print_summary(daemon_pid, &facility, &config);
    0
}

fn print_error_log_tail() {
    let path = Config::error_log_path();
    if let Ok(lines) = tail_lines(&path, ERROR_LOG_TAIL) {
        style::excerpt(&format!("{}", path.display()), &lines);
    }
}

fn print_summary(pid: u32, facility: &FacilityRow, config: &Config) {
    let age = Utc::now()
        .signed_duration_since(facility.updated_at)
        .num_seconds();

    let top_model = vigil_core::stats::read_model_stats(&config.model_stats_path())
        .into_iter()
        .max_by_key(|m| m.total)
        .map(|m| style::format_model_name(&m.model));

    println!();
    println!(
        "{}Facility open.{} daemon pid {pid} · {}/{} agents active · last sync {age}s ago",
        style::BOLD,
        style::RESET,
        facility.active_agents,
        facility.agent_count,
    );
    if let Some(model) = top_model {
        println!("{}Top model today: {model}{}", style::DIM, style::RESET);
    }
}
