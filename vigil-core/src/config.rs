//! Configuration loading and path resolution
//!
//! The exporter is configured through the process environment, optionally
//! seeded from a `.env` file in the exporter directory (`~/.vigil/.env`).
//! `URL` and `KEY` identify the remote datastore and are required; every
//! other knob has a default.
//!
//! Well-known locations:
//! - Exporter directory (owned): `~/.vigil/`
//! - Agent data root (external, read-only): `~/.claude/`
//! - Canonical organization root: `~/projects/`

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// PID file name inside the exporter directory.
pub const PID_FILE: &str = ".exporter.pid";

/// Persisted slug-mapping snapshot from the previous run.
pub const SLUG_MAP_FILE: &str = "slug-map.json";

/// Persisted visibility cache.
pub const VISIBILITY_CACHE_FILE: &str = "visibility-cache.json";

/// File launchd redirects the daemon's stderr into.
pub const ERROR_LOG_FILE: &str = "vigil.err.log";

/// Service-manager property list shipped with the exporter.
pub const PLIST_FILE: &str = "com.vigil.exporter.plist";

/// launchd label for the exporter service.
pub const SERVICE_LABEL: &str = "com.vigil.exporter";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    /// Remote datastore settings
    pub datastore: DatastoreConfig,
    /// Watcher loop period (agent state)
    pub watch_interval: Duration,
    /// Aggregate loop period
    pub sync_interval: Duration,
    /// Wall-clock gap that triggers a startup gap backfill
    pub gap_threshold: Duration,
    /// Continuous idle time before the daemon flips the facility closed
    pub auto_close: Duration,
    /// Agent data root (events.log, model-stats, stats-cache.json, projects/)
    pub data_dir: PathBuf,
    /// Canonical organization root holding project directories
    pub projects_root: PathBuf,
}

/// Remote datastore settings
#[derive(Debug, Clone)]
pub struct DatastoreConfig {
    /// Datastore endpoint (PostgREST-style REST root)
    pub url: String,
    /// Secret used as both `apikey` and bearer token
    pub key: String,
    /// Public site URL for deployment/reachability checks
    pub site_url: String,
    /// HTTP request timeout in seconds
    pub timeout_secs: u64,
}

impl Config {
    /// Load configuration from the environment, seeding it from
    /// `~/.vigil/.env` first when that file exists.
    ///
    /// Returns an error if `URL` or `KEY` is missing or empty.
    pub fn load() -> Result<Self> {
        let env_file = Self::env_file_path();
        if env_file.exists() {
            // Existing process env wins over the file, matching dotenv
            // semantics everywhere else this stack is deployed.
            let _ = dotenvy::from_path(&env_file);
        }

        let url = required_env("URL")?;
        let key = required_env("KEY")?;
        let site_url = env_or("SITE_URL", "https://vigil.sh");

        Ok(Config {
            datastore: DatastoreConfig {
                url: url.trim_end_matches('/').to_string(),
                key,
                site_url: site_url.trim_end_matches('/').to_string(),
                timeout_secs: env_parse("DATASTORE_TIMEOUT_SECS", 15),
            },
            watch_interval: Duration::from_millis(env_parse("WATCH_INTERVAL_MS", 250)),
            sync_interval: Duration::from_millis(env_parse("SYNC_INTERVAL_MS", 5_000)),
            gap_threshold: Duration::from_secs(env_parse("GAP_THRESHOLD_SECS", 120)),
            auto_close: Duration::from_secs(env_parse("AUTO_CLOSE_SECS", 7_200)),
            data_dir: env_path("DATA_DIR", || home_dir().join(".claude")),
            projects_root: env_path("PROJECTS_ROOT", || home_dir().join("projects")),
        })
    }

    /// Returns the exporter directory (`~/.vigil`), honoring `VIGIL_HOME`.
    pub fn exporter_dir() -> PathBuf {
        std::env::var_os("VIGIL_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir().join(".vigil"))
    }

    /// Returns the `.env` file path inside the exporter directory.
    pub fn env_file_path() -> PathBuf {
        Self::exporter_dir().join(".env")
    }

    /// Returns the PID file path.
    pub fn pid_file_path() -> PathBuf {
        Self::exporter_dir().join(PID_FILE)
    }

    /// Returns the persisted slug-map snapshot path.
    pub fn slug_map_path() -> PathBuf {
        Self::exporter_dir().join(SLUG_MAP_FILE)
    }

    /// Returns the visibility cache path.
    pub fn visibility_cache_path() -> PathBuf {
        Self::exporter_dir().join(VISIBILITY_CACHE_FILE)
    }

    /// Returns the error log path (launchd stderr redirect target).
    pub fn error_log_path() -> PathBuf {
        Self::exporter_dir().join(ERROR_LOG_FILE)
    }

    /// Returns the plist path shipped inside the exporter directory.
    pub fn plist_path() -> PathBuf {
        Self::exporter_dir().join(PLIST_FILE)
    }

    /// Returns the user's service directory (`~/Library/LaunchAgents`).
    pub fn launch_agents_dir() -> PathBuf {
        home_dir().join("Library").join("LaunchAgents")
    }

    /// Path of the append-only event log.
    pub fn events_log_path(&self) -> PathBuf {
        self.data_dir.join("events.log")
    }

    /// Path of the per-model token stats file.
    pub fn model_stats_path(&self) -> PathBuf {
        self.data_dir.join("model-stats")
    }

    /// Path of the aggregate stats cache.
    pub fn stats_cache_path(&self) -> PathBuf {
        self.data_dir.join("stats-cache.json")
    }

    /// Root of the per-session record files.
    pub fn sessions_root(&self) -> PathBuf {
        self.data_dir.join("projects")
    }
}

fn required_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::Config(format!(
            "{name} is required (set it in the environment or {})",
            Config::env_file_path().display()
        ))),
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path(name: &str, default: impl FnOnce() -> PathBuf) -> PathBuf {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exporter_files_use_well_known_names() {
        assert!(Config::pid_file_path().ends_with(PID_FILE));
        assert!(Config::slug_map_path().ends_with(SLUG_MAP_FILE));
        assert!(Config::env_file_path().ends_with(".env"));
        assert!(Config::plist_path().ends_with(PLIST_FILE));
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("VIGIL_TEST_PARSE", "not-a-number");
        let v: u64 = env_parse("VIGIL_TEST_PARSE", 42);
        assert_eq!(v, 42);
        std::env::remove_var("VIGIL_TEST_PARSE");
    }

    #[test]
    fn data_paths_derive_from_data_dir() {
        let config = Config {
            datastore: DatastoreConfig {
                url: "https://db.example.com".to_string(),
                key: "k".to_string(),
                site_url: "https://vigil.sh".to_string(),
                timeout_secs: 15,
            },
            watch_interval: Duration::from_millis(250),
            sync_interval: Duration::from_secs(5),
            gap_threshold: Duration::from_secs(120),
            auto_close: Duration::from_secs(7200),
            data_dir: PathBuf::from("/tmp/agent-data"),
            projects_root: PathBuf::from("/tmp/projects"),
        };
        assert_eq!(
            config.events_log_path(),
            PathBuf::from("/tmp/agent-data/events.log")
        );
        assert_eq!(
            config.sessions_root(),
            PathBuf::from("/tmp/agent-data/projects")
        );
    }
}
