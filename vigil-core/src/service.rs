//! Service-manager (launchd) registration
//!
//! The exporter ships its plist inside the exporter directory; registration
//! is a symlink into the user's `~/Library/LaunchAgents` plus a
//! `launchctl load`. The open command self-heals both halves before
//! checking the daemon, and the close command unloads.

use crate::config::{Config, PLIST_FILE, SERVICE_LABEL};
use crate::error::{Error, Result};
use std::path::PathBuf;
use std::process::Command;

/// Path of the plist symlink inside the user's service directory.
pub fn installed_plist_path() -> PathBuf {
    Config::launch_agents_dir().join(PLIST_FILE)
}

/// Whether the plist (symlink or file) is present in the service directory.
pub fn plist_installed() -> bool {
    installed_plist_path().symlink_metadata().is_ok()
}

/// Symlink the exporter's plist into the service directory. Fails when the
/// source plist is missing from the exporter directory.
pub fn install_plist() -> Result<()> {
    let source = Config::plist_path();
    if !source.exists() {
        return Err(Error::Service(format!(
            "plist missing from exporter directory: {}",
            source.display()
        )));
    }
    let target = installed_plist_path();
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(&source, &target)?;
    #[cfg(not(unix))]
    std::fs::copy(&source, &target).map(|_| ())?;

    Ok(())
}

/// Whether the service is currently loaded in the service manager.
pub fn is_loaded() -> bool {
    Command::new("launchctl")
        .args(["list", SERVICE_LABEL])
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Load the service. "Already loaded" counts as success.
pub fn load() -> Result<()> {
    let output = Command::new("launchctl")
        .arg("load")
        .arg(installed_plist_path())
        .output()
        .map_err(|e| Error::Service(format!("launchctl load failed to spawn: {e}")))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("already loaded") {
        return Ok(());
    }
    Err(Error::Service(format!(
        "launchctl load failed: {}",
        stderr.trim()
    )))
}

/// Unload the service. A service that was not loaded is not an error.
pub fn unload() -> Result<()> {
    let output = Command::new("launchctl")
        .arg("unload")
        .arg(installed_plist_path())
        .output()
        .map_err(|e| Error::Service(format!("launchctl unload failed to spawn: {e}")))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("Could not find") || stderr.contains("not loaded") {
        return Ok(());
    }
    Err(Error::Service(format!(
        "launchctl unload failed: {}",
        stderr.trim()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installed_path_is_under_launch_agents() {
        let path = installed_plist_path();
        assert!(path.ends_with(PLIST_FILE));
        assert!(path
            .to_string_lossy()
            .contains("Library/LaunchAgents"));
    }

    #[test]
    fn install_fails_without_source_plist() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("VIGIL_HOME", dir.path());
        let result = install_plist();
        std::env::remove_var("VIGIL_HOME");
        assert!(matches!(result, Err(Error::Service(_))));
    }
}
