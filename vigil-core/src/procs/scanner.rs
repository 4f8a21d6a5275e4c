//! Agent process scanner
//!
//! Enumerates processes whose command name equals the agent binary, resolves
//! each PID's working directory, and marks a process raw-active when its CPU
//! exceeds a small threshold or it has a child from the wake-inhibitor
//! binary (the agent spawns one while performing work). sysinfo cannot read
//! another process's cwd on macOS, so an `lsof` fallback covers that case.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use sysinfo::{ProcessesToUpdate, System};

/// Command name of the supervised coding-agent binary.
pub const AGENT_BINARY: &str = "claude";

/// Child binary the agent spawns while performing sustained work.
pub const WAKE_INHIBITOR: &str = "caffeinate";

/// CPU percentage above which a process counts as raw-active.
pub const CPU_ACTIVE_THRESHOLD: f32 = 1.0;

/// One observed agent process.
#[derive(Debug, Clone)]
pub struct AgentProcess {
    pub pid: u32,
    pub cwd: Option<PathBuf>,
    /// Project directory name under the organization root, when the cwd
    /// sits inside it.
    pub project_dir: Option<String>,
    pub cpu_percent: f32,
    pub raw_active: bool,
}

/// Scans the host process table for agent processes.
pub struct ProcessScanner {
    system: System,
    projects_root: PathBuf,
}

impl ProcessScanner {
    pub fn new(projects_root: PathBuf) -> Self {
        Self {
            system: System::new(),
            projects_root,
        }
    }

    /// Scan once. CPU figures are deltas since the previous scan, which is
    /// what the sliding window wants.
    pub fn scan(&mut self) -> Vec<AgentProcess> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);

        // parent pid → wake-inhibitor child present
        let mut inhibitor_children: HashMap<u32, bool> = HashMap::new();
        for process in self.system.processes().values() {
            if process.name().to_string_lossy() == WAKE_INHIBITOR {
                if let Some(parent) = process.parent() {
                    inhibitor_children.insert(parent.as_u32(), true);
                }
            }
        }

        let mut agents = Vec::new();
        for (pid, process) in self.system.processes() {
            if process.name().to_string_lossy() != AGENT_BINARY {
                continue;
            }
            let pid = pid.as_u32();
            let cpu = process.cpu_usage();
            let cwd = process
                .cwd()
                .map(Path::to_path_buf)
                .or_else(|| cwd_via_lsof(pid));
            let raw_active = cpu > CPU_ACTIVE_THRESHOLD
                || inhibitor_children.get(&pid).copied().unwrap_or(false);

            agents.push(AgentProcess {
                pid,
                project_dir: cwd
                    .as_deref()
                    .and_then(|c| project_dir_of(c, &self.projects_root)),
                cwd,
                cpu_percent: cpu,
                raw_active,
            });
        }

        agents.sort_by_key(|a| a.pid);
        agents
    }
}

/// Whether a PID is alive (signal 0 probe).
pub fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// First path component under the organization root, when `cwd` is inside
/// it. Deeper cwds (monorepo subdirectories) map to the containing project.
fn project_dir_of(cwd: &Path, projects_root: &Path) -> Option<String> {
    let relative = cwd.strip_prefix(projects_root).ok()?;
    relative
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
}

/// Fallback cwd resolution for hosts where sysinfo cannot read another
/// process's working directory.
fn cwd_via_lsof(pid: u32) -> Option<PathBuf> {
    let output = std::process::Command::new("lsof")
        .args(["-a", "-p", &pid.to_string(), "-d", "cwd", "-Fn"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if let Some(path) = line.strip_prefix('n') {
            if path.starts_with('/') {
                return Some(PathBuf::from(path));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_dir_is_first_component_under_root() {
        let root = Path::new("/home/dev/projects");
        assert_eq!(
            project_dir_of(Path::new("/home/dev/projects/alpha"), root),
            Some("alpha".to_string())
        );
        assert_eq!(
            project_dir_of(Path::new("/home/dev/projects/alpha/apps/cli"), root),
            Some("alpha".to_string())
        );
        assert_eq!(project_dir_of(Path::new("/tmp/elsewhere"), root), None);
        assert_eq!(project_dir_of(root, root), None);
    }

    #[test]
    fn current_process_is_alive() {
        assert!(is_pid_alive(std::process::id()));
    }

    #[test]
    fn scan_does_not_panic() {
        let mut scanner = ProcessScanner::new(PathBuf::from("/tmp"));
        let _ = scanner.scan();
    }
}
