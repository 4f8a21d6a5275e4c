//! Session-file scanner
//!
//! Walks the external per-session root (`<data>/projects/`), where each
//! subdirectory name is the session's working directory with slashes encoded
//! as dashes. Only sessions whose cwd sits under the canonical organization
//! root and resolves to a tracked project contribute; everything else is
//! skipped. Token usage is aggregated per (slug, date, model), with
//! streaming chunks deduplicated by `requestId` within a file and files
//! deduplicated by name across the scan.

use crate::slugs;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// slug → date → model → summed tokens
pub type UsageBySlug = HashMap<String, BTreeMap<String, HashMap<String, u64>>>;

/// Scanner over the per-session record files.
pub struct SessionScanner {
    sessions_root: PathBuf,
    projects_root: PathBuf,
}

impl SessionScanner {
    pub fn new(sessions_root: PathBuf, projects_root: PathBuf) -> Self {
        Self {
            sessions_root,
            projects_root,
        }
    }

    /// Scan every session directory and aggregate token usage.
    pub fn scan(&self) -> UsageBySlug {
        let mut usage = UsageBySlug::new();
        let Ok(entries) = std::fs::read_dir(&self.sessions_root) else {
            return usage;
        };

        let project_dirs = self.project_dir_names();
        // Dedup keys per slug: the same session file can surface under more
        // than one encoded directory after a project rename.
        let mut seen: HashMap<String, HashSet<String>> = HashMap::new();

        for entry in entries.flatten() {
            let session_dir = entry.path();
            if !session_dir.is_dir() {
                continue;
            }
            let Some(encoded) = session_dir.file_name().map(|n| n.to_string_lossy().to_string())
            else {
                continue;
            };

            let Some(dir_name) = resolve_encoded_dir(&encoded, &self.projects_root, &project_dirs)
            else {
                continue;
            };
            let Some(slug) = slugs::resolve_slug(&self.projects_root.join(&dir_name)) else {
                continue;
            };

            let slug_seen = seen.entry(slug.clone()).or_default();
            let slug_usage = usage.entry(slug).or_default();

            for (file, dedup_key) in session_files(&session_dir) {
                if !slug_seen.insert(dedup_key) {
                    continue;
                }
                scan_session_file(&file, slug_usage);
            }
        }

        usage
    }

    /// On-disk project directory names, longest first so that `repo-x`
    /// matches before `repo`.
    fn project_dir_names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.projects_root)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.path().is_dir())
                    .filter_map(|e| e.file_name().to_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        names
    }
}

/// Resolve an encoded session directory name to an on-disk project directory
/// under the organization root, or `None` when it lives elsewhere.
pub fn resolve_encoded_dir(
    encoded: &str,
    projects_root: &Path,
    project_dirs: &[String],
) -> Option<String> {
    let root_prefix = format!(
        "{}-",
        projects_root.to_string_lossy().replace('/', "-")
    );
    let remainder = encoded.strip_prefix(&root_prefix)?;

    project_dirs
        .iter()
        .find(|dir| {
            remainder == dir.as_str() || remainder.starts_with(&format!("{dir}-"))
        })
        .cloned()
}

/// Session record files within one session directory: top-level `*.jsonl`
/// plus `<session-id>/subagents/*.jsonl`, each paired with its dedup key.
fn session_files(session_dir: &Path) -> Vec<(PathBuf, String)> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(session_dir) else {
        return files;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };

        if path.is_file() && name.ends_with(".jsonl") {
            files.push((path, name));
        } else if path.is_dir() {
            let subagents = path.join("subagents");
            let Ok(nested) = std::fs::read_dir(&subagents) else {
                continue;
            };
            for sub in nested.flatten() {
                let sub_path = sub.path();
                let Some(sub_name) = sub_path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                    continue;
                };
                if sub_path.is_file() && sub_name.ends_with(".jsonl") {
                    files.push((sub_path, format!("{name}/subagents/{sub_name}")));
                }
            }
        }
    }
    files
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SessionRecord {
    timestamp: Option<String>,
    #[serde(rename = "requestId")]
    request_id: Option<String>,
    message: Option<SessionMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SessionMessage {
    model: Option<String>,
    usage: Option<UsageBlock>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UsageBlock {
    input_tokens: u64,
    cache_creation_input_tokens: u64,
    cache_read_input_tokens: u64,
    output_tokens: u64,
}

impl UsageBlock {
    fn total(&self) -> u64 {
        self.input_tokens
            + self.cache_creation_input_tokens
            + self.cache_read_input_tokens
            + self.output_tokens
    }
}

/// Accumulate one session file into `date → model → tokens`.
///
/// Records within a file sharing a non-empty `requestId` are streaming
/// chunks of the same request; only the first counts.
fn scan_session_file(path: &Path, usage: &mut BTreeMap<String, HashMap<String, u64>>) {
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };

    let mut seen_requests: HashSet<String> = HashSet::new();

    for line in content.lines() {
        // Cheap pre-test before JSON decoding.
        if !line.contains("usage") {
            continue;
        }
        let Ok(record) = serde_json::from_str::<SessionRecord>(line) else {
            continue;
        };
        let Some(message) = record.message else {
            continue;
        };
        let Some(block) = message.usage else {
            continue;
        };
        let (Some(model), Some(timestamp)) = (message.model, record.timestamp) else {
            continue;
        };
        if timestamp.len() < 10 {
            continue;
        }

        if let Some(request_id) = record.request_id.filter(|id| !id.is_empty()) {
            if !seen_requests.insert(request_id) {
                continue;
            }
        }

        let date = timestamp[..10].to_string();
        *usage.entry(date).or_default().entry(model).or_insert(0) += block.total();
    }
}
