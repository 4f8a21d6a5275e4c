//! Slug resolution and rename detection
//!
//! A project opts into tracking by carrying a `.vigil/project.md`
//! frontmatter file. The `content_slug` (preferred) or `slug` field supplies
//! the canonical identifier; with neither present the directory basename is
//! used. A directory without the `.vigil` subdirectory is not a tracked
//! project and resolves to `None` — downstream code treats null-slug data as
//! non-existent.
//!
//! The slug map (directory name → slug) is rebuilt by scanning the
//! organization root and diffed against the snapshot persisted by the
//! previous run; any change feeds the datastore rename migration.

use crate::error::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Opt-in marker directory inside a project.
pub const MARKER_DIR: &str = ".vigil";

/// Frontmatter file inside the marker directory.
pub const PROJECT_FILE: &str = "project.md";

static RE_FRONTMATTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^---\s*\n(.*?)\n---").unwrap());
static RE_CONTENT_SLUG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^content_slug:\s*(.+)$").unwrap());
static RE_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^slug:\s*(.+)$").unwrap());

/// Process-wide resolution cache keyed by project directory.
static CACHE: Lazy<Mutex<HashMap<PathBuf, Option<String>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Resolve the canonical slug for an on-disk project directory.
pub fn resolve_slug(project_dir: &Path) -> Option<String> {
    if let Some(cached) = CACHE.lock().unwrap().get(project_dir) {
        return cached.clone();
    }
    let resolved = resolve_slug_uncached(project_dir);
    CACHE
        .lock()
        .unwrap()
        .insert(project_dir.to_path_buf(), resolved.clone());
    resolved
}

/// Empty the process-wide resolution cache.
pub fn clear_cache() {
    CACHE.lock().unwrap().clear();
}

fn resolve_slug_uncached(project_dir: &Path) -> Option<String> {
    let marker = project_dir.join(MARKER_DIR);
    if !marker.is_dir() {
        return None;
    }

    let basename = project_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())?;

    let content = match std::fs::read_to_string(marker.join(PROJECT_FILE)) {
        Ok(c) => c,
        Err(_) => return Some(basename),
    };

    Some(frontmatter_slug(&content).unwrap_or(basename))
}

/// Extract the slug from frontmatter content; `content_slug` wins over
/// `slug`.
fn frontmatter_slug(content: &str) -> Option<String> {
    let caps = RE_FRONTMATTER.captures(content)?;
    let frontmatter = caps.get(1)?.as_str();

    for re in [&*RE_CONTENT_SLUG, &*RE_SLUG] {
        if let Some(value) = re
            .captures(frontmatter)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().trim_matches('"').trim_matches('\''))
            .filter(|v| !v.is_empty())
        {
            return Some(value.to_string());
        }
    }
    None
}

/// Build the (directory name → slug) map by scanning the organization root.
/// Directories without a slug are omitted.
pub fn build_slug_map(projects_root: &Path) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    let Ok(entries) = std::fs::read_dir(projects_root) else {
        return map;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        if let Some(slug) = resolve_slug(&path) {
            map.insert(name, slug);
        }
    }
    map
}

/// Load the persisted slug-map snapshot from the previous run.
pub fn load_slug_map(path: &Path) -> BTreeMap<String, String> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
        .unwrap_or_default()
}

/// Persist the slug-map snapshot for the next run.
pub fn save_slug_map(path: &Path, map: &BTreeMap<String, String>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(map)?)?;
    Ok(())
}

/// A slug rename detected between two runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlugRename {
    pub directory: String,
    pub old_slug: String,
    pub new_slug: String,
}

/// Directories whose slug changed between the persisted and the freshly
/// built map.
pub fn diff_renames(
    previous: &BTreeMap<String, String>,
    current: &BTreeMap<String, String>,
) -> Vec<SlugRename> {
    current
        .iter()
        .filter_map(|(dir, slug)| {
            let old = previous.get(dir)?;
            (old != slug).then(|| SlugRename {
                directory: dir.clone(),
                old_slug: old.clone(),
                new_slug: slug.clone(),
            })
        })
        .collect()
}
