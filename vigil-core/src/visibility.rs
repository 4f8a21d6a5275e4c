//! Project visibility resolution
//!
//! Classifies each project as publicly visible or private, backed by a
//! persistent on-disk cache. The first unknown name triggers a one-shot
//! enumeration of remote repository records (name → is-private); a project
//! answers `public` only when an entry exists and is not private — the
//! conservative default is `private`. Every answer is cached and the cache
//! is flushed after each write.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Repository host API consulted for the one-shot enumeration.
const REPO_API_URL: &str = "https://api.github.com/user/repos";

const REPO_PAGE_SIZE: usize = 100;
const REPO_MAX_PAGES: usize = 10;

/// Public/private classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }

    fn from_str(s: &str) -> Self {
        if s == "public" {
            Visibility::Public
        } else {
            Visibility::Private
        }
    }
}

#[derive(Debug, Deserialize)]
struct RepoRecord {
    name: String,
    private: bool,
}

/// Visibility resolver with a persistent cache and a once-per-process
/// remote enumeration.
pub struct VisibilityResolver {
    cache_path: PathBuf,
    cache: HashMap<String, String>,
    remote: Option<HashMap<String, bool>>,
    fetched: bool,
}

impl VisibilityResolver {
    /// Load the resolver, reading any existing cache file.
    pub fn load(cache_path: PathBuf) -> Self {
        let cache = std::fs::read_to_string(&cache_path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        Self {
            cache_path,
            cache,
            remote: None,
            fetched: false,
        }
    }

    /// Resolve a project name to its visibility.
    pub async fn resolve(&mut self, name: &str) -> Visibility {
        if let Some(cached) = self.cache.get(name) {
            return Visibility::from_str(cached);
        }

        if !self.fetched {
            self.fetched = true;
            self.remote = fetch_repo_records().await;
        }

        let visibility = match self.remote.as_ref().and_then(|m| m.get(name)) {
            Some(false) => Visibility::Public,
            _ => Visibility::Private,
        };

        self.cache
            .insert(name.to_string(), visibility.as_str().to_string());
        self.flush();
        visibility
    }

    fn flush(&self) {
        if let Some(parent) = self.cache_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&self.cache) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.cache_path, json) {
                    tracing::warn!(error = %e, "visibility cache flush failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "visibility cache serialization failed"),
        }
    }
}

/// Enumerate remote repository records. Requires `GITHUB_TOKEN`; without it
/// (or on any failure) returns `None` and every unknown name stays private.
async fn fetch_repo_records() -> Option<HashMap<String, bool>> {
    let token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty())?;

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .user_agent("vigil-exporter")
        .build()
        .ok()?;

    let mut records = HashMap::new();
    for page in 1..=REPO_MAX_PAGES {
        let response = client
            .get(REPO_API_URL)
            .bearer_auth(&token)
            .query(&[
                ("per_page", REPO_PAGE_SIZE.to_string()),
                ("page", page.to_string()),
            ])
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "repository enumeration failed");
            return None;
        }
        let batch: Vec<RepoRecord> = response.json().await.ok()?;
        let done = batch.len() < REPO_PAGE_SIZE;
        for repo in batch {
            records.insert(repo.name, repo.private);
        }
        if done {
            break;
        }
    }

    tracing::info!(count = records.len(), "enumerated remote repositories");
    Some(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cached_answers_skip_the_remote_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visibility-cache.json");
        std::fs::write(&path, r#"{"known-public": "public", "known-private": "private"}"#)
            .unwrap();

        let mut resolver = VisibilityResolver::load(path);
        assert_eq!(resolver.resolve("known-public").await, Visibility::Public);
        assert_eq!(resolver.resolve("known-private").await, Visibility::Private);
        assert!(!resolver.fetched);
    }

    #[tokio::test]
    async fn unknown_name_defaults_private_and_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visibility-cache.json");
        std::env::remove_var("GITHUB_TOKEN");

        let mut resolver = VisibilityResolver::load(path.clone());
        assert_eq!(resolver.resolve("mystery").await, Visibility::Private);
        assert!(resolver.fetched);

        // Flushed to disk and answered from cache on a fresh resolver.
        let mut fresh = VisibilityResolver::load(path);
        assert_eq!(fresh.resolve("mystery").await, Visibility::Private);
        assert!(!fresh.fetched);
    }

    #[tokio::test]
    async fn remote_entry_rules() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = VisibilityResolver::load(dir.path().join("cache.json"));
        resolver.fetched = true;
        resolver.remote = Some(HashMap::from([
            ("open-repo".to_string(), false),
            ("closed-repo".to_string(), true),
        ]));

        assert_eq!(resolver.resolve("open-repo").await, Visibility::Public);
        assert_eq!(resolver.resolve("closed-repo").await, Visibility::Private);
        assert_eq!(resolver.resolve("absent").await, Visibility::Private);
    }

    #[test]
    fn corrupt_cache_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{ nope").unwrap();
        let resolver = VisibilityResolver::load(path);
        assert!(resolver.cache.is_empty());
    }
}
