//! Loaders for the agent's aggregate stat files
//!
//! Two inputs live in the data root:
//! - `model-stats` — whitespace-separated `model total input cache_write
//!   cache_read output`, one line per model, rewritten live by the agent.
//! - `stats-cache.json` — the agent's nightly aggregate cache. Only a small
//!   subset of its fields matters here; everything else is ignored by the
//!   loose decode.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// One line of the live `model-stats` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelStat {
    pub model: String,
    pub total: u64,
    pub input: u64,
    pub cache_write: u64,
    pub cache_read: u64,
    pub output: u64,
}

/// Read the live per-model token stats. Lines with fewer than six columns
/// are skipped; a missing or unreadable file yields an empty list.
pub fn read_model_stats(path: &Path) -> Vec<ModelStat> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };

    content
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 6 {
                return None;
            }
            Some(ModelStat {
                model: parts[0].to_string(),
                total: parts[1].parse().ok()?,
                input: parts[2].parse().ok()?,
                cache_write: parts[3].parse().ok()?,
                cache_read: parts[4].parse().ok()?,
                output: parts[5].parse().ok()?,
            })
        })
        .collect()
}

/// The agent's aggregate stats cache (subset of interest).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatsCache {
    pub daily_activity: Vec<DailyActivity>,
    pub daily_model_tokens: Vec<DailyModelTokens>,
    pub model_usage: HashMap<String, ModelUsage>,
    pub last_computed_date: String,
    pub total_sessions: u64,
    pub total_messages: u64,
    pub first_session_date: String,
    pub hour_counts: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DailyActivity {
    pub date: String,
    pub message_count: u64,
    pub session_count: u64,
    pub tool_call_count: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DailyModelTokens {
    pub date: String,
    pub tokens_by_model: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub cache_creation_input_tokens: u64,
}

impl ModelUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_read_input_tokens
            + self.cache_creation_input_tokens
    }
}

impl StatsCache {
    /// Lifetime token total across all models.
    pub fn lifetime_tokens(&self) -> u64 {
        self.model_usage.values().map(ModelUsage::total).sum()
    }

    /// Per-model tokens for `date` from the cached daily series.
    pub fn tokens_for_date(&self, date: &str) -> HashMap<String, u64> {
        self.daily_model_tokens
            .iter()
            .filter(|d| d.date == date)
            .flat_map(|d| d.tokens_by_model.iter())
            .map(|(model, tokens)| (model.clone(), *tokens))
            .collect()
    }
}

/// Load `stats-cache.json`, returning the empty default on any failure.
pub fn load_stats_cache(path: &Path) -> StatsCache {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
        .unwrap_or_default()
}

/// Today's per-model tokens: the cached daily entry, plus the live
/// `model-stats` totals when the cache has not been recomputed today.
pub fn today_model_tokens(cache: &StatsCache, live: &[ModelStat], today: &str) -> HashMap<String, u64> {
    let mut totals = cache.tokens_for_date(today);
    if cache.last_computed_date != today {
        for stat in live {
            *totals.entry(stat.model.clone()).or_insert(0) += stat.total;
        }
    }
    totals
}
