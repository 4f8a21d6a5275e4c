//! In-memory telemetry caches
//!
//! Parallel per-slug maps (lifetime tokens, lifetime counters, today's
//! tokens) plus facility roll-ups computed from them. The aggregate loop
//! replaces or increments these in whole per iteration; the daemon never
//! re-reads the event log to compute lifetime values — the datastore is
//! authoritative and these caches mirror it between refreshes.

use crate::events::LogEntry;
use crate::sessions::UsageBySlug;
use crate::store::rows::{EventCounts, ProjectTelemetryRow};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Today's token figures for one slug.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodayTokens {
    pub total: u64,
    pub by_model: HashMap<String, u64>,
}

/// Per-slug parallel maps; slugs are the shared key, never pointers.
#[derive(Debug, Default)]
pub struct TelemetryCaches {
    pub tokens_by_project: HashMap<String, u64>,
    pub lifetime_counters: HashMap<String, EventCounts>,
    pub today_tokens_by_project: HashMap<String, TodayTokens>,
}

impl TelemetryCaches {
    /// Seed from the datastore's telemetry rows on daemon startup.
    pub fn seed_from_rows(rows: &[ProjectTelemetryRow]) -> Self {
        let mut caches = TelemetryCaches::default();
        for row in rows {
            caches
                .tokens_by_project
                .insert(row.project.clone(), row.lifetime_tokens);
            caches
                .lifetime_counters
                .insert(row.project.clone(), row.lifetime_counts);
            caches.today_tokens_by_project.insert(
                row.project.clone(),
                TodayTokens {
                    total: row.today_tokens,
                    by_model: row.today_tokens_by_model.clone(),
                },
            );
        }
        caches
    }

    /// Replace lifetime figures from a datastore refresh.
    pub fn apply_lifetimes(&mut self, lifetimes: &HashMap<String, (EventCounts, u64)>) {
        for (slug, (counts, tokens)) in lifetimes {
            self.lifetime_counters.insert(slug.clone(), *counts);
            self.tokens_by_project.insert(slug.clone(), *tokens);
        }
    }

    /// Replace today's token figures from a session-file rescan.
    pub fn apply_today(&mut self, usage: &UsageBySlug, today: &str) {
        for (slug, by_date) in usage {
            let by_model = by_date.get(today).cloned().unwrap_or_default();
            let total = by_model.values().sum();
            self.today_tokens_by_project
                .insert(slug.clone(), TodayTokens { total, by_model });
        }
    }

    /// Count freshly observed entries into the lifetime counters. The
    /// counters are monotonic between datastore refreshes.
    pub fn count_entries<'a>(
        &mut self,
        entries: impl IntoIterator<Item = (&'a LogEntry, &'a str)>,
    ) {
        for (entry, slug) in entries {
            self.lifetime_counters
                .entry(slug.to_string())
                .or_default()
                .add(entry.kind);
        }
    }

    /// Facility lifetime tokens: sum over slugs.
    pub fn facility_lifetime_tokens(&self) -> u64 {
        self.tokens_by_project.values().sum()
    }

    /// Facility today tokens: sum over slugs' today totals.
    pub fn facility_today_tokens(&self) -> u64 {
        self.today_tokens_by_project.values().map(|t| t.total).sum()
    }

    /// Facility lifetime counters: sum over slugs.
    pub fn facility_counts(&self) -> EventCounts {
        let mut total = EventCounts::default();
        for counts in self.lifetime_counters.values() {
            total.merge(counts);
        }
        total
    }

    /// Build aggregate-path telemetry rows for every known slug. Agent
    /// columns stay `None`: they belong to the watcher loop.
    pub fn telemetry_rows(&self, now: DateTime<Utc>) -> Vec<ProjectTelemetryRow> {
        let mut slugs: Vec<&String> = self
            .tokens_by_project
            .keys()
            .chain(self.lifetime_counters.keys())
            .chain(self.today_tokens_by_project.keys())
            .collect();
        slugs.sort();
        slugs.dedup();

        slugs
            .into_iter()
            .map(|slug| {
                let mut row = ProjectTelemetryRow::new(slug.clone(), now);
                row.lifetime_tokens = self.tokens_by_project.get(slug).copied().unwrap_or(0);
                row.lifetime_counts = self
                    .lifetime_counters
                    .get(slug)
                    .copied()
                    .unwrap_or_default();
                if let Some(today) = self.today_tokens_by_project.get(slug) {
                    row.today_tokens = today.total;
                    row.today_tokens_by_model = today.by_model.clone();
                }
                row
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::parser::parse_line;

    #[test]
    fn seed_and_rollups() {
        let now = Utc::now();
        let mut row_a = ProjectTelemetryRow::new("a".to_string(), now);
        row_a.lifetime_tokens = 100;
        row_a.today_tokens = 10;
        row_a.lifetime_counts.sessions = 2;
        let mut row_b = ProjectTelemetryRow::new("b".to_string(), now);
        row_b.lifetime_tokens = 50;
        row_b.today_tokens = 5;
        row_b.lifetime_counts.tool_calls = 7;

        let caches = TelemetryCaches::seed_from_rows(&[row_a, row_b]);
        assert_eq!(caches.facility_lifetime_tokens(), 150);
        assert_eq!(caches.facility_today_tokens(), 15);
        let counts = caches.facility_counts();
        assert_eq!(counts.sessions, 2);
        assert_eq!(counts.tool_calls, 7);
    }

    #[test]
    fn count_entries_increments_lifetimes() {
        let mut caches = TelemetryCaches::default();
        let entry = parse_line("07/14 10:00 AM │ alpha │ - │ 🟢 Session started").unwrap();
        let tool = parse_line("07/14 10:01 AM │ alpha │ - │ 🔧 Tool use: Bash").unwrap();
        caches.count_entries([(&entry, "a"), (&tool, "a"), (&tool, "b")]);

        assert_eq!(caches.lifetime_counters["a"].sessions, 1);
        assert_eq!(caches.lifetime_counters["a"].tool_calls, 1);
        assert_eq!(caches.lifetime_counters["b"].tool_calls, 1);
    }

    #[test]
    fn apply_today_replaces_not_accumulates() {
        let mut caches = TelemetryCaches::default();
        let mut usage = UsageBySlug::new();
        usage
            .entry("a".to_string())
            .or_default()
            .entry("2026-07-14".to_string())
            .or_default()
            .insert("m".to_string(), 40);

        caches.apply_today(&usage, "2026-07-14");
        caches.apply_today(&usage, "2026-07-14");
        assert_eq!(caches.today_tokens_by_project["a"].total, 40);

        // Date rollover: no usage for the new day zeroes the figures.
        caches.apply_today(&usage, "2026-07-15");
        assert_eq!(caches.today_tokens_by_project["a"].total, 0);
    }

    #[test]
    fn telemetry_rows_cover_union_of_slugs_without_agent_columns() {
        let mut caches = TelemetryCaches::default();
        caches.tokens_by_project.insert("a".to_string(), 5);
        caches
            .lifetime_counters
            .insert("b".to_string(), EventCounts::default());

        let rows = caches.telemetry_rows(Utc::now());
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.active_agents.is_none()));
        assert!(rows.iter().all(|r| r.agent_count.is_none()));
    }
}
