//! Exporter daemon
//!
//! Orchestrates the whole pipeline as two cooperative loops on one thread:
//! the watcher loop (250 ms) debounces agent process activity and pushes
//! agent state, the aggregate loop (5 s) tails the event log and keeps the
//! datastore's aggregates current, with a slower maintenance pass every 60
//! iterations. Startup either performs a full backfill or a gap backfill
//! covering the time the daemon was down.
//!
//! State ownership: aggregate columns are written only by the aggregate
//! loop, agent columns only by the watcher loop, and the open/closed flag
//! only by the open/close commands plus the auto-close latch here.

pub mod caches;
pub mod pidfile;

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, Utc};
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use crate::config::Config;
use crate::error::Result;
use crate::events::{LogEntry, LogTailer};
use crate::procs::{ProcessSample, ProcessScanner, ProcessWatcher};
use crate::sessions::{SessionScanner, UsageBySlug};
use crate::slugs;
use crate::stats::{self, ModelStat, StatsCache};
use crate::store::rows::{DailyMetricRow, EventRow};
use crate::store::sync::daily_rows_from_events;
use crate::store::{Datastore, SyncLayer};
use crate::visibility::VisibilityResolver;

use caches::TelemetryCaches;
use pidfile::PidFile;

/// Aggregate iterations between slow maintenance passes (≈ 5 min at 5 s).
const SLOW_MAINTENANCE_EVERY: u64 = 60;

/// In-memory entry buffer window in days.
const ENTRY_BUFFER_DAYS: i64 = 31;

/// The exporter daemon.
pub struct Daemon {
    config: Config,
    sync: SyncLayer,
}

/// Mutable state owned by the aggregate loop.
struct AggregateState {
    tailer: LogTailer,
    entries: Vec<LogEntry>,
    slug_map: BTreeMap<String, String>,
    known_slugs: HashSet<String>,
    caches: TelemetryCaches,
    visibility: VisibilityResolver,
    /// Snapshots of the live stat files, refreshed every iteration.
    model_stats: Vec<ModelStat>,
    stats_cache: StatsCache,
    iteration: u64,
}

impl Daemon {
    pub fn new(config: Config) -> Result<Self> {
        let store = Datastore::new(&config.datastore)?;
        Ok(Self {
            config,
            sync: SyncLayer::new(store),
        })
    }

    /// Run the daemon. `backfill` performs the full recomputation and
    /// exits; otherwise the two loops run until the process is signalled.
    pub async fn run(&self, backfill: bool) -> Result<()> {
        let _pidfile = PidFile::acquire(Config::pid_file_path())?;
        tracing::info!(pid = std::process::id(), backfill, "exporter daemon starting");

        let mut state = self.startup(backfill).await?;
        if backfill {
            self.verify_backfill().await;
            return Ok(());
        }

        tokio::join!(self.watcher_loop(), self.aggregate_loop(&mut state));
        Ok(())
    }

    // ── Startup ─────────────────────────────────────────────────────────

    async fn startup(&self, backfill: bool) -> Result<AggregateState> {
        let slug_map = self.refresh_slug_map().await;

        let mut tailer = LogTailer::new(self.config.events_log_path());
        let entries = tailer.read_all();
        tracing::info!(entries = entries.len(), "event log loaded");

        let mut state = AggregateState {
            tailer,
            entries,
            slug_map,
            known_slugs: HashSet::new(),
            caches: TelemetryCaches::default(),
            visibility: VisibilityResolver::load(Config::visibility_cache_path()),
            model_stats: stats::read_model_stats(&self.config.model_stats_path()),
            stats_cache: stats::load_stats_cache(&self.config.stats_cache_path()),
            iteration: 0,
        };

        if backfill {
            let entries = std::mem::take(&mut state.entries);
            self.backfill_entries(&mut state, &entries).await;
            state.entries = entries;
            return Ok(state);
        }

        // Gap backfill: replay entries that post-date the facility row's
        // last update when the daemon was down longer than the threshold.
        match self.sync.get_facility().await {
            Ok(Some(facility)) => {
                let gap = Utc::now().signed_duration_since(facility.updated_at);
                if gap.num_seconds() >= self.config.gap_threshold.as_secs() as i64 {
                    let replay: Vec<LogEntry> = state
                        .entries
                        .iter()
                        .filter(|e| e.timestamp > facility.updated_at)
                        .cloned()
                        .collect();
                    tracing::info!(
                        gap_secs = gap.num_seconds(),
                        entries = replay.len(),
                        "gap backfill"
                    );
                    self.backfill_entries(&mut state, &replay).await;
                }
            }
            Ok(None) => tracing::warn!("facility row missing, skipping gap backfill"),
            Err(e) => tracing::warn!(error = %e, "facility read failed, skipping gap backfill"),
        }

        // Seed the in-memory caches from the datastore's telemetry rows.
        match self.sync.fetch_project_telemetry().await {
            Ok(rows) => {
                state.known_slugs = rows.iter().map(|r| r.project.clone()).collect();
                state.caches = TelemetryCaches::seed_from_rows(&rows);
                tracing::info!(projects = rows.len(), "telemetry caches seeded");
            }
            Err(e) => tracing::warn!(error = %e, "telemetry seed failed, starting cold"),
        }

        Ok(state)
    }

    /// The shared backfill path: register projects, insert events, sync
    /// global dailies from the stats cache, recompute per-project dailies
    /// from events + session files, refresh lifetime figures, and push
    /// facility + project telemetry.
    async fn backfill_entries(&self, state: &mut AggregateState, entries: &[LogEntry]) {
        let now = Utc::now();
        let today = Local::now().date_naive();

        let rows = self.register_and_map(state, entries).await;
        let inserted = self.sync.insert_events(&rows).await;
        tracing::info!(events = inserted, "events inserted");

        let stats_cache = stats::load_stats_cache(&self.config.stats_cache_path());
        let model_stats = stats::read_model_stats(&self.config.model_stats_path());
        self.sync
            .sync_global_daily(global_daily_rows(&stats_cache, &model_stats, today))
            .await;

        let usage = self.scan_sessions();
        let project_rows = daily_rows_from_events(&rows, &usage);
        let dates: Vec<NaiveDate> = {
            let mut d: Vec<NaiveDate> = project_rows.iter().map(|r| r.date).collect();
            d.sort();
            d.dedup();
            d
        };
        self.sync.delete_project_daily(&dates).await;
        self.sync.sync_project_daily(project_rows).await;

        self.refresh_lifetimes(state).await;
        state.caches.apply_today(&usage, &today.to_string());

        self.push_aggregates(state, now).await;
    }

    async fn verify_backfill(&self) {
        match self.sync.get_facility().await {
            Ok(Some(facility)) => tracing::info!(
                status = %facility.status,
                updated_at = %facility.updated_at,
                "backfill verified against facility row"
            ),
            Ok(None) => tracing::warn!("backfill verification: facility row missing"),
            Err(e) => tracing::warn!(error = %e, "backfill verification failed"),
        }
        match self.sync.fetch_project_telemetry().await {
            Ok(rows) => tracing::info!(projects = rows.len(), "backfill telemetry read-back"),
            Err(e) => tracing::warn!(error = %e, "backfill telemetry read-back failed"),
        }
        let stats = self.sync.stats();
        tracing::info!(
            events_inserted = stats.events_inserted,
            api_calls = stats.api_calls,
            api_failures = stats.api_failures,
            "backfill complete"
        );
    }

    // ── Watcher loop (250 ms) ───────────────────────────────────────────

    async fn watcher_loop(&self) {
        let mut scanner = ProcessScanner::new(self.config.projects_root.clone());
        let mut watcher = ProcessWatcher::new();
        let mut last_active = Instant::now();
        let mut auto_close_latched = false;

        loop {
            let samples: Vec<ProcessSample> = scanner
                .scan()
                .into_iter()
                .map(|p| ProcessSample {
                    pid: p.pid,
                    slug: p.project_dir.as_deref().and_then(|dir| {
                        slugs::resolve_slug(&self.config.projects_root.join(dir))
                    }),
                    raw_active: p.raw_active,
                })
                .collect();

            if let Some(tick) = watcher.tick(&samples) {
                for event in &tick.events {
                    tracing::info!(
                        pid = event.pid,
                        slug = event.slug.as_deref().unwrap_or("-"),
                        transition = event.transition.as_str(),
                        "agent transition"
                    );
                }
                self.sync.push_agent_state(&tick, Utc::now()).await;
            }

            // Auto-close judges idleness from the in-memory window state.
            if watcher.any_windowed_active() {
                last_active = Instant::now();
                auto_close_latched = false;
            } else if !auto_close_latched && last_active.elapsed() >= self.config.auto_close {
                auto_close_latched = true;
                tracing::warn!(
                    idle_secs = self.config.auto_close.as_secs(),
                    "no active agents, auto-closing facility"
                );
                if let Err(e) = self.sync.set_facility_open(false, Utc::now()).await {
                    tracing::warn!(error = %e, "auto-close flip failed");
                }
            }

            tokio::time::sleep(self.config.watch_interval).await;
        }
    }

    // ── Aggregate loop (5 s) ────────────────────────────────────────────

    async fn aggregate_loop(&self, state: &mut AggregateState) {
        loop {
            state.iteration += 1;
            self.aggregate_iteration(state).await;
            tokio::time::sleep(self.config.sync_interval).await;
        }
    }

    async fn aggregate_iteration(&self, state: &mut AggregateState) {
        let now = Utc::now();

        let new_entries = state.tailer.poll();
        if !new_entries.is_empty() {
            let rows = self.register_and_map(state, &new_entries).await;
            if !rows.is_empty() {
                self.sync.insert_events(&rows).await;
            }
            let mapped: Vec<(&LogEntry, &str)> = new_entries
                .iter()
                .filter_map(|e| {
                    state
                        .slug_map
                        .get(&e.project)
                        .map(|slug| (e, slug.as_str()))
                })
                .collect();
            state.caches.count_entries(mapped);
            state.entries.extend(new_entries);
        }

        state.model_stats = stats::read_model_stats(&self.config.model_stats_path());
        state.stats_cache = stats::load_stats_cache(&self.config.stats_cache_path());

        // Slow maintenance runs before the telemetry push so daily-metric
        // writes precede telemetry upserts within the iteration.
        if state.iteration % SLOW_MAINTENANCE_EVERY == 0 {
            self.slow_maintenance(state, now).await;
        }

        self.push_aggregates(state, now).await;
    }

    /// Facility aggregate columns + per-project telemetry (agent columns
    /// untouched), computed from the per-slug caches.
    async fn push_aggregates(&self, state: &mut AggregateState, now: DateTime<Utc>) {
        self.sync
            .update_facility_aggregates(
                state.caches.facility_lifetime_tokens(),
                state.caches.facility_today_tokens(),
                &state.caches.facility_counts(),
                now,
            )
            .await;
        self.sync
            .upsert_project_telemetry(&state.caches.telemetry_rows(now))
            .await;
    }

    /// Every 60th iteration: slug-map refresh with rename migration,
    /// session rescan, lifetime refresh, daily metric sync, prune jobs.
    async fn slow_maintenance(&self, state: &mut AggregateState, now: DateTime<Utc>) {
        let today = Local::now().date_naive();

        state.slug_map = self.refresh_slug_map().await;

        let usage = self.scan_sessions();
        state.caches.apply_today(&usage, &today.to_string());
        self.refresh_lifetimes(state).await;

        if let Some(row) = global_daily_row_for(&state.stats_cache, &state.model_stats, today) {
            self.sync.sync_global_daily(vec![row]).await;
        }

        let mapped_rows: Vec<EventRow> = state
            .entries
            .iter()
            .filter_map(|e| {
                state
                    .slug_map
                    .get(&e.project)
                    .map(|slug| EventRow::from_entry(e, slug))
            })
            .collect();
        self.sync
            .sync_project_daily(daily_rows_from_events(&mapped_rows, &usage))
            .await;

        self.sync.prune_events_if_new_day(now).await;

        let horizon = now - ChronoDuration::days(ENTRY_BUFFER_DAYS);
        let before = state.entries.len();
        state.entries.retain(|e| e.timestamp > horizon);
        if state.entries.len() < before {
            tracing::debug!(
                pruned = before - state.entries.len(),
                "entry buffer pruned to window"
            );
        }
    }

    // ── Shared helpers ──────────────────────────────────────────────────

    /// Map entries to event rows via the slug map, registering any slug
    /// not yet seen in the datastore. Unmapped directories are dropped.
    async fn register_and_map(
        &self,
        state: &mut AggregateState,
        entries: &[LogEntry],
    ) -> Vec<EventRow> {
        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(slug) = state.slug_map.get(&entry.project) else {
                continue;
            };
            if state.known_slugs.insert(slug.clone()) {
                let visibility = state.visibility.resolve(&entry.project).await;
                self.sync
                    .register_project(slug, &entry.project, visibility.as_str(), Utc::now())
                    .await;
            }
            rows.push(EventRow::from_entry(entry, slug));
        }
        rows
    }

    /// Rebuild the slug map, migrate any renames against the snapshot
    /// persisted by the previous pass, and persist the fresh map.
    async fn refresh_slug_map(&self) -> BTreeMap<String, String> {
        slugs::clear_cache();
        let fresh = slugs::build_slug_map(&self.config.projects_root);
        let previous = slugs::load_slug_map(&Config::slug_map_path());

        for rename in slugs::diff_renames(&previous, &fresh) {
            if let Err(e) = self.sync.migrate_slug(&rename).await {
                tracing::warn!(
                    directory = %rename.directory,
                    old = %rename.old_slug,
                    new = %rename.new_slug,
                    error = %e,
                    "slug migration failed, keeping previous snapshot entry"
                );
            }
        }

        if let Err(e) = slugs::save_slug_map(&Config::slug_map_path(), &fresh) {
            tracing::warn!(error = %e, "slug map persist failed");
        }
        fresh
    }

    async fn refresh_lifetimes(&self, state: &mut AggregateState) {
        match self.sync.fetch_project_lifetimes().await {
            Ok(lifetimes) => {
                for (slug, (counts, _)) in &lifetimes {
                    self.sync
                        .set_project_total_events(slug, counts.total())
                        .await;
                }
                state.caches.apply_lifetimes(&lifetimes);
            }
            Err(e) => tracing::warn!(error = %e, "lifetime refresh failed"),
        }
    }

    fn scan_sessions(&self) -> UsageBySlug {
        SessionScanner::new(
            self.config.sessions_root(),
            self.config.projects_root.clone(),
        )
        .scan()
    }
}

/// Facility-wide (project = NULL) daily rows for every date in the stats
/// cache, with the live model-stats correction applied to today.
fn global_daily_rows(
    cache: &StatsCache,
    live: &[ModelStat],
    today: NaiveDate,
) -> Vec<DailyMetricRow> {
    let mut by_date: BTreeMap<NaiveDate, DailyMetricRow> = BTreeMap::new();

    for activity in &cache.daily_activity {
        let Ok(date) = activity.date.parse::<NaiveDate>() else {
            continue;
        };
        let row = by_date
            .entry(date)
            .or_insert_with(|| DailyMetricRow::new(date, None));
        row.counts.sessions = activity.session_count as i64;
        row.counts.messages = activity.message_count as i64;
        row.counts.tool_calls = activity.tool_call_count as i64;
    }

    for daily in &cache.daily_model_tokens {
        let Ok(date) = daily.date.parse::<NaiveDate>() else {
            continue;
        };
        let row = by_date
            .entry(date)
            .or_insert_with(|| DailyMetricRow::new(date, None));
        row.tokens_by_model = daily.tokens_by_model.clone();
    }

    if let Some(row) = by_date.get_mut(&today) {
        row.tokens_by_model = stats::today_model_tokens(cache, live, &today.to_string());
    }

    by_date.into_values().collect()
}

/// Today's facility-wide daily row only, for the fast path of the slow
/// maintenance pass.
fn global_daily_row_for(
    cache: &StatsCache,
    live: &[ModelStat],
    today: NaiveDate,
) -> Option<DailyMetricRow> {
    let mut row = DailyMetricRow::new(today, None);
    let today_str = today.to_string();

    let activity = cache.daily_activity.iter().find(|a| a.date == today_str);
    if let Some(activity) = activity {
        row.counts.sessions = activity.session_count as i64;
        row.counts.messages = activity.message_count as i64;
        row.counts.tool_calls = activity.tool_call_count as i64;
    }
    row.tokens_by_model = stats::today_model_tokens(cache, live, &today_str);

    (activity.is_some() || !row.tokens_by_model.is_empty()).then_some(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{DailyActivity, DailyModelTokens};
    use std::collections::HashMap;

    fn cache_with_days() -> StatsCache {
        let mut cache = StatsCache::default();
        cache.daily_activity = vec![
            DailyActivity {
                date: "2026-07-13".to_string(),
                message_count: 10,
                session_count: 2,
                tool_call_count: 30,
            },
            DailyActivity {
                date: "2026-07-14".to_string(),
                message_count: 5,
                session_count: 1,
                tool_call_count: 9,
            },
        ];
        cache.daily_model_tokens = vec![DailyModelTokens {
            date: "2026-07-14".to_string(),
            tokens_by_model: HashMap::from([("claude-opus-4-6".to_string(), 100)]),
        }];
        cache.last_computed_date = "2026-07-13".to_string();
        cache
    }

    #[test]
    fn global_rows_merge_activity_and_tokens() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 14).unwrap();
        let live = vec![ModelStat {
            model: "claude-opus-4-6".to_string(),
            total: 50,
            input: 10,
            cache_write: 10,
            cache_read: 20,
            output: 10,
        }];

        let rows = global_daily_rows(&cache_with_days(), &live, today);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.project.is_none()));

        let yesterday = &rows[0];
        assert_eq!(yesterday.counts.messages, 10);
        assert!(yesterday.tokens_by_model.is_empty());

        // Today gets the stale-cache live correction: 100 cached + 50 live.
        let today_row = &rows[1];
        assert_eq!(today_row.counts.tool_calls, 9);
        assert_eq!(today_row.tokens_by_model["claude-opus-4-6"], 150);
    }

    #[test]
    fn today_only_row_requires_some_data() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 20).unwrap();
        assert!(global_daily_row_for(&StatsCache::default(), &[], today).is_none());

        let row = global_daily_row_for(
            &cache_with_days(),
            &[],
            NaiveDate::from_ymd_opt(2026, 7, 14).unwrap(),
        )
        .unwrap();
        assert_eq!(row.counts.sessions, 1);
        assert_eq!(row.tokens_by_model["claude-opus-4-6"], 100);
    }
}
