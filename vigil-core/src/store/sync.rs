//! High-level idempotent sync operations
//!
//! Every operation here can run any number of times against the same
//! on-disk state and leave the datastore identical. Batch failures are
//! counted and logged, never fatal: the local files remain authoritative
//! and the next cycle retries.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use crate::error::Result;
use crate::procs::WatchTick;
use crate::slugs::SlugRename;
use crate::store::client::{in_list, Datastore, OnConflict};
use crate::store::rows::{
    DailyMetricRow, EventCounts, EventRow, FacilityRow, ProjectRow, ProjectTelemetryRow,
    FACILITY_ID, STATUS_CLOSED, STATUS_OPEN,
};

/// Event insert batch size.
pub const EVENT_BATCH: usize = 500;

/// Concurrent requests per daily-metric update chunk.
pub const UPDATE_CONCURRENCY: usize = 50;

/// Event retention horizon in days.
pub const EVENT_RETENTION_DAYS: i64 = 14;

/// Running operation counters.
#[derive(Debug, Default, Clone)]
pub struct SyncStats {
    pub events_inserted: usize,
    pub event_batches_failed: usize,
    pub api_calls: usize,
    pub api_failures: usize,
}

/// Idempotent sync layer over the datastore client.
///
/// Methods take `&self` so the watcher loop and the aggregate loop can
/// share one instance; the counters sit behind a mutex held only for the
/// increment, never across I/O.
pub struct SyncLayer {
    store: Datastore,
    stats: Mutex<SyncStats>,
    last_prune_date: Mutex<Option<NaiveDate>>,
}

#[derive(Debug, Deserialize)]
struct ExistingDailyRow {
    id: i64,
    date: NaiveDate,
    project: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlugOnly {
    project: String,
}

#[derive(Debug, Deserialize)]
struct DailyLifetimeRow {
    project: Option<String>,
    #[serde(flatten)]
    counts: EventCounts,
    #[serde(default)]
    tokens_by_model: HashMap<String, u64>,
}

impl SyncLayer {
    pub fn new(store: Datastore) -> Self {
        Self {
            store,
            stats: Mutex::new(SyncStats::default()),
            last_prune_date: Mutex::new(None),
        }
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.lock().unwrap().clone()
    }

    fn count(&self, f: impl FnOnce(&mut SyncStats)) {
        f(&mut self.stats.lock().unwrap());
    }

    pub fn store(&self) -> &Datastore {
        &self.store
    }

    // ── Events ──────────────────────────────────────────────────────────

    /// Insert event rows in batches of 500, skipping rows that already
    /// exist. Transient failures retry with backoff; a batch that still
    /// fails is counted and the remaining batches continue.
    pub async fn insert_events(&self, rows: &[EventRow]) -> usize {
        let mut inserted = 0;
        for batch in rows.chunks(EVENT_BATCH) {
            match self.insert_event_batch(batch).await {
                Ok(()) => inserted += batch.len(),
                Err(e) => {
                    self.count(|s| {
                        s.api_failures += 1;
                        s.event_batches_failed += 1;
                    });
                    tracing::warn!(batch_len = batch.len(), error = %e, "event batch failed");
                }
            }
        }
        self.count(|s| s.events_inserted += inserted);
        inserted
    }

    async fn insert_event_batch(&self, batch: &[EventRow]) -> Result<()> {
        let mut delay = std::time::Duration::from_millis(500);
        let mut last_error = None;

        for attempt in 0..=crate::store::client::MAX_RETRIES {
            if attempt > 0 {
                tracing::debug!(attempt, "retrying event batch");
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, std::time::Duration::from_secs(30));
            }
            self.count(|s| s.api_calls += 1);
            match self
                .store
                .upsert(
                    "events",
                    "project,event_type,event_text,timestamp",
                    OnConflict::IgnoreDuplicates,
                    batch,
                )
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(error = %e, "transient error inserting events");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| crate::error::Error::Datastore {
            status: 503,
            body: "max retries exceeded".to_string(),
        }))
    }

    /// Delete events older than the retention horizon, once per UTC day.
    pub async fn prune_events_if_new_day(&self, now: DateTime<Utc>) {
        let today = now.date_naive();
        {
            let mut last = self.last_prune_date.lock().unwrap();
            if *last == Some(today) {
                return;
            }
            *last = Some(today);
        }

        let horizon = now - ChronoDuration::days(EVENT_RETENTION_DAYS);
        match self
            .store
            .delete(
                "events",
                &[("timestamp", format!("lt.{}", horizon.to_rfc3339()))],
            )
            .await
        {
            Ok(()) => tracing::info!(horizon = %horizon, "pruned events past retention"),
            Err(e) => {
                self.count(|s| s.api_failures += 1);
                tracing::warn!(error = %e, "event prune failed");
            }
        }
    }

    // ── Daily metrics ───────────────────────────────────────────────────

    /// Delete per-project (not global-NULL) daily rows for the given dates.
    /// Runs before a backfill so stale inflated rows cannot survive
    /// recomputation.
    pub async fn delete_project_daily(&self, dates: &[NaiveDate]) {
        if dates.is_empty() {
            return;
        }
        let result = self
            .store
            .delete(
                "daily_metrics",
                &[
                    ("project", "not.is.null".to_string()),
                    ("date", in_list(dates.iter().map(|d| d.to_string()))),
                ],
            )
            .await;
        if let Err(e) = result {
            self.count(|s| s.api_failures += 1);
            tracing::warn!(error = %e, "stale per-project daily delete failed");
        }
    }

    /// Sync facility-wide (project = NULL) daily rows: fetch existing ids
    /// for the date set, insert the new dates in bulk, update the rest.
    pub async fn sync_global_daily(&self, rows: Vec<DailyMetricRow>) {
        if rows.is_empty() {
            return;
        }
        let dates = in_list(rows.iter().map(|r| r.date.to_string()));
        let existing: Vec<ExistingDailyRow> = match self
            .store
            .select(
                "daily_metrics",
                &[
                    ("select", "id,date,project".to_string()),
                    ("project", "is.null".to_string()),
                    ("date", dates),
                ],
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                self.count(|s| s.api_failures += 1);
                tracing::warn!(error = %e, "global daily fetch failed");
                return;
            }
        };
        let by_date: HashMap<NaiveDate, i64> =
            existing.into_iter().map(|r| (r.date, r.id)).collect();
        self.split_and_write_daily(rows, |row| by_date.get(&row.date).copied())
            .await;
    }

    /// Sync per-project daily rows, partitioned by (project, date).
    pub async fn sync_project_daily(&self, rows: Vec<DailyMetricRow>) {
        if rows.is_empty() {
            return;
        }
        let projects: HashSet<&str> = rows
            .iter()
            .filter_map(|r| r.project.as_deref())
            .collect();
        let dates = in_list(rows.iter().map(|r| r.date.to_string()));
        let existing: Vec<ExistingDailyRow> = match self
            .store
            .select(
                "daily_metrics",
                &[
                    ("select", "id,date,project".to_string()),
                    ("project", in_list(projects)),
                    ("date", dates),
                ],
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                self.count(|s| s.api_failures += 1);
                tracing::warn!(error = %e, "project daily fetch failed");
                return;
            }
        };
        let by_key: HashMap<(NaiveDate, String), i64> = existing
            .into_iter()
            .filter_map(|r| r.project.map(|p| ((r.date, p), r.id)))
            .collect();
        self.split_and_write_daily(rows, |row| {
            row.project
                .as_ref()
                .and_then(|p| by_key.get(&(row.date, p.clone())).copied())
        })
        .await;
    }

    async fn split_and_write_daily<F>(&self, rows: Vec<DailyMetricRow>, existing_id: F)
    where
        F: Fn(&DailyMetricRow) -> Option<i64>,
    {
        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        for row in rows {
            match existing_id(&row) {
                Some(id) => updates.push((id, row)),
                None => inserts.push(row),
            }
        }

        if !inserts.is_empty() {
            self.count(|s| s.api_calls += 1);
            if let Err(e) = self.store.insert("daily_metrics", &inserts).await {
                self.count(|s| s.api_failures += 1);
                tracing::warn!(count = inserts.len(), error = %e, "daily insert failed");
            }
        }

        // Blind upserts of the freshly recomputed values, never deltas.
        let store = &self.store;
        let results: Vec<std::result::Result<(), (i64, crate::error::Error)>> =
            stream::iter(updates.into_iter().map(|(id, row)| async move {
                store
                    .update("daily_metrics", &[("id", format!("eq.{id}"))], &row)
                    .await
                    .map_err(|e| (id, e))
            }))
            .buffer_unordered(UPDATE_CONCURRENCY)
            .collect()
            .await;

        for result in results {
            self.count(|s| s.api_calls += 1);
            if let Err((id, e)) = result {
                self.count(|s| s.api_failures += 1);
                tracing::warn!(row_id = id, error = %e, "daily update failed");
            }
        }
    }

    /// Lifetime per-project counters and token totals, summed from the
    /// per-project daily rows. The datastore is authoritative for lifetime
    /// values; the event log is never re-read for them.
    pub async fn fetch_project_lifetimes(
        &self,
    ) -> Result<HashMap<String, (EventCounts, u64)>> {
        let rows: Vec<DailyLifetimeRow> = self
            .store
            .select(
                "daily_metrics",
                &[
                    (
                        "select",
                        "project,sessions,messages,tool_calls,agent_spawns,team_messages,tokens_by_model"
                            .to_string(),
                    ),
                    ("project", "not.is.null".to_string()),
                ],
            )
            .await?;

        let mut lifetimes: HashMap<String, (EventCounts, u64)> = HashMap::new();
        for row in rows {
            let Some(project) = row.project else { continue };
            let entry = lifetimes.entry(project).or_default();
            entry.0.merge(&row.counts);
            entry.1 += row.tokens_by_model.values().sum::<u64>();
        }
        Ok(lifetimes)
    }

    // ── Project telemetry ───────────────────────────────────────────────

    /// Upsert telemetry rows: one multi-row upsert on the `project` key,
    /// falling back to per-row upserts when the batch fails. Afterwards the
    /// affected slugs are read back and mismatches logged (a consistency
    /// probe, not an error).
    pub async fn upsert_project_telemetry(&self, rows: &[ProjectTelemetryRow]) {
        if rows.is_empty() {
            return;
        }
        self.count(|s| s.api_calls += 1);
        let batch = self
            .store
            .upsert("project_telemetry", "project", OnConflict::MergeDuplicates, rows)
            .await;

        if let Err(e) = batch {
            self.count(|s| s.api_failures += 1);
            tracing::warn!(count = rows.len(), error = %e, "telemetry batch upsert failed, falling back to per-row");
            for row in rows {
                self.count(|s| s.api_calls += 1);
                if let Err(e) = self
                    .store
                    .upsert(
                        "project_telemetry",
                        "project",
                        OnConflict::MergeDuplicates,
                        std::slice::from_ref(row),
                    )
                    .await
                {
                    self.count(|s| s.api_failures += 1);
                    tracing::warn!(project = %row.project, error = %e, "telemetry row could not be persisted");
                }
            }
        }

        self.verify_telemetry_slugs(rows).await;
    }

    async fn verify_telemetry_slugs(&self, rows: &[ProjectTelemetryRow]) {
        let written: HashSet<&str> = rows.iter().map(|r| r.project.as_str()).collect();
        let found: Vec<SlugOnly> = match self
            .store
            .select(
                "project_telemetry",
                &[
                    ("select", "project".to_string()),
                    ("project", in_list(written.iter().copied())),
                ],
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "telemetry read-back failed");
                return;
            }
        };
        let found: HashSet<&str> = found.iter().map(|r| r.project.as_str()).collect();
        for missing in written.difference(&found) {
            tracing::warn!(project = %missing, "telemetry read-back missing a written slug");
        }
    }

    /// Seed rows for the in-memory caches on daemon startup.
    pub async fn fetch_project_telemetry(&self) -> Result<Vec<ProjectTelemetryRow>> {
        self.store
            .select("project_telemetry", &[("select", "*".to_string())])
            .await
    }

    // ── Agent state (watcher-loop writer) ───────────────────────────────

    /// Push one watcher tick: agent columns on the mentioned telemetry
    /// rows, agent columns + open-projects list on the facility row, and
    /// last-active on projects with any active agent. Writes fan out in
    /// parallel; failures are logged, never propagated.
    pub async fn push_agent_state(&self, tick: &WatchTick, now: DateTime<Utc>) {
        let per_project = tick.project_agents.iter().map(|(slug, agents)| {
            let body = serde_json::json!({
                "project": slug,
                "active_agents": agents.active,
                "agent_count": agents.count,
                "updated_at": now.to_rfc3339(),
            });
            async move {
                if let Err(e) = self
                    .store
                    .upsert(
                        "project_telemetry",
                        "project",
                        OnConflict::MergeDuplicates,
                        &[body],
                    )
                    .await
                {
                    tracing::warn!(project = %slug, error = %e, "agent-state telemetry write failed");
                }
            }
        });

        let facility_body = serde_json::json!({
            "active_agents": tick.facility.active_count,
            "agent_count": tick.facility.agent_count,
            "active_projects": tick.facility.active_projects,
            "updated_at": now.to_rfc3339(),
        });
        let facility = async {
            if let Err(e) = self
                .store
                .update(
                    "facility_status",
                    &[("id", format!("eq.{FACILITY_ID}"))],
                    &facility_body,
                )
                .await
            {
                tracing::warn!(error = %e, "agent-state facility write failed");
            }
        };

        let last_active = async {
            if tick.facility.active_projects.is_empty() {
                return;
            }
            let body = serde_json::json!({ "last_active_at": now.to_rfc3339() });
            if let Err(e) = self
                .store
                .update(
                    "projects",
                    &[("content_slug", in_list(&tick.facility.active_projects))],
                    &body,
                )
                .await
            {
                tracing::warn!(error = %e, "last-active write failed");
            }
        };

        futures::join!(
            futures::future::join_all(per_project),
            facility,
            last_active
        );
    }

    // ── Projects ────────────────────────────────────────────────────────

    /// Ensure a project row exists for the slug and that the observed local
    /// directory name is recorded. `local_names` keeps set semantics.
    pub async fn register_project(
        &self,
        slug: &str,
        local_name: &str,
        visibility: &str,
        now: DateTime<Utc>,
    ) {
        let existing: Vec<ProjectRow> = match self
            .store
            .select(
                "projects",
                &[
                    ("select", "*".to_string()),
                    ("content_slug", format!("eq.{slug}")),
                ],
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                self.count(|s| s.api_failures += 1);
                tracing::warn!(slug, error = %e, "project lookup failed");
                return;
            }
        };

        match existing.into_iter().next() {
            None => {
                let row = ProjectRow {
                    content_slug: slug.to_string(),
                    local_names: vec![local_name.to_string()],
                    visibility: visibility.to_string(),
                    first_seen_at: now,
                    last_active_at: None,
                    total_events: 0,
                };
                if let Err(e) = self.store.insert("projects", &[row]).await {
                    self.count(|s| s.api_failures += 1);
                    tracing::warn!(slug, error = %e, "project insert failed");
                } else {
                    tracing::info!(slug, local_name, "registered new project");
                }
            }
            Some(row) if !row.local_names.iter().any(|n| n == local_name) => {
                let mut names = row.local_names;
                names.push(local_name.to_string());
                let body = serde_json::json!({ "local_names": names });
                if let Err(e) = self
                    .store
                    .update("projects", &[("content_slug", format!("eq.{slug}"))], &body)
                    .await
                {
                    self.count(|s| s.api_failures += 1);
                    tracing::warn!(slug, error = %e, "local_names update failed");
                }
            }
            Some(_) => {}
        }
    }

    /// Write the recomputed running event total on a project row.
    pub async fn set_project_total_events(&self, slug: &str, total: i64) {
        let body = serde_json::json!({ "total_events": total });
        if let Err(e) = self
            .store
            .update("projects", &[("content_slug", format!("eq.{slug}"))], &body)
            .await
        {
            self.count(|s| s.api_failures += 1);
            tracing::warn!(slug, error = %e, "total_events update failed");
        }
    }

    // ── Slug rename migration ───────────────────────────────────────────

    /// Re-key every datastore row from the old slug to the new one. This is
    /// the only mechanism by which a recorded slug ever changes.
    pub async fn migrate_slug(&self, rename: &SlugRename) -> Result<()> {
        let old = &rename.old_slug;
        let new = &rename.new_slug;
        tracing::info!(directory = %rename.directory, old, new, "migrating slug");

        let project_body = serde_json::json!({ "project": new });
        for table in ["events", "daily_metrics", "project_telemetry"] {
            self.store
                .update(table, &[("project", format!("eq.{old}"))], &project_body)
                .await?;
        }
        self.store
            .update(
                "projects",
                &[("content_slug", format!("eq.{old}"))],
                &serde_json::json!({ "content_slug": new }),
            )
            .await?;
        Ok(())
    }

    // ── Facility ────────────────────────────────────────────────────────

    /// Read the facility singleton.
    pub async fn get_facility(&self) -> Result<Option<FacilityRow>> {
        let rows: Vec<FacilityRow> = self
            .store
            .select(
                "facility_status",
                &[
                    ("select", "*".to_string()),
                    ("id", format!("eq.{FACILITY_ID}")),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Flip the open flag. Only the open/close commands and the daemon's
    /// auto-close latch call this; the aggregate loop never does.
    pub async fn set_facility_open(&self, open: bool, now: DateTime<Utc>) -> Result<()> {
        let status = if open { STATUS_OPEN } else { STATUS_CLOSED };
        let body = serde_json::json!({ "status": status, "updated_at": now.to_rfc3339() });
        self.store
            .update(
                "facility_status",
                &[("id", format!("eq.{FACILITY_ID}"))],
                &body,
            )
            .await
    }

    /// Update the facility row's aggregate columns (never the status, never
    /// the agent columns).
    pub async fn update_facility_aggregates(
        &self,
        lifetime_tokens: u64,
        today_tokens: u64,
        counts: &EventCounts,
        now: DateTime<Utc>,
    ) {
        let body = serde_json::json!({
            "lifetime_tokens": lifetime_tokens,
            "today_tokens": today_tokens,
            "sessions": counts.sessions,
            "messages": counts.messages,
            "tool_calls": counts.tool_calls,
            "agent_spawns": counts.agent_spawns,
            "team_messages": counts.team_messages,
            "updated_at": now.to_rfc3339(),
        });
        self.count(|s| s.api_calls += 1);
        if let Err(e) = self
            .store
            .update(
                "facility_status",
                &[("id", format!("eq.{FACILITY_ID}"))],
                &body,
            )
            .await
        {
            self.count(|s| s.api_failures += 1);
            tracing::warn!(error = %e, "facility aggregate update failed");
        }
    }
}

/// Group event rows into per-project daily metric rows.
pub fn daily_rows_from_events(
    events: &[EventRow],
    tokens: &crate::sessions::UsageBySlug,
) -> Vec<DailyMetricRow> {
    let mut by_key: BTreeMap<(NaiveDate, String), DailyMetricRow> = BTreeMap::new();

    for event in events {
        let date = event.timestamp.date_naive();
        let key = (date, event.project.clone());
        let row = by_key
            .entry(key)
            .or_insert_with(|| DailyMetricRow::new(date, Some(event.project.clone())));
        if let Some(kind) = kind_from_tag(&event.event_type) {
            row.counts.add(kind);
        }
    }

    // Token maps contribute rows even for dates without log events.
    for (slug, by_date) in tokens {
        for (date_str, by_model) in by_date {
            let Ok(date) = date_str.parse::<NaiveDate>() else {
                continue;
            };
            let row = by_key
                .entry((date, slug.clone()))
                .or_insert_with(|| DailyMetricRow::new(date, Some(slug.clone())));
            row.tokens_by_model = by_model.clone();
        }
    }

    by_key.into_values().collect()
}

fn kind_from_tag(tag: &str) -> Option<crate::events::EventKind> {
    use crate::events::EventKind::*;
    Some(match tag {
        "session_start" => SessionStart,
        "response_finish" => ResponseFinish,
        "tool" => Tool,
        "agent_spawn" => AgentSpawn,
        "message" => Message,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn event(project: &str, tag: &str, ts: &str) -> EventRow {
        EventRow {
            project: project.to_string(),
            event_type: tag.to_string(),
            event_text: format!("{tag} body"),
            timestamp: NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S")
                .unwrap()
                .and_utc(),
            branch: None,
        }
    }

    #[test]
    fn daily_rows_group_by_project_and_date() {
        let events = vec![
            event("a", "session_start", "2026-07-14 10:00:00"),
            event("a", "tool", "2026-07-14 10:01:00"),
            event("a", "tool", "2026-07-15 09:00:00"),
            event("b", "response_finish", "2026-07-14 10:02:00"),
            event("a", "read", "2026-07-14 10:03:00"), // not counted
        ];
        let rows = daily_rows_from_events(&events, &HashMap::new());
        assert_eq!(rows.len(), 3);

        let a_14 = rows
            .iter()
            .find(|r| r.project.as_deref() == Some("a") && r.date.to_string() == "2026-07-14")
            .unwrap();
        assert_eq!(a_14.counts.sessions, 1);
        assert_eq!(a_14.counts.tool_calls, 1);
        assert_eq!(a_14.counts.messages, 0);

        let b_14 = rows
            .iter()
            .find(|r| r.project.as_deref() == Some("b"))
            .unwrap();
        assert_eq!(b_14.counts.messages, 1);
    }

    #[test]
    fn token_maps_create_rows_for_eventless_dates() {
        let mut tokens = crate::sessions::UsageBySlug::new();
        tokens
            .entry("a".to_string())
            .or_default()
            .entry("2026-07-10".to_string())
            .or_default()
            .insert("claude-opus-4-6".to_string(), 500);

        let rows = daily_rows_from_events(&[], &tokens);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date.to_string(), "2026-07-10");
        assert_eq!(rows[0].tokens_by_model["claude-opus-4-6"], 500);
        assert_eq!(rows[0].counts.total(), 0);
    }

    #[test]
    fn sync_stats_default_is_zeroed() {
        let stats = SyncStats::default();
        assert_eq!(stats.events_inserted, 0);
        assert_eq!(stats.api_failures, 0);
    }
}
