//! End-to-end shape tests for the backfill computation: a real event log
//! and project tree on disk, through the tailer, the slug map, and the
//! daily-metric grouping, down to the exact rows the datastore would
//! receive.

use std::collections::HashMap;
use std::path::Path;

use vigil_core::daemon::caches::TelemetryCaches;
use vigil_core::events::LogTailer;
use vigil_core::sessions::UsageBySlug;
use vigil_core::slugs;
use vigil_core::store::rows::EventRow;
use vigil_core::store::sync::daily_rows_from_events;

fn make_project(root: &Path, dir: &str, slug: &str) {
    let marker = root.join(dir).join(slugs::MARKER_DIR);
    std::fs::create_dir_all(&marker).unwrap();
    std::fs::write(
        marker.join(slugs::PROJECT_FILE),
        format!("---\ncontent_slug: {slug}\n---\n# {dir}\n"),
    )
    .unwrap();
}

#[test]
fn cold_backfill_produces_expected_rows() {
    let org = tempfile::tempdir().unwrap();
    make_project(org.path(), "a", "A");
    make_project(org.path(), "b", "B");

    let data = tempfile::tempdir().unwrap();
    let log = data.path().join("events.log");
    std::fs::write(
        &log,
        "07/14 10:00 AM │ a │ main │ 🟢 Session started [claude-opus-4-6]\n\
         07/14 10:01 AM │ a │ main │ 🔧 Tool use: Bash\n\
         07/14 10:02 AM │ b │ - │ 🏁 Finished responding\n",
    )
    .unwrap();

    slugs::clear_cache();
    let slug_map = slugs::build_slug_map(org.path());
    assert_eq!(slug_map.get("a").map(String::as_str), Some("A"));
    assert_eq!(slug_map.get("b").map(String::as_str), Some("B"));

    let mut tailer = LogTailer::new(log);
    let entries = tailer.read_all();
    assert_eq!(entries.len(), 3);

    let rows: Vec<EventRow> = entries
        .iter()
        .filter_map(|e| slug_map.get(&e.project).map(|s| EventRow::from_entry(e, s)))
        .collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(
        rows.iter().map(|r| r.project.as_str()).collect::<Vec<_>>(),
        vec!["A", "A", "B"]
    );
    assert_eq!(
        rows.iter().map(|r| r.event_type.as_str()).collect::<Vec<_>>(),
        vec!["session_start", "tool", "response_finish"]
    );

    // Per-project daily metrics for the single date.
    let daily = daily_rows_from_events(&rows, &UsageBySlug::new());
    assert_eq!(daily.len(), 2);

    let row_a = daily
        .iter()
        .find(|r| r.project.as_deref() == Some("A"))
        .unwrap();
    assert_eq!(row_a.counts.sessions, 1);
    assert_eq!(row_a.counts.tool_calls, 1);
    assert_eq!(row_a.counts.messages, 0);

    let row_b = daily
        .iter()
        .find(|r| r.project.as_deref() == Some("B"))
        .unwrap();
    assert_eq!(row_b.counts.messages, 1);
    assert_eq!(row_b.counts.sessions, 0);

    // Lifetime counters mirror the same tallies per project.
    let mut caches = TelemetryCaches::default();
    caches.count_entries(
        entries
            .iter()
            .filter_map(|e| slug_map.get(&e.project).map(|s| (e, s.as_str()))),
    );
    assert_eq!(caches.lifetime_counters["A"].sessions, 1);
    assert_eq!(caches.lifetime_counters["A"].tool_calls, 1);
    assert_eq!(caches.lifetime_counters["B"].messages, 1);

    let telemetry = caches.telemetry_rows(chrono::Utc::now());
    assert_eq!(telemetry.len(), 2);
}

#[test]
fn rerunning_the_mapping_is_idempotent() {
    let org = tempfile::tempdir().unwrap();
    make_project(org.path(), "a", "A");

    let data = tempfile::tempdir().unwrap();
    let log = data.path().join("events.log");
    std::fs::write(&log, "07/14 10:00 AM │ a │ main │ 🔧 Tool use: Bash\n").unwrap();

    slugs::clear_cache();
    let slug_map = slugs::build_slug_map(org.path());

    let run = || {
        let mut tailer = LogTailer::new(log.clone());
        let entries = tailer.read_all();
        let rows: Vec<EventRow> = entries
            .iter()
            .filter_map(|e| slug_map.get(&e.project).map(|s| EventRow::from_entry(e, s)))
            .collect();
        daily_rows_from_events(&rows, &UsageBySlug::new())
    };

    // Two full recomputations produce identical row sets, so the blind
    // upserts cannot inflate anything.
    assert_eq!(run(), run());
}

#[test]
fn wire_shapes_match_the_table_columns() {
    let ts = chrono::NaiveDate::from_ymd_opt(2026, 7, 14)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
        .and_utc();

    let event = EventRow {
        project: "A".to_string(),
        event_type: "tool".to_string(),
        event_text: "🔧 Tool use: Bash".to_string(),
        timestamp: ts,
        branch: Some("main".to_string()),
    };
    let json = serde_json::to_value(&event).unwrap();
    for key in ["project", "event_type", "event_text", "timestamp", "branch"] {
        assert!(json.get(key).is_some(), "missing column {key}");
    }

    let mut row = vigil_core::store::rows::ProjectTelemetryRow::new("A".to_string(), ts);
    row.today_tokens_by_model = HashMap::from([("claude-opus-4-6".to_string(), 9u64)]);
    let json = serde_json::to_value(&row).unwrap();
    for key in [
        "project",
        "lifetime_tokens",
        "today_tokens",
        "today_tokens_by_model",
        "sessions",
        "messages",
        "tool_calls",
        "agent_spawns",
        "team_messages",
        "updated_at",
    ] {
        assert!(json.get(key).is_some(), "missing column {key}");
    }
    // Aggregate-path rows never carry the watcher loop's columns.
    assert!(json.get("active_agents").is_none());
    assert!(json.get("agent_count").is_none());
}
