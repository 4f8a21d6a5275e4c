//! Row shapes for the five datastore tables
//!
//! Conflict keys: `events (project, event_type, event_text, timestamp)`,
//! `projects (content_slug)`, `daily_metrics (date, project)` with NULL
//! participating as a distinct value, `project_telemetry (project)`,
//! `facility_status (id = 1)`.

use crate::events::{EventKind, LogEntry};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Facility singleton row id.
pub const FACILITY_ID: i64 = 1;

/// `facility_status.status` value meaning "open".
pub const STATUS_OPEN: &str = "active";

/// `facility_status.status` value meaning "closed".
pub const STATUS_CLOSED: &str = "dormant";

/// One row of the `events` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRow {
    /// Canonical project slug
    pub project: String,
    pub event_type: String,
    pub event_text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl EventRow {
    /// Build an event row from a parsed log entry and its resolved slug.
    pub fn from_entry(entry: &LogEntry, slug: &str) -> Self {
        EventRow {
            project: slug.to_string(),
            event_type: entry.kind.as_str().to_string(),
            event_text: entry.text.clone(),
            timestamp: entry.timestamp,
            branch: (!entry.branch.is_empty()).then(|| entry.branch.clone()),
        }
    }
}

/// Per-event-type counters shared by daily metrics and lifetime telemetry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventCounts {
    #[serde(default)]
    pub sessions: i64,
    #[serde(default)]
    pub messages: i64,
    #[serde(default)]
    pub tool_calls: i64,
    #[serde(default)]
    pub agent_spawns: i64,
    #[serde(default)]
    pub team_messages: i64,
}

impl EventCounts {
    /// Count one event by its type tag.
    pub fn add(&mut self, kind: EventKind) {
        match kind {
            EventKind::SessionStart => self.sessions += 1,
            EventKind::ResponseFinish => self.messages += 1,
            EventKind::Tool => self.tool_calls += 1,
            EventKind::AgentSpawn => self.agent_spawns += 1,
            EventKind::Message => self.team_messages += 1,
            _ => {}
        }
    }

    pub fn merge(&mut self, other: &EventCounts) {
        self.sessions += other.sessions;
        self.messages += other.messages;
        self.tool_calls += other.tool_calls;
        self.agent_spawns += other.agent_spawns;
        self.team_messages += other.team_messages;
    }

    pub fn total(&self) -> i64 {
        self.sessions + self.messages + self.tool_calls + self.agent_spawns + self.team_messages
    }
}

/// One row of the `daily_metrics` table. A NULL project is the
/// facility-wide aggregate for that date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyMetricRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub date: NaiveDate,
    pub project: Option<String>,
    #[serde(flatten)]
    pub counts: EventCounts,
    #[serde(default)]
    pub tokens_by_model: HashMap<String, u64>,
}

impl DailyMetricRow {
    pub fn new(date: NaiveDate, project: Option<String>) -> Self {
        DailyMetricRow {
            id: None,
            date,
            project,
            counts: EventCounts::default(),
            tokens_by_model: HashMap::new(),
        }
    }
}

/// One row of the `projects` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectRow {
    pub content_slug: String,
    #[serde(default)]
    pub local_names: Vec<String>,
    /// "public" or "private"
    pub visibility: String,
    pub first_seen_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_events: i64,
}

/// One row of the `project_telemetry` table.
///
/// The agent columns (`active_agents`, `agent_count`) are written only by
/// the agent-state path; everything else only by the aggregate path. The
/// aggregate path leaves them `None` so its upserts never carry them and
/// the two writers cannot clobber each other.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectTelemetryRow {
    pub project: String,
    #[serde(default)]
    pub lifetime_tokens: u64,
    #[serde(default)]
    pub today_tokens: u64,
    #[serde(default)]
    pub today_tokens_by_model: HashMap<String, u64>,
    #[serde(flatten)]
    pub lifetime_counts: EventCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_agents: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_count: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectTelemetryRow {
    pub fn new(project: String, updated_at: DateTime<Utc>) -> Self {
        ProjectTelemetryRow {
            project,
            lifetime_tokens: 0,
            today_tokens: 0,
            today_tokens_by_model: HashMap::new(),
            lifetime_counts: EventCounts::default(),
            active_agents: None,
            agent_count: None,
            updated_at,
        }
    }
}

/// The `facility_status` singleton row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FacilityRow {
    pub id: i64,
    /// "active" (open) or "dormant" (closed)
    pub status: String,
    #[serde(default)]
    pub lifetime_tokens: u64,
    #[serde(default)]
    pub today_tokens: u64,
    #[serde(flatten)]
    pub lifetime_counts: EventCounts,
    #[serde(default)]
    pub active_agents: i64,
    #[serde(default)]
    pub agent_count: i64,
    #[serde(default)]
    pub active_projects: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl FacilityRow {
    pub fn is_open(&self) -> bool {
        self.status == STATUS_OPEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::parser::parse_line;

    #[test]
    fn event_row_from_entry_carries_slug_not_directory() {
        let entry =
            parse_line("07/14 10:00 AM │ alpha-dir │ main │ 🟢 Session started").unwrap();
        let row = EventRow::from_entry(&entry, "alpha-slug");
        assert_eq!(row.project, "alpha-slug");
        assert_eq!(row.event_type, "session_start");
        assert_eq!(row.branch.as_deref(), Some("main"));
    }

    #[test]
    fn empty_branch_serializes_as_absent() {
        let entry = parse_line("07/14 10:00 AM │ alpha │ - │ 🏁 Finished").unwrap();
        let row = EventRow::from_entry(&entry, "a");
        let json = serde_json::to_value(&row).unwrap();
        assert!(json.get("branch").is_none());
    }

    #[test]
    fn event_counts_map_the_five_counted_kinds() {
        let mut counts = EventCounts::default();
        for kind in [
            EventKind::SessionStart,
            EventKind::ResponseFinish,
            EventKind::Tool,
            EventKind::Tool,
            EventKind::AgentSpawn,
            EventKind::Message,
            EventKind::Read, // not counted
            EventKind::Unknown,
        ] {
            counts.add(kind);
        }
        assert_eq!(counts.sessions, 1);
        assert_eq!(counts.messages, 1);
        assert_eq!(counts.tool_calls, 2);
        assert_eq!(counts.agent_spawns, 1);
        assert_eq!(counts.team_messages, 1);
        assert_eq!(counts.total(), 6);
    }

    #[test]
    fn daily_metric_row_flattens_counts() {
        let mut row = DailyMetricRow::new(
            NaiveDate::from_ymd_opt(2026, 7, 14).unwrap(),
            Some("alpha".to_string()),
        );
        row.counts.sessions = 2;
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["sessions"], 2);
        assert_eq!(json["project"], "alpha");
        assert_eq!(json["date"], "2026-07-14");
        assert!(json.get("id").is_none());
    }

    #[test]
    fn facility_row_open_flag() {
        let json = serde_json::json!({
            "id": 1,
            "status": "active",
            "updated_at": "2026-07-14T10:00:00Z"
        });
        let row: FacilityRow = serde_json::from_value(json).unwrap();
        assert!(row.is_open());
        assert_eq!(row.lifetime_counts.sessions, 0);
    }
}
