//! Event-log line parser
//!
//! Lines are pipe-framed with the box-drawing `│` delimiter:
//! `timestamp │ project │ branch │ body`. The body carries a leading marker
//! glyph identifying the event type. Lines without a parseable timestamp or
//! a project attribution are discarded.

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static ANSI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*m").unwrap());

/// Closed set of event types recognized in log bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Tool,
    Read,
    Search,
    Fetch,
    Mcp,
    Skill,
    AgentSpawn,
    AgentTask,
    AgentFinish,
    SessionStart,
    SessionEnd,
    ResponseFinish,
    Plan,
    InputNeeded,
    Permission,
    Question,
    Completed,
    Compact,
    Task,
    Message,
    Unknown,
}

/// Marker glyphs in scan order; the first glyph found in the body wins.
const MARKERS: &[(&str, EventKind)] = &[
    ("🔧", EventKind::Tool),
    ("📖", EventKind::Read),
    ("🔍", EventKind::Search),
    ("🌐", EventKind::Fetch),
    ("🔌", EventKind::Mcp),
    ("⚡", EventKind::Skill),
    ("🚀", EventKind::AgentSpawn),
    ("🤖", EventKind::AgentTask),
    ("🛬", EventKind::AgentFinish),
    ("🟢", EventKind::SessionStart),
    ("🔴", EventKind::SessionEnd),
    ("🏁", EventKind::ResponseFinish),
    ("📐", EventKind::Plan),
    ("👋", EventKind::InputNeeded),
    ("🔐", EventKind::Permission),
    ("❓", EventKind::Question),
    ("✅", EventKind::Completed),
    ("⚠️", EventKind::Compact),
    ("📋", EventKind::Task),
    ("💬", EventKind::Message),
];

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Tool => "tool",
            EventKind::Read => "read",
            EventKind::Search => "search",
            EventKind::Fetch => "fetch",
            EventKind::Mcp => "mcp",
            EventKind::Skill => "skill",
            EventKind::AgentSpawn => "agent_spawn",
            EventKind::AgentTask => "agent_task",
            EventKind::AgentFinish => "agent_finish",
            EventKind::SessionStart => "session_start",
            EventKind::SessionEnd => "session_end",
            EventKind::ResponseFinish => "response_finish",
            EventKind::Plan => "plan",
            EventKind::InputNeeded => "input_needed",
            EventKind::Permission => "permission",
            EventKind::Question => "question",
            EventKind::Completed => "completed",
            EventKind::Compact => "compact",
            EventKind::Task => "task",
            EventKind::Message => "message",
            EventKind::Unknown => "unknown",
        }
    }

    fn from_body(body: &str) -> Self {
        for (glyph, kind) in MARKERS {
            if body.contains(glyph) {
                return *kind;
            }
        }
        EventKind::Unknown
    }
}

/// One parsed event-log line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Event instant in UTC
    pub timestamp: DateTime<Utc>,
    /// On-disk project directory name (not yet a slug)
    pub project: String,
    /// Git branch; empty when the writer logged `-` or nothing
    pub branch: String,
    /// Event type derived from the body's marker glyph
    pub kind: EventKind,
    /// Event body text
    pub text: String,
}

impl LogEntry {
    /// Local calendar date of the event (aggregation key).
    pub fn local_date(&self) -> NaiveDate {
        self.timestamp.with_timezone(&Local).date_naive()
    }
}

/// Strip ANSI color escapes.
pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").to_string()
}

/// Parse one raw log line. Returns `None` for lines without a timestamp or
/// a project attribution.
pub fn parse_line(raw: &str) -> Option<LogEntry> {
    parse_line_at(raw, Local::now().date_naive())
}

/// Parse with an explicit "today" for the year/day defaults.
pub(crate) fn parse_line_at(raw: &str, today: NaiveDate) -> Option<LogEntry> {
    let clean = strip_ansi(raw);
    let parts: Vec<&str> = clean.split('│').collect();

    let (ts_raw, project, branch, body) = if parts.len() >= 4 {
        (
            parts[0].trim(),
            parts[1].trim(),
            parts[2].trim(),
            parts[3..].join("│").trim().to_string(),
        )
    } else if parts.len() >= 2 {
        (parts[0].trim(), "", "", parts[1..].join("│").trim().to_string())
    } else {
        return None;
    };

    if project.is_empty() {
        return None;
    }

    let naive = parse_timestamp_at(ts_raw, today)?;
    let timestamp = local_to_utc(naive);
    let branch = if branch == "-" { "" } else { branch };

    Some(LogEntry {
        timestamp,
        project: project.to_string(),
        branch: branch.to_string(),
        kind: EventKind::from_body(&body),
        text: body,
    })
}

fn local_to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    match Local.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        // DST fold or gap: earliest interpretation is fine for telemetry.
        chrono::LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        chrono::LocalResult::None => Utc.from_utc_datetime(&naive),
    }
}

/// Trailing timezone abbreviation ("PST", "CEST"), but never the meridiem.
fn strip_tz_suffix(ts: &str) -> &str {
    if let Some(idx) = ts.rfind(' ') {
        let last = &ts[idx + 1..];
        let is_abbrev = (2..=5).contains(&last.len())
            && last.chars().all(|c| c.is_ascii_uppercase())
            && last != "AM"
            && last != "PM";
        if is_abbrev {
            return ts[..idx].trim_end();
        }
    }
    ts
}

/// Parse `MM/DD HH:MM[:SS] AM|PM` or `HH:MM[:SS] AM|PM`, with an optional
/// trailing timezone abbreviation that is stripped before parsing. The
/// missing year defaults to today's year; the date-less form defaults to
/// today.
pub(crate) fn parse_timestamp_at(ts: &str, today: NaiveDate) -> Option<NaiveDateTime> {
    let ts = strip_tz_suffix(ts.trim());

    let (date, time_part) = match ts.split_once(' ') {
        Some((first, rest)) if first.contains('/') => {
            let (mm, dd) = first.split_once('/')?;
            let month: u32 = mm.parse().ok()?;
            let day: u32 = dd.parse().ok()?;
            let date = NaiveDate::from_ymd_opt(today.year(), month, day)?;
            (date, rest.trim())
        }
        _ => (today, ts),
    };

    let time = NaiveTime::parse_from_str(time_part, "%I:%M:%S %p")
        .or_else(|_| NaiveTime::parse_from_str(time_part, "%I:%M %p"))
        .ok()?;

    Some(date.and_time(time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 14).unwrap()
    }

    #[test]
    fn parses_full_frame() {
        let entry = parse_line_at(
            "07/14 10:30:15 AM │ alpha │ feature/x │ 🔧 Tool use: Bash",
            today(),
        )
        .unwrap();
        assert_eq!(entry.project, "alpha");
        assert_eq!(entry.branch, "feature/x");
        assert_eq!(entry.kind, EventKind::Tool);
        assert_eq!(entry.text, "🔧 Tool use: Bash");
    }

    #[test]
    fn dash_branch_normalizes_to_empty() {
        let entry =
            parse_line_at("07/14 10:30 AM │ alpha │ - │ 🟢 Session started", today()).unwrap();
        assert_eq!(entry.branch, "");
        assert_eq!(entry.kind, EventKind::SessionStart);
    }

    #[test]
    fn short_frame_has_no_project_and_is_discarded() {
        assert!(parse_line_at("10:30 AM │ 🔧 Tool use: Bash", today()).is_none());
    }

    #[test]
    fn unparseable_timestamp_is_discarded() {
        assert!(parse_line_at("yesterday │ alpha │ main │ 🔧 x", today()).is_none());
    }

    #[test]
    fn unframed_line_is_discarded() {
        assert!(parse_line_at("no delimiters here", today()).is_none());
    }

    #[test]
    fn ansi_escapes_are_stripped() {
        let entry = parse_line_at(
            "\x1b[2m07/14 10:30 AM\x1b[0m │ \x1b[36malpha\x1b[0m │ main │ 🔍 Search: foo",
            today(),
        )
        .unwrap();
        assert_eq!(entry.project, "alpha");
        assert_eq!(entry.kind, EventKind::Search);
    }

    #[test]
    fn unknown_glyph_maps_to_unknown() {
        let entry = parse_line_at("07/14 10:30 AM │ alpha │ main │ 🦀 mystery", today()).unwrap();
        assert_eq!(entry.kind, EventKind::Unknown);
    }

    #[test]
    fn first_marker_in_scan_order_wins() {
        let entry = parse_line_at(
            "07/14 10:30 AM │ alpha │ main │ 🚀 Spawned agent 🔧 with tools",
            today(),
        )
        .unwrap();
        // 🔧 precedes 🚀 in the scan order even though 🚀 appears first
        // in the text; the scan is over the marker list, not the string.
        assert_eq!(entry.kind, EventKind::Tool);
    }

    #[test]
    fn timestamp_forms() {
        let t = parse_timestamp_at("07/14 10:30 AM", today()).unwrap();
        assert_eq!((t.month(), t.day(), t.hour(), t.minute()), (7, 14, 10, 30));

        let t = parse_timestamp_at("07/14 10:30:45 PM", today()).unwrap();
        assert_eq!((t.hour(), t.minute(), t.second()), (22, 30, 45));

        let t = parse_timestamp_at("09:05 AM", today()).unwrap();
        assert_eq!(t.date(), today());
        assert_eq!((t.hour(), t.minute()), (9, 5));

        let t = parse_timestamp_at("09:05:59 PM", today()).unwrap();
        assert_eq!((t.hour(), t.second()), (21, 59));
    }

    #[test]
    fn timezone_abbreviation_is_stripped() {
        let t = parse_timestamp_at("07/14 10:30 AM PST", today()).unwrap();
        assert_eq!((t.hour(), t.minute()), (10, 30));

        let t = parse_timestamp_at("10:30 PM CEST", today()).unwrap();
        assert_eq!(t.hour(), 22);
    }

    #[test]
    fn missing_year_defaults_to_current() {
        let t = parse_timestamp_at("12/31 11:59 PM", today()).unwrap();
        assert_eq!(t.year(), 2026);
    }

    #[test]
    fn all_marker_tags_roundtrip() {
        for (glyph, kind) in MARKERS {
            let line = format!("07/14 10:00 AM │ p │ - │ {glyph} something");
            let entry = parse_line_at(&line, today()).unwrap();
            assert_eq!(entry.kind, *kind, "glyph {glyph}");
            assert!(!entry.kind.as_str().is_empty());
        }
    }
}
