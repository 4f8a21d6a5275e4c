//! Event-log ingestion: incremental tailing and line parsing.

pub mod parser;
pub mod tailer;

pub use parser::{parse_line, EventKind, LogEntry};
pub use tailer::LogTailer;
