//! Incremental reader for the append-only event log
//!
//! Tracks a byte offset into the file and reads only the new slice on each
//! poll. A shrinking file means rotation or truncation, which resets the
//! offset to zero. Failures yield an empty batch and leave the offset
//! untouched, so a transient read error neither double-reads nor drops data
//! on the next poll.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use super::parser::{parse_line, LogEntry};

/// Incremental event-log reader.
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
}

impl LogTailer {
    pub fn new(path: PathBuf) -> Self {
        Self { path, offset: 0 }
    }

    /// Current byte offset into the log.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the entire file and set the offset to end-of-file.
    pub fn read_all(&mut self) -> Vec<LogEntry> {
        self.offset = 0;
        self.poll()
    }

    /// Read entries appended since the last poll.
    ///
    /// The file size is stat'ed once per call; the read covers exactly
    /// `[offset, size)` with no mid-read re-stat.
    pub fn poll(&mut self) -> Vec<LogEntry> {
        let size = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return Vec::new(),
        };

        if size < self.offset {
            tracing::info!(
                path = %self.path.display(),
                old_offset = self.offset,
                size,
                "event log truncated, rereading from start"
            );
            self.offset = 0;
        }
        if size == self.offset {
            return Vec::new();
        }

        let mut buf = vec![0u8; (size - self.offset) as usize];
        let read = (|| -> std::io::Result<()> {
            let mut file = File::open(&self.path)?;
            file.seek(SeekFrom::Start(self.offset))?;
            file.read_exact(&mut buf)?;
            Ok(())
        })();
        if let Err(e) = read {
            tracing::warn!(path = %self.path.display(), error = %e, "event log read failed");
            return Vec::new();
        }

        self.offset = size;

        let text = String::from_utf8_lossy(&buf);
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .filter_map(parse_line)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn append(path: &std::path::Path, line: &str) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        writeln!(f, "{line}").unwrap();
    }

    #[test]
    fn poll_returns_only_new_entries() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("events.log");
        append(&log, "07/14 10:00 AM │ alpha │ main │ 🔧 Tool use: Bash");

        let mut tailer = LogTailer::new(log.clone());
        assert_eq!(tailer.poll().len(), 1);
        assert_eq!(tailer.poll().len(), 0);

        append(&log, "07/14 10:01 AM │ alpha │ main │ 📖 Read: src/lib.rs");
        let batch = tailer.poll();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].project, "alpha");
    }

    #[test]
    fn offset_advances_only_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("events.log");

        let mut tailer = LogTailer::new(log.clone());
        assert!(tailer.poll().is_empty());
        assert_eq!(tailer.offset(), 0);

        append(&log, "07/14 10:00 AM │ alpha │ main │ 🟢 Session started");
        tailer.poll();
        let after_first = tailer.offset();
        assert!(after_first > 0);

        // Missing file: empty result, offset unchanged.
        std::fs::remove_file(&log).unwrap();
        assert!(tailer.poll().is_empty());
        assert_eq!(tailer.offset(), after_first);
    }

    #[test]
    fn truncation_resets_offset() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("events.log");
        append(&log, "07/14 10:00 AM │ alpha │ main │ 🔧 Tool use: Bash");
        append(&log, "07/14 10:01 AM │ alpha │ main │ 🔧 Tool use: Read");

        let mut tailer = LogTailer::new(log.clone());
        assert_eq!(tailer.poll().len(), 2);

        // Rotate: smaller file with one fresh line.
        std::fs::write(&log, "07/14 11:00 AM │ beta │ - │ 🟢 Session started\n").unwrap();
        let batch = tailer.poll();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].project, "beta");
    }

    #[test]
    fn read_all_consumes_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("events.log");
        append(&log, "07/14 10:00 AM │ alpha │ main │ 🔧 Tool use: Bash");
        append(&log, "07/14 10:05 AM │ beta │ - │ 🏁 Finished responding");

        let mut tailer = LogTailer::new(log.clone());
        tailer.poll();

        let all = tailer.read_all();
        assert_eq!(all.len(), 2);
        assert!(tailer.poll().is_empty());
    }

    #[test]
    fn malformed_lines_are_dropped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("events.log");
        append(&log, "not a framed line at all");
        append(&log, "07/14 10:00 AM │ alpha │ main │ 🔧 Tool use: Bash");

        let mut tailer = LogTailer::new(log);
        let batch = tailer.poll();
        assert_eq!(batch.len(), 1);
    }
}
