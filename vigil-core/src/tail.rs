//! Backward line tail
//!
//! Reads the last `n` lines of a file without loading the whole thing:
//! seek to EOF, read backwards in 8 KB chunks, stop once enough newlines
//! have been seen. Used for error-log excerpts in the preflight output.

use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

const CHUNK_SIZE: u64 = 8 * 1024;

/// Read the last `n` lines of `path` in chronological order.
pub fn tail_lines(path: &Path, n: usize) -> io::Result<Vec<String>> {
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut file = std::fs::File::open(path)?;
    let file_len = file.metadata()?.len();
    if file_len == 0 {
        return Ok(Vec::new());
    }

    let mut collected: Vec<u8> = Vec::new();
    let mut remaining = file_len;
    // n + 1 newlines fully delimit n lines from the end, including a
    // trailing newline at EOF.
    let target_newlines = n + 1;
    let mut newline_count = 0usize;

    while remaining > 0 {
        let chunk_len = remaining.min(CHUNK_SIZE);
        let offset = remaining - chunk_len;

        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; chunk_len as usize];
        file.read_exact(&mut buf)?;

        newline_count += buf.iter().filter(|b| **b == b'\n').count();

        buf.extend_from_slice(&collected);
        collected = buf;
        remaining = offset;

        if newline_count >= target_newlines {
            break;
        }
    }

    let text = String::from_utf8_lossy(&collected);
    let text = text.strip_suffix('\n').unwrap_or(&text);
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let all_lines: Vec<&str> = text.split('\n').collect();
    let start = all_lines.len().saturating_sub(n);
    Ok(all_lines[start..].iter().map(|s| s.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn tail_last_lines_of_long_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        let mut f = std::fs::File::create(&path).unwrap();
        for i in 0..1000 {
            writeln!(f, "line{i}").unwrap();
        }
        let lines = tail_lines(&path, 3).unwrap();
        assert_eq!(lines, vec!["line997", "line998", "line999"]);
    }

    #[test]
    fn tail_fewer_than_requested() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        std::fs::write(&path, "a\nb\n").unwrap();
        assert_eq!(tail_lines(&path, 10).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn tail_empty_and_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        std::fs::write(&path, "").unwrap();
        assert!(tail_lines(&path, 10).unwrap().is_empty());
        std::fs::write(&path, "x\n").unwrap();
        assert!(tail_lines(&path, 0).unwrap().is_empty());
    }

    #[test]
    fn tail_no_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        std::fs::write(&path, "one\ntwo\nthree").unwrap();
        assert_eq!(tail_lines(&path, 2).unwrap(), vec!["two", "three"]);
    }

    #[test]
    fn tail_lines_longer_than_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        let big_a = "A".repeat(10_000);
        let big_b = "B".repeat(12_000);
        std::fs::write(&path, format!("{big_a}\n{big_b}\n")).unwrap();
        let lines = tail_lines(&path, 1).unwrap();
        assert_eq!(lines, vec![big_b]);
    }
}
