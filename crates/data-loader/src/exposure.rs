//! Exposure-log sources.
//!
//! Selecting which log files take part in an audit, and streaming the entries
//! out of each file. Lines that fail to parse are skipped and counted rather
//! than aborting the read.

use crate::error::{DataLoadError, Result};
use crate::records::ExposureLogEntry;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Outcome of reading a single exposure-log file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExposureLogStats {
    /// Entries handed to the caller
    pub entries: u64,
    /// Lines that were not a valid exposure entry
    pub skipped: u64,
}

impl ExposureLogStats {
    pub fn merge(self, other: Self) -> Self {
        Self {
            entries: self.entries + other.entries,
            skipped: self.skipped + other.skipped,
        }
    }
}

/// Expand glob selectors into a sorted, de-duplicated list of files.
///
/// A selector that names an existing file is taken literally. A selector that
/// matches nothing is an error so a typo cannot silently produce an empty
/// audit.
pub fn resolve_log_sources<S: AsRef<str>>(selectors: &[S]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for selector in selectors {
        let selector = selector.as_ref();
        let literal = Path::new(selector);
        if literal.is_file() {
            paths.push(literal.to_path_buf());
            continue;
        }

        let entries = glob::glob(selector).map_err(|e| DataLoadError::InvalidPattern {
            pattern: selector.to_string(),
            reason: e.to_string(),
        })?;

        let before = paths.len();
        for entry in entries {
            let path = entry.map_err(|e| DataLoadError::IoError(e.into_error()))?;
            if path.is_file() {
                paths.push(path);
            }
        }
        if paths.len() == before {
            return Err(DataLoadError::NoSources(selector.to_string()));
        }
    }

    paths.sort();
    paths.dedup();
    Ok(paths)
}

/// Stream every well-formed entry of one JSON Lines exposure log into
/// `on_entry`.
///
/// Blank lines are ignored. Lines that are not valid UTF-8 or JSON, or lack `userId` or
/// `genres`, or carry the wrong types, are skipped and counted.
pub fn read_exposure_log<F>(path: &Path, mut on_entry: F) -> Result<ExposureLogStats>
where
    F: FnMut(ExposureLogEntry),
{
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => DataLoadError::FileNotFound {
            path: path.display().to_string(),
        },
        _ => DataLoadError::IoError(e),
    })?;

    let mut stats = ExposureLogStats::default();
    // Raw byte lines: a line that is not UTF-8 is one malformed entry, not a
    // failed read
    for (idx, line) in BufReader::new(file).split(b'\n').enumerate() {
        let line = line?;
        let line_trimmed = line.trim_ascii();
        if line_trimmed.is_empty() {
            continue;
        }

        match serde_json::from_slice::<ExposureLogEntry>(line_trimmed) {
            Ok(entry) => {
                stats.entries += 1;
                on_entry(entry);
            }
            Err(e) => {
                stats.skipped += 1;
                debug!(
                    "Skipping malformed exposure entry at {}:{}: {}",
                    path.display(),
                    idx + 1,
                    e
                );
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_read_exposure_log_skips_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recs_2025-05-06.jsonl");
        fs::write(
            &path,
            concat!(
                "{\"userId\": 42, \"genres\": [\"Action\", \"Drama\"]}\n",
                "\n",
                "{\"userId\": 7}\n",
                "not json at all\n",
                "{\"userId\": \"seven\", \"genres\": [\"Action\"]}\n",
                "{\"user_id\": 7, \"genres\": [\"Action\", \"Action\", \"Action\"]}\n",
            ),
        )
        .unwrap();

        let mut seen = Vec::new();
        let stats = read_exposure_log(&path, |entry| seen.push(entry)).unwrap();

        assert_eq!(stats, ExposureLogStats { entries: 2, skipped: 3 });
        assert_eq!(seen[0].user_id, 42);
        assert_eq!(seen[1].genres.len(), 3);
    }

    #[test]
    fn test_read_exposure_log_skips_invalid_utf8_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recs_2025-05-07.jsonl");
        let mut bytes = b"{\"userId\": 1, \"genres\": [\"Drama\"]}\n".to_vec();
        bytes.extend_from_slice(b"{\"userId\": 2, \"genres\": [\"Dr\xffma\"]}\n");
        bytes.extend_from_slice(b"{\"userId\": 3, \"genres\": [\"Comedy\"]}\n");
        fs::write(&path, bytes).unwrap();

        let mut users = Vec::new();
        let stats = read_exposure_log(&path, |entry| users.push(entry.user_id)).unwrap();

        assert_eq!(stats, ExposureLogStats { entries: 2, skipped: 1 });
        assert_eq!(users, vec![1, 3]);
    }

    #[test]
    fn test_resolve_log_sources_expands_globs() {
        let dir = TempDir::new().unwrap();
        for name in ["recs_2025-05-06a.jsonl", "recs_2025-05-06b.jsonl", "recs_2025-05-07.jsonl"] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        let pattern = format!("{}/recs_2025-05-06*.jsonl", dir.path().display());
        let literal = dir.path().join("recs_2025-05-06a.jsonl").display().to_string();
        let paths = resolve_log_sources(&[pattern, literal]).unwrap();

        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.to_string_lossy().contains("2025-05-06")));
    }

    #[test]
    fn test_resolve_log_sources_rejects_empty_match() {
        let dir = TempDir::new().unwrap();
        let pattern = format!("{}/nothing-*.jsonl", dir.path().display());

        let err = resolve_log_sources(&[pattern]).unwrap_err();
        assert!(matches!(err, DataLoadError::NoSources(_)));
    }
}
