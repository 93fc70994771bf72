// crates/core/src/cursor.rs
//! Per-project extraction cursor.
//!
//! `extraction_cursor.json` holds a single record, `{"last_extracted_ts": ...}`,
//! marking where the next extraction window starts. Every read-or-init and
//! every write happens under an exclusive `flock` on the cursor file itself,
//! so concurrent hook processes for one project serialize.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use fs2::FileExt;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CursorError;
use crate::paths;

#[derive(Debug, Serialize, Deserialize)]
struct CursorRecord {
    last_extracted_ts: String,
}

/// Outcome of [`CursorStore::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorUpdate {
    Advanced,
    /// The stored cursor is already later than the requested value.
    Unchanged,
}

/// Handle to one project's cursor file.
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn for_project(project_root: &Path) -> Self {
        Self {
            path: paths::cursor_path(project_root),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the stored cursor, initializing it to now when the file is
    /// missing, empty, corrupt, or holds a malformed timestamp.
    pub fn get(&self) -> Result<String, CursorError> {
        let mut file = self.open_locked()?;
        let result = self.read_or_init(&mut file);
        let _ = file.unlock();
        result
    }

    /// Advance the cursor to `ts`.
    ///
    /// A malformed `ts` is rejected before the file is touched. A `ts` older
    /// than the stored cursor is ignored, keeping the cursor monotonic.
    pub fn set(&self, ts: &str) -> Result<CursorUpdate, CursorError> {
        let requested = parse_timestamp(ts).ok_or_else(|| {
            warn!(cursor = %self.path.display(), value = %truncate(ts, 30), "cursor_invalid_ts");
            CursorError::invalid(ts)
        })?;

        let mut file = self.open_locked()?;
        let result = self.write_if_not_older(&mut file, ts, requested);
        let _ = file.unlock();
        result
    }

    fn write_if_not_older(
        &self,
        file: &mut File,
        ts: &str,
        requested: DateTime<Utc>,
    ) -> Result<CursorUpdate, CursorError> {
        if let Some(stored) = read_record(file, &self.path)? {
            if parse_timestamp(&stored).is_some_and(|s| s > requested) {
                return Ok(CursorUpdate::Unchanged);
            }
        }
        write_record(file, &self.path, ts)?;
        Ok(CursorUpdate::Advanced)
    }

    fn open_locked(&self) -> Result<File, CursorError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CursorError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| CursorError::io(&self.path, e))?;
        file.lock_exclusive()
            .map_err(|e| CursorError::io(&self.path, e))?;
        Ok(file)
    }

    fn read_or_init(&self, file: &mut File) -> Result<String, CursorError> {
        let reason = match read_record(file, &self.path)? {
            Some(ts) if is_valid_timestamp(&ts) => return Ok(ts),
            Some(_) => "corrupt",
            None => "missing",
        };

        let now = now_timestamp();
        write_record(file, &self.path, &now)?;
        info!(cursor = %self.path.display(), reason, ts = %now, "cursor_created");
        Ok(now)
    }
}

/// `Ok(None)` for an empty file. Unparseable content comes back as an empty
/// string so the caller can tell corrupt from missing.
fn read_record(file: &mut File, path: &Path) -> Result<Option<String>, CursorError> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_string(&mut contents))
        .map_err(|e| CursorError::io(path, e))?;

    if contents.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(
        serde_json::from_str::<CursorRecord>(&contents)
            .map(|r| r.last_extracted_ts)
            .unwrap_or_default(),
    ))
}

fn write_record(file: &mut File, path: &Path, ts: &str) -> Result<(), CursorError> {
    let record = CursorRecord {
        last_extracted_ts: ts.to_string(),
    };
    let body = serde_json::to_string(&record).unwrap_or_default();
    file.set_len(0)
        .and_then(|_| file.seek(SeekFrom::Start(0)))
        .and_then(|_| file.write_all(body.as_bytes()))
        .and_then(|_| file.flush())
        .map_err(|e| CursorError::io(path, e))
}

fn timestamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}Z$").expect("valid regex")
    })
}

fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    if !timestamp_pattern().is_match(ts) {
        return None;
    }
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Whether `ts` is a millisecond-precision UTC ISO-8601 timestamp.
///
/// The value ends up inside a shell-quoted `jq` filter in the agent prompt,
/// so nothing looser is accepted.
pub fn is_valid_timestamp(ts: &str) -> bool {
    parse_timestamp(ts).is_some()
}

/// Current UTC time as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
