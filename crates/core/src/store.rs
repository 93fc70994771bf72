// crates/core/src/store.rs
//! Append-only encoded stores (`engram.jsonl`, `cortex.jsonl`).
//!
//! Writers append whole batches under an exclusive `flock` on the store
//! file. Readers take no lock and may see a slightly stale tail.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde_json::Value;
use tracing::warn;

use crate::lens::Lens;
use crate::tail;

/// Handle to one lens's encoded store in one project.
#[derive(Debug, Clone)]
pub struct EncodedStore {
    path: PathBuf,
}

impl EncodedStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_lens(lens: &Lens, project_root: &Path) -> Self {
        Self::new(lens.encoded_path(project_root))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `entries`, one compact JSON object per line, as one locked write.
    ///
    /// A failed write is truncated back to the old length before the lock is
    /// released, so a retry never lands after a torn line.
    pub fn append(&self, entries: &[Value]) -> io::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let batch = encode_batch(entries)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;
        let result = file.metadata().and_then(|meta| {
            let written = file.write_all(batch.as_bytes()).and_then(|()| file.flush());
            truncate_on_error(&file, meta.len(), written)
        });
        let _ = file.unlock();
        result
    }

    /// Whether `entries` already sit in the store as one contiguous batch,
    /// exactly as [`EncodedStore::append`] would have written them.
    pub fn holds_batch(&self, entries: &[Value]) -> io::Result<bool> {
        if entries.is_empty() {
            return Ok(false);
        }
        let batch = encode_batch(entries)?;
        let existing = match std::fs::read(&self.path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(existing.starts_with(&batch) || existing.contains(&format!("\n{batch}")))
    }

    /// The newest `n` entries, oldest first. Missing store → empty.
    pub async fn recent(&self, n: usize) -> io::Result<Vec<Value>> {
        tail::tail_json_objects(&self.path, n).await
    }
}

fn encode_batch(entries: &[Value]) -> io::Result<String> {
    let mut batch = String::new();
    for entry in entries {
        batch.push_str(&serde_json::to_string(entry)?);
        batch.push('\n');
    }
    Ok(batch)
}

fn truncate_on_error(file: &File, len: u64, written: io::Result<()>) -> io::Result<()> {
    if written.is_err() {
        if let Err(e) = file.set_len(len) {
            warn!(len, error = %e, "store_truncate_failed");
        }
    }
    written
}
