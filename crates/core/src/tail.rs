//! Backward reads of append-only JSONL files.
//!
//! The telemetry log and the encoded stores only ever grow, and every reader
//! here cares about the newest records. Reading from EOF keeps the cost
//! proportional to the window instead of the file.

use std::io;
use std::path::Path;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const CHUNK_SIZE: u64 = 8 * 1024;

/// Read the last `n` lines of `path`, oldest first.
///
/// A trailing newline does not produce an empty last line, and lines longer
/// than the chunk size are reassembled. Blank lines are kept so callers see
/// the file as written.
pub async fn tail_lines(path: &Path, n: usize) -> io::Result<Vec<String>> {
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut file = tokio::fs::File::open(path).await?;
    let mut remaining = file.metadata().await?.len();
    let mut collected: Vec<u8> = Vec::new();
    let mut newlines = 0usize;

    // n + 1 newlines delimit n complete lines even when the file ends in '\n'.
    while remaining > 0 && newlines <= n {
        let chunk_len = remaining.min(CHUNK_SIZE);
        remaining -= chunk_len;

        file.seek(io::SeekFrom::Start(remaining)).await?;
        let mut chunk = vec![0u8; chunk_len as usize];
        file.read_exact(&mut chunk).await?;

        newlines += chunk.iter().filter(|&&b| b == b'\n').count();
        chunk.extend_from_slice(&collected);
        collected = chunk;
    }

    let lossy = String::from_utf8_lossy(&collected);
    let text: &str = &lossy;
    let text = text.strip_suffix('\n').unwrap_or(text);
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].iter().map(|s| s.to_string()).collect())
}

/// The last `n` JSON objects of a JSONL file, oldest first.
///
/// Scans a window of `n * 4` lines so a few corrupt or blank lines near the
/// end do not starve the result. A missing file yields an empty vec.
pub async fn tail_json_objects(path: &Path, n: usize) -> io::Result<Vec<Value>> {
    let lines = match tail_lines(path, n.saturating_mul(4)).await {
        Ok(lines) => lines,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let objects: Vec<Value> = lines
        .iter()
        .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
        .filter(Value::is_object)
        .collect();

    let start = objects.len().saturating_sub(n);
    Ok(objects[start..].to_vec())
}
