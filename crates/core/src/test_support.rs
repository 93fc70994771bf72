// crates/core/src/test_support.rs
//! Fixtures shared by the unit tests of several modules.

use std::io::Write;
use std::path::Path;

use crate::types::Snapshot;

/// A full statusline record as the statusline script writes it.
pub(crate) fn statusline_json(session: &str, cwd: &str, pct: Option<f64>, ts: &str) -> String {
    serde_json::json!({
        "meta_ts": ts,
        "meta_host": "devbox",
        "session_id": session,
        "transcript_path": format!("/tmp/{session}.jsonl"),
        "cwd": cwd,
        "version": "2.1.0",
        "model": { "id": "claude-opus-4-1", "display_name": "Opus" },
        "workspace": { "current_dir": cwd, "project_dir": cwd },
        "output_style": { "name": "default" },
        "cost": {
            "total_cost_usd": 1.25,
            "total_duration_ms": 1000,
            "total_api_duration_ms": 800,
            "total_lines_added": 10,
            "total_lines_removed": 2
        },
        "context_window": {
            "context_window_size": 200000,
            "used_percentage": pct,
            "remaining_percentage": pct.map(|p| 100.0 - p),
            "total_input_tokens": 1000,
            "total_output_tokens": 500,
            "current_usage": {
                "input_tokens": 10,
                "output_tokens": 5,
                "cache_creation_input_tokens": 0,
                "cache_read_input_tokens": 0
            }
        },
        "exceeds_200k_tokens": false
    })
    .to_string()
}

pub(crate) fn snapshot(session: &str, cwd: &str, pct: f64, ts: &str) -> Snapshot {
    serde_json::from_str(&statusline_json(session, cwd, Some(pct), ts))
        .expect("fixture snapshot")
}

/// Append raw lines to a statusline file, creating it if needed.
pub(crate) fn append_lines(path: &Path, lines: &[String]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
}
