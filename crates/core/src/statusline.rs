// crates/core/src/statusline.rs
//! Statusline reader: the current and previous snapshot for one session.
//!
//! The statusline script appends one record per refresh for every running
//! session on the host, so the log interleaves sessions. Only a bounded tail
//! is read; a session that has not refreshed within it has no snapshot.

use std::io;
use std::path::Path;

use tracing::warn;

use crate::tail;
use crate::types::Snapshot;

/// The two newest snapshots for one `(project, session)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshots {
    pub current: Option<Snapshot>,
    pub previous: Option<Snapshot>,
}

/// Scan the last `tail_lines` records of `path`, newest first, for records
/// matching `project` and `session`.
///
/// Unparseable lines are logged and skipped. A missing or unreadable log
/// yields no snapshots.
pub async fn read_for_session(
    path: &Path,
    tail_lines: usize,
    project: &str,
    session: &str,
) -> SessionSnapshots {
    let lines = match tail::tail_lines(path, tail_lines).await {
        Ok(lines) => lines,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return SessionSnapshots::default(),
        Err(e) => {
            warn!(statusline = %path.display(), error = %e, "statusline_read_failed");
            return SessionSnapshots::default();
        }
    };

    let mut found = SessionSnapshots::default();
    for line in lines.iter().rev() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let snap: Snapshot = match serde_json::from_str(line) {
            Ok(s) => s,
            Err(e) => {
                warn!(statusline = %path.display(), error = %e, "statusline_parse_failed");
                continue;
            }
        };
        if snap.project_path != project || snap.session_id != session {
            continue;
        }
        if found.current.is_none() {
            found.current = Some(snap);
        } else {
            found.previous = Some(snap);
            break;
        }
    }
    found
}
