//! Centralized path functions for every file nous reads or writes.
//!
//! Host-wide files live under `~/.claude/`; per-project state lives under
//! `<project>/.claude/nous/`.

use std::path::{Path, PathBuf};

/// Per-project namespace, relative to the project root.
pub const NAMESPACE_DIR: &str = ".claude/nous";

/// Extraction cursor file name inside the namespace.
pub const CURSOR_FILE: &str = "extraction_cursor.json";

/// Host config root: `~/.claude/`.
pub fn claude_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|d| d.join(".claude"))
}

/// Shared event log: `~/.claude/nous.log`.
pub fn default_log_path() -> Option<PathBuf> {
    claude_dir().map(|d| d.join("nous.log"))
}

/// Telemetry log appended by the statusline script: `~/.claude/statusline-activity.jsonl`.
pub fn default_statusline_path() -> Option<PathBuf> {
    claude_dir().map(|d| d.join("statusline-activity.jsonl"))
}

/// Optional config file: `~/.claude/nous.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    claude_dir().map(|d| d.join("nous.toml"))
}

/// `<project>/.claude/nous/`.
pub fn namespace_dir(project_root: &Path) -> PathBuf {
    project_root.join(NAMESPACE_DIR)
}

/// `<project>/.claude/nous/extraction_cursor.json`.
pub fn cursor_path(project_root: &Path) -> PathBuf {
    namespace_dir(project_root).join(CURSOR_FILE)
}

/// Sidecar lock for a file that is rewritten or rotated: `<path>.lock`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}
