// crates/core/src/config.rs
//! Runtime configuration.
//!
//! Resolution order: built-in defaults, then `~/.claude/nous.toml` (or the
//! file named by `NOUS_CONFIG`), then `NOUS_*` environment variables.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::paths;

/// Environment variable naming an alternate config file.
pub const CONFIG_ENV: &str = "NOUS_CONFIG";

/// Tunables for the hook pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NousConfig {
    pub log_path: PathBuf,
    pub log_max_bytes: u64,
    pub log_backlog: usize,
    pub statusline_path: PathBuf,
    pub statusline_tail_lines: usize,
    /// Extraction agent executable, resolved on `PATH` when not a path.
    pub agent_bin: String,
    pub agent_model: String,
    /// Wall-clock supervisor wrapped around the agent (coreutils `timeout`).
    pub supervisor_bin: String,
    pub agent_timeout_secs: u64,
    pub inject_recent_count: usize,
    pub dedup_context_limit: usize,
    pub extract_min_pct: f64,
    pub extract_max_pct: f64,
}

impl Default for NousConfig {
    fn default() -> Self {
        Self {
            log_path: paths::default_log_path().unwrap_or_else(|| PathBuf::from("nous.log")),
            log_max_bytes: 5 * 1024 * 1024,
            log_backlog: 3,
            statusline_path: paths::default_statusline_path()
                .unwrap_or_else(|| PathBuf::from("statusline-activity.jsonl")),
            statusline_tail_lines: 100,
            agent_bin: "claude".into(),
            agent_model: "opus".into(),
            supervisor_bin: "timeout".into(),
            agent_timeout_secs: 300,
            inject_recent_count: 5,
            dedup_context_limit: 20,
            extract_min_pct: 10.0,
            extract_max_pct: 60.0,
        }
    }
}

/// A loaded config plus the problems met while loading it.
///
/// Problems are returned instead of logged because the logger itself is
/// configured from this value.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: NousConfig,
    pub warnings: Vec<String>,
}

impl NousConfig {
    /// Load from the default file location and the process environment.
    pub fn load() -> LoadedConfig {
        let mut warnings = Vec::new();

        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(paths::default_config_path);

        let mut config = match path {
            Some(path) => Self::from_file(&path).unwrap_or_else(|e| {
                warnings.push(format!("{e}; using defaults"));
                Self::default()
            }),
            None => {
                warnings.push(ConfigError::HomeDirNotFound.to_string());
                Self::default()
            }
        };

        warnings.extend(config.apply_env(|key| std::env::var(key).ok()));
        LoadedConfig { config, warnings }
    }

    /// Parse a TOML config file. A missing file is not an error.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::io(path, e)),
        };
        toml::from_str(&contents).map_err(|e| ConfigError::Malformed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply `NOUS_*` overrides using `lookup` as the environment.
    ///
    /// Returns one warning per variable that was set but unparseable; those
    /// variables are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("NOUS_LOG_PATH") {
            self.log_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty("NOUS_STATUSLINE_PATH") {
            self.statusline_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty("NOUS_AGENT_BIN") {
            self.agent_bin = v;
        }
        if let Some(v) = non_empty("NOUS_AGENT_MODEL") {
            self.agent_model = v;
        }
        if let Some(v) = non_empty("NOUS_SUPERVISOR_BIN") {
            self.supervisor_bin = v;
        }
        if let Some(v) = non_empty("NOUS_LOG_MAX_BYTES") {
            match v.trim().parse() {
                Ok(n) => self.log_max_bytes = n,
                Err(_) => warnings.push(format!("ignoring NOUS_LOG_MAX_BYTES={v}")),
            }
        }
        if let Some(v) = non_empty("NOUS_AGENT_TIMEOUT_SECS") {
            match v.trim().parse() {
                Ok(n) => self.agent_timeout_secs = n,
                Err(_) => warnings.push(format!("ignoring NOUS_AGENT_TIMEOUT_SECS={v}")),
            }
        }

        warnings
    }
}
