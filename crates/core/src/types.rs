// crates/core/src/types.rs
//! Wire types: statusline snapshots and hook payloads.

use serde::{Deserialize, Serialize};

use crate::error::HookInputError;

// ============================================================================
// Statusline snapshot
// ============================================================================

/// One periodic telemetry record appended by the statusline script.
///
/// Only identity, transcript location, timestamp and the context window are
/// required; the rest is carried along for prompts and logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Written by the statusline script, `YYYY-MM-DDTHH:MM:SS.mmmZ`.
    #[serde(rename = "meta_ts")]
    pub timestamp: String,
    #[serde(default)]
    pub meta_host: Option<String>,
    pub session_id: String,
    pub transcript_path: String,
    #[serde(rename = "cwd")]
    pub project_path: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub model: Option<ModelInfo>,
    #[serde(default)]
    pub workspace: Option<Workspace>,
    #[serde(default)]
    pub output_style: Option<OutputStyle>,
    #[serde(default)]
    pub cost: Option<Cost>,
    pub context_window: ContextWindow,
    #[serde(default)]
    pub exceeds_200k_tokens: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub current_dir: String,
    pub project_dir: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputStyle {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cost {
    pub total_cost_usd: f64,
    pub total_duration_ms: u64,
    pub total_api_duration_ms: u64,
    pub total_lines_added: u64,
    pub total_lines_removed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextWindow {
    pub context_window_size: Option<u64>,
    /// Null early in a session, before the first API response.
    pub used_percentage: Option<f64>,
    pub remaining_percentage: Option<f64>,
    pub total_input_tokens: Option<u64>,
    pub total_output_tokens: Option<u64>,
    pub current_usage: Option<CurrentUsage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrentUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

impl Snapshot {
    /// Context usage in percent; 0 when not yet reported.
    pub fn usage_pct(&self) -> f64 {
        self.context_window.used_percentage.unwrap_or(0.0)
    }

    pub fn model_name(&self) -> &str {
        self.model
            .as_ref()
            .map(|m| m.display_name.as_str())
            .unwrap_or("unknown")
    }
}

// ============================================================================
// Hook payloads
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Default,
    Plan,
    AcceptEdits,
    DontAsk,
    BypassPermissions,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    Startup,
    Resume,
    Clear,
    Compact,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionStartInput {
    pub session_id: String,
    pub transcript_path: String,
    pub cwd: String,
    pub source: SessionSource,
    #[serde(default)]
    pub permission_mode: Option<PermissionMode>,
    /// Not sent on resume or clear.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub agent_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StopInput {
    pub session_id: String,
    pub transcript_path: String,
    pub cwd: String,
    #[serde(default)]
    pub permission_mode: Option<PermissionMode>,
    /// True when the host is already continuing because of a Stop hook.
    #[serde(default)]
    pub stop_hook_active: bool,
}

/// A hook payload, dispatched on `hook_event_name`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "hook_event_name")]
pub enum HookEvent {
    SessionStart(SessionStartInput),
    Stop(StopInput),
    #[serde(other)]
    Other,
}

/// The identity fields every payload should carry, read leniently so a
/// rejected payload can still be attributed in the log.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookIdentity {
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

impl HookEvent {
    /// Decode a stdin payload.
    pub fn parse(raw: &str) -> Result<Self, HookInputError> {
        if raw.trim().is_empty() {
            return Err(HookInputError::Empty);
        }
        Ok(serde_json::from_str(raw)?)
    }
}

impl HookIdentity {
    pub fn peek(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }
}
