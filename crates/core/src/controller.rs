// crates/core/src/controller.rs
//! Stop-event threshold controller.
//!
//! Decides from the session's context usage what a Stop event does:
//!
//! ```text
//! pct <  min          Skip             nothing
//! min <= pct <= max   ExtractAndFlush  flush both inboxes, launch both lenses
//! pct >  max          FlushOnly        flush both inboxes
//! ```
//!
//! No state survives an invocation besides the cursor and the stores. Deciding
//! whether to block a nearly full session is left to whoever reads the same
//! percentage; this module never blocks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::NousConfig;
use crate::cursor::{self, CursorStore, CursorUpdate};
use crate::inbox::{FlushPolicy, Inbox};
use crate::launcher::{ExtractionLauncher, Job, LaunchRequest};
use crate::lens::{build_extraction_prompt, ALL_LENSES};
use crate::store::EncodedStore;
use crate::types::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip,
    ExtractAndFlush,
    FlushOnly,
}

/// Map a usage percentage onto a [`Decision`]. Both bounds are inclusive on
/// the extraction side.
pub fn classify(pct: f64, config: &NousConfig) -> Decision {
    if pct < config.extract_min_pct {
        Decision::Skip
    } else if pct <= config.extract_max_pct {
        Decision::ExtractAndFlush
    } else {
        Decision::FlushOnly
    }
}

/// What one Stop event did.
#[derive(Debug, Clone, PartialEq)]
pub struct StopReport {
    pub decision: Decision,
    pub flushed_learnings: usize,
    pub flushed_knowledge: usize,
    pub jobs: Vec<Job>,
    pub cursor_advanced: bool,
}

impl StopReport {
    fn new(decision: Decision) -> Self {
        Self {
            decision,
            flushed_learnings: 0,
            flushed_knowledge: 0,
            jobs: Vec::new(),
            cursor_advanced: false,
        }
    }
}

pub struct StopController {
    config: Arc<NousConfig>,
    launcher: Arc<dyn ExtractionLauncher>,
}

impl StopController {
    pub fn new(config: Arc<NousConfig>, launcher: Arc<dyn ExtractionLauncher>) -> Self {
        Self { config, launcher }
    }

    pub fn config(&self) -> &NousConfig {
        &self.config
    }

    /// Handle one Stop event for the session described by `current`.
    pub async fn handle(&self, current: &Snapshot, previous: Option<&Snapshot>) -> StopReport {
        let pct = current.usage_pct();
        let mut report = StopReport::new(classify(pct, &self.config));

        if report.decision == Decision::Skip {
            info!(pct, "stop_skipped_low_usage");
            return report;
        }

        let project = PathBuf::from(&current.project_path);
        let [learnings, knowledge] = self.flush_all(&project).await;
        report.flushed_learnings = learnings;
        report.flushed_knowledge = knowledge;

        if report.decision == Decision::ExtractAndFlush {
            self.extract(current, previous, &project, &mut report).await;
        }

        info!(
            pct,
            decision = ?report.decision,
            flushed_learnings = report.flushed_learnings,
            flushed_knowledge = report.flushed_knowledge,
            jobs = report.jobs.len(),
            cursor_advanced = report.cursor_advanced,
            "stop_handled"
        );
        report
    }

    /// Flush every lens inbox of `project`, in lens order.
    pub async fn flush_all(&self, project: &Path) -> [usize; 2] {
        let root = project.to_path_buf();
        let policy = FlushPolicy::for_agent_timeout(self.config.agent_timeout_secs);
        let joined = tokio::task::spawn_blocking(move || {
            ALL_LENSES.map(|lens| Inbox::for_lens(lens, &root).with_policy(policy).flush())
        })
        .await;
        joined.unwrap_or_else(|e| {
            warn!(error = %e, "flush_task_failed");
            [0, 0]
        })
    }

    async fn extract(
        &self,
        current: &Snapshot,
        previous: Option<&Snapshot>,
        project: &Path,
        report: &mut StopReport,
    ) {
        if !Path::new(&current.transcript_path).exists() {
            warn!(transcript = %current.transcript_path, "transcript_missing");
            return;
        }

        // The end of the window is quoted into a jq filter; only the strict
        // cursor format is let through.
        let end_ts = current.timestamp.as_str();
        if !cursor::is_valid_timestamp(end_ts) {
            warn!(value = %end_ts, "snapshot_invalid_ts");
            return;
        }

        let store = CursorStore::for_project(project);
        let start_ts = match tokio::task::spawn_blocking(move || store.get()).await {
            Ok(Ok(ts)) => ts,
            Ok(Err(e)) => {
                warn!(error = %e, "cursor_read_failed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "cursor_task_failed");
                return;
            }
        };

        if start_ts.as_str() >= end_ts {
            debug!(start_ts = %start_ts, end_ts, "extraction_window_empty");
            return;
        }

        let mut all_launched = true;
        for lens in ALL_LENSES {
            let existing = self.existing_entries(lens.name, EncodedStore::for_lens(lens, project)).await;
            let prompt = build_extraction_prompt(lens, current, previous, &start_ts, end_ts, &existing);
            let request = LaunchRequest {
                lens,
                project_root: project,
                session_id: &current.session_id,
                prompt,
            };
            match self.launcher.launch(request) {
                Ok(job) => report.jobs.push(job),
                Err(e) => {
                    warn!(lens = lens.name, error = %e, "extraction_launch_failed");
                    all_launched = false;
                }
            }
        }

        if !all_launched {
            info!(start_ts = %start_ts, "cursor_held");
            return;
        }

        let store = CursorStore::for_project(project);
        let end = end_ts.to_string();
        match tokio::task::spawn_blocking(move || store.set(&end)).await {
            Ok(Ok(CursorUpdate::Advanced)) => report.cursor_advanced = true,
            Ok(Ok(CursorUpdate::Unchanged)) => debug!(end_ts, "cursor_already_ahead"),
            Ok(Err(e)) => warn!(error = %e, "cursor_write_failed"),
            Err(e) => warn!(error = %e, "cursor_task_failed"),
        }
    }

    async fn existing_entries(&self, lens: &str, store: EncodedStore) -> Vec<Value> {
        store
            .recent(self.config.dedup_context_limit)
            .await
            .unwrap_or_else(|e| {
                warn!(lens, store = %store.path().display(), error = %e, "store_read_failed");
                Vec::new()
            })
    }
}
