// crates/hook/src/lib.rs
//! Hook entry points: one JSON payload in, optional context text out.
//!
//! Nothing here fails the host. Bad payloads and internal errors are logged
//! and the event is dropped.

pub mod cli;

use std::path::Path;
use std::sync::Arc;

use nous_core::controller::StopController;
use nous_core::launcher::{DetachedLauncher, ExtractionLauncher};
use nous_core::types::{HookEvent, HookIdentity, SessionStartInput, StopInput};
use nous_core::{inject, statusline, NousConfig, StopReport};
use tracing::{debug, info, info_span, warn, Instrument};

/// Shared state for one process.
#[derive(Clone)]
pub struct HookContext {
    pub config: Arc<NousConfig>,
    pub launcher: Arc<dyn ExtractionLauncher>,
}

impl HookContext {
    pub fn new(config: NousConfig, launcher: Arc<dyn ExtractionLauncher>) -> Self {
        Self {
            config: Arc::new(config),
            launcher,
        }
    }

    /// Production context: extractions run as detached `claude` processes.
    pub fn from_config(config: NousConfig) -> Self {
        let launcher = Arc::new(DetachedLauncher::from_config(&config));
        Self::new(config, launcher)
    }

    fn controller(&self) -> StopController {
        StopController::new(Arc::clone(&self.config), Arc::clone(&self.launcher))
    }
}

/// Handle one raw hook payload. Returns text for stdout, if any.
pub async fn dispatch(raw: &str, ctx: &HookContext) -> Option<String> {
    let event = match HookEvent::parse(raw) {
        Ok(event) => event,
        Err(e) => {
            let id = HookIdentity::peek(raw);
            warn!(
                event = ?id.hook_event_name,
                session = ?id.session_id,
                project = ?id.cwd,
                error = %e,
                "hook_input_rejected"
            );
            return None;
        }
    };

    match event {
        HookEvent::SessionStart(input) => {
            let span = info_span!("hook", event = "SessionStart", session = %input.session_id, project = %input.cwd);
            session_start(&input, ctx).instrument(span).await
        }
        HookEvent::Stop(input) => {
            let span = info_span!("hook", event = "Stop", session = %input.session_id, project = %input.cwd);
            stop(&input, ctx).instrument(span).await;
            None
        }
        HookEvent::Other => {
            let id = HookIdentity::peek(raw);
            debug!(event = ?id.hook_event_name, session = ?id.session_id, "hook_event_ignored");
            None
        }
    }
}

async fn session_start(input: &SessionStartInput, ctx: &HookContext) -> Option<String> {
    info!(
        source = ?input.source,
        model = ?input.model,
        permission_mode = ?input.permission_mode,
        "session_start"
    );

    let text = inject::render_session_context(Path::new(&input.cwd), ctx.config.inject_recent_count).await;
    match &text {
        Some(t) => info!(bytes = t.len(), "context_injected"),
        None => info!("nothing_to_inject"),
    }
    text
}

async fn stop(input: &StopInput, ctx: &HookContext) -> Option<StopReport> {
    if input.stop_hook_active {
        info!("stop_hook_active_skip");
        return None;
    }

    let found = statusline::read_for_session(
        &ctx.config.statusline_path,
        ctx.config.statusline_tail_lines,
        &input.cwd,
        &input.session_id,
    )
    .await;
    let Some(current) = found.current else {
        warn!(statusline = %ctx.config.statusline_path.display(), "no_statusline_snapshot");
        return None;
    };

    Some(ctx.controller().handle(&current, found.previous.as_ref()).await)
}

/// `nous flush`: drain both inboxes of `project`. Returns a JSON summary.
pub async fn flush_project(project: &Path, ctx: &HookContext) -> String {
    let [learnings, knowledge] = ctx.controller().flush_all(project).await;
    info!(project = %project.display(), learnings, knowledge, "manual_flush");
    serde_json::json!({ "learnings": learnings, "knowledge": knowledge }).to_string()
}

/// `nous usage`: the current usage percentage of a session, if known.
pub async fn session_usage(project: &str, session: &str, ctx: &HookContext) -> Option<f64> {
    statusline::read_for_session(
        &ctx.config.statusline_path,
        ctx.config.statusline_tail_lines,
        project,
        session,
    )
    .await
    .current
    .map(|s| s.usage_pct())
}
