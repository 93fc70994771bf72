// crates/core/src/inject.rs
//! SessionStart injection: recent store entries rendered as session context.

use std::path::Path;

use serde_json::Value;
use tracing::warn;

use crate::lens::{Lens, KNOWLEDGE, LEARNINGS};
use crate::store::EncodedStore;

const NOTICE: &str = "<nous_notice>Share a brief summary of the learnings and knowledge injected above so the user understands what context you received.</nous_notice>";

/// The text printed on stdout at session start, or `None` when both stores
/// are empty or missing.
pub async fn render_session_context(project_root: &Path, n: usize) -> Option<String> {
    let learnings = recent(&LEARNINGS, project_root, n).await;
    let knowledge = recent(&KNOWLEDGE, project_root, n).await;

    if learnings.is_empty() && knowledge.is_empty() {
        return None;
    }

    let mut blocks = Vec::with_capacity(3);
    if !learnings.is_empty() {
        blocks.push(block("recent_learnings", &learnings));
    }
    if !knowledge.is_empty() {
        blocks.push(block("recent_knowledge", &knowledge));
    }
    blocks.push(NOTICE.to_string());
    Some(blocks.join("\n\n"))
}

async fn recent(lens: &Lens, project_root: &Path, n: usize) -> Vec<Value> {
    let store = EncodedStore::for_lens(lens, project_root);
    store.recent(n).await.unwrap_or_else(|e| {
        warn!(lens = lens.name, store = %store.path().display(), error = %e, "store_read_failed");
        Vec::new()
    })
}

fn block(tag: &str, entries: &[Value]) -> String {
    let body: Vec<String> = entries.iter().map(Value::to_string).collect();
    format!("<{tag}>\n{}\n</{tag}>", body.join("\n"))
}
