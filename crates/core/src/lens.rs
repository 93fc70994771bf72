// crates/core/src/lens.rs
//! Extraction lenses and the prompt each agent run receives.
//!
//! A lens is one perspective on a transcript: what to look for, where raw
//! agent output lands (the inbox) and where validated entries accumulate
//! (the encoded store). There are exactly two, both `'static`.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::paths;
use crate::types::Snapshot;

/// A static extraction perspective.
#[derive(Debug)]
pub struct Lens {
    pub name: &'static str,
    pub instructions: &'static str,
    /// Inbox base file name; fragments are `<inbox_base>.<id>`.
    pub inbox_base: &'static str,
    /// Encoded store file name.
    pub encoded_file: &'static str,
    /// Fields every entry is expected to carry.
    pub required_fields: &'static [&'static str],
}

impl Lens {
    /// `<project>/.claude/nous/<lens>/`.
    pub fn dir(&self, project_root: &Path) -> PathBuf {
        paths::namespace_dir(project_root).join(self.name)
    }

    pub fn encoded_path(&self, project_root: &Path) -> PathBuf {
        self.dir(project_root).join(self.encoded_file)
    }

    /// Names of required fields missing from `entry`.
    pub fn missing_fields(&self, entry: &Value) -> Vec<&'static str> {
        self.required_fields
            .iter()
            .copied()
            .filter(|field| entry.get(field).is_none())
            .collect()
    }
}

pub static LEARNINGS: Lens = Lens {
    name: "learnings",
    instructions: LEARNINGS_INSTRUCTIONS,
    inbox_base: "inbox.jsonl",
    encoded_file: "engram.jsonl",
    required_fields: &["ts", "project", "session", "content", "context", "suggested_target"],
};

pub static KNOWLEDGE: Lens = Lens {
    name: "knowledge",
    instructions: KNOWLEDGE_INSTRUCTIONS,
    inbox_base: "inbox.jsonl",
    encoded_file: "cortex.jsonl",
    required_fields: &[
        "ts",
        "project",
        "session",
        "category",
        "content",
        "context",
        "suggested_target",
    ],
};

/// Every lens, in flush and launch order.
pub static ALL_LENSES: [&Lens; 2] = [&LEARNINGS, &KNOWLEDGE];

const OUTPUT_CONTRACT: &str = "\
OUTPUT FORMAT (STRICT):
- Something worth keeping: print JSONL, one JSON object per line, nothing else.
- Nothing worth keeping: print nothing at all (an empty response).
- Never print prose, markdown, code fences, summaries, or explanations.
- Never announce that nothing was found. Silence is the only valid way to say that.

Anything other than valid JSONL or an empty response is a failed run.";

const LEARNINGS_INSTRUCTIONS: &str = "\
Review the transcript window from session_context.start_ts to session_context.end_ts.

The transcript is not included here. Read the window yourself from the session file
described in <transcript_instructions>.

Question: what should future sessions do differently because of what happened in this window?

Signals worth capturing:
- Failures and workarounds: a tool or command failed and an alternative succeeded
- Missing guidance: trouble caused by incomplete or wrong instructions
- Patterns: techniques that worked and are worth repeating
- Edge cases: surprising behavior worth writing down
- Corrections: the user redirected the approach
- Rules: the user stated a principle that outlives this task

One emphatic correction is enough to record. A preference repeated quietly is too.
A window that went smoothly yields nothing; do not invent learnings.

Skip anything already covered by <existing_entries>.

For suggested_target prefer a specific home over CLAUDE.md:
- commands/*.md for workflow gaps
- skills/**/*.md for domain know-how
- kb/*.md for project facts
- CLAUDE.md only when nothing else fits

Fill ts with session_context.end_ts and session with session_context.session_id.

Entry shape:
{\"ts\": \"end_ts\", \"project\": \"/absolute/project/path\", \"session\": \"session_id\", \"content\": \"actionable guidance\", \"context\": \"what happened\", \"suggested_target\": \"/absolute/path/file.md\"}";

const KNOWLEDGE_INSTRUCTIONS: &str = "\
Review the transcript window from session_context.start_ts to session_context.end_ts.

The transcript is not included here. Read the window yourself from the session file
described in <transcript_instructions>.

Question: which facts about this project should future sessions already know?

Knowledge is what exists: architecture, conventions, domain concepts, dependencies, traps.
How to work is a learning and belongs to the other lens.

Prefer non-obvious discoveries that would save a future session an investigation.
If the window taught nothing about the project, output nothing.

Skip anything already covered by <existing_entries>.

Fill ts with session_context.end_ts and session with session_context.session_id.

Entry shape:
{\"ts\": \"end_ts\", \"project\": \"/absolute/project/path\", \"session\": \"session_id\", \"category\": \"one or two words\", \"content\": \"the fact\", \"context\": \"why it matters\", \"suggested_target\": \"/absolute/path/file.md\"}";

/// Render the self-contained instruction text for one agent run.
///
/// `existing` entries are context for the agent's own deduplication; nothing
/// here enforces it.
pub fn build_extraction_prompt(
    lens: &Lens,
    current: &Snapshot,
    previous: Option<&Snapshot>,
    start_ts: &str,
    end_ts: &str,
    existing: &[Value],
) -> String {
    let previous_block = previous
        .map(|p| {
            format!(
                "\n  <previous_ts>{}</previous_ts>\n  <previous_context_used_pct>{}</previous_context_used_pct>",
                p.timestamp,
                p.usage_pct()
            )
        })
        .unwrap_or_default();

    let existing_json = serde_json::to_string_pretty(existing).unwrap_or_else(|_| "[]".into());
    let transcript = &current.transcript_path;

    format!(
        r#"{instructions}

{contract}

<session_context>
  <lens>{lens}</lens>
  <session_id>{session}</session_id>
  <project>{project}</project>
  <start_ts>{start_ts}</start_ts>
  <end_ts>{end_ts}</end_ts>
  <model>{model}</model>
  <context_used_pct>{pct}</context_used_pct>{previous_block}
</session_context>

<transcript_instructions>
The transcript is the full session log and can run to thousands of lines. Read only the window.

FILE: {transcript}
WINDOW: {start_ts} to {end_ts}

Each line is a JSON object with a timestamp field. Select the window with:
jq -c 'select(.timestamp >= "{start_ts}" and .timestamp <= "{end_ts}")' "{transcript}"
</transcript_instructions>

<existing_entries>
{existing_json}
</existing_entries>"#,
        instructions = lens.instructions,
        contract = OUTPUT_CONTRACT,
        lens = lens.name,
        session = current.session_id,
        project = current.project_path,
        model = current.model_name(),
        pct = current.usage_pct(),
    )
}
