// crates/hook/tests/dispatch_test.rs
//! End-to-end hook handling against a temp project and statusline log.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use nous_core::error::LaunchError;
use nous_core::fragment::{unix_now, FragmentId};
use nous_core::launcher::{ExtractionLauncher, Job, LaunchRequest, SUBPROCESS_ENV};
use nous_core::{CursorStore, EncodedStore, NousConfig, KNOWLEDGE, LEARNINGS};
use nous_hook::{dispatch, flush_project, session_usage, HookContext};
use pretty_assertions::assert_eq;
use serde_json::json;

#[derive(Default)]
struct RecordingLauncher {
    lenses: Mutex<Vec<&'static str>>,
}

impl ExtractionLauncher for RecordingLauncher {
    fn launch(&self, request: LaunchRequest<'_>) -> Result<Job, LaunchError> {
        self.lenses.lock().unwrap().push(request.lens.name);
        let id = FragmentId::generate();
        let dir = request.lens.dir(request.project_root);
        Ok(Job {
            id,
            lens: request.lens.name,
            pid: 1,
            deadline: unix_now() + 300,
            fragment: dir.join(format!("inbox.jsonl.{id}")),
            stderr: dir.join(format!("inbox.jsonl.{id}.stderr")),
        })
    }
}

struct Env {
    home: tempfile::TempDir,
    project: tempfile::TempDir,
    launcher: Arc<RecordingLauncher>,
    ctx: HookContext,
}

impl Env {
    fn new() -> Self {
        let home = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let config = NousConfig {
            log_path: home.path().join("nous.log"),
            statusline_path: home.path().join("statusline-activity.jsonl"),
            ..NousConfig::default()
        };
        let launcher = Arc::new(RecordingLauncher::default());
        let ctx = HookContext::new(config, launcher.clone());
        Self {
            home,
            project,
            launcher,
            ctx,
        }
    }

    fn cwd(&self) -> &str {
        self.project.path().to_str().unwrap()
    }

    fn transcript(&self) -> PathBuf {
        let path = self.home.path().join("transcript.jsonl");
        if !path.exists() {
            std::fs::write(&path, "{}\n").unwrap();
        }
        path
    }

    fn record_usage(&self, session: &str, pct: f64, ts: &str) {
        let line = json!({
            "meta_ts": ts,
            "session_id": session,
            "transcript_path": self.transcript(),
            "cwd": self.cwd(),
            "model": { "id": "claude-opus-4-1", "display_name": "Opus" },
            "context_window": { "used_percentage": pct }
        });
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ctx.config.statusline_path)
            .unwrap();
        writeln!(file, "{line}").unwrap();
    }

    fn stop_payload(&self, session: &str, active: bool) -> String {
        json!({
            "hook_event_name": "Stop",
            "session_id": session,
            "transcript_path": self.transcript(),
            "cwd": self.cwd(),
            "permission_mode": "default",
            "stop_hook_active": active
        })
        .to_string()
    }

    fn session_start_payload(&self) -> String {
        json!({
            "hook_event_name": "SessionStart",
            "session_id": "new-session",
            "transcript_path": "/tmp/new-session.jsonl",
            "cwd": self.cwd(),
            "source": "startup",
            "model": "claude-opus-4-1"
        })
        .to_string()
    }

    fn seed_stores(&self) {
        EncodedStore::for_lens(&LEARNINGS, self.project.path())
            .append(&[json!({"content": "run the linter before committing"})])
            .unwrap();
        EncodedStore::for_lens(&KNOWLEDGE, self.project.path())
            .append(&[json!({"category": "build", "content": "the workspace uses cargo-nextest"})])
            .unwrap();
    }

    fn pending_fragment(&self, body: &str) {
        let dir = LEARNINGS.dir(self.project.path());
        std::fs::create_dir_all(&dir).unwrap();
        let id = FragmentId {
            epoch_secs: unix_now() - 30,
            ..FragmentId::generate()
        };
        std::fs::write(dir.join(format!("inbox.jsonl.{id}")), body).unwrap();
    }

    fn launched(&self) -> Vec<&'static str> {
        self.launcher.lenses.lock().unwrap().clone()
    }
}

fn engram_lines(project: &Path) -> usize {
    std::fs::read_to_string(LEARNINGS.encoded_path(project))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn session_start_injects_recent_entries() {
    let env = Env::new();
    env.seed_stores();

    let out = dispatch(&env.session_start_payload(), &env.ctx).await.unwrap();

    assert!(out.contains("<recent_learnings>\n{\"content\":\"run the linter before committing\"}\n</recent_learnings>"));
    assert!(out.contains("the workspace uses cargo-nextest"));
    assert!(out.ends_with("</nous_notice>"));
}

#[tokio::test]
async fn session_start_on_fresh_project_prints_nothing() {
    let env = Env::new();

    assert_eq!(dispatch(&env.session_start_payload(), &env.ctx).await, None);
    assert!(!env.project.path().join(".claude").exists());
}

#[tokio::test]
async fn stop_in_extraction_band_flushes_and_launches() {
    let env = Env::new();
    env.pending_fragment("{\"content\":\"a\"}\n{\"content\":\"b\"}\n");
    env.record_usage("s1", 20.0, "2026-03-01T10:00:00.000Z");
    env.record_usage("other", 90.0, "2026-03-01T10:00:30.000Z");
    env.record_usage("s1", 35.0, "2026-03-01T10:01:00.000Z");
    CursorStore::for_project(env.project.path())
        .set("2026-03-01T09:00:00.000Z")
        .unwrap();

    let out = dispatch(&env.stop_payload("s1", false), &env.ctx).await;

    assert_eq!(out, None);
    assert_eq!(engram_lines(env.project.path()), 2);
    assert_eq!(env.launched(), vec!["learnings", "knowledge"]);
    assert_eq!(
        CursorStore::for_project(env.project.path()).get().unwrap(),
        "2026-03-01T10:01:00.000Z"
    );
}

#[tokio::test]
async fn stop_above_band_only_flushes() {
    let env = Env::new();
    env.pending_fragment("{\"content\":\"a\"}\n");
    env.record_usage("s1", 75.0, "2026-03-01T10:01:00.000Z");

    dispatch(&env.stop_payload("s1", false), &env.ctx).await;

    assert_eq!(engram_lines(env.project.path()), 1);
    assert!(env.launched().is_empty());
}

#[tokio::test]
async fn stop_hook_active_is_skipped() {
    let env = Env::new();
    env.pending_fragment("{\"content\":\"a\"}\n");
    env.record_usage("s1", 35.0, "2026-03-01T10:01:00.000Z");

    dispatch(&env.stop_payload("s1", true), &env.ctx).await;

    assert_eq!(engram_lines(env.project.path()), 0);
    assert!(env.launched().is_empty());
}

#[tokio::test]
async fn stop_without_snapshot_does_nothing() {
    let env = Env::new();
    env.pending_fragment("{\"content\":\"a\"}\n");

    dispatch(&env.stop_payload("s1", false), &env.ctx).await;

    assert_eq!(engram_lines(env.project.path()), 0);
    assert!(env.launched().is_empty());
}

#[tokio::test]
async fn malformed_and_unknown_payloads_are_dropped() {
    let env = Env::new();

    for raw in [
        "",
        "not json",
        r#"{"hook_event_name":"Stop","cwd":"/p"}"#,
        r#"{"hook_event_name":"PreToolUse","session_id":"s","cwd":"/p"}"#,
    ] {
        assert_eq!(dispatch(raw, &env.ctx).await, None, "{raw}");
    }
    assert!(env.launched().is_empty());
}

#[tokio::test]
async fn manual_flush_and_usage() {
    let env = Env::new();
    env.pending_fragment("{\"content\":\"a\"}\n");
    env.record_usage("s1", 42.5, "2026-03-01T10:01:00.000Z");

    let summary = flush_project(env.project.path(), &env.ctx).await;
    assert_eq!(summary, r#"{"knowledge":0,"learnings":1}"#);

    assert_eq!(session_usage(env.cwd(), "s1", &env.ctx).await, Some(42.5));
    assert_eq!(session_usage(env.cwd(), "missing", &env.ctx).await, None);
}

fn run_binary(env: &Env, payload: &str, extra_env: &[(&str, &str)]) -> String {
    run_binary_with_args(env, &[], payload, extra_env)
}

fn run_binary_with_args(env: &Env, args: &[&str], payload: &str, extra_env: &[(&str, &str)]) -> String {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_nous"));
    cmd.args(args)
        .env("NOUS_CONFIG", env.home.path().join("nous.toml"))
        .env("NOUS_LOG_PATH", env.home.path().join("nous.log"))
        .env("NOUS_STATUSLINE_PATH", &env.ctx.config.statusline_path)
        .env_remove(SUBPROCESS_ENV)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    for (k, v) in extra_env {
        cmd.env(k, v);
    }
    let mut child = cmd.spawn().unwrap();
    let mut stdin = child.stdin.take().unwrap();
    match stdin.write_all(payload.as_bytes()) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
        Err(e) => panic!("writing payload: {e}"),
    }
    drop(stdin);
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn binary_prints_injection_and_logs_json() {
    let env = Env::new();
    env.seed_stores();

    let stdout = run_binary(&env, &env.session_start_payload(), &[]);

    assert!(stdout.starts_with("<recent_learnings>"));
    let log = std::fs::read_to_string(env.home.path().join("nous.log")).unwrap();
    let line = log
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap())
        .find(|v| v["fields"]["message"] == "context_injected")
        .expect("context_injected event");
    assert_eq!(line["span"]["session"], "new-session");
}

#[test]
fn binary_exits_quietly_inside_extraction_agent() {
    let env = Env::new();
    env.seed_stores();

    let stdout = run_binary(&env, &env.session_start_payload(), &[(SUBPROCESS_ENV, "1")]);

    assert_eq!(stdout, "");
    assert!(!env.home.path().join("nous.log").exists());
}

#[test]
fn binary_exits_zero_on_garbage() {
    let env = Env::new();
    assert_eq!(run_binary(&env, "{{{", &[]), "");
}

#[test]
fn binary_reads_whole_payload_inside_extraction_agent() {
    let env = Env::new();
    // Larger than a pipe buffer: the write only completes if the child reads it.
    let payload = format!("{{\"pad\":\"{}\"}}", "x".repeat(1 << 20));

    let mut child = Command::new(env!("CARGO_BIN_EXE_nous"))
        .env(SUBPROCESS_ENV, "1")
        .env("NOUS_LOG_PATH", env.home.path().join("nous.log"))
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(payload.as_bytes()).unwrap();
    drop(stdin);

    assert!(child.wait().unwrap().success());
    assert!(!env.home.path().join("nous.log").exists());
}

#[test]
fn binary_treats_bad_arguments_as_hook_invocation() {
    let env = Env::new();
    env.seed_stores();

    let stdout = run_binary_with_args(&env, &["--no-such-flag"], &env.session_start_payload(), &[]);

    assert!(stdout.starts_with("<recent_learnings>"));
    let log = std::fs::read_to_string(env.home.path().join("nous.log")).unwrap();
    assert!(log.contains("bad_arguments"));
}
