// crates/core/src/launcher.rs
//! Extraction subprocess launcher.
//!
//! Each launch starts one detached `claude --print` run under a wall-clock
//! supervisor (`timeout <secs> claude ...`). Stdout goes to a fresh fragment
//! file in the lens inbox and stderr to its `.stderr` sibling. The launcher
//! returns as soon as the child has a pid; the inbox flusher picks the output
//! up on a later Stop event.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::config::NousConfig;
use crate::error::LaunchError;
use crate::fragment::{self, unix_now, FragmentId};
use crate::lens::Lens;

/// Set in every extraction child; the hook binary exits at once when it sees it.
pub const SUBPROCESS_ENV: &str = "NOUS_SUBPROCESS";
pub const SESSION_ENV: &str = "NOUS_SESSION";
pub const PROJECT_ENV: &str = "NOUS_PROJECT";

/// Host-session variables that make the claude CLI refuse to start nested.
const HOST_SESSION_VARS: [&str; 3] = ["CLAUDECODE", "CLAUDE_CODE_SSE_PORT", "CLAUDE_CODE_ENTRYPOINT"];

/// One extraction to start.
#[derive(Debug, Clone)]
pub struct LaunchRequest<'a> {
    pub lens: &'static Lens,
    pub project_root: &'a Path,
    pub session_id: &'a str,
    pub prompt: String,
}

/// A started extraction. Nothing waits on it; the record is for logs and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: FragmentId,
    pub lens: &'static str,
    pub pid: u32,
    /// Unix seconds after which the supervisor kills the agent.
    pub deadline: u64,
    pub fragment: PathBuf,
    pub stderr: PathBuf,
}

/// Starts extraction runs. The controller only sees this trait.
pub trait ExtractionLauncher: Send + Sync {
    fn launch(&self, request: LaunchRequest<'_>) -> Result<Job, LaunchError>;
}

/// Launches `claude` as a detached child in its own session.
#[derive(Debug, Clone)]
pub struct DetachedLauncher {
    agent_bin: String,
    model: String,
    supervisor_bin: String,
    timeout_secs: u64,
}

impl DetachedLauncher {
    pub fn new(agent_bin: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            agent_bin: agent_bin.into(),
            model: model.into(),
            supervisor_bin: "timeout".into(),
            timeout_secs: 300,
        }
    }

    pub fn from_config(config: &NousConfig) -> Self {
        Self::new(&config.agent_bin, &config.agent_model)
            .with_supervisor(&config.supervisor_bin)
            .with_timeout(config.agent_timeout_secs)
    }

    pub fn with_supervisor(mut self, program: impl Into<String>) -> Self {
        self.supervisor_bin = program.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn command(&self, agent: &Path, request: &LaunchRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.supervisor_bin);
        cmd.arg(self.timeout_secs.to_string())
            .arg(agent)
            .args([
                "--print",
                "--permission-mode",
                "bypassPermissions",
                "--model",
                self.model.as_str(),
                "-p",
            ])
            .arg(&request.prompt)
            .stdin(Stdio::null());

        for var in stripped_env_vars() {
            cmd.env_remove(var);
        }
        cmd.env(SUBPROCESS_ENV, "1")
            .env(SESSION_ENV, request.session_id)
            .env(PROJECT_ENV, request.project_root);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own session, so the run outlives the hook process and its group.
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }
        cmd
    }
}

impl ExtractionLauncher for DetachedLauncher {
    fn launch(&self, request: LaunchRequest<'_>) -> Result<Job, LaunchError> {
        let lens = request.lens;
        let agent = resolve_program(&self.agent_bin).ok_or_else(|| LaunchError::AgentNotFound {
            program: self.agent_bin.clone(),
        })?;

        let dir = lens.dir(request.project_root);
        std::fs::create_dir_all(&dir).map_err(|source| LaunchError::Inbox {
            path: dir.clone(),
            source,
        })?;

        let id = FragmentId::generate();
        let fragment_path = dir.join(fragment::output_name(lens.inbox_base, &id));
        let stderr_path = dir.join(fragment::stderr_name(lens.inbox_base, &id));

        let stdout = create_fresh(&fragment_path)?;
        let stderr = match create_fresh(&stderr_path) {
            Ok(f) => f,
            Err(e) => {
                let _ = std::fs::remove_file(&fragment_path);
                return Err(e);
            }
        };

        let mut cmd = self.command(&agent, &request);
        cmd.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = std::fs::remove_file(&fragment_path);
                let _ = std::fs::remove_file(&stderr_path);
                warn!(lens = lens.name, program = %self.supervisor_bin, error = %e, "spawn_failed");
                return Err(LaunchError::spawn(&self.supervisor_bin, e));
            }
        };

        let job = Job {
            id,
            lens: lens.name,
            pid: child.id(),
            deadline: unix_now() + self.timeout_secs,
            fragment: fragment_path,
            stderr: stderr_path,
        };
        info!(
            lens = lens.name,
            fragment = %job.id,
            pid = job.pid,
            model = %self.model,
            timeout_secs = self.timeout_secs,
            "extraction_spawned"
        );
        // Dropping the handle does not kill or wait; the child is reparented
        // once this process exits.
        drop(child);
        Ok(job)
    }
}

fn create_fresh(path: &Path) -> Result<File, LaunchError> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| LaunchError::Inbox {
            path: path.to_path_buf(),
            source,
        })
}

/// Every `CLAUDE*` variable of this process, plus the known host-session ones.
fn stripped_env_vars() -> Vec<String> {
    let mut vars: Vec<String> = HOST_SESSION_VARS.iter().map(|s| s.to_string()).collect();
    vars.extend(
        std::env::vars_os()
            .filter_map(|(k, _)| k.into_string().ok())
            .filter(|k| k.starts_with("CLAUDE") && !HOST_SESSION_VARS.contains(&k.as_str())),
    );
    vars
}

/// Locate `program` the way `execvp` would: as given when it contains a
/// path separator, otherwise in `PATH`.
pub fn resolve_program(program: &str) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    if program.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }
    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lens::{KNOWLEDGE, LEARNINGS};
    use std::time::{Duration, Instant};

    fn request<'a>(lens: &'static Lens, root: &'a Path, prompt: &str) -> LaunchRequest<'a> {
        LaunchRequest {
            lens,
            project_root: root,
            session_id: "sess-1",
            prompt: prompt.to_string(),
        }
    }

    fn wait_for_content(path: &Path) -> String {
        let started = Instant::now();
        loop {
            let content = std::fs::read_to_string(path).unwrap_or_default();
            if !content.is_empty() || started.elapsed() > Duration::from_secs(5) {
                return content;
            }
            std::thread::sleep(Duration::from_millis(25));
        }
    }

    #[test]
    fn test_missing_agent_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = DetachedLauncher::new("nous-test-no-such-agent", "opus");

        let err = launcher
            .launch(request(&LEARNINGS, dir.path(), "hi"))
            .unwrap_err();

        assert!(
            matches!(err, LaunchError::AgentNotFound { ref program } if program == "nous-test-no-such-agent")
        );
        assert!(!LEARNINGS.dir(dir.path()).exists());
    }

    #[test]
    fn test_missing_supervisor_cleans_up_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let launcher =
            DetachedLauncher::new("echo", "opus").with_supervisor("nous-test-no-such-timeout");

        let err = launcher
            .launch(request(&KNOWLEDGE, dir.path(), "hi"))
            .unwrap_err();

        assert!(matches!(err, LaunchError::AgentNotFound { .. }));
        let leftovers: Vec<_> = std::fs::read_dir(KNOWLEDGE.dir(dir.path()))
            .unwrap()
            .flatten()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_output_lands_in_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = DetachedLauncher::new("echo", "sonnet").with_timeout(10);

        let job = launcher
            .launch(request(&LEARNINGS, dir.path(), "extract please"))
            .unwrap();

        assert_eq!(job.lens, "learnings");
        assert!(job.pid > 0);
        assert!(job.deadline >= unix_now() + 9);
        assert_eq!(job.fragment.parent().unwrap(), LEARNINGS.dir(dir.path()));
        assert!(job.stderr.exists());

        let output = wait_for_content(&job.fragment);
        assert!(output.contains("--print --permission-mode bypassPermissions --model sonnet -p extract please"));
    }

    #[test]
    fn test_fragment_name_parses_back() {
        let dir = tempfile::tempdir().unwrap();
        let job = DetachedLauncher::new("true", "opus")
            .launch(request(&KNOWLEDGE, dir.path(), ""))
            .unwrap();

        let name = job.fragment.file_name().unwrap().to_str().unwrap();
        let parsed = crate::fragment::InboxFile::parse(KNOWLEDGE.inbox_base, name).unwrap();
        assert_eq!(parsed.id, job.id);
        assert_eq!(parsed.kind, crate::fragment::InboxFileKind::Output);
    }

    #[test]
    fn test_resolve_program() {
        assert!(resolve_program("sh").is_some());
        assert!(resolve_program("nous-test-no-such-program").is_none());
        assert!(resolve_program("").is_none());

        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("not-executable");
        std::fs::write(&plain, "x").unwrap();
        assert!(resolve_program(plain.to_str().unwrap()).is_none());
    }

    #[test]
    fn test_stripped_vars_cover_host_session() {
        let vars = stripped_env_vars();
        for known in HOST_SESSION_VARS {
            assert!(vars.iter().any(|v| v == known));
        }
    }
}
