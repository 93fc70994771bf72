// crates/core/src/logger.rs
//! Process-safe, size-rotated event log.
//!
//! Every hook invocation is its own short-lived process, and several can run
//! at once. Each formatted event is appended while holding an exclusive
//! `flock` on `<log>.lock`; rotation happens under the same lock, so no
//! process ever appends to a file another process is renaming.
//!
//! `EventLog` implements [`MakeWriter`], so `tracing_subscriber::fmt().json()`
//! writes through it and each event lands as exactly one JSON line.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::NousConfig;
use crate::paths;

/// Environment variable holding the `EnvFilter` directive.
pub const LOG_FILTER_ENV: &str = "NOUS_LOG";

/// Handle to the shared log file. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    lock_path: PathBuf,
    max_bytes: u64,
    backlog: usize,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64, backlog: usize) -> Self {
        let path = path.into();
        let lock_path = paths::lock_path_for(&path);
        Self {
            path,
            lock_path,
            max_bytes,
            backlog,
        }
    }

    pub fn from_config(config: &NousConfig) -> Self {
        Self::new(&config.log_path, config.log_max_bytes, config.log_backlog)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `bytes` under the sidecar lock, rotating first if the write
    /// would push the file past `max_bytes`.
    pub fn append(&self, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?;
        lock.lock_exclusive()?;

        let result = self.rotate_if_needed(bytes.len() as u64).and_then(|()| {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            file.write_all(bytes)
        });

        let _ = lock.unlock();
        result
    }

    /// `<log>.N` for backlog slot `n` (1 is the newest backup).
    pub fn backup_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{n}"));
        self.path.with_file_name(name)
    }

    fn rotate_if_needed(&self, incoming: u64) -> io::Result<()> {
        let size = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if size == 0 || size + incoming <= self.max_bytes {
            return Ok(());
        }

        if self.backlog == 0 {
            return File::create(&self.path).map(|_| ());
        }

        let _ = std::fs::remove_file(self.backup_path(self.backlog));
        for n in (1..self.backlog).rev() {
            let from = self.backup_path(n);
            if from.exists() {
                std::fs::rename(&from, self.backup_path(n + 1))?;
            }
        }
        std::fs::rename(&self.path, self.backup_path(1))
    }
}

/// Per-event writer handed out by [`EventLog::make_writer`].
///
/// The fmt layer formats a whole event into one buffer and writes it in a
/// single call, so each `write` is one locked append. Errors are swallowed:
/// logging must never fail the hook.
pub struct EventLogWriter {
    log: EventLog,
}

impl Write for EventLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.log.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for EventLog {
    type Writer = EventLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        EventLogWriter { log: self.clone() }
    }
}

/// Install the global JSON subscriber writing to `log`.
///
/// Verbosity comes from `NOUS_LOG` (default `info`). Returns false when a
/// global subscriber was already installed.
pub fn init(log: EventLog) -> bool {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(false)
        .with_ansi(false)
        .with_writer(log)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn append_creates_parent_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("nested/nous.log"), 1024, 2);

        log.append(b"{\"msg\":\"hello\"}\n").unwrap();

        assert_eq!(lines(log.path()), vec![r#"{"msg":"hello"}"#]);
        assert!(dir.path().join("nested/nous.log.lock").exists());
    }

    #[test]
    fn rotation_keeps_bounded_backlog() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("nous.log"), 20, 2);

        // Each line is 10 bytes; every third append rotates.
        for i in 0..10 {
            log.append(format!("{{\"n\":{i:03}}}\n").as_bytes()).unwrap();
        }

        assert!(log.path().exists());
        assert!(log.backup_path(1).exists());
        assert!(log.backup_path(2).exists());
        assert!(!log.backup_path(3).exists());

        let current = lines(log.path());
        assert_eq!(current.last().unwrap(), r#"{"n":009}"#);
        for path in [log.path().to_path_buf(), log.backup_path(1), log.backup_path(2)] {
            let size = std::fs::metadata(&path).unwrap().len();
            assert!(size <= 20, "{} is {size} bytes", path.display());
        }
    }

    #[test]
    fn zero_backlog_truncates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("nous.log"), 12, 0);

        log.append(b"0123456789\n").unwrap();
        log.append(b"abcdefghij\n").unwrap();

        assert_eq!(lines(log.path()), vec!["abcdefghij"]);
        assert!(!log.backup_path(1).exists());
    }

    #[test]
    fn concurrent_writers_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(EventLog::new(dir.path().join("nous.log"), 1 << 20, 1));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let line = format!("{{\"thread\":{t},\"i\":{i},\"pad\":\"{}\"}}\n", "x".repeat(64));
                        log.append(line.as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let all = lines(log.path());
        assert_eq!(all.len(), 400);
        for line in all {
            let v: serde_json::Value = serde_json::from_str(&line).unwrap();
            assert!(v["thread"].is_u64());
        }
    }

    #[test]
    fn writer_swallows_errors() {
        let dir = tempfile::tempdir().unwrap();
        // The log's parent is a regular file, so every append fails.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let log = EventLog::new(blocker.join("nous.log"), 1024, 1);
        assert!(log.append(b"lost\n").is_err());
        let mut writer = log.make_writer();
        assert_eq!(writer.write(b"lost\n").unwrap(), 5);
    }
}
