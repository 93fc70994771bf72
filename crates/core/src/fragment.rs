// crates/core/src/fragment.rs
//! Fragment identifiers and the inbox file-name grammar.
//!
//! ```text
//! inbox.jsonl.<id>                      output written by one agent run
//! inbox.jsonl.<id>.stderr               that run's error output
//! inbox.jsonl.<id>.claimed-<epoch>      output being drained by one flusher
//!
//! <id> = <epoch secs>_<pid>_<8 lowercase hex>
//! ```
//!
//! Every component has a fixed alphabet that excludes both `_` and `.`, so a
//! name either parses into exactly one [`InboxFile`] or is not ours.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

const STDERR_SUFFIX: &str = "stderr";
const CLAIM_PREFIX: &str = "claimed-";

/// Unique name of one extraction run: creation time, launching pid, nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentId {
    pub epoch_secs: u64,
    pub pid: u32,
    pub nonce: u32,
}

impl FragmentId {
    /// A fresh id for a run launched by this process now.
    pub fn generate() -> Self {
        Self {
            epoch_secs: unix_now(),
            pid: std::process::id(),
            nonce: rand::random(),
        }
    }

    /// Seconds elapsed since the id was minted; 0 for ids from the future.
    pub fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.epoch_secs)
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{:08x}", self.epoch_secs, self.pid, self.nonce)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFragmentIdError(String);

impl fmt::Display for ParseFragmentIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid fragment id: {}", self.0)
    }
}

impl std::error::Error for ParseFragmentIdError {}

impl FromStr for FragmentId {
    type Err = ParseFragmentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseFragmentIdError(s.to_string());
        let mut parts = s.split('_');
        let (Some(epoch), Some(pid), Some(nonce), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(err());
        };

        let is_decimal = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
        let is_nonce = |p: &str| {
            p.len() == 8 && p.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        };
        if !is_decimal(epoch) || !is_decimal(pid) || !is_nonce(nonce) {
            return Err(err());
        }

        Ok(Self {
            epoch_secs: epoch.parse().map_err(|_| err())?,
            pid: pid.parse().map_err(|_| err())?,
            nonce: u32::from_str_radix(nonce, 16).map_err(|_| err())?,
        })
    }
}

/// What role a file in an inbox directory plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxFileKind {
    Output,
    Stderr,
    Claimed { claimed_at: u64 },
}

/// A parsed inbox file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboxFile {
    pub id: FragmentId,
    pub kind: InboxFileKind,
}

impl InboxFile {
    /// Parse `file_name` against the inbox `base` (e.g. `inbox.jsonl`).
    /// Returns `None` for anything that does not follow the grammar.
    pub fn parse(base: &str, file_name: &str) -> Option<Self> {
        let rest = file_name.strip_prefix(base)?.strip_prefix('.')?;
        let (id, suffix) = match rest.split_once('.') {
            Some((id, suffix)) => (id, Some(suffix)),
            None => (rest, None),
        };
        let id: FragmentId = id.parse().ok()?;

        let kind = match suffix {
            None => InboxFileKind::Output,
            Some(STDERR_SUFFIX) => InboxFileKind::Stderr,
            Some(s) => {
                let epoch = s.strip_prefix(CLAIM_PREFIX)?;
                if epoch.is_empty() || !epoch.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                InboxFileKind::Claimed {
                    claimed_at: epoch.parse().ok()?,
                }
            }
        };
        Some(Self { id, kind })
    }

    pub fn file_name(&self, base: &str) -> String {
        match self.kind {
            InboxFileKind::Output => output_name(base, &self.id),
            InboxFileKind::Stderr => stderr_name(base, &self.id),
            InboxFileKind::Claimed { claimed_at } => claimed_name(base, &self.id, claimed_at),
        }
    }
}

pub fn output_name(base: &str, id: &FragmentId) -> String {
    format!("{base}.{id}")
}

pub fn stderr_name(base: &str, id: &FragmentId) -> String {
    format!("{base}.{id}.{STDERR_SUFFIX}")
}

pub fn claimed_name(base: &str, id: &FragmentId, claimed_at: u64) -> String {
    format!("{base}.{id}.{CLAIM_PREFIX}{claimed_at}")
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
