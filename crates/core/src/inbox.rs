// crates/core/src/inbox.rs
//! Inbox flusher: drains agent output fragments into the encoded store.
//!
//! Fragments are messages; a flush is a consumer. A flusher takes a fragment
//! by renaming it to a claim name. `rename(2)` is atomic, so when two flushes
//! race over one fragment exactly one rename succeeds and the other sees
//! `NotFound` and moves on. The claim is deleted only after its entries are
//! appended.
//!
//! A claim that outlives the claim timeout belongs to a flusher that died.
//! It is taken over by renaming it to a fresh claim, and its entries are
//! appended only if the store does not already hold them as one batch: the
//! dead flusher may have appended before it could delete the claim.
//!
//! Nothing in here returns an error to the caller: a fragment that cannot be
//! processed now is logged and left for a later flush.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::fragment::{self, unix_now, FragmentId, InboxFile, InboxFileKind};
use crate::lens::Lens;
use crate::store::EncodedStore;

/// Age-based rules for when inbox files may be touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Fragments younger than this are skipped; the agent may still be starting.
    pub min_age_secs: u64,
    /// An empty fragment with empty stderr may belong to a run that has not
    /// printed yet; it is discarded only after this long.
    pub empty_grace_secs: u64,
    /// `.stderr` files with no fragment are deleted after this long.
    pub orphan_retention_secs: u64,
    /// Claims older than this belong to a flusher that died; they are taken over.
    pub claim_timeout_secs: u64,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            min_age_secs: 2,
            empty_grace_secs: 0,
            orphan_retention_secs: 300,
            claim_timeout_secs: 300,
        }
    }
}

impl FlushPolicy {
    /// Policy for inboxes fed by agents that run for up to `agent_timeout_secs`.
    pub fn for_agent_timeout(agent_timeout_secs: u64) -> Self {
        Self {
            empty_grace_secs: agent_timeout_secs + 10,
            ..Self::default()
        }
    }
}

const PREVIEW_CHARS: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    First,
    /// Taken over from a dead flusher; its entries may already be stored.
    Recovered,
}

/// One lens's inbox in one project.
#[derive(Debug, Clone)]
pub struct Inbox {
    lens: &'static Lens,
    dir: PathBuf,
    store: EncodedStore,
    policy: FlushPolicy,
}

#[derive(Debug, Default)]
struct Listing {
    outputs: Vec<FragmentId>,
    stderrs: Vec<FragmentId>,
    claims: Vec<(FragmentId, u64)>,
}

impl Inbox {
    pub fn for_lens(lens: &'static Lens, project_root: &Path) -> Self {
        Self {
            lens,
            dir: lens.dir(project_root),
            store: EncodedStore::for_lens(lens, project_root),
            policy: FlushPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FlushPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn lens(&self) -> &'static Lens {
        self.lens
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store(&self) -> &EncodedStore {
        &self.store
    }

    pub fn fragment_path(&self, id: &FragmentId) -> PathBuf {
        self.dir.join(fragment::output_name(self.lens.inbox_base, id))
    }

    pub fn stderr_path(&self, id: &FragmentId) -> PathBuf {
        self.dir.join(fragment::stderr_name(self.lens.inbox_base, id))
    }

    fn claimed_path(&self, id: &FragmentId, claimed_at: u64) -> PathBuf {
        self.dir
            .join(fragment::claimed_name(self.lens.inbox_base, id, claimed_at))
    }

    /// Drain every eligible fragment. Returns the number of entries appended.
    pub fn flush(&self) -> usize {
        self.flush_at(unix_now())
    }

    /// [`Inbox::flush`] with an explicit clock (Unix seconds).
    pub fn flush_at(&self, now: u64) -> usize {
        let listing = match self.scan() {
            Ok(listing) => listing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(lens = self.lens.name, dir = %self.dir.display(), error = %e, "inbox_scan_failed");
                return 0;
            }
        };

        let mut total = 0;
        for (id, claimed) in self.take_over_stale_claims(&listing, now) {
            match self.drain_claimed(&id, &claimed, &self.stderr_path(&id), Delivery::Recovered) {
                Ok(n) => total += n,
                Err(e) => {
                    warn!(lens = self.lens.name, fragment = %id, error = %e, "stale_claim_skipped");
                }
            }
        }

        for id in &listing.outputs {
            if id.age_secs(now) < self.policy.min_age_secs {
                debug!(lens = self.lens.name, fragment = %id, "fragment_too_recent");
                continue;
            }
            match self.drain(id, now) {
                Ok(n) => total += n,
                Err(e) => {
                    warn!(lens = self.lens.name, fragment = %id, error = %e, "fragment_skipped");
                }
            }
        }

        self.reap_orphans(&listing, now);
        total
    }

    fn scan(&self) -> io::Result<Listing> {
        let mut listing = Listing::default();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!(dir = %self.dir.display(), error = %e, "inbox_entry_unreadable");
                    continue;
                }
            };
            let name = entry.file_name();
            let Some(file) = name
                .to_str()
                .and_then(|n| InboxFile::parse(self.lens.inbox_base, n))
            else {
                continue;
            };
            match file.kind {
                InboxFileKind::Output => listing.outputs.push(file.id),
                InboxFileKind::Stderr => listing.stderrs.push(file.id),
                InboxFileKind::Claimed { claimed_at } => {
                    listing.claims.push((file.id, claimed_at))
                }
            }
        }
        listing.outputs.sort();
        Ok(listing)
    }

    /// Re-claim every stale claim under `now`. Racing flushers each win a
    /// disjoint subset.
    fn take_over_stale_claims(&self, listing: &Listing, now: u64) -> Vec<(FragmentId, PathBuf)> {
        let mut taken = Vec::new();
        for (id, claimed_at) in &listing.claims {
            if now.saturating_sub(*claimed_at) <= self.policy.claim_timeout_secs {
                continue;
            }
            let fresh = self.claimed_path(id, now);
            match std::fs::rename(self.claimed_path(id, *claimed_at), &fresh) {
                Ok(()) => {
                    info!(lens = self.lens.name, fragment = %id, claimed_at, "stale_claim_taken_over");
                    taken.push((*id, fresh));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(lens = self.lens.name, fragment = %id, error = %e, "stale_claim_takeover_failed");
                }
            }
        }
        taken
    }

    /// Claim and process one fragment. `Ok(0)` when another flusher won it.
    fn drain(&self, id: &FragmentId, now: u64) -> io::Result<usize> {
        let fragment = self.fragment_path(id);
        let stderr_path = self.stderr_path(id);

        if self.may_still_be_running(id, &fragment, &stderr_path, now) {
            debug!(lens = self.lens.name, fragment = %id, "fragment_awaiting_output");
            return Ok(0);
        }

        let claimed = self.claimed_path(id, now);
        match std::fs::rename(&fragment, &claimed) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(lens = self.lens.name, fragment = %id, "fragment_already_claimed");
                return Ok(0);
            }
            Err(e) => return Err(e),
        }

        match self.drain_claimed(id, &claimed, &stderr_path, Delivery::First) {
            Ok(n) => Ok(n),
            Err(e) => {
                // Hand the fragment back so a later flush retries it.
                if let Err(back) = std::fs::rename(&claimed, &fragment) {
                    warn!(
                        lens = self.lens.name,
                        fragment = %id,
                        error = %back,
                        retry_after_secs = self.policy.claim_timeout_secs,
                        "claim_hand_back_failed"
                    );
                }
                Err(e)
            }
        }
    }

    fn drain_claimed(
        &self,
        id: &FragmentId,
        claimed: &Path,
        stderr_path: &Path,
        delivery: Delivery,
    ) -> io::Result<usize> {
        let bytes = std::fs::read(claimed)?;
        let content = String::from_utf8_lossy(&bytes);
        let content = content.trim();
        let stderr = read_trimmed(stderr_path);

        if content.is_empty() {
            match &stderr {
                Some(err) => warn!(
                    lens = self.lens.name,
                    fragment = %id,
                    stderr = %preview(err, PREVIEW_CHARS),
                    "empty_fragment"
                ),
                None => debug!(lens = self.lens.name, fragment = %id, "empty_fragment"),
            }
            discard(claimed);
            discard(stderr_path);
            return Ok(0);
        }

        let entries = parse_entries(content);
        if entries.is_empty() {
            warn!(
                lens = self.lens.name,
                fragment = %id,
                content = %preview(content, 100),
                stderr = %stderr.as_deref().map(|s| preview(s, 100)).unwrap_or_default(),
                "dropped_invalid_fragment"
            );
            discard(claimed);
            discard(stderr_path);
            return Ok(0);
        }

        for entry in &entries {
            let missing = self.lens.missing_fields(entry);
            if !missing.is_empty() {
                warn!(lens = self.lens.name, fragment = %id, missing = ?missing, "entry_missing_fields");
            }
        }

        if delivery == Delivery::Recovered && self.store.holds_batch(&entries)? {
            info!(lens = self.lens.name, fragment = %id, entries = entries.len(), "stale_claim_already_delivered");
            discard(claimed);
            discard(stderr_path);
            return Ok(0);
        }

        self.store.append(&entries)?;
        discard(claimed);
        discard(stderr_path);

        info!(lens = self.lens.name, fragment = %id, entries = entries.len(), "fragment_flushed");
        Ok(entries.len())
    }

    /// An empty fragment with no error output, younger than the grace period,
    /// most likely belongs to an agent that has not printed yet.
    fn may_still_be_running(
        &self,
        id: &FragmentId,
        fragment: &Path,
        stderr_path: &Path,
        now: u64,
    ) -> bool {
        if id.age_secs(now) >= self.policy.empty_grace_secs {
            return false;
        }
        let empty = |p: &Path| std::fs::metadata(p).map(|m| m.len() == 0).unwrap_or(true);
        empty(fragment) && empty(stderr_path)
    }

    fn reap_orphans(&self, listing: &Listing, now: u64) {
        let live: HashSet<FragmentId> = listing
            .outputs
            .iter()
            .copied()
            .chain(listing.claims.iter().map(|(id, _)| *id))
            .collect();

        for id in &listing.stderrs {
            if live.contains(id) || id.age_secs(now) <= self.policy.orphan_retention_secs {
                continue;
            }
            let path = self.stderr_path(id);
            if self.fragment_path(id).exists() {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(lens = self.lens.name, fragment = %id, "orphan_stderr_reaped"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => debug!(lens = self.lens.name, fragment = %id, error = %e, "orphan_stderr_reap_failed"),
            }
        }
    }
}

/// Drain one lens's inbox in `project_root`.
pub fn flush(lens: &'static Lens, project_root: &Path) -> usize {
    Inbox::for_lens(lens, project_root).flush()
}

/// [`flush`] with an explicit clock (Unix seconds).
pub fn flush_at(lens: &'static Lens, project_root: &Path, now: u64) -> usize {
    Inbox::for_lens(lens, project_root).flush_at(now)
}

/// Parse JSONL, keeping only lines that are JSON objects.
pub fn parse_entries(text: &str) -> Vec<Value> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter(Value::is_object)
        .collect()
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read(path)
        .ok()
        .map(|b| String::from_utf8_lossy(&b).trim().to_string())
        .filter(|s| !s.is_empty())
}

fn discard(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "discard_failed"),
    }
}

fn preview(s: &str, max_chars: usize) -> String {
    s.chars()
        .take(max_chars)
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect()
}
