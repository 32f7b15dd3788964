//! Vote ledger
//!
//! Authoritative per-thread record of community votes. Every read-modify-write
//! of a thread runs under that thread's lock, so concurrent voters on the same
//! thread are serialized while different threads proceed independently.
//!
//! Storage is behind [`LedgerBackend`]: a JSON document backend for single
//! node deployments and a Postgres backend (see `pg_store`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::storage::{read_json, rotate_backup, write_json_atomic, KeyedLocks, StorageError};
use crate::models::{normalize_title, InvariantViolation, Tally, VoteEntry, VoteOptions, VoteResult};

/// Vote ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    InvariantViolation(#[from] InvariantViolation),

    #[error("Unknown vote option: {0}")]
    UnknownVoteOption(String),

    #[error("Thread {0} is archived")]
    ThreadArchived(String),
}

/// Persistence for live and archived ledger entries
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    async fn load_live(&self, thread_id: &str) -> Result<Option<VoteEntry>, StorageError>;

    async fn load_archived(&self, thread_id: &str) -> Result<Option<VoteEntry>, StorageError>;

    /// Insert or replace a live entry
    async fn store_live(&self, entry: &VoteEntry) -> Result<(), StorageError>;

    /// Store a live entry after `user_id`'s vote changed. Backends keeping a
    /// row per voter write only that voter's row.
    async fn store_vote(&self, entry: &VoteEntry, _user_id: &str) -> Result<(), StorageError> {
        self.store_live(entry).await
    }

    async fn list_live(&self) -> Result<Vec<VoteEntry>, StorageError>;

    /// Move a live entry to the archive in one step.
    ///
    /// Returns `false` when the thread is not live (already archived or unknown).
    async fn archive(&self, thread_id: &str) -> Result<bool, StorageError>;

    async fn ping(&self) -> Result<(), StorageError>;

    /// Copy the backing document aside before a risky cycle
    fn backup(&self, _max_files: usize, _now: DateTime<Utc>) -> Result<Option<PathBuf>, StorageError> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerDocument {
    #[serde(default)]
    live: BTreeMap<String, VoteEntry>,
    #[serde(default)]
    archived: BTreeMap<String, VoteEntry>,
}

/// Ledger kept as one JSON document.
///
/// The in-memory copy is authoritative. A write clones it, applies the
/// change, persists the clone atomically and only then swaps it in, so a
/// failed write leaves both memory and disk on the previous state.
pub struct DocumentLedgerBackend {
    path: Option<PathBuf>,
    doc: Mutex<LedgerDocument>,
}

impl DocumentLedgerBackend {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let doc: LedgerDocument = read_json(&path)?.unwrap_or_default();
        info!(
            path = %path.display(),
            live = doc.live.len(),
            archived = doc.archived.len(),
            "Vote ledger loaded"
        );
        Ok(Self {
            path: Some(path),
            doc: Mutex::new(doc),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: Mutex::new(LedgerDocument::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn mutate<R>(&self, f: impl FnOnce(&mut LedgerDocument) -> R) -> Result<R, StorageError> {
        let mut doc = self.doc.lock().await;
        let mut next = doc.clone();
        let out = f(&mut next);
        if let Some(path) = &self.path {
            write_json_atomic(path, &next)?;
        }
        *doc = next;
        Ok(out)
    }
}

#[async_trait]
impl LedgerBackend for DocumentLedgerBackend {
    async fn load_live(&self, thread_id: &str) -> Result<Option<VoteEntry>, StorageError> {
        Ok(self.doc.lock().await.live.get(thread_id).cloned())
    }

    async fn load_archived(&self, thread_id: &str) -> Result<Option<VoteEntry>, StorageError> {
        Ok(self.doc.lock().await.archived.get(thread_id).cloned())
    }

    async fn store_live(&self, entry: &VoteEntry) -> Result<(), StorageError> {
        let entry = entry.clone();
        self.mutate(move |doc| {
            doc.live.insert(entry.thread_id.clone(), entry);
        })
        .await
    }

    async fn list_live(&self) -> Result<Vec<VoteEntry>, StorageError> {
        Ok(self.doc.lock().await.live.values().cloned().collect())
    }

    async fn archive(&self, thread_id: &str) -> Result<bool, StorageError> {
        {
            let doc = self.doc.lock().await;
            if !doc.live.contains_key(thread_id) {
                return Ok(false);
            }
        }

        self.mutate(|doc| match doc.live.remove(thread_id) {
            Some(mut entry) => {
                entry.archived = true;
                doc.archived.insert(thread_id.to_string(), entry);
                true
            }
            None => false,
        })
        .await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        match &self.path {
            Some(path) => {
                let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
                std::fs::metadata(dir)?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn backup(&self, max_files: usize, now: DateTime<Utc>) -> Result<Option<PathBuf>, StorageError> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let backup_dir = path
            .parent()
            .unwrap_or(Path::new("."))
            .join("backup");
        rotate_backup(path, &backup_dir, max_files, now)
    }
}

/// Per-thread community vote ledger
pub struct VoteLedger {
    backend: Arc<dyn LedgerBackend>,
    options: VoteOptions,
    locks: KeyedLocks,
}

impl VoteLedger {
    pub fn new(backend: Arc<dyn LedgerBackend>, options: VoteOptions) -> Self {
        Self {
            backend,
            options,
            locks: KeyedLocks::new(),
        }
    }

    pub fn options(&self) -> &VoteOptions {
        &self.options
    }

    pub fn backend(&self) -> &Arc<dyn LedgerBackend> {
        &self.backend
    }

    /// Record a user's vote on a thread.
    ///
    /// Voting the option already held returns `accepted = false` without
    /// touching storage. A new thread is created with zero tallies.
    pub async fn cast_vote(
        &self,
        thread_id: &str,
        user_id: &str,
        username: &str,
        vote_type: &str,
        now: DateTime<Utc>,
    ) -> Result<VoteResult, LedgerError> {
        let option = self
            .options
            .resolve(vote_type)
            .ok_or_else(|| LedgerError::UnknownVoteOption(vote_type.to_string()))?;

        let _guard = self.locks.lock(thread_id).await;

        let mut entry = match self.load_checked(thread_id).await? {
            Some(entry) => entry,
            None => {
                if self.backend.load_archived(thread_id).await?.is_some() {
                    return Err(LedgerError::ThreadArchived(thread_id.to_string()));
                }
                debug!(thread_id = %thread_id, "Creating ledger entry on first vote");
                VoteEntry::new(thread_id, &self.options, now.timestamp())
            }
        };

        let result = entry.apply_vote(user_id, username, option).map_err(|e| {
            error!(thread_id = %thread_id, error = %e, "Refusing vote on inconsistent entry");
            e
        })?;

        if result.accepted {
            self.backend.store_vote(&entry, user_id).await?;
            info!(
                thread_id = %thread_id,
                user_id = %user_id,
                vote_type = %vote_type,
                previous = ?result.previous_vote_type.as_ref().map(|v| v.as_str()),
                "Vote recorded"
            );
        }

        Ok(result)
    }

    /// Current tally; unseen threads report zeros, archived threads their final counts
    pub async fn get_tally(&self, thread_id: &str) -> Result<Tally, LedgerError> {
        let entry = match self.backend.load_live(thread_id).await? {
            Some(entry) => Some(entry),
            None => self.backend.load_archived(thread_id).await?,
        };

        Ok(match entry {
            Some(mut entry) => {
                entry.ensure_options(&self.options);
                entry.tally
            }
            None => self.options.zeroed_tally(),
        })
    }

    /// Attach on-chain metadata to a thread, creating it when unseen.
    ///
    /// Only metadata is touched; tallies and voters are never modified.
    pub async fn register_proposal(
        &self,
        thread_id: &str,
        proposal_index: u64,
        title: Option<&str>,
        origin: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<VoteEntry, LedgerError> {
        let _guard = self.locks.lock(thread_id).await;

        let (mut entry, is_new) = match self.load_checked(thread_id).await? {
            Some(entry) => (entry, false),
            None => {
                if self.backend.load_archived(thread_id).await?.is_some() {
                    return Err(LedgerError::ThreadArchived(thread_id.to_string()));
                }
                (VoteEntry::new(thread_id, &self.options, now.timestamp()), true)
            }
        };

        let before = entry.clone();
        entry.proposal_index = Some(proposal_index);
        if let Some(title) = title {
            entry.title = normalize_title(title);
        }
        if !origin.is_empty() {
            entry.origin = origin;
        }

        if is_new || entry != before {
            self.backend.store_live(&entry).await?;
            info!(
                thread_id = %thread_id,
                proposal_index = proposal_index,
                "Proposal registered"
            );
        }

        Ok(entry)
    }

    /// Replace a live thread's title. Returns whether anything changed.
    pub async fn set_title(&self, thread_id: &str, title: &str) -> Result<bool, LedgerError> {
        let _guard = self.locks.lock(thread_id).await;

        let Some(mut entry) = self.load_checked(thread_id).await? else {
            return Ok(false);
        };
        let title = normalize_title(title);
        if entry.title == title {
            return Ok(false);
        }
        entry.title = title;
        self.backend.store_live(&entry).await?;
        Ok(true)
    }

    /// Archive every live thread older than `retention_secs`.
    ///
    /// Each move is atomic on its own. Cancellation stops the sweep between
    /// entries and returns what was archived so far.
    pub async fn archive_older_than(
        &self,
        retention_secs: i64,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<BTreeSet<String>, LedgerError> {
        let cutoff = now.timestamp();
        let expired: Vec<String> = self
            .backend
            .list_live()
            .await?
            .into_iter()
            .filter(|entry| cutoff - entry.created_epoch > retention_secs)
            .map(|entry| entry.thread_id)
            .collect();

        self.archive_all(expired, cancel).await
    }

    /// Archive live threads whose proposal is no longer in `active_indexes`.
    ///
    /// Threads without a resolved proposal index are left alone.
    pub async fn archive_inactive(
        &self,
        active_indexes: &BTreeSet<u64>,
        cancel: &CancellationToken,
    ) -> Result<BTreeSet<String>, LedgerError> {
        let inactive: Vec<String> = self
            .backend
            .list_live()
            .await?
            .into_iter()
            .filter(|entry| {
                entry
                    .proposal_index
                    .is_some_and(|index| !active_indexes.contains(&index))
            })
            .map(|entry| entry.thread_id)
            .collect();

        self.archive_all(inactive, cancel).await
    }

    async fn archive_all(
        &self,
        thread_ids: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<BTreeSet<String>, LedgerError> {
        let mut archived = BTreeSet::new();

        for thread_id in thread_ids {
            if cancel.is_cancelled() {
                warn!(archived = archived.len(), "Archival cancelled, stopping between entries");
                break;
            }

            let _guard = self.locks.lock(&thread_id).await;
            if self.backend.archive(&thread_id).await? {
                info!(thread_id = %thread_id, "Thread archived");
                archived.insert(thread_id);
            }
        }

        Ok(archived)
    }

    pub async fn entry(&self, thread_id: &str) -> Result<Option<VoteEntry>, LedgerError> {
        self.load_checked(thread_id).await
    }

    pub async fn archived_entry(&self, thread_id: &str) -> Result<Option<VoteEntry>, LedgerError> {
        Ok(self.backend.load_archived(thread_id).await?)
    }

    pub async fn live_entries(&self) -> Result<Vec<VoteEntry>, LedgerError> {
        Ok(self.backend.list_live().await?)
    }

    async fn load_checked(&self, thread_id: &str) -> Result<Option<VoteEntry>, LedgerError> {
        let Some(mut entry) = self.backend.load_live(thread_id).await? else {
            return Ok(None);
        };

        if let Err(e) = entry.check_invariants() {
            error!(thread_id = %thread_id, error = %e, "Ledger entry failed invariant check");
            return Err(e.into());
        }
        entry.ensure_options(&self.options);
        Ok(Some(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rand::seq::SliceRandom;
    use rand::Rng;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn ledger() -> VoteLedger {
        VoteLedger::new(Arc::new(DocumentLedgerBackend::in_memory()), VoteOptions::default())
    }

    const FOURTEEN_DAYS: i64 = 14 * 24 * 3600;

    #[tokio::test]
    async fn test_first_vote_creates_entry() {
        let ledger = ledger();
        let result = ledger.cast_vote("T1", "u1", "alice", "aye", t0()).await.unwrap();

        assert!(result.accepted);
        assert_eq!(result.previous_vote_type, None);

        let entry = ledger.entry("T1").await.unwrap().unwrap();
        assert_eq!(entry.created_epoch, t0().timestamp());
        assert_eq!(entry.count("aye"), 1);
        assert_eq!(entry.count("nay"), 0);
        assert_eq!(entry.count("recuse"), 0);
    }

    #[tokio::test]
    async fn test_vote_switch_moves_one_count() {
        let ledger = ledger();
        ledger.cast_vote("T1", "u1", "alice", "aye", t0()).await.unwrap();
        let result = ledger.cast_vote("T1", "u1", "alice", "nay", t0()).await.unwrap();

        assert!(result.accepted);
        assert_eq!(result.previous_vote_type.unwrap().as_str(), "aye");

        let tally = ledger.get_tally("T1").await.unwrap();
        let counts: Vec<u64> = tally.values().copied().collect();
        // aye, nay, recuse
        assert_eq!(counts, vec![0, 1, 0]);
    }

    #[tokio::test]
    async fn test_revote_is_idempotent() {
        let ledger = ledger();
        ledger.cast_vote("T1", "u1", "alice", "aye", t0()).await.unwrap();
        let before = ledger.entry("T1").await.unwrap();

        let result = ledger.cast_vote("T1", "u1", "alice", "AYE", t0()).await.unwrap();
        assert!(!result.accepted);
        assert_eq!(ledger.entry("T1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_unknown_option_is_rejected() {
        let ledger = ledger();
        let err = ledger.cast_vote("T1", "u1", "alice", "maybe", t0()).await.unwrap_err();
        assert!(matches!(err, LedgerError::UnknownVoteOption(ref v) if v == "maybe"));
        assert!(ledger.entry("T1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unseen_thread_tally_is_zeroed() {
        let ledger = ledger();
        let tally = ledger.get_tally("nope").await.unwrap();
        assert_eq!(tally.len(), 3);
        assert!(tally.values().all(|c| *c == 0));
    }

    #[tokio::test]
    async fn test_register_proposal_keeps_votes() {
        let ledger = ledger();
        ledger.cast_vote("T1", "u1", "alice", "aye", t0()).await.unwrap();

        let entry = ledger
            .register_proposal("T1", 42, Some("  Fund the thing "), vec!["Treasurer".into()], t0())
            .await
            .unwrap();
        assert_eq!(entry.proposal_index, Some(42));
        assert_eq!(entry.title.as_deref(), Some("Fund the thing"));
        assert_eq!(entry.count("aye"), 1);

        // Second registration with no title keeps the existing one
        let again = ledger.register_proposal("T1", 42, None, vec![], t0()).await.unwrap();
        assert_eq!(again, entry);
    }

    #[tokio::test]
    async fn test_archive_fifteen_days_with_fourteen_day_retention() {
        let ledger = ledger();
        ledger.cast_vote("old", "u1", "alice", "aye", t0()).await.unwrap();
        ledger
            .cast_vote("fresh", "u1", "alice", "nay", t0() + Duration::days(10))
            .await
            .unwrap();

        let now = t0() + Duration::days(15);
        let cancel = CancellationToken::new();

        let archived = ledger.archive_older_than(FOURTEEN_DAYS, now, &cancel).await.unwrap();
        assert_eq!(archived.into_iter().collect::<Vec<_>>(), vec!["old".to_string()]);

        assert!(ledger.entry("old").await.unwrap().is_none());
        let moved = ledger.archived_entry("old").await.unwrap().unwrap();
        assert!(moved.archived);
        assert_eq!(moved.count("aye"), 1);
        assert!(ledger.entry("fresh").await.unwrap().is_some());

        // Archived threads still report their final tally
        assert_eq!(ledger.get_tally("old").await.unwrap()[&crate::models::VoteOption::new("aye")], 1);

        // Idempotent
        let again = ledger.archive_older_than(FOURTEEN_DAYS, now, &cancel).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_archive_boundary_is_strict() {
        let ledger = ledger();
        ledger.cast_vote("edge", "u1", "alice", "aye", t0()).await.unwrap();

        let now = t0() + Duration::seconds(FOURTEEN_DAYS);
        let archived = ledger
            .archive_older_than(FOURTEEN_DAYS, now, &CancellationToken::new())
            .await
            .unwrap();
        assert!(archived.is_empty());
    }

    #[tokio::test]
    async fn test_vote_on_archived_thread_fails() {
        let ledger = ledger();
        ledger.cast_vote("T1", "u1", "alice", "aye", t0()).await.unwrap();
        ledger
            .archive_older_than(0, t0() + Duration::seconds(1), &CancellationToken::new())
            .await
            .unwrap();

        let err = ledger.cast_vote("T1", "u2", "bob", "nay", t0()).await.unwrap_err();
        assert!(matches!(err, LedgerError::ThreadArchived(_)));
    }

    #[tokio::test]
    async fn test_cancelled_sweep_archives_nothing() {
        let ledger = ledger();
        ledger.cast_vote("T1", "u1", "alice", "aye", t0()).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let archived = ledger
            .archive_older_than(0, t0() + Duration::days(30), &cancel)
            .await
            .unwrap();
        assert!(archived.is_empty());
        assert!(ledger.entry("T1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_archive_inactive_skips_unresolved() {
        let ledger = ledger();
        ledger.register_proposal("A", 1, None, vec![], t0()).await.unwrap();
        ledger.register_proposal("B", 2, None, vec![], t0()).await.unwrap();
        ledger.cast_vote("C", "u1", "alice", "aye", t0()).await.unwrap();

        let active: BTreeSet<u64> = [2].into_iter().collect();
        let archived = ledger
            .archive_inactive(&active, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(archived.into_iter().collect::<Vec<_>>(), vec!["A".to_string()]);
        assert_eq!(ledger.live_entries().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_entry_refuses_mutation() {
        let backend = Arc::new(DocumentLedgerBackend::in_memory());
        let mut entry = VoteEntry::new("T1", &VoteOptions::default(), 0);
        entry.apply_vote("u1", "alice", crate::models::VoteOption::new("aye")).unwrap();
        entry.tally.insert(crate::models::VoteOption::new("aye"), 5);
        backend.store_live(&entry).await.unwrap();

        let ledger = VoteLedger::new(backend, VoteOptions::default());
        let err = ledger.cast_vote("T1", "u2", "bob", "nay", t0()).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn test_file_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vote_ledger.json");

        {
            let backend = Arc::new(DocumentLedgerBackend::open(&path).unwrap());
            let ledger = VoteLedger::new(backend, VoteOptions::default());
            ledger.cast_vote("T1", "u1", "alice", "aye", t0()).await.unwrap();
            ledger.cast_vote("T2", "u1", "alice", "nay", t0()).await.unwrap();
            ledger
                .archive_older_than(0, t0() + Duration::seconds(5), &CancellationToken::new())
                .await
                .unwrap();
            ledger.cast_vote("T3", "u2", "bob", "recuse", t0()).await.unwrap();
        }

        let backend = Arc::new(DocumentLedgerBackend::open(&path).unwrap());
        assert!(backend.load_archived("T1").await.unwrap().is_some());
        assert!(backend.load_archived("T2").await.unwrap().is_some());
        assert_eq!(backend.load_live("T3").await.unwrap().unwrap().count("recuse"), 1);

        let copy = backend.backup(3, t0()).unwrap().unwrap();
        assert!(copy.starts_with(dir.path().join("backup")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_distinct_voters_all_counted() {
        let ledger = Arc::new(ledger());
        let options = ["aye", "nay", "recuse"];
        let n = 200;

        let mut handles = Vec::new();
        for i in 0..n {
            let ledger = ledger.clone();
            let vote = options[rand::thread_rng().gen_range(0..options.len())];
            handles.push(tokio::spawn(async move {
                ledger
                    .cast_vote("busy", &format!("u{}", i), &format!("user{}", i), vote, t0())
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().accepted);
        }

        let entry = ledger.entry("busy").await.unwrap().unwrap();
        assert_eq!(entry.users.len(), n);
        assert_eq!(entry.total_votes(), n as u64);
        entry.check_invariants().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_random_interleaving_keeps_invariant() {
        let ledger = Arc::new(ledger());
        let mut ops: Vec<(String, &'static str)> = Vec::new();
        for user in 0..20 {
            for vote in ["aye", "nay", "recuse", "aye"] {
                ops.push((format!("u{}", user), vote));
            }
        }
        ops.shuffle(&mut rand::thread_rng());

        let handles: Vec<_> = ops
            .into_iter()
            .map(|(user, vote)| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.cast_vote("T", &user, &user, vote, t0()).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let entry = ledger.entry("T").await.unwrap().unwrap();
        entry.check_invariants().unwrap();
        assert_eq!(entry.total_votes(), 20);
    }

    /// Records which write path each store took
    struct RecordingBackend {
        inner: DocumentLedgerBackend,
        writes: std::sync::Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl LedgerBackend for RecordingBackend {
        async fn load_live(&self, thread_id: &str) -> Result<Option<VoteEntry>, StorageError> {
            self.inner.load_live(thread_id).await
        }

        async fn load_archived(&self, thread_id: &str) -> Result<Option<VoteEntry>, StorageError> {
            self.inner.load_archived(thread_id).await
        }

        async fn store_live(&self, entry: &VoteEntry) -> Result<(), StorageError> {
            self.writes.lock().unwrap().push(None);
            self.inner.store_live(entry).await
        }

        async fn store_vote(&self, entry: &VoteEntry, user_id: &str) -> Result<(), StorageError> {
            self.writes.lock().unwrap().push(Some(user_id.to_string()));
            self.inner.store_live(entry).await
        }

        async fn list_live(&self) -> Result<Vec<VoteEntry>, StorageError> {
            self.inner.list_live().await
        }

        async fn archive(&self, thread_id: &str) -> Result<bool, StorageError> {
            self.inner.archive(thread_id).await
        }

        async fn ping(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_vote_writes_only_the_voter() {
        let backend = Arc::new(RecordingBackend {
            inner: DocumentLedgerBackend::in_memory(),
            writes: std::sync::Mutex::new(Vec::new()),
        });
        let ledger = VoteLedger::new(backend.clone(), VoteOptions::default());

        ledger.cast_vote("T", "u1", "a", "aye", t0()).await.unwrap();
        ledger.cast_vote("T", "u2", "b", "nay", t0()).await.unwrap();
        // Unchanged vote, no write
        ledger.cast_vote("T", "u2", "b", "nay", t0()).await.unwrap();
        assert!(ledger.set_title("T", "Spend").await.unwrap());

        assert_eq!(
            *backend.writes.lock().unwrap(),
            vec![Some("u1".to_string()), Some("u2".to_string()), None]
        );
    }
}
