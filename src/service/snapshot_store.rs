//! Snapshot store and structural diff
//!
//! The store keeps one last-seen snapshot per name. `diff` compares two
//! snapshots ignoring sequence order and reports additions, changes and
//! removals with their full path from the snapshot root.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::storage::{read_json, write_json_atomic, KeyedLocks, StorageError};
use crate::models::{DiffEntry, FieldPath, Node, RawDiff, Snapshot};

/// Persistence for named snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Last saved snapshot, or an empty one on first run
    async fn load(&self, name: &str) -> Result<Snapshot, StorageError>;

    /// Whether a snapshot was ever saved under `name`
    async fn exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Replace the snapshot stored under `name`
    async fn save(&self, name: &str, snapshot: &Snapshot) -> Result<(), StorageError>;
}

/// Compare two snapshots.
///
/// Lists are compared as multisets after canonicalization and reported as a
/// single change at the list's path. Reported values are canonical.
pub fn diff(old: &Snapshot, new: &Snapshot) -> RawDiff {
    let mut out = RawDiff::default();
    walk(&FieldPath::root(), old.canonical_root(), new.canonical_root(), &mut out);
    out
}

fn walk(path: &FieldPath, old: Node, new: Node, out: &mut RawDiff) {
    match (old, new) {
        (Node::Map(mut old_map), Node::Map(new_map)) => {
            for (key, new_child) in new_map {
                let child_path = path.child(key.clone());
                match old_map.remove(&key) {
                    Some(old_child) => walk(&child_path, old_child, new_child, out),
                    None => out.added.push(DiffEntry {
                        path: child_path,
                        old: None,
                        new: Some(new_child),
                    }),
                }
            }
            for (key, old_child) in old_map {
                out.removed.push(DiffEntry {
                    path: path.child(key),
                    old: Some(old_child),
                    new: None,
                });
            }
        }
        (old, new) => {
            if old != new {
                out.changed.push(DiffEntry {
                    path: path.clone(),
                    old: Some(old),
                    new: Some(new),
                });
            }
        }
    }
}

/// JSON document snapshot store.
///
/// With a directory, each snapshot lives in `<dir>/<name>.json`; without one
/// the store is purely in memory.
pub struct DocumentSnapshotStore {
    dir: Option<PathBuf>,
    cache: RwLock<HashMap<String, Snapshot>>,
    locks: KeyedLocks,
}

impl DocumentSnapshotStore {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            cache: RwLock::new(HashMap::new()),
            locks: KeyedLocks::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            dir: None,
            cache: RwLock::new(HashMap::new()),
            locks: KeyedLocks::new(),
        }
    }

    fn path_for(&self, name: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(format!("{}.json", name)))
    }

    async fn read(&self, name: &str) -> Result<Option<Snapshot>, StorageError> {
        if let Some(snapshot) = self.cache.read().await.get(name) {
            return Ok(Some(snapshot.clone()));
        }

        let Some(path) = self.path_for(name) else {
            return Ok(None);
        };
        let loaded: Option<Snapshot> = read_json(&path)?;
        if let Some(snapshot) = &loaded {
            debug!(name = name, proposals = snapshot.len(), "Snapshot loaded from disk");
            self.cache.write().await.insert(name.to_string(), snapshot.clone());
        }
        Ok(loaded)
    }
}

#[async_trait]
impl SnapshotStore for DocumentSnapshotStore {
    async fn load(&self, name: &str) -> Result<Snapshot, StorageError> {
        Ok(self.read(name).await?.unwrap_or_default())
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.read(name).await?.is_some())
    }

    async fn save(&self, name: &str, snapshot: &Snapshot) -> Result<(), StorageError> {
        let _guard = self.locks.lock(name).await;

        if let Some(path) = self.path_for(name) {
            write_json_atomic(&path, snapshot)?;
        }
        self.cache.write().await.insert(name.to_string(), snapshot.clone());

        info!(
            name = name,
            proposals = snapshot.len(),
            digest = %snapshot.digest(),
            "Snapshot saved"
        );
        Ok(())
    }
}
