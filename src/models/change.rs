use serde::{Deserialize, Serialize};
use std::fmt;

use super::snapshot::{Key, Node};

/// Ordered key segments from the snapshot root down to a node
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(pub Vec<Key>);

impl FieldPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, key: Key) -> Self {
        let mut segments = self.0.clone();
        segments.push(key);
        Self(segments)
    }

    pub fn segments(&self) -> &[Key] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Proposal id, when the first segment is a numeric key
    pub fn proposal_id(&self) -> Option<u64> {
        self.0.first().and_then(Key::as_index)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root")?;
        for segment in &self.0 {
            write!(f, "[{}]", segment)?;
        }
        Ok(())
    }
}

/// A single structural difference between two snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub path: FieldPath,
    pub old: Option<Node>,
    pub new: Option<Node>,
}

/// Output of a snapshot diff, grouped the way the classifier consumes it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDiff {
    /// Keys present in the new snapshot only
    pub added: Vec<DiffEntry>,
    /// Keys present in both with unequal values
    pub changed: Vec<DiffEntry>,
    /// Keys present in the old snapshot only
    pub removed: Vec<DiffEntry>,
}

impl RawDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.changed.len() + self.removed.len()
    }
}

/// Typed change between two reconciliation cycles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    Removed {
        proposal_id: u64,
    },
    Added {
        proposal_id: u64,
    },
    Changed {
        proposal_id: u64,
        field_path: FieldPath,
        old_value: Option<Node>,
        new_value: Option<Node>,
    },
}

impl ChangeEvent {
    pub fn proposal_id(&self) -> u64 {
        match self {
            ChangeEvent::Removed { proposal_id }
            | ChangeEvent::Added { proposal_id }
            | ChangeEvent::Changed { proposal_id, .. } => *proposal_id,
        }
    }

    /// Group rank: removals first, then additions, then changes
    pub(crate) fn rank(&self) -> u8 {
        match self {
            ChangeEvent::Removed { .. } => 0,
            ChangeEvent::Added { .. } => 1,
            ChangeEvent::Changed { .. } => 2,
        }
    }
}
