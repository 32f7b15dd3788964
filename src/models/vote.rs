use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Longest title kept on a ledger entry, in characters
pub const MAX_TITLE_CHARS: usize = 200;

/// Vote option tag such as `aye` or `nay`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteOption(String);

impl VoteOption {
    pub fn new(tag: &str) -> Self {
        Self(tag.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VoteOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-option vote counts
pub type Tally = BTreeMap<VoteOption, u64>;

/// The configured set of vote options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOptions(BTreeSet<VoteOption>);

impl VoteOptions {
    pub fn new<'a>(tags: impl IntoIterator<Item = &'a str>) -> Self {
        Self(
            tags.into_iter()
                .map(VoteOption::new)
                .filter(|option| !option.as_str().is_empty())
                .collect(),
        )
    }

    /// Parse a comma separated option list, e.g. `aye,nay,recuse`
    pub fn parse(csv: &str) -> Self {
        Self::new(csv.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VoteOption> {
        self.0.iter()
    }

    /// Look up a raw tag, returning the normalized option when it is configured
    pub fn resolve(&self, raw: &str) -> Option<VoteOption> {
        let option = VoteOption::new(raw);
        self.0.contains(&option).then_some(option)
    }

    pub fn zeroed_tally(&self) -> Tally {
        self.0.iter().map(|option| (option.clone(), 0)).collect()
    }
}

impl Default for VoteOptions {
    fn default() -> Self {
        Self::new(["aye", "nay", "recuse"])
    }
}

/// Raised when a ledger entry's tally disagrees with its user records
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Ledger invariant violated on thread {thread_id}: {detail}")]
pub struct InvariantViolation {
    pub thread_id: String,
    pub detail: String,
}

/// A single user's current vote on a thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterRecord {
    pub username: String,
    pub vote_type: VoteOption,
}

/// Outcome of a cast-vote call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResult {
    /// False when the user re-voted the option they already hold
    pub accepted: bool,
    pub previous_vote_type: Option<VoteOption>,
    pub tally: Tally,
}

/// Ledger record of community votes for one proposal thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteEntry {
    pub thread_id: String,
    /// On-chain proposal index, `None` while unresolved
    pub proposal_index: Option<u64>,
    pub title: Option<String>,
    #[serde(default)]
    pub origin: Vec<String>,
    pub tally: Tally,
    pub users: BTreeMap<String, VoterRecord>,
    /// Unix seconds, set once at creation
    pub created_epoch: i64,
    #[serde(default)]
    pub archived: bool,
}

impl VoteEntry {
    pub fn new(thread_id: &str, options: &VoteOptions, created_epoch: i64) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            proposal_index: None,
            title: None,
            origin: Vec::new(),
            tally: options.zeroed_tally(),
            users: BTreeMap::new(),
            created_epoch,
            archived: false,
        }
    }

    /// Add zero buckets for options configured after this entry was created
    pub fn ensure_options(&mut self, options: &VoteOptions) {
        for option in options.iter() {
            self.tally.entry(option.clone()).or_insert(0);
        }
    }

    pub fn count(&self, option: &str) -> u64 {
        self.tally.get(&VoteOption::new(option)).copied().unwrap_or(0)
    }

    pub fn total_votes(&self) -> u64 {
        self.tally.values().sum()
    }

    /// Record `vote_type` for `user_id`.
    ///
    /// Re-voting the held option is a no-op reported as `accepted = false`.
    /// Switching moves exactly one count from the old bucket to the new one.
    pub fn apply_vote(
        &mut self,
        user_id: &str,
        username: &str,
        vote_type: VoteOption,
    ) -> Result<VoteResult, InvariantViolation> {
        let previous = self.users.get(user_id).map(|record| record.vote_type.clone());

        if previous.as_ref() == Some(&vote_type) {
            return Ok(VoteResult {
                accepted: false,
                previous_vote_type: previous,
                tally: self.tally.clone(),
            });
        }

        if let Some(prev) = &previous {
            let bucket = self.tally.get_mut(prev).filter(|count| **count > 0).ok_or_else(|| {
                InvariantViolation {
                    thread_id: self.thread_id.clone(),
                    detail: format!("user {} holds '{}' but its bucket is empty", user_id, prev),
                }
            })?;
            *bucket -= 1;
        }

        *self.tally.entry(vote_type.clone()).or_insert(0) += 1;
        self.users.insert(
            user_id.to_string(),
            VoterRecord {
                username: username.to_string(),
                vote_type,
            },
        );

        Ok(VoteResult {
            accepted: true,
            previous_vote_type: previous,
            tally: self.tally.clone(),
        })
    }

    /// Verify every tally bucket equals the number of users holding that option
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut counted: BTreeMap<&VoteOption, u64> = BTreeMap::new();
        for record in self.users.values() {
            if !self.tally.contains_key(&record.vote_type) {
                return Err(InvariantViolation {
                    thread_id: self.thread_id.clone(),
                    detail: format!("vote type '{}' has no tally bucket", record.vote_type),
                });
            }
            *counted.entry(&record.vote_type).or_insert(0) += 1;
        }

        for (option, count) in &self.tally {
            let expected = counted.get(option).copied().unwrap_or(0);
            if *count != expected {
                return Err(InvariantViolation {
                    thread_id: self.thread_id.clone(),
                    detail: format!(
                        "tally['{}'] is {} but {} users hold it",
                        option, count, expected
                    ),
                });
            }
        }

        Ok(())
    }
}

/// Trim a display title and cap it, treating empty and `None` placeholders as absent
pub fn normalize_title(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "None" {
        return None;
    }
    Some(trimmed.chars().take(MAX_TITLE_CHARS).collect::<String>().trim_end().to_string())
}
