use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::vote::Tally;

/// Direction of an on-chain proxy vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyDecision {
    Aye,
    Nay,
    Abstain,
}

impl fmt::Display for ProxyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyDecision::Aye => write!(f, "aye"),
            ProxyDecision::Nay => write!(f, "nay"),
            ProxyDecision::Abstain => write!(f, "abstain"),
        }
    }
}

/// Per-origin voting schedule, in days since the proposal was submitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotePeriods {
    pub decision_period: u32,
    pub internal_vote_period: u32,
    pub revote_period: u32,
}

/// What the proxy should do for one proposal right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteAction {
    /// The on-chain decision period is over
    PeriodEnded,
    CastFirst(ProxyDecision),
    CastSecond(ProxyDecision),
    /// First vote not due yet; seconds left until it is
    Waiting { seconds_until_first: i64 },
}

/// Community turnout against the eligible member count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participation {
    pub meets_minimum: bool,
    pub min_required_voters: u64,
    pub total_vote_count: u64,
    pub total_members: u64,
    pub actual_participation_percentage: rust_decimal::Decimal,
}

/// One of the two vote slots a proposal gets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteSlot {
    pub decision: Option<ProxyDecision>,
    /// Community tally when the decision was taken
    #[serde(default)]
    pub tally: Tally,
    /// Extrinsic hash once submitted, or a note when casting was skipped
    pub extrinsic: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl VoteSlot {
    pub fn is_settled(&self) -> bool {
        self.extrinsic.is_some()
    }
}

/// Proxy voting history of one proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyVoteRecord {
    pub thread_id: String,
    pub origin: String,
    pub decision_period_passed: bool,
    pub first_vote: VoteSlot,
    pub second_vote: VoteSlot,
}

impl ProxyVoteRecord {
    pub fn new(thread_id: &str, origin: &str) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            origin: origin.to_string(),
            decision_period_passed: false,
            first_vote: VoteSlot::default(),
            second_vote: VoteSlot::default(),
        }
    }

    /// Number of slots that carry a submitted extrinsic
    pub fn votes_cast(&self) -> u8 {
        u8::from(self.first_vote.is_settled()) + u8::from(self.second_vote.is_settled())
    }
}

/// Every proxy vote record, keyed by proposal index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxyVoteBook {
    pub records: BTreeMap<u64, ProxyVoteRecord>,
}

/// A vote the planner wants submitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedVote {
    pub proposal_index: u64,
    pub decision: ProxyDecision,
    pub conviction: String,
}

/// Gateway receipt for a batch of proxy votes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedVotes {
    pub extrinsic_hash: String,
    /// Proposal indexes included in the successful batch
    pub indexes: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_book_serialization() {
        let mut book = ProxyVoteBook::default();
        let mut record = ProxyVoteRecord::new("thread-9", "SmallSpender");
        record.first_vote.decision = Some(ProxyDecision::Aye);
        record.first_vote.extrinsic = Some("0xabc".to_string());
        book.records.insert(9, record);

        let json = serde_json::to_value(&book).unwrap();
        assert_eq!(json["9"]["first_vote"]["decision"], "aye");
        assert_eq!(json["9"]["origin"], "SmallSpender");

        let back: ProxyVoteBook = serde_json::from_value(json).unwrap();
        assert_eq!(back.records[&9].votes_cast(), 1);
    }
}
