//! Proxy vote planner
//!
//! Turns community tallies into on-chain votes cast through the proxy
//! account. Every proposal gets two vote slots:
//!
//! - the first vote, cast once the proposal is `internal_vote_period` days old
//! - the second vote, due at `revote_period`, cast only when the community
//!   changed its mind since the first one
//!
//! Both slots are recorded in the vote book, which is what keeps a slot from
//! ever being cast twice across runs and restarts.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sources::{GovernanceSource, ProxyVoteGateway, SourceError};
use super::storage::{read_json, write_json_atomic, StorageError};
use super::vote_ledger::{LedgerError, VoteLedger};
use crate::models::{
    Key, Node, Participation, PlannedVote, ProxyDecision, ProxyVoteBook, ProxyVoteRecord, Scalar,
    Tally, VoteAction, VoteEntry, VoteOption, VotePeriods,
};

const SECONDS_IN_A_DAY: i64 = 86_400;

/// Marker stored in a second slot that was deliberately not cast
pub const VOTE_UNCHANGED: &str = "The vote has not changed since the 1st vote";

#[derive(Debug, Error)]
pub enum ProxyVoteError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Proxy voting cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ProxyVoteSettings {
    /// Share of aye (or nay) among aye+nay needed to vote that way
    pub threshold: Decimal,
    /// Minimum turnout in percent of members; zero disables the check
    pub min_participation: Decimal,
    /// Votes are not submitted while the proxy balance is at or below this
    pub balance_alert: Decimal,
    pub conviction: String,
}

impl Default for ProxyVoteSettings {
    fn default() -> Self {
        Self {
            threshold: Decimal::new(66, 2),
            min_participation: Decimal::ZERO,
            balance_alert: Decimal::ZERO,
            conviction: "None".to_string(),
        }
    }
}

/// Outcome of one planner run
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ProxyRunReport {
    pub planned: Vec<PlannedVote>,
    pub cast: Vec<PlannedVote>,
    pub extrinsic_hash: Option<String>,
    pub skipped_low_balance: bool,
}

/// Turnout check; `min_required_voters` is rounded up
pub fn check_participation(total_members: u64, total_votes: u64, min_participation: Decimal) -> Participation {
    let members = Decimal::from(total_members);
    let min_required_voters = (members * min_participation / Decimal::ONE_HUNDRED)
        .ceil()
        .to_u64()
        .unwrap_or(u64::MAX);

    let actual_participation_percentage = if total_members == 0 {
        Decimal::ZERO
    } else {
        (Decimal::from(total_votes) * Decimal::ONE_HUNDRED / members).round_dp(2)
    };

    Participation {
        meets_minimum: total_votes >= min_required_voters,
        min_required_voters,
        total_vote_count: total_votes,
        total_members,
        actual_participation_percentage,
    }
}

/// Proxy decision from a community tally
pub fn decide(tally: &Tally, participation: Option<&Participation>, threshold: Decimal) -> ProxyDecision {
    if participation.is_some_and(|p| !p.meets_minimum) {
        return ProxyDecision::Abstain;
    }

    let count = |tag: &str| tally.get(&VoteOption::new(tag)).copied().unwrap_or(0);
    let aye = count("aye");
    let nay = count("nay");
    if aye + nay == 0 {
        return ProxyDecision::Abstain;
    }

    let total = Decimal::from(aye + nay);
    if Decimal::from(aye) / total >= threshold {
        ProxyDecision::Aye
    } else if Decimal::from(nay) / total >= threshold {
        ProxyDecision::Nay
    } else {
        ProxyDecision::Abstain
    }
}

/// What to do for a proposal `elapsed_secs` after it was submitted
pub fn determine_action(elapsed_secs: i64, periods: &VotePeriods, decision: ProxyDecision) -> VoteAction {
    let decision_period = i64::from(periods.decision_period) * SECONDS_IN_A_DAY;
    let first = i64::from(periods.internal_vote_period) * SECONDS_IN_A_DAY;
    let second = i64::from(periods.revote_period) * SECONDS_IN_A_DAY;

    if elapsed_secs >= decision_period {
        VoteAction::PeriodEnded
    } else if elapsed_secs >= second {
        VoteAction::CastSecond(decision)
    } else if elapsed_secs >= first {
        VoteAction::CastFirst(decision)
    } else {
        VoteAction::Waiting {
            seconds_until_first: first - elapsed_secs,
        }
    }
}

/// Which of a record's two slots a planned vote fills
#[derive(Debug, Clone, Copy)]
enum Slot {
    First,
    Second,
}

/// Load the per-origin schedule, e.g. `{"SmallSpender": {"decision_period": 28, ...}}`
pub fn load_vote_periods(path: &Path) -> Result<HashMap<String, VotePeriods>, StorageError> {
    Ok(read_json(path)?.unwrap_or_default())
}

pub struct ProxyVotePlanner {
    settings: ProxyVoteSettings,
    periods: HashMap<String, VotePeriods>,
    book_path: Option<PathBuf>,
    book: Mutex<ProxyVoteBook>,
    total_members: AtomicU64,
}

impl ProxyVotePlanner {
    pub fn new(
        settings: ProxyVoteSettings,
        periods: HashMap<String, VotePeriods>,
        book_path: Option<PathBuf>,
    ) -> Result<Self, StorageError> {
        let book = match &book_path {
            Some(path) => read_json(path)?.unwrap_or_default(),
            None => ProxyVoteBook::default(),
        };
        Ok(Self {
            settings,
            periods,
            book_path,
            book: Mutex::new(book),
            total_members: AtomicU64::new(0),
        })
    }

    /// Participation basis, i.e. the number of members holding the voter role
    pub fn set_total_members(&self, total: u64) {
        self.total_members.store(total, Ordering::Relaxed);
    }

    pub fn total_members(&self) -> u64 {
        self.total_members.load(Ordering::Relaxed)
    }

    pub async fn book(&self) -> ProxyVoteBook {
        self.book.lock().await.clone()
    }

    fn persist(&self, book: &ProxyVoteBook) -> Result<(), StorageError> {
        if let Some(path) = &self.book_path {
            write_json_atomic(path, book)?;
        }
        Ok(())
    }

    fn decision_for(&self, entry: &VoteEntry) -> ProxyDecision {
        let participation = (self.settings.min_participation > Decimal::ZERO).then(|| {
            check_participation(
                self.total_members(),
                entry.total_votes(),
                self.settings.min_participation,
            )
        });
        if let Some(p) = participation.as_ref().filter(|p| !p.meets_minimum) {
            warn!(
                thread_id = %entry.thread_id,
                votes = p.total_vote_count,
                required = p.min_required_voters,
                "Participation too low, defaulting to abstain"
            );
        }
        decide(&entry.tally, participation.as_ref(), self.settings.threshold)
    }

    /// Plan, submit and record proxy votes for every live proposal
    pub async fn run(
        &self,
        ledger: &VoteLedger,
        source: &dyn GovernanceSource,
        gateway: &dyn ProxyVoteGateway,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ProxyRunReport, ProxyVoteError> {
        let snapshot = source.fetch_governance_snapshot().await?;
        let mut book = self.book.lock().await;
        let mut next = book.clone();
        let mut report = ProxyRunReport::default();
        let mut slots = BTreeMap::new();
        let ongoing_key = Key::parse("Ongoing");

        for entry in ledger.live_entries().await? {
            if cancel.is_cancelled() {
                return Err(ProxyVoteError::Cancelled);
            }

            let (Some(index), Some(origin)) = (entry.proposal_index, entry.origin.first()) else {
                continue;
            };

            let Some(ongoing) = snapshot.get(&Key::Index(index)).and_then(|n| n.get(&ongoing_key)) else {
                if let Some(record) = next.records.get_mut(&index) {
                    record.decision_period_passed = true;
                }
                continue;
            };

            let Some(periods) = self.periods.get(origin) else {
                debug!(proposal_index = index, origin = %origin, "No vote periods for origin");
                continue;
            };

            let Some(submitted) = submitted_block(ongoing) else {
                warn!(proposal_index = index, "Ongoing proposal has no submission block");
                continue;
            };
            let submitted_at = gateway.block_timestamp(submitted).await?;

            let decision = self.decision_for(&entry);
            let action = determine_action(now.timestamp() - submitted_at, periods, decision);
            let record = next
                .records
                .entry(index)
                .or_insert_with(|| ProxyVoteRecord::new(&entry.thread_id, origin));
            record.decision_period_passed = action == VoteAction::PeriodEnded;

            match action {
                // A first vote still unsettled when the revote window opens is cast late
                VoteAction::CastFirst(decision) | VoteAction::CastSecond(decision)
                    if !record.first_vote.is_settled() =>
                {
                    record.first_vote.decision = Some(decision);
                    record.first_vote.tally = entry.tally.clone();
                    slots.insert(index, Slot::First);
                    report.planned.push(self.planned(index, decision));
                }
                VoteAction::CastSecond(decision) if !record.second_vote.is_settled() => {
                    record.second_vote.decision = Some(decision);
                    if record.first_vote.decision == Some(decision) {
                        info!(proposal_index = index, "Second vote unchanged, not casting");
                        record.second_vote.extrinsic = Some(VOTE_UNCHANGED.to_string());
                        record.second_vote.timestamp = Some(now);
                    } else {
                        record.second_vote.tally = entry.tally.clone();
                        slots.insert(index, Slot::Second);
                        report.planned.push(self.planned(index, decision));
                    }
                }
                VoteAction::Waiting { seconds_until_first } => {
                    debug!(proposal_index = index, seconds_until_first, "Waiting for first vote");
                }
                _ => {}
            }
        }

        if next != *book {
            self.persist(&next)?;
            *book = next.clone();
        }

        if report.planned.is_empty() {
            return Ok(report);
        }

        let balance = gateway.proxy_balance().await?;
        if balance <= self.settings.balance_alert {
            warn!(
                balance = %balance,
                alert = %self.settings.balance_alert,
                "Proxy balance too low, not casting votes"
            );
            report.skipped_low_balance = true;
            return Ok(report);
        }

        if cancel.is_cancelled() {
            return Err(ProxyVoteError::Cancelled);
        }

        info!(votes = report.planned.len(), "Casting on-chain votes");
        let receipt = gateway.submit_votes(&report.planned).await?;

        for index in &receipt.indexes {
            let (Some(record), Some(slot)) = (next.records.get_mut(index), slots.get(index)) else {
                continue;
            };
            let slot = match slot {
                Slot::First => &mut record.first_vote,
                Slot::Second => &mut record.second_vote,
            };
            slot.extrinsic = Some(receipt.extrinsic_hash.clone());
            slot.timestamp = Some(now);
        }

        self.persist(&next)?;
        *book = next;

        report.cast = report
            .planned
            .iter()
            .filter(|vote| receipt.indexes.contains(&vote.proposal_index))
            .cloned()
            .collect();
        report.extrinsic_hash = Some(receipt.extrinsic_hash);
        Ok(report)
    }

    fn planned(&self, proposal_index: u64, decision: ProxyDecision) -> PlannedVote {
        PlannedVote {
            proposal_index,
            decision,
            conviction: self.settings.conviction.clone(),
        }
    }
}

fn submitted_block(ongoing: &Node) -> Option<u64> {
    match ongoing.get(&Key::parse("submitted"))? {
        Node::Scalar(Scalar::Int(block)) => u64::try_from(*block).ok(),
        Node::Scalar(Scalar::Text(text)) => text.replace(',', "").parse().ok(),
        _ => None,
    }
}
