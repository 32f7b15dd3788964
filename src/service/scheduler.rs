//! Periodic governance jobs
//!
//! Every job has its own timer and its own [`JobGuard`]. A firing that finds
//! the previous run of the same job still in flight is skipped; different jobs
//! run independently of each other. Whatever a run produces is pushed to the
//! [`EventOutbox`] for the chat adapter to drain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::archival_sweeper::ArchivalSweeper;
use super::proxy_vote_service::{ProxyVoteError, ProxyVotePlanner};
use super::reconciliation::{ReconcileError, ReconciliationDriver};
use super::sources::{GovernanceSource, MetadataSource, ProxyVoteGateway};
use super::storage::StorageError;
use super::vote_ledger::{LedgerError, VoteLedger};
use crate::models::{NewOrChangedProposal, PlannedVote, TitleUpdate};

// =============================================================================
// JOBS AND EVENTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    CheckGovernance,
    ArchiveSweep,
    RecheckMetadata,
    ProxyVote,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::CheckGovernance,
        JobKind::ArchiveSweep,
        JobKind::RecheckMetadata,
        JobKind::ProxyVote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::CheckGovernance => "check_governance",
            JobKind::ArchiveSweep => "archive_sweep",
            JobKind::RecheckMetadata => "recheck_metadata",
            JobKind::ProxyVote => "proxy_vote",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown job: {}", s))
    }
}

/// Something the chat adapter has to act on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GovernanceEvent {
    ProposalsDetected { proposals: Vec<NewOrChangedProposal> },
    ThreadsToLock { thread_ids: Vec<String> },
    TitlesUpdated { updates: Vec<TitleUpdate> },
    ProxyVotesCast { extrinsic_hash: String, votes: Vec<PlannedVote> },
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job {0} is already running")]
    Busy(JobKind),

    #[error("Job {0} is disabled")]
    Disabled(JobKind),

    #[error("Reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Proxy voting failed: {0}")]
    ProxyVote(#[from] ProxyVoteError),
}

// =============================================================================
// JOB GUARD
// =============================================================================

/// Non-reentrancy flag for one job
#[derive(Debug, Default)]
pub struct JobGuard {
    running: AtomicBool,
}

/// Held while a job runs; releases the guard on drop
pub struct JobPermit<'a> {
    running: &'a AtomicBool,
}

impl JobGuard {
    pub fn try_start(&self) -> Option<JobPermit<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| JobPermit {
                running: &self.running,
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for JobPermit<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

// =============================================================================
// EVENT OUTBOX
// =============================================================================

/// Bounded queue of pending events; the oldest event is dropped when full
pub struct EventOutbox {
    capacity: usize,
    events: Mutex<VecDeque<GovernanceEvent>>,
}

impl EventOutbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, event: GovernanceEvent) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if events.len() == self.capacity {
            events.pop_front();
            warn!(capacity = self.capacity, "Event outbox full, dropped oldest event");
        }
        events.push_back(event);
    }

    pub fn drain(&self) -> Vec<GovernanceEvent> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// JOB RUNNER
// =============================================================================

/// Proxy voting wiring, present only when enabled
pub struct ProxyVoting {
    pub planner: Arc<ProxyVotePlanner>,
    pub gateway: Arc<dyn ProxyVoteGateway>,
}

pub struct GovernanceJobs {
    ledger: Arc<VoteLedger>,
    driver: Arc<ReconciliationDriver>,
    sweeper: ArchivalSweeper,
    chain: Arc<dyn GovernanceSource>,
    metadata: Arc<dyn MetadataSource>,
    proxy: Option<ProxyVoting>,
    outbox: Arc<EventOutbox>,
    backup_max_files: usize,
    guards: [JobGuard; 4],
}

impl GovernanceJobs {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<VoteLedger>,
        driver: Arc<ReconciliationDriver>,
        sweeper: ArchivalSweeper,
        chain: Arc<dyn GovernanceSource>,
        metadata: Arc<dyn MetadataSource>,
        proxy: Option<ProxyVoting>,
        outbox: Arc<EventOutbox>,
        backup_max_files: usize,
    ) -> Self {
        Self {
            ledger,
            driver,
            sweeper,
            chain,
            metadata,
            proxy,
            outbox,
            backup_max_files,
            guards: Default::default(),
        }
    }

    fn guard(&self, kind: JobKind) -> &JobGuard {
        let slot = JobKind::ALL.iter().position(|k| *k == kind).unwrap_or(0);
        &self.guards[slot]
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.guard(kind).is_running()
    }

    pub fn proxy_planner(&self) -> Option<&Arc<ProxyVotePlanner>> {
        self.proxy.as_ref().map(|p| &p.planner)
    }

    /// Run one job now; `Busy` if the same job is still in flight
    pub async fn run(
        &self,
        kind: JobKind,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<GovernanceEvent>, JobError> {
        let Some(_permit) = self.guard(kind).try_start() else {
            return Err(JobError::Busy(kind));
        };

        let job_id = uuid::Uuid::new_v4();
        info!(job = %kind, job_id = %job_id, "Job started");

        let events = match kind {
            JobKind::CheckGovernance => self.check_governance(now, cancel).await?,
            JobKind::ArchiveSweep => self.archive_sweep(now, cancel).await?,
            JobKind::RecheckMetadata => self.recheck_metadata(cancel).await?,
            JobKind::ProxyVote => self.proxy_vote(now, cancel).await?,
        };

        for event in &events {
            self.outbox.push(event.clone());
        }
        info!(job = %kind, job_id = %job_id, events = events.len(), "Job finished");
        Ok(events)
    }

    async fn check_governance(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<GovernanceEvent>, JobError> {
        if let Some(backup) = self.ledger.backend().backup(self.backup_max_files, now)? {
            debug!(path = %backup.display(), "Ledger backed up");
        }

        let report = self
            .driver
            .run_cycle(self.chain.as_ref(), self.metadata.as_ref(), cancel)
            .await?;
        let locked = self.ledger.archive_inactive(&report.ongoing, cancel).await?;

        let mut events = Vec::new();
        if !report.proposals.is_empty() {
            events.push(GovernanceEvent::ProposalsDetected {
                proposals: report.proposals,
            });
        }
        if !locked.is_empty() {
            events.push(GovernanceEvent::ThreadsToLock {
                thread_ids: locked.into_iter().collect(),
            });
        }
        Ok(events)
    }

    async fn archive_sweep(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<GovernanceEvent>, JobError> {
        let archived = self.sweeper.sweep(now, cancel).await?;
        Ok(if archived.is_empty() {
            Vec::new()
        } else {
            vec![GovernanceEvent::ThreadsToLock {
                thread_ids: archived.into_iter().collect(),
            }]
        })
    }

    async fn recheck_metadata(&self, cancel: &CancellationToken) -> Result<Vec<GovernanceEvent>, JobError> {
        let updates = self
            .driver
            .recheck_metadata(&self.ledger, self.metadata.as_ref(), cancel)
            .await?;
        Ok(if updates.is_empty() {
            Vec::new()
        } else {
            vec![GovernanceEvent::TitlesUpdated { updates }]
        })
    }

    async fn proxy_vote(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<GovernanceEvent>, JobError> {
        let Some(proxy) = &self.proxy else {
            return Err(JobError::Disabled(JobKind::ProxyVote));
        };

        let report = proxy
            .planner
            .run(&self.ledger, self.chain.as_ref(), proxy.gateway.as_ref(), now, cancel)
            .await?;

        Ok(match report.extrinsic_hash {
            Some(extrinsic_hash) if !report.cast.is_empty() => vec![GovernanceEvent::ProxyVotesCast {
                extrinsic_hash,
                votes: report.cast,
            }],
            _ => Vec::new(),
        })
    }
}

/// Fire `kind` every `period` until `cancel` is triggered
pub fn spawn_periodic(
    jobs: Arc<GovernanceJobs>,
    kind: JobKind,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match jobs.run(kind, Utc::now(), &cancel).await {
                Ok(_) => {}
                Err(JobError::Busy(_)) => debug!(job = %kind, "Previous run still in flight, skipping"),
                Err(e) => error!(job = %kind, error = %e, "Scheduled job failed"),
            }
        }

        info!(job = %kind, "Scheduler stopped");
    })
}
