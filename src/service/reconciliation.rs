//! Reconciliation driver
//!
//! One governance cycle: fetch the current snapshot, diff it against the
//! stored one, classify the differences, enrich new proposals with off-chain
//! metadata and hand the batch back. The stored snapshot is replaced only
//! after the whole batch is packaged, so a failed or cancelled cycle is
//! retried in full next time.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::change_classifier::classify;
use super::snapshot_store::{diff, SnapshotStore};
use super::sources::{GovernanceSource, MetadataSource, SourceError};
use super::storage::StorageError;
use super::vote_ledger::{LedgerError, VoteLedger};
use crate::models::{
    normalize_title, ChangeEvent, FieldChange, Key, NewOrChangedProposal, ProposalMetadata,
    ProposalUpdateKind, Snapshot, TitleUpdate,
};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Reconciliation cancelled")]
    Cancelled,
}

/// Everything one cycle produced
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub proposals: Vec<NewOrChangedProposal>,
    pub removed: Vec<u64>,
    /// Proposals ongoing in the freshly fetched snapshot
    pub ongoing: BTreeSet<u64>,
}

pub struct ReconciliationDriver {
    store: Arc<dyn SnapshotStore>,
    snapshot_name: String,
}

impl ReconciliationDriver {
    pub fn new(store: Arc<dyn SnapshotStore>, snapshot_name: impl Into<String>) -> Self {
        Self {
            store,
            snapshot_name: snapshot_name.into(),
        }
    }

    pub fn snapshot_name(&self) -> &str {
        &self.snapshot_name
    }

    /// New and changed proposals since the last successful cycle
    pub async fn reconcile(
        &self,
        source: &dyn GovernanceSource,
        enrich: &dyn MetadataSource,
        cancel: &CancellationToken,
    ) -> Result<Vec<NewOrChangedProposal>, ReconcileError> {
        Ok(self.run_cycle(source, enrich, cancel).await?.proposals)
    }

    pub async fn run_cycle(
        &self,
        source: &dyn GovernanceSource,
        enrich: &dyn MetadataSource,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, ReconcileError> {
        let cycle_id = Uuid::new_v4();

        let fresh = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReconcileError::Cancelled),
            fetched = source.fetch_governance_snapshot() => fetched.map_err(|e| {
                error!(cycle_id = %cycle_id, error = %e, "Failed to fetch governance snapshot");
                e
            })?,
        };

        let stored = self.store.load(&self.snapshot_name).await?;
        let raw = diff(&stored, &fresh);
        let ongoing = fresh.ongoing_ids();

        if raw.is_empty() {
            info!(cycle_id = %cycle_id, proposals = fresh.len(), "No governance changes");
            return Ok(CycleReport {
                ongoing,
                ..CycleReport::default()
            });
        }

        let events = classify(raw);
        let report = self
            .package(cycle_id, &fresh, events, ongoing, enrich, cancel)
            .await?;

        self.store.save(&self.snapshot_name, &fresh).await?;

        info!(
            cycle_id = %cycle_id,
            updates = report.proposals.len(),
            removed = report.removed.len(),
            "Governance cycle complete"
        );
        Ok(report)
    }

    async fn package(
        &self,
        cycle_id: Uuid,
        fresh: &Snapshot,
        events: Vec<ChangeEvent>,
        ongoing: BTreeSet<u64>,
        enrich: &dyn MetadataSource,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, ReconcileError> {
        let mut report = CycleReport {
            ongoing,
            ..CycleReport::default()
        };
        let mut changes: BTreeMap<u64, Vec<FieldChange>> = BTreeMap::new();

        for event in events {
            if cancel.is_cancelled() {
                warn!(cycle_id = %cycle_id, "Cycle cancelled while packaging");
                return Err(ReconcileError::Cancelled);
            }

            match event {
                ChangeEvent::Removed { proposal_id } => {
                    info!(cycle_id = %cycle_id, proposal_id, "Proposal left the snapshot");
                    report.removed.push(proposal_id);
                }
                ChangeEvent::Added { proposal_id } => {
                    let metadata = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            warn!(cycle_id = %cycle_id, proposal_id, "Cycle cancelled during enrichment");
                            return Err(ReconcileError::Cancelled);
                        }
                        fetched = enrich.fetch_metadata(proposal_id) => match fetched {
                            Ok(metadata) => metadata,
                            Err(e) => {
                                warn!(
                                    cycle_id = %cycle_id,
                                    proposal_id,
                                    error = %e,
                                    "Metadata unavailable, using placeholder"
                                );
                                ProposalMetadata::unavailable()
                            }
                        },
                    };

                    info!(
                        cycle_id = %cycle_id,
                        proposal_id,
                        title = ?metadata.title,
                        "New proposal detected"
                    );
                    report.proposals.push(NewOrChangedProposal {
                        proposal_id,
                        onchain_fields: fresh.get(&Key::Index(proposal_id)).cloned(),
                        kind: ProposalUpdateKind::Added { metadata },
                    });
                }
                ChangeEvent::Changed {
                    proposal_id,
                    field_path,
                    old_value,
                    new_value,
                } => {
                    changes.entry(proposal_id).or_default().push(FieldChange {
                        field_path,
                        old_value,
                        new_value,
                    });
                }
            }
        }

        for (proposal_id, changes) in changes {
            report.proposals.push(NewOrChangedProposal {
                proposal_id,
                onchain_fields: fresh.get(&Key::Index(proposal_id)).cloned(),
                kind: ProposalUpdateKind::Changed { changes },
            });
        }

        Ok(report)
    }

    /// Store the current snapshot without reporting anything, if none exists yet.
    ///
    /// Returns `true` when a seed snapshot was written.
    pub async fn seed(&self, source: &dyn GovernanceSource) -> Result<bool, ReconcileError> {
        if self.store.exists(&self.snapshot_name).await? {
            return Ok(false);
        }

        let fresh = source.fetch_governance_snapshot().await?;
        self.store.save(&self.snapshot_name, &fresh).await?;
        info!(
            name = %self.snapshot_name,
            proposals = fresh.len(),
            "Seeded empty snapshot store"
        );
        Ok(true)
    }

    /// Re-fetch metadata for live threads and apply title changes
    pub async fn recheck_metadata(
        &self,
        ledger: &VoteLedger,
        enrich: &dyn MetadataSource,
        cancel: &CancellationToken,
    ) -> Result<Vec<TitleUpdate>, ReconcileError> {
        let mut updates = Vec::new();

        for entry in ledger.live_entries().await? {
            let Some(proposal_index) = entry.proposal_index else {
                continue;
            };
            if cancel.is_cancelled() {
                warn!(updated = updates.len(), "Metadata recheck cancelled");
                break;
            }

            let metadata = match enrich.fetch_metadata(proposal_index).await {
                Ok(metadata) if metadata.is_available() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!(proposal_index, error = %e, "Metadata recheck failed for proposal");
                    continue;
                }
            };

            let Some(title) = metadata.title.as_deref().and_then(normalize_title) else {
                continue;
            };
            if entry.title.as_deref() == Some(title.as_str()) {
                continue;
            }

            if ledger.set_title(&entry.thread_id, &title).await? {
                info!(
                    thread_id = %entry.thread_id,
                    proposal_index,
                    title = %title,
                    "Proposal title updated"
                );
                updates.push(TitleUpdate {
                    thread_id: entry.thread_id,
                    proposal_index,
                    previous_title: entry.title,
                    title,
                    content: metadata.content,
                });
            }
        }

        Ok(updates)
    }
}
