// Service layer module for govwatch
pub mod archival_sweeper;
pub mod chain_client;
pub mod change_classifier;
pub mod cooldown;
pub mod metadata_client;
pub mod pg_store;
pub mod proxy_vote_service;
pub mod reconciliation;
pub mod scheduler;
pub mod snapshot_store;
pub mod sources;
pub mod storage;
pub mod vote_ledger;

pub use archival_sweeper::ArchivalSweeper;
pub use chain_client::ChainGatewayClient;
pub use cooldown::{CooldownAction, CooldownDecision, Cooldowns};
pub use metadata_client::MetadataClient;
pub use pg_store::{PgLedgerBackend, PgSnapshotStore};
pub use proxy_vote_service::{ProxyVotePlanner, ProxyVoteSettings};
pub use reconciliation::{ReconcileError, ReconciliationDriver};
pub use scheduler::{spawn_periodic, EventOutbox, GovernanceEvent, GovernanceJobs, JobError, JobKind, ProxyVoting};
pub use snapshot_store::{DocumentSnapshotStore, SnapshotStore};
pub use sources::{GovernanceSource, MetadataSource, ProxyVoteGateway, SourceError};
pub use storage::StorageError;
pub use vote_ledger::{DocumentLedgerBackend, LedgerBackend, LedgerError, VoteLedger};
