//! Seams to the outside world: the chain gateway and the metadata sites

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

use crate::models::{PlannedVote, ProposalMetadata, Snapshot, SubmittedVotes};

/// Transient network or payload failures from an external source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    /// Worth retrying: connection problems and server side failures
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Network(_) => true,
            SourceError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Exponential backoff settings
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay_ms;
        for _ in 1..attempt {
            delay = (delay as f64 * self.backoff_multiplier) as u64;
            delay = delay.min(self.max_delay_ms);
        }
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// On-chain governance state
#[async_trait]
pub trait GovernanceSource: Send + Sync {
    async fn fetch_governance_snapshot(&self) -> Result<Snapshot, SourceError>;

    async fn fetch_ongoing_proposal_ids(&self) -> Result<BTreeSet<u64>, SourceError> {
        Ok(self.fetch_governance_snapshot().await?.ongoing_ids())
    }
}

/// Off-chain proposal descriptions
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch_metadata(&self, proposal_id: u64) -> Result<ProposalMetadata, SourceError>;
}

/// Proxy account operations, signed behind the gateway
#[async_trait]
pub trait ProxyVoteGateway: Send + Sync {
    /// Unix timestamp (seconds) of a block
    async fn block_timestamp(&self, block: u64) -> Result<i64, SourceError>;

    /// Free balance of the proxy account, in whole tokens
    async fn proxy_balance(&self) -> Result<Decimal, SourceError>;

    async fn submit_votes(&self, votes: &[PlannedVote]) -> Result<SubmittedVotes, SourceError>;
}
