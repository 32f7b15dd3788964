use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::vote_ledger::{LedgerError, VoteLedger};

/// Periodic age-based archival of ledger threads
pub struct ArchivalSweeper {
    ledger: Arc<VoteLedger>,
    retention_secs: i64,
}

impl ArchivalSweeper {
    pub fn new(ledger: Arc<VoteLedger>, retention_days: u32) -> Self {
        Self {
            ledger,
            retention_secs: i64::from(retention_days) * 24 * 3600,
        }
    }

    pub fn retention_secs(&self) -> i64 {
        self.retention_secs
    }

    /// Archive expired threads and return their ids (threads to lock)
    pub async fn sweep(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<BTreeSet<String>, LedgerError> {
        let archived = self
            .ledger
            .archive_older_than(self.retention_secs, now, cancel)
            .await?;

        if !archived.is_empty() {
            info!(count = archived.len(), "Archival sweep moved threads to archive");
        }
        Ok(archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VoteOptions;
    use crate::service::vote_ledger::DocumentLedgerBackend;
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn test_sweep_uses_retention_window() {
        let ledger = Arc::new(VoteLedger::new(
            Arc::new(DocumentLedgerBackend::in_memory()),
            VoteOptions::default(),
        ));
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        ledger.cast_vote("T1", "u1", "alice", "aye", t0).await.unwrap();

        let sweeper = ArchivalSweeper::new(ledger.clone(), 14);
        let cancel = CancellationToken::new();

        assert!(sweeper.sweep(t0 + Duration::days(13), &cancel).await.unwrap().is_empty());
        let archived = sweeper.sweep(t0 + Duration::days(15), &cancel).await.unwrap();
        assert!(archived.contains("T1"));
        assert!(sweeper.sweep(t0 + Duration::days(16), &cancel).await.unwrap().is_empty());
    }
}
