//! Postgres backends for the snapshot store and the vote ledger

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::snapshot_store::SnapshotStore;
use super::storage::StorageError;
use super::vote_ledger::LedgerBackend;
use crate::models::{Snapshot, Tally, VoteEntry, VoteOption, VoterRecord};

// ============================================================================
// Snapshots
// ============================================================================

/// Snapshots stored as one JSONB document per name
#[derive(Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn load(&self, name: &str) -> Result<Snapshot, StorageError> {
        let row: Option<(Json<Snapshot>,)> =
            sqlx::query_as("SELECT document FROM governance_snapshots WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(Json(snapshot),)| snapshot).unwrap_or_default())
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let row: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM governance_snapshots WHERE name = $1)")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    async fn save(&self, name: &str, snapshot: &Snapshot) -> Result<(), StorageError> {
        let digest = snapshot.digest();

        sqlx::query(
            r#"
            INSERT INTO governance_snapshots (name, document, digest, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET document = EXCLUDED.document,
                digest = EXCLUDED.digest,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(name)
        .bind(Json(snapshot))
        .bind(&digest)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        info!(name = name, proposals = snapshot.len(), digest = %digest, "Snapshot saved");
        Ok(())
    }
}

// ============================================================================
// Vote ledger
// ============================================================================

#[derive(sqlx::FromRow)]
struct ThreadRow {
    thread_id: String,
    proposal_index: Option<i64>,
    title: Option<String>,
    origin: Json<Vec<String>>,
    tally: Json<Tally>,
    created_epoch: i64,
    archived: bool,
}

#[derive(sqlx::FromRow)]
struct VoteRow {
    thread_id: String,
    user_id: String,
    username: String,
    vote_type: String,
}

/// Ledger stored in `vote_threads` and `thread_votes`
#[derive(Clone)]
pub struct PgLedgerBackend {
    pool: PgPool,
}

impl PgLedgerBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(&self, thread_id: &str, archived: bool) -> Result<Option<VoteEntry>, StorageError> {
        let row: Option<ThreadRow> = sqlx::query_as(
            r#"
            SELECT thread_id, proposal_index, title, origin, tally, created_epoch, archived
            FROM vote_threads
            WHERE thread_id = $1 AND archived = $2
            "#,
        )
        .bind(thread_id)
        .bind(archived)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let votes: Vec<VoteRow> = sqlx::query_as(
            "SELECT thread_id, user_id, username, vote_type FROM thread_votes WHERE thread_id = $1",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(assemble(row, votes)?))
    }
}

fn assemble(row: ThreadRow, votes: Vec<VoteRow>) -> Result<VoteEntry, StorageError> {
    let proposal_index = row
        .proposal_index
        .map(|index| {
            u64::try_from(index).map_err(|_| {
                StorageError::Corrupt(format!(
                    "thread {} has negative proposal index {}",
                    row.thread_id, index
                ))
            })
        })
        .transpose()?;

    let users = votes
        .into_iter()
        .map(|vote| {
            (
                vote.user_id,
                VoterRecord {
                    username: vote.username,
                    vote_type: VoteOption::new(&vote.vote_type),
                },
            )
        })
        .collect();

    Ok(VoteEntry {
        thread_id: row.thread_id,
        proposal_index,
        title: row.title,
        origin: row.origin.0,
        tally: row.tally.0,
        users,
        created_epoch: row.created_epoch,
        archived: row.archived,
    })
}

fn index_to_db(entry: &VoteEntry) -> Result<Option<i64>, StorageError> {
    entry
        .proposal_index
        .map(|index| {
            i64::try_from(index).map_err(|_| {
                StorageError::Corrupt(format!("proposal index {} out of range", index))
            })
        })
        .transpose()
}

/// Upsert the thread row; fails when the thread is already archived
async fn upsert_thread(
    tx: &mut Transaction<'_, Postgres>,
    entry: &VoteEntry,
) -> Result<(), StorageError> {
    let upserted = sqlx::query(
        r#"
        INSERT INTO vote_threads
            (thread_id, proposal_index, title, origin, tally, created_epoch, archived)
        VALUES ($1, $2, $3, $4, $5, $6, FALSE)
        ON CONFLICT (thread_id) DO UPDATE
        SET proposal_index = EXCLUDED.proposal_index,
            title = EXCLUDED.title,
            origin = EXCLUDED.origin,
            tally = EXCLUDED.tally
        WHERE vote_threads.archived = FALSE
        "#,
    )
    .bind(&entry.thread_id)
    .bind(index_to_db(entry)?)
    .bind(&entry.title)
    .bind(Json(&entry.origin))
    .bind(Json(&entry.tally))
    .bind(entry.created_epoch)
    .execute(&mut **tx)
    .await?;

    if upserted.rows_affected() == 0 {
        return Err(StorageError::Corrupt(format!(
            "thread {} is archived and cannot be rewritten",
            entry.thread_id
        )));
    }
    Ok(())
}

async fn upsert_vote(
    tx: &mut Transaction<'_, Postgres>,
    thread_id: &str,
    user_id: &str,
    record: &VoterRecord,
) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO thread_votes (thread_id, user_id, username, vote_type)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (thread_id, user_id) DO UPDATE
        SET username = EXCLUDED.username,
            vote_type = EXCLUDED.vote_type
        "#,
    )
    .bind(thread_id)
    .bind(user_id)
    .bind(&record.username)
    .bind(record.vote_type.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl LedgerBackend for PgLedgerBackend {
    async fn load_live(&self, thread_id: &str) -> Result<Option<VoteEntry>, StorageError> {
        self.load(thread_id, false).await
    }

    async fn load_archived(&self, thread_id: &str) -> Result<Option<VoteEntry>, StorageError> {
        self.load(thread_id, true).await
    }

    async fn store_live(&self, entry: &VoteEntry) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        upsert_thread(&mut tx, entry).await?;

        for (user_id, record) in &entry.users {
            upsert_vote(&mut tx, &entry.thread_id, user_id, record).await?;
        }
        let voters: Vec<String> = entry.users.keys().cloned().collect();
        sqlx::query("DELETE FROM thread_votes WHERE thread_id = $1 AND user_id <> ALL($2)")
            .bind(&entry.thread_id)
            .bind(voters)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(thread_id = %entry.thread_id, voters = entry.users.len(), "Ledger entry stored");
        Ok(())
    }

    async fn store_vote(&self, entry: &VoteEntry, user_id: &str) -> Result<(), StorageError> {
        let record = entry.users.get(user_id).ok_or_else(|| {
            StorageError::Corrupt(format!("thread {} has no vote from {}", entry.thread_id, user_id))
        })?;

        let mut tx = self.pool.begin().await?;
        upsert_thread(&mut tx, entry).await?;
        upsert_vote(&mut tx, &entry.thread_id, user_id, record).await?;
        tx.commit().await?;

        debug!(thread_id = %entry.thread_id, user_id = %user_id, "Vote stored");
        Ok(())
    }

    async fn list_live(&self) -> Result<Vec<VoteEntry>, StorageError> {
        let rows: Vec<ThreadRow> = sqlx::query_as(
            r#"
            SELECT thread_id, proposal_index, title, origin, tally, created_epoch, archived
            FROM vote_threads
            WHERE archived = FALSE
            ORDER BY thread_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let votes: Vec<VoteRow> = sqlx::query_as(
            r#"
            SELECT v.thread_id, v.user_id, v.username, v.vote_type
            FROM thread_votes v
            JOIN vote_threads t ON t.thread_id = v.thread_id
            WHERE t.archived = FALSE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_thread: BTreeMap<String, Vec<VoteRow>> = BTreeMap::new();
        for vote in votes {
            by_thread.entry(vote.thread_id.clone()).or_default().push(vote);
        }

        rows.into_iter()
            .map(|row| {
                let votes = by_thread.remove(&row.thread_id).unwrap_or_default();
                assemble(row, votes)
            })
            .collect()
    }

    async fn archive(&self, thread_id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE vote_threads SET archived = TRUE WHERE thread_id = $1 AND archived = FALSE",
        )
        .bind(thread_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        crate::db::health_check(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VoteOptions;
    use crate::service::vote_ledger::VoteLedger;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    async fn test_pool() -> PgPool {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        pool
    }

    #[test]
    fn test_assemble_rejects_negative_index() {
        let row = ThreadRow {
            thread_id: "T".to_string(),
            proposal_index: Some(-1),
            title: None,
            origin: Json(vec![]),
            tally: Json(VoteOptions::default().zeroed_tally()),
            created_epoch: 0,
            archived: false,
        };
        assert!(matches!(assemble(row, vec![]), Err(StorageError::Corrupt(_))));
    }

    #[tokio::test]
    #[ignore = "needs TEST_DATABASE_URL"]
    async fn test_pg_snapshot_roundtrip() {
        let store = PgSnapshotStore::new(test_pool().await);
        let name = format!("test-{}", uuid::Uuid::new_v4());

        assert!(!store.exists(&name).await.unwrap());
        let snap: Snapshot = serde_json::from_value(json!({"1": {"Ongoing": {"track": 2}}})).unwrap();
        store.save(&name, &snap).await.unwrap();
        assert_eq!(store.load(&name).await.unwrap(), snap);
    }

    #[tokio::test]
    #[ignore = "needs TEST_DATABASE_URL"]
    async fn test_pg_ledger_vote_and_archive() {
        let backend = Arc::new(PgLedgerBackend::new(test_pool().await));
        let ledger = VoteLedger::new(backend, VoteOptions::default());
        let thread = format!("thread-{}", uuid::Uuid::new_v4());
        let now = Utc::now();

        ledger.cast_vote(&thread, "u1", "alice", "aye", now).await.unwrap();
        ledger.cast_vote(&thread, "u1", "alice", "nay", now).await.unwrap();
        ledger.cast_vote(&thread, "u2", "bob", "nay", now).await.unwrap();

        let entry = ledger.entry(&thread).await.unwrap().unwrap();
        assert_eq!(entry.count("nay"), 2);
        entry.check_invariants().unwrap();

        let archived = ledger
            .archive_older_than(-1, now, &CancellationToken::new())
            .await
            .unwrap();
        assert!(archived.contains(&thread));
        assert!(ledger.archived_entry(&thread).await.unwrap().is_some());
    }

    #[tokio::test]
    #[ignore = "needs TEST_DATABASE_URL"]
    async fn test_pg_store_vote_touches_one_row() {
        let backend = PgLedgerBackend::new(test_pool().await);
        let thread = format!("thread-{}", uuid::Uuid::new_v4());
        let mut entry = VoteEntry::new(&thread, &VoteOptions::default(), 0);

        entry.apply_vote("u1", "alice", VoteOption::new("aye")).unwrap();
        backend.store_vote(&entry, "u1").await.unwrap();

        // u1's in-memory record drifts; only u2's row may be written
        entry.users.get_mut("u1").unwrap().username = "renamed".to_string();
        entry.apply_vote("u2", "bob", VoteOption::new("nay")).unwrap();
        backend.store_vote(&entry, "u2").await.unwrap();

        let stored = backend.load_live(&thread).await.unwrap().unwrap();
        assert_eq!(stored.users["u1"].username, "alice");
        assert_eq!(stored.users["u2"].vote_type, VoteOption::new("nay"));
        assert_eq!(stored.count("nay"), 1);

        // A full store replaces the voter set
        entry.users.remove("u1");
        entry.tally.insert(VoteOption::new("aye"), 0);
        backend.store_live(&entry).await.unwrap();
        let stored = backend.load_live(&thread).await.unwrap().unwrap();
        assert_eq!(stored.users.keys().collect::<Vec<_>>(), vec!["u2"]);
    }
}
