pub mod cooldown_handler;
pub mod health;
pub mod job_handler;
pub mod vote_handler;

use actix_web::web;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::service::{Cooldowns, EventOutbox, GovernanceJobs, VoteLedger};

/// Shared state handed to every handler through `web::Data`
pub struct AppState {
    pub ledger: Arc<VoteLedger>,
    pub cooldowns: Arc<Cooldowns>,
    pub jobs: Arc<GovernanceJobs>,
    pub outbox: Arc<EventOutbox>,
    pub shutdown: CancellationToken,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(health::health_check))
            .route("/threads/{thread_id}", web::put().to(vote_handler::register_proposal))
            .route("/threads/{thread_id}/votes", web::post().to(vote_handler::cast_vote))
            .route("/threads/{thread_id}/tally", web::get().to(vote_handler::get_tally))
            .route("/voters", web::put().to(vote_handler::set_voters))
            .route(
                "/cooldowns/{action}/{actor_id}",
                web::post().to(cooldown_handler::check_cooldown),
            )
            .route("/jobs/{job}/run", web::post().to(job_handler::run_job))
            .route("/events/drain", web::post().to(job_handler::drain_events)),
    );
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::VoteOptions;
    use crate::service::reconciliation::tests::{FakeChain, FakeMetadata};
    use crate::service::{
        ArchivalSweeper, DocumentLedgerBackend, DocumentSnapshotStore, ReconciliationDriver,
    };
    use serde_json::json;

    /// In-memory application state over fake chain and metadata sources
    pub(crate) fn test_state(chain: serde_json::Value) -> web::Data<AppState> {
        let ledger = Arc::new(VoteLedger::new(
            Arc::new(DocumentLedgerBackend::in_memory()),
            VoteOptions::default(),
        ));
        let outbox = Arc::new(EventOutbox::new(32));
        let driver = Arc::new(ReconciliationDriver::new(
            Arc::new(DocumentSnapshotStore::in_memory()),
            "referenda",
        ));
        let jobs = Arc::new(GovernanceJobs::new(
            ledger.clone(),
            driver,
            ArchivalSweeper::new(ledger.clone(), 14),
            Arc::new(FakeChain::new(chain)),
            Arc::new(FakeMetadata::with(&[(7, "Fund the thing")])),
            None,
            outbox.clone(),
            10,
        ));

        web::Data::new(AppState {
            ledger,
            cooldowns: Arc::new(Cooldowns::new(5, 15)),
            jobs,
            outbox,
            shutdown: CancellationToken::new(),
        })
    }

    pub(crate) fn empty_state() -> web::Data<AppState> {
        test_state(json!({}))
    }
}
