use actix_web::{web, App, HttpServer};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod api_error;
mod config;
mod db;
mod http;
mod middleware;
mod models;
mod service;
mod telemetry;

use crate::config::{Config, StorageBackend};
use crate::db::{create_pool, run_migrations};
use crate::http::{configure_routes, AppState};
use crate::middleware::cors_middleware;
use crate::models::VoteOptions;
use crate::service::proxy_vote_service::load_vote_periods;
use crate::service::{
    spawn_periodic, ArchivalSweeper, ChainGatewayClient, Cooldowns, DocumentLedgerBackend,
    DocumentSnapshotStore, EventOutbox, GovernanceJobs, JobKind, LedgerBackend, MetadataClient,
    PgLedgerBackend, PgSnapshotStore, ProxyVotePlanner, ProxyVoteSettings, ProxyVoting,
    ReconciliationDriver, SnapshotStore, VoteLedger,
};
use crate::telemetry::init_telemetry;

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);
const METADATA_TIMEOUT: Duration = Duration::from_secs(60);

async fn build_stores(
    config: &Config,
) -> anyhow::Result<(Arc<dyn LedgerBackend>, Arc<dyn SnapshotStore>)> {
    match config.storage.backend {
        StorageBackend::File => {
            let ledger = DocumentLedgerBackend::open(config.storage.ledger_path())?;
            let snapshots = DocumentSnapshotStore::open(config.storage.snapshot_dir());
            Ok((Arc::new(ledger), Arc::new(snapshots)))
        }
        StorageBackend::Postgres => {
            let url = config
                .storage
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;
            let pool = create_pool(url).await?;
            run_migrations(&pool).await?;
            tracing::info!("Database migrations applied");
            Ok((
                Arc::new(PgLedgerBackend::new(pool.clone())),
                Arc::new(PgSnapshotStore::new(pool)),
            ))
        }
    }
}

fn build_proxy_voting(
    config: &Config,
    gateway: Arc<ChainGatewayClient>,
) -> anyhow::Result<Option<ProxyVoting>> {
    let proxy = &config.proxy_vote;
    if !proxy.enabled {
        return Ok(None);
    }

    let periods = match &proxy.periods_file {
        Some(path) => load_vote_periods(path)?,
        None => Default::default(),
    };
    let settings = ProxyVoteSettings {
        threshold: proxy.threshold,
        min_participation: proxy.min_participation,
        balance_alert: proxy.balance_alert,
        conviction: proxy.conviction.clone(),
    };
    let planner = ProxyVotePlanner::new(settings, periods, Some(config.storage.vote_book_path()))?;

    Ok(Some(ProxyVoting {
        planner: Arc::new(planner),
        gateway,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize telemetry
    init_telemetry(&config.server.rust_log);

    let (ledger_backend, snapshot_store) = build_stores(&config).await?;
    let options = VoteOptions::parse(&config.ledger.vote_options);
    let ledger = Arc::new(VoteLedger::new(ledger_backend, options));

    let gateway = Arc::new(ChainGatewayClient::new(&config.chain.api_url, GATEWAY_TIMEOUT)?);
    let metadata = Arc::new(MetadataClient::new(&config.chain.network_name, METADATA_TIMEOUT)?);
    let driver = Arc::new(ReconciliationDriver::new(
        snapshot_store,
        config.storage.snapshot_name.clone(),
    ));

    if config.storage.seed_on_empty {
        match driver.seed(gateway.as_ref()).await {
            Ok(seeded) => tracing::info!(seeded, "Snapshot seed check done"),
            Err(e) => tracing::warn!(error = %e, "Could not seed snapshot store"),
        }
    }

    let outbox = Arc::new(EventOutbox::new(config.schedule.outbox_capacity));
    let jobs = Arc::new(GovernanceJobs::new(
        ledger.clone(),
        driver,
        ArchivalSweeper::new(ledger.clone(), config.ledger.retention_days),
        gateway.clone(),
        metadata,
        build_proxy_voting(&config, gateway)?,
        outbox.clone(),
        config.storage.backup_max_files,
    ));
    let cooldowns = Arc::new(Cooldowns::new(config.cooldown.vote_secs, config.cooldown.role_secs));

    // Scheduled jobs
    let shutdown = CancellationToken::new();
    let schedule = &config.schedule;
    let mut timers = vec![
        (JobKind::CheckGovernance, schedule.check_interval_secs),
        (JobKind::ArchiveSweep, schedule.sweep_interval_secs),
        (JobKind::RecheckMetadata, schedule.recheck_interval_secs),
    ];
    if config.proxy_vote.enabled {
        timers.push((JobKind::ProxyVote, schedule.proxy_vote_interval_secs));
    }
    let mut handles: Vec<_> = timers
        .into_iter()
        .map(|(kind, secs)| {
            spawn_periodic(jobs.clone(), kind, Duration::from_secs(secs.max(1)), shutdown.clone())
        })
        .collect();

    // Expired cooldown entries
    handles.push({
        let cooldowns = cooldowns.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        cooldowns.prune(chrono::Utc::now());
                    }
                }
            }
        })
    });

    let state = web::Data::new(AppState {
        ledger,
        cooldowns,
        jobs,
        outbox,
        shutdown: shutdown.clone(),
    });

    tracing::info!(
        "Starting govwatch on {}:{} ({:?} storage, network {})",
        config.server.host,
        config.server.port,
        config.storage.backend,
        config.chain.network_name
    );

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(cors_middleware())
            .wrap(actix_web::middleware::Logger::default())
            .configure(configure_routes)
    })
    .bind((config.server.host.clone(), config.server.port))?
    .run();

    // Graceful shutdown
    let server_handle = server.handle();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received, stopping server...");
        signal_shutdown.cancel();
        server_handle.stop(true).await;
    });

    let served: io::Result<()> = server.await;
    shutdown.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    served?;
    Ok(())
}
