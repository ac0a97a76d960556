//! Money transfer service
//!
//! config -> logging -> backend -> engine -> outbox relay -> HTTP.
//! Shutdown: stop HTTP (draining in-flight requests), stop the relay, close
//! the pool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use money_transfer::config::{AppConfig, StorageBackend};
use money_transfer::db::Database;
use money_transfer::gateway::{self, AppState};
use money_transfer::logging;
use money_transfer::outbox::{OutboxRelay, TransferCompletedLogger};
use money_transfer::transfer::adapters::{
    MemoryStore, PgAccountStore, PgLedgerStore, PgUnitOfWorkFactory,
};
use money_transfer::transfer::{
    CounterIdGenerator, LedgerStore, MemoryTransferEngine, PgSequenceIdGenerator, TransferEngine,
    TransferService,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config =
        AppConfig::load(&env).with_context(|| format!("loading configuration for env '{env}'"))?;
    let _log_guard = logging::init_logging(&config.log);

    info!(env = %env, backend = ?config.storage.backend, "Starting money transfer service");

    match config.storage.backend {
        StorageBackend::Memory => run_memory(&config).await,
        StorageBackend::Postgres => run_postgres(&config).await,
    }
}

async fn run_memory(config: &AppConfig) -> anyhow::Result<()> {
    let store = Arc::new(
        MemoryStore::with_accounts(config.storage.seed_accounts.clone())
            .with_lock_timeout(config.transfer.lock_timeout()),
    );
    info!(
        accounts = config.storage.seed_accounts.len(),
        "In-memory store provisioned"
    );

    let engine = Arc::new(MemoryTransferEngine::in_memory(
        store.clone(),
        Arc::new(CounterIdGenerator::starting_at(0)),
        config.transfer.engine_config(),
    ));

    serve(config, engine, store, None).await
}

async fn run_postgres(config: &AppConfig) -> anyhow::Result<()> {
    let url = config
        .storage
        .postgres_url
        .as_deref()
        .context("storage.postgres_url is not set")?;

    let db = Database::connect_with_retry(url, &config.storage.connect_options())
        .await
        .context("connecting to PostgreSQL")?;
    if config.storage.run_migrations {
        db.migrate().await.context("running migrations")?;
    }
    let pool = db.pool().clone();

    let factory = Arc::new(
        PgUnitOfWorkFactory::new(pool.clone()).with_lock_timeout(config.transfer.lock_timeout()),
    );
    let ledger = Arc::new(PgLedgerStore::new(pool.clone()));
    let engine = Arc::new(TransferEngine::new(
        factory,
        Arc::new(PgAccountStore::new(pool.clone())),
        ledger.clone(),
        Arc::new(PgSequenceIdGenerator::new(pool.clone())),
        config.transfer.engine_config(),
    ));

    let result = serve(config, engine, ledger, Some(pool)).await;
    db.close().await;
    result
}

/// Run relay and HTTP until a shutdown signal, then stop both in order
async fn serve<L: LedgerStore>(
    config: &AppConfig,
    service: Arc<dyn TransferService>,
    ledger: Arc<L>,
    pool: Option<PgPool>,
) -> anyhow::Result<()> {
    let relay = Arc::new(
        OutboxRelay::new(ledger, config.relay.relay_config())
            .with_handler(Arc::new(TransferCompletedLogger)),
    );
    if config.relay.enabled {
        relay.start();
    } else {
        warn!("Outbox relay disabled by configuration");
    }

    let mut state = AppState::new(service);
    if let Some(pool) = pool {
        state = state.with_pool(pool);
    }

    let addr = config.gateway.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(gateway::run_server(listener, Arc::new(state), async move {
        let _ = stop_rx.await;
    }));

    tokio::select! {
        joined = &mut server => {
            error!(result = ?joined, "HTTP server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, draining HTTP requests");
            let _ = stop_tx.send(());
            let grace = Duration::from_millis(config.gateway.shutdown_timeout_ms);
            match tokio::time::timeout(grace, &mut server).await {
                Ok(Ok(Ok(()))) => info!("HTTP server stopped"),
                Ok(Ok(Err(e))) => error!(error = %e, "HTTP server error during shutdown"),
                Ok(Err(e)) => error!(error = %e, "HTTP server task failed"),
                Err(_) => {
                    warn!(grace_ms = grace.as_millis() as u64, "HTTP drain timed out, aborting");
                    server.abort();
                }
            }
        }
    }

    relay.stop().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
