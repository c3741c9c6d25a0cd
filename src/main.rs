mod address;
mod alerts;
mod claim;
mod config;
mod drip;
mod entities;
mod http;
mod identity;
mod ledger;
mod nonce;
mod rpc;
mod state;
mod store;
mod sweeper;
#[cfg(test)]
mod testing;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::alerts::{AlertDestination, AlertSink};
use crate::claim::ClaimService;
use crate::config::{FaucetConfig, StoreBackend, StoreConfig};
use crate::drip::DripExecutor;
use crate::drip::transaction::OperatorSigner;
use crate::identity::RemoteSessionResolver;
use crate::ledger::{CLAIM_WINDOW, ClaimLedger};
use crate::nonce::{NONCE_TTL, NonceSequencer};
use crate::rpc::RpcClient;
use crate::state::AppState;
use crate::store::{KeyValueStore, MemoryStore, PostgresStore};
use crate::sweeper::ExpirySweeper;
use anyhow::{Context, Result};
use axum::Router;
use migration::MigratorTrait;
use sea_orm::ConnectOptions;
use sea_orm::Database;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = FaucetConfig::load().context("Failed to load configuration")?;
    let store = build_store(&config.store).await?;

    let rpc_client = RpcClient::new(&config.chain.rpc_url, config.chain.request_timeout())
        .context("Failed to initialize RPC client")?;
    info!(
        "RPC client for {} ready with {:?} timeout",
        config.chain.rpc_url,
        rpc_client.timeout()
    );
    let rpc = Arc::new(rpc_client);

    let signer = OperatorSigner::from_hex(config.drip.operator_key.expose())
        .context("Failed to load operator key")?;
    info!("Operator account {}", signer.address());

    let (alert_sink, alert_queue) = AlertSink::channel(config.alerts.queue_capacity);
    let destination = AlertDestination::from_config(&config.alerts)?;
    let alert_handle = tokio::spawn(alerts::run_worker(destination, alert_queue));

    let nonces = NonceSequencer::new(store.clone(), rpc.clone(), signer.address(), NONCE_TTL);
    let executor = DripExecutor::new(
        rpc,
        nonces,
        signer,
        alert_sink,
        config.chain.network_id,
        config.drip.amount()?,
        config.chain.ens_registry()?,
    );
    let ledger = ClaimLedger::new(store.clone(), CLAIM_WINDOW);
    let allowlist: HashSet<String> = config
        .claims
        .allowlist
        .iter()
        .map(|id| id.trim().to_string())
        .collect();
    let claims = Arc::new(ClaimService::new(ledger, executor, allowlist));

    let identities = Arc::new(
        RemoteSessionResolver::new(&config.auth.session_url, config.auth.request_timeout())
            .context("Failed to initialize session resolver")?,
    );
    let app_state = AppState::new(claims, identities, store.clone());

    let sweeper = ExpirySweeper::new(store, config.store.sweep_interval());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown_rx));

    let listener = TcpListener::bind(config.server.address())
        .await
        .context("Failed to bind HTTP listener")?;
    let local_addr = listener
        .local_addr()
        .context("Failed to obtain listener address")?;
    info!(
        "Faucet listening on {local_addr} for network {}",
        config.chain.network_id
    );

    let router: Router = http::router(app_state);
    let server = axum::serve(listener, router.into_make_service());
    server
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
        .await
        .context("HTTP server exited with error")?;

    shutdown_tx.send(true).ok();
    if let Err(join_err) = sweeper_handle.await {
        error!("Sweeper task join error: {join_err}");
    }
    // The router held the last alert sender, so the worker drains and exits.
    if let Err(join_err) = alert_handle.await {
        error!("Alert worker join error: {join_err}");
    }

    Ok(())
}

fn init_tracing() {
    let default_filter = "info";
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    assert!(!filter.is_empty(), "Tracing filter must not be empty");
    assert!(filter.len() < 256, "Tracing filter length exceeds bounds");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .compact()
        .init();
}

async fn build_store(config: &StoreConfig) -> Result<Arc<dyn KeyValueStore>> {
    match config.backend {
        StoreBackend::Postgres => {
            let database = connect_database(config).await?;
            run_migrations(&database).await?;
            Ok(Arc::new(PostgresStore::new(database)))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; claims are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn connect_database(config: &StoreConfig) -> Result<sea_orm::DatabaseConnection> {
    let url = config
        .url
        .clone()
        .context("Database URL missing for postgres store")?;
    let mut options = ConnectOptions::new(url);
    options
        .max_connections(config.max_connections)
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug)
        .acquire_timeout(Duration::from_secs(10));

    if let Some(min) = config.min_connections {
        options.min_connections(min);
    }

    Database::connect(options)
        .await
        .context("Failed to connect to PostgreSQL")
}

async fn run_migrations(database: &sea_orm::DatabaseConnection) -> Result<()> {
    migration::Migrator::up(database, None)
        .await
        .context("Database migrations failed")
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    shutdown_tx.send(true).ok();
    info!("Shutdown signal dispatched");
}
