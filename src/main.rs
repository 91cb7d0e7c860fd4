//! Price-evidence oracle entrypoint: wires the venue collectors, the
//! map/reduce orchestrator, the hash-chained block store, and the public
//! HTTP/WS surface together and runs them until the process is killed.

mod api;
mod chain;
mod collectors;
mod config;
mod middleware;
mod model;
mod orchestrator;
mod store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::{app_router, AppState};
use crate::chain::ChainManager;
use crate::collectors::{
    BinanceAdapter, BitfinexAdapter, CoinbaseAdapter, GenericCollector, LiquidAdapter,
    PoloniexAdapter,
};
use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::store::{BlockStore, SqliteBlockStore};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env().context("load configuration")?;
    info!(?config, "starting price-evidence oracle");

    let store: Arc<dyn BlockStore> =
        Arc::new(SqliteBlockStore::new(&config.database_path).context("open block store")?);
    let chain = Arc::new(ChainManager::new(store.clone()));

    let (publication_tx, publication_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (block_tx, _) = broadcast::channel(64);

    let tick = Duration::from_secs(config.collector_tick_secs);

    let venue_count = 5;
    tokio::spawn(GenericCollector::new(BinanceAdapter, publication_tx.clone(), tick, shutdown_rx.clone()).run());
    tokio::spawn(GenericCollector::new(BitfinexAdapter::new(), publication_tx.clone(), tick, shutdown_rx.clone()).run());
    tokio::spawn(GenericCollector::new(CoinbaseAdapter::new(), publication_tx.clone(), tick, shutdown_rx.clone()).run());
    tokio::spawn(GenericCollector::new(LiquidAdapter, publication_tx.clone(), tick, shutdown_rx.clone()).run());
    tokio::spawn(GenericCollector::new(PoloniexAdapter, publication_tx, tick, shutdown_rx).run());

    let orchestrator = Arc::new(Orchestrator::new(
        venue_count,
        publication_rx,
        chain.clone(),
        block_tx.clone(),
        tick,
        Duration::from_millis(config.round_cooldown_ms),
    ));
    tokio::spawn(orchestrator.run());

    let state = AppState {
        chain,
        store,
        block_broadcast: block_tx,
    };

    let app = app_router(state)
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(
            crate::middleware::logging::request_logging_simple,
        ));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await.context("bind listener")?;
    info!(%addr, "api server listening");

    axum::serve(listener, app).await.context("server error")?;

    // Reachable only if the server future ever returns; nothing left
    // subscribed to the shutdown signal at that point, but send it anyway
    // so any future consumer sees a clean stop request.
    let _ = shutdown_tx.send(true);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quoteoracle=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
