//! Flight Oracle Server
//!
//! Simulates a decentralized oracle network for an on-chain flight-insurance
//! application: provisions a pool of oracle identities, listens for the
//! contract's oracle-request events, submits one status response per eligible
//! oracle and tracks each request until it resolves or expires. Also serves
//! the small read-only API the dapp UI consumes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tokio::sync::{watch, RwLock};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use flight_oracle_server::app_state::AppState;
use flight_oracle_server::config::Config;
use flight_oracle_server::dispatcher::EventDispatcher;
use flight_oracle_server::ledger::{rpc::JsonRpcLedger, LedgerClient};
use flight_oracle_server::registry::OracleRegistry;
use flight_oracle_server::routes;
use flight_oracle_server::submitter::{RandomStatusPolicy, ResponseSubmitter};
use flight_oracle_server::tracker::RequestTracker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    let ledger: Arc<dyn LedgerClient> =
        Arc::new(JsonRpcLedger::new(config.ledger_rpc_url.clone(), config.app_contract_id.clone()));

    let registry = Arc::new(OracleRegistry::new(ledger.clone(), config.registration_timeout));
    provision_pool(&registry, ledger.as_ref(), &config).await;

    let tracker = Arc::new(RequestTracker::new(config.request_timeout, config.retention_window));
    let submitter = Arc::new(ResponseSubmitter::new(
        ledger.clone(),
        registry.clone(),
        Arc::new(RandomStatusPolicy),
    ));

    let latest_index = Arc::new(RwLock::new(None));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = Arc::new(EventDispatcher::new(
        ledger,
        tracker.clone(),
        submitter,
        latest_index.clone(),
        config.report_grace,
        config.sweep_interval,
        config.from_block,
        shutdown_rx,
    ));
    let mut dispatcher_task = tokio::spawn(dispatcher.run());

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(routes::api_routes())
        .layer(build_cors_layer())
        .with_state(AppState::new(tracker, registry, latest_index));

    // Get port from environment or default to 3001
    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "3001".to_string())
        .parse()?;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    info!("Server starting on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        result = &mut dispatcher_task => {
            match result {
                // Failure to establish the initial subscriptions is the one
                // fatal condition; everything else the dispatcher absorbs.
                Ok(Err(err)) => {
                    error!(error = %err, "event dispatch could not start");
                    return Err(err.into());
                }
                Ok(Ok(())) => info!("event dispatcher exited"),
                Err(join_error) => error!(error = %join_error, "event dispatcher task failed"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received; stopping event intake");
            let _ = shutdown_tx.send(true);
            if let Ok(Err(err)) = dispatcher_task.await {
                warn!(error = %err, "dispatcher reported an error during shutdown");
            }
        }
    }

    Ok(())
}

/// Carve the oracle pool out of the ledger's account list (the reserved
/// prefix belongs to owner, airlines and passengers) and register each
/// identity. Per-oracle failures are collected by the registry; an
/// unreachable ledger leaves the pool empty, which degrades service but does
/// not abort startup.
async fn provision_pool(registry: &OracleRegistry, ledger: &dyn LedgerClient, config: &Config) {
    let accounts = match ledger.accounts().await {
        Ok(accounts) => accounts,
        Err(err) => {
            error!(error = %err, "could not fetch ledger accounts; oracle pool is empty");
            return;
        }
    };

    let pool: Vec<String> = accounts
        .into_iter()
        .skip(config.oracle_account_offset)
        .take(config.pool_size)
        .collect();
    if pool.len() < config.pool_size {
        warn!(
            available = pool.len(),
            requested = config.pool_size,
            "ledger exposes fewer accounts than the configured pool size"
        );
    }

    registry.register_pool(&pool).await;
}

async fn health_check() -> &'static str {
    "OK"
}

fn build_cors_layer() -> CorsLayer {
    let allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:8000".to_string())
        .split(',')
        .filter_map(|origin| origin.trim().parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(false)
}
