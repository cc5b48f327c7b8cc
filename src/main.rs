// Escrow Client
// Local service between the rendering layer and the escrow contract:
// ledger reads, refresh coordination, sign-in and transaction submission

mod abi;
mod actions;
mod api;
mod attestation;
mod auth;
mod auth_server;
mod config;
mod database;
mod error;
mod escrow;
mod history;
mod intent;
mod ledger;
mod models;
mod refresh;
mod rpc;
mod session;
mod siwe;
mod wallet;

use anyhow::Result;
use database::DbPool;
use escrow::{EscrowContract, EscrowLedger};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
pub struct AppState {
    pub db: DbPool,
    pub ledger: Arc<dyn EscrowLedger>,
    pub refresh: refresh::RefreshHandle,
    pub actions: Arc<actions::EscrowActions>,
    pub auth: Arc<auth::AuthFlow>,
}

fn init_logging(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("escrow_client=info".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("tower_http=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = config::Config::from_env()?;
    init_logging(config.json_logs)?;

    info!("Starting Escrow Client");
    info!("Configuration:");
    info!("  Database: {}", config.database_url);
    info!("  Ledger RPC: {}", config.rpc_url);
    info!("  Escrow contract: {:?}", config.escrow_address);
    info!("  Wallet bridge: {}", config.wallet_url);
    info!("  Auth boundary: {}", config.auth_url);
    info!("  Stale policy: {:?}", config.refresh.stale_policy);
    info!("  Server Port: {}", config.server_port);

    // Initialize database
    let db = database::Database::init(&config.database_url).await?;

    let contract = EscrowContract::new(config.rpc_url.clone(), config.escrow_address);
    let escrow_address = contract.address();
    let ledger: Arc<dyn EscrowLedger> = Arc::new(contract);

    // Start the refresh coordinator and the chain head watcher
    let reader = Arc::new(ledger::LedgerReader::new(ledger.clone()));
    let history = Arc::new(history::HistoryAggregator::new(
        ledger.clone(),
        config.refresh.history_window,
    ));
    let (coordinator, refresh) =
        refresh::RefreshCoordinator::new(reader, history, &config.refresh);
    tokio::spawn(coordinator.run());
    tokio::spawn(refresh::watch_chain_head(
        ledger.clone(),
        refresh.clone(),
        config.refresh.poll_period,
    ));

    let wallet: Arc<dyn wallet::WalletCapability> =
        Arc::new(wallet::RemoteWallet::new(config.wallet_url.clone()));
    let boundary = Arc::new(auth::HttpAuthBoundary::new(config.auth_url.clone())?);
    let auth = Arc::new(auth::AuthFlow::new(
        wallet.clone(),
        boundary,
        session::SessionStore::new(db.clone()),
        refresh.clone(),
        config.siwe.clone(),
        config.session_ttl,
    ));
    if auth.restore().await?.is_none() {
        info!("No stored session, starting signed out");
    }

    let state = Arc::new(AppState {
        db,
        ledger,
        refresh: refresh.clone(),
        actions: Arc::new(actions::EscrowActions::new(escrow_address, wallet, refresh)),
        auth,
    });
    let auth_routes = auth_server::router(auth_server::AuthServerState {
        verifier: Arc::new(auth_server::CloudProofVerifier::new(
            config.world_id_verify_url.clone(),
        )),
        app_id: config.app_id.clone(),
        secure_cookie: config.siwe.uri.starts_with("https://"),
    });

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = api::router(state)
        .merge(auth_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Escrow Client listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))
}
