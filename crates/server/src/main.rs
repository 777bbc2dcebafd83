//! Stepflow Server
//!
//! Runs workflows against live HTTP APIs and exposes their executions over
//! a JSON API.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stepflow_engine::result_ext::ResultExt;
use stepflow_engine::{Engine, EngineConfig, ExecutionStore, InMemoryExecutionStore, PgExecutionStore};
use stepflow_server::{
    config::{AppConfig, DatabaseConfig, StoreKind},
    connections::load_connections,
    db::{self, DbPool},
    handlers::build_router,
    state::AppState,
    workflows::FileWorkflowSource,
};

/// Initialize tracing/logging.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,stepflow_engine=debug,stepflow_server=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the execution store selected by the configuration.
async fn open_store(
    app_config: &AppConfig,
    engine_config: &EngineConfig,
) -> anyhow::Result<(Arc<dyn ExecutionStore>, Option<DbPool>)> {
    match app_config.store {
        StoreKind::Memory => {
            tracing::warn!("Using in-memory execution store; records are lost on restart");
            Ok((
                Arc::new(InMemoryExecutionStore::with_shards(engine_config.store_shards)),
                None,
            ))
        }
        StoreKind::Postgres => {
            let db_config = DatabaseConfig::from_env().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to load database config, using defaults");
                DatabaseConfig::default()
            });
            let pool = db::connect(&db_config).await?;
            let store = PgExecutionStore::new(pool.clone());
            store.init_schema().await.log("Failed to initialize execution schema")?;
            Ok((Arc::new(store), Some(pool)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Stepflow server");

    let app_config = AppConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load app config, using defaults");
        AppConfig::default()
    });
    let engine_config = EngineConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load engine config, using defaults");
        EngineConfig::default()
    });

    tracing::info!(
        host = %app_config.host,
        port = app_config.port,
        store = app_config.store.as_str(),
        workflow_dir = %app_config.workflow_dir.display(),
        max_attempts = engine_config.max_attempts,
        "Configuration loaded"
    );

    let (store, db_pool) = open_store(&app_config, &engine_config).await?;
    let connections = load_connections(app_config.connections_file.as_deref()).await?;
    let workflows = FileWorkflowSource::new(&app_config.workflow_dir);

    let engine = Engine::new(engine_config, store, Arc::new(workflows), Arc::new(connections));

    let interrupted = engine.fail_interrupted().await?;
    if interrupted > 0 {
        tracing::warn!(count = interrupted, "Marked executions interrupted by a restart as failed");
    }

    let addr: SocketAddr = app_config.bind_address().parse()?;
    let state = AppState::new(engine.clone(), app_config, db_pool);
    let app = build_router(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let canceled = engine.shutdown().await;
    tracing::info!(canceled, "Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
