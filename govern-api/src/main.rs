use anyhow::{Context, Result};
use govern_api::{build_state, create_app, start_reconciler_task, Config};
use govern_orchestrator::clients::http::{HttpKubeClient, HttpSchedulerClient, HttpVaultClient};
use govern_orchestrator::clients::memory::MemoryIam;
use govern_orchestrator::db::{backup_database, create_pool, run_migrations};
use govern_orchestrator::{Clients, PrometheusMetrics};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = govern_logging::init_subscriber();

    if let Err(e) = run().await {
        error!("govern-api failed: {:#}", e);
        return Err(e);
    }

    Ok(())
}

async fn run() -> Result<()> {
    info!("Starting govern-api service...");

    // Load configuration
    let config = Config::from_env();
    config
        .orchestrator
        .validate()
        .context("Invalid orchestrator configuration")?;
    info!(
        "Configuration loaded: bind_addr={}, db_path={}, reconcile_interval={}s",
        config.bind_addr,
        config.db_path.display(),
        config.reconcile_interval_secs
    );

    // Database setup
    let db_path = &config.db_path;

    // Backup before migrations
    if db_path.exists() {
        let backup_path = backup_database(db_path)?;
        info!("Database backed up to: {}", backup_path.display());
    }

    // Create pool and run migrations
    let pool = create_pool(db_path).await?;
    info!("Running database migrations...");
    run_migrations(&pool).await?;
    info!("Migrations complete");

    let clients = Clients {
        iam: Arc::new(MemoryIam::new()),
        kube: Arc::new(HttpKubeClient::new(&config.orchestrator)?),
        scheduler: Arc::new(HttpSchedulerClient::new(&config.orchestrator)?),
        vault: Arc::new(HttpVaultClient::new(&config.orchestrator)?),
    };
    let metrics = Arc::new(PrometheusMetrics::new().context("Failed to register metrics")?);

    let state = build_state(&config, pool, &clients, metrics)?;
    let reconciler = Arc::new(state.reconciler(&config));

    // Start reconciler task
    let cancel = CancellationToken::new();
    let reconciler_handle = tokio::spawn(start_reconciler_task(reconciler, cancel.clone()));
    info!(
        "Reconciler task started (interval: {}s, concurrency: {})",
        config.reconcile_interval_secs, config.reconcile_concurrency
    );

    // Create app
    let app = create_app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await;

    // The server may also stop on an I/O error; the reconciler goes down with it
    cancel.cancel();
    if let Err(e) = reconciler_handle.await {
        error!("Reconciler task panicked: {}", e);
    }

    served?;
    info!("govern-api stopped");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
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

    info!("Shutdown signal received");
    cancel.cancel();
}
