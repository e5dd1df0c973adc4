use crate::config::Config;
use anyhow::Context;
use govern_orchestrator::{
    Clients, PrometheusMetrics, Reconciler, ReservationPool, SqliteRegistry, StateCatalog,
    TransactionRegistry,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Shared by every handler. The reconciler holds clones of the same
/// registry, catalog and transaction registry.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SqliteRegistry>,
    pub reservations: ReservationPool,
    pub catalog: Arc<StateCatalog>,
    pub transactions: Arc<TransactionRegistry>,
    pub metrics: Arc<PrometheusMetrics>,
}

impl AppState {
    pub fn pool(&self) -> &SqlitePool {
        self.registry.pool()
    }

    /// Reconciler over the same components the handlers use.
    pub fn reconciler(&self, config: &Config) -> Reconciler {
        Reconciler::new(
            self.registry.clone(),
            self.catalog.clone(),
            self.transactions.clone(),
            self.reservations.clone(),
            self.metrics.clone(),
            config.reconciler_settings(),
        )
    }
}

/// Build the standard catalog and transaction registry and check that every
/// state's requirements resolve. An unknown transaction or a dependency
/// cycle is a fatal bootstrap error.
pub fn build_state(
    config: &Config,
    pool: SqlitePool,
    clients: &Clients,
    metrics: Arc<PrometheusMetrics>,
) -> anyhow::Result<AppState> {
    let registry = Arc::new(SqliteRegistry::new(pool));
    let catalog = Arc::new(StateCatalog::standard().context("Failed to build state catalog")?);

    let transactions =
        TransactionRegistry::standard(&config.orchestrator, clients, registry.clone())
            .context("Failed to register transactions")?;
    transactions
        .validate(&catalog)
        .context("Transaction graph is invalid")?;

    let reservations = ReservationPool::new(&config.orchestrator, registry.clone(), metrics.clone());

    Ok(AppState {
        registry,
        reservations,
        catalog,
        transactions: Arc::new(transactions),
        metrics,
    })
}
