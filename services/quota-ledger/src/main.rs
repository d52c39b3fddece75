use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use storage_quota_ledger::{
    create_router, ApiState, QuotaDatabase, QuotaManager, QuotaServiceConfig, Reconciler,
    StoredObjectIndex,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = QuotaServiceConfig::from_env()?;
    init_tracing(&config.log_level)?;

    info!(
        addr = %config.listen_addr(),
        data_dir = %config.data_dir.display(),
        strategy = %config.strategy,
        "starting quota-ledger service"
    );

    let database = Arc::new(
        QuotaDatabase::new(config.data_dir.clone(), config.busy_timeout())
            .context("failed to open quota ledger database")?,
    );
    let manager = Arc::new(QuotaManager::new(Arc::clone(&database), &config));

    let source = StoredObjectIndex::new(&database).context("failed to open object index")?;
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&database),
        Arc::new(source),
        config.reconciliation_interval(),
    ));

    let _reconciliation_task = if config.enable_reconciliation {
        info!(
            interval_secs = config.reconciliation_interval_secs,
            "scheduled quota reconciliation"
        );
        Some(reconciler.start_schedule())
    } else {
        info!("quota reconciliation disabled");
        None
    };

    let addr = config.listen_addr();
    let state = Arc::new(ApiState::new(manager, reconciler, config));
    let router = create_router(state);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("quota-ledger service shutting down");
    Ok(())
}

fn init_tracing(default_level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
