use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::serve;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use upload_quota::{
    create_router, start_reservation_sweeper, ApiState, IdentityExtractor, InMemoryQuotaStore,
    QuotaStore, SqliteQuotaStore, StoreBackend, SystemClock, UploadQuotaConfig,
    UploadQuotaService,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = UploadQuotaConfig::from_env().context("failed to load configuration")?;
    init_tracing(&config)?;

    info!(
        listen = %config.listen_addr(),
        backend = ?config.store_backend,
        data_dir = %config.data_dir.display(),
        daily_limit = config.daily_limit,
        reservation_ttl_secs = config.reservation_ttl_secs,
        "starting upload-quota service"
    );

    let store: Arc<dyn QuotaStore> = match config.store_backend {
        StoreBackend::Sqlite => Arc::new(
            SqliteQuotaStore::new(config.data_dir.clone(), config.transaction_timeout())
                .context("failed to open upload quota database")?,
        ),
        StoreBackend::Memory => Arc::new(InMemoryQuotaStore::new()),
    };

    let identity =
        IdentityExtractor::new(&config).context("failed to initialize identity extractor")?;
    let service = Arc::new(UploadQuotaService::from_config(
        store,
        Arc::new(SystemClock),
        &config,
    ));

    let _sweeper = if config.reservation_ttl().is_some() {
        Some(start_reservation_sweeper(
            Arc::clone(&service),
            config.sweep_interval(),
        ))
    } else {
        info!("reservation expiry disabled; reserved slots stay consumed for the day");
        None
    };

    let addr: SocketAddr = config
        .listen_addr()
        .parse()
        .context("invalid server bind address")?;
    let state = Arc::new(ApiState::new(service, identity, config));
    let router = create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind TCP listener")?;
    let local_addr = listener
        .local_addr()
        .context("failed to read bound address")?;
    info!(%local_addr, "upload-quota listening");

    serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server encountered an unrecoverable error")?;

    info!("upload-quota service shutting down");
    Ok(())
}

fn init_tracing(config: &UploadQuotaConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
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
