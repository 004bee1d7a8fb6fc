mod api;
mod config;
mod mdns;
mod registry;
mod store;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use mdns_sd::ServiceDaemon;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::registry::RegistryHandle;
use crate::store::{db::DeviceDb, hash};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("iphubd=info"))
        )
        .init();

    tracing::info!("Starting iphubd v{}", env!("CARGO_PKG_VERSION"));

    let config_arg = std::env::args().nth(1);
    let (config, config_source) = Config::resolve(config_arg.as_deref())?;

    tracing::info!("Loaded config from {}", config_source);

    // The table must exist before the first request is accepted
    let db = DeviceDb::open(&config.store.db_path, config.store.busy_timeout())?;
    tracing::info!("Database '{}' initialized", config.store.db_path.display());

    let initial_records = db.all_records()?;
    tracing::info!("Registry holds {} device(s)", initial_records.len());

    let (digest_tx, digest_rx) = watch::channel(hash::compute_digest(&initial_records));

    let registry = RegistryHandle::spawn(db, digest_tx, config.store.acquire_timeout());

    let advertisement = if config.advertise.enabled {
        let daemon = ServiceDaemon::new()
            .context("Failed to create mDNS daemon")?;
        let info = mdns::advertise::register_registry(&daemon, &config.advertise, config.api.port())?;
        Some((daemon, info))
    } else {
        None
    };

    let cancel = CancellationToken::new();

    let app_state = api::routes::AppState {
        registry: registry.clone(),
        digest_rx,
    };
    let app = api::routes::router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();

    if let Err(e) = server_handle.await {
        tracing::error!("Server task failed: {}", e);
    }

    if let Some((daemon, info)) = advertisement {
        if let Err(e) = mdns::advertise::unregister_registry(&daemon, &info) {
            tracing::error!("Failed to unregister mDNS service: {}", e);
        }
        if let Err(e) = daemon.shutdown() {
            tracing::error!("Failed to shutdown mDNS daemon: {}", e);
        }
    }

    // In-flight requests have finished, so the store thread can drain and exit
    if let Err(e) = registry.shutdown().await {
        tracing::error!("Failed to shutdown registry store: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
