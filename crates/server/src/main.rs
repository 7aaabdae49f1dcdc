//! chunkd server binary.

use anyhow::{Context, Result};
use chunkd_core::config::AppConfig;
use chunkd_server::{AppState, create_router};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// chunkd - split uploaded files into size-bounded chunks
#[derive(Parser, Debug)]
#[command(name = "chunkd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "CHUNKD_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting chunkd");

    let config = load_config(Path::new(&args.config))?;
    config.validate().context("invalid configuration")?;

    chunkd_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let store = chunkd_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    tracing::info!(backend = store.backend_name(), "Storage backend initialized");

    // Refuse to start against unreachable storage.
    store
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!("Storage backend connectivity verified");

    let state = AppState::new(config.clone(), store).context("invalid configuration")?;
    tracing::info!(
        max_chunk_size = config.server.max_chunk_size,
        max_upload_size = config.server.max_upload_size,
        durable_manifests = state.storage.layout().has_durable_manifests(),
        "Ingestion configured"
    );

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Load configuration from an optional TOML file overlaid with `CHUNKD_`
/// environment variables (`CHUNKD_SERVER__MAX_CHUNK_SIZE=...`).
fn load_config(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if path.exists() {
        tracing::info!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(
            config_path = %path.display(),
            "No config file found, using defaults and environment"
        );
    }

    figment
        .merge(Env::prefixed("CHUNKD_").ignore(&["CONFIG"]).split("__"))
        .extract()
        .context("failed to load configuration")
}
