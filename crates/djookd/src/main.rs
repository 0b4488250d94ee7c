use anyhow::{Context, Result};
use djook_core::{CancelToken, PersonSearch, ReferenceDataset};
use djook_rekognition::RekognitionClient;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod http;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("djookd starting");

    let config = config::Config::from_env().context("invalid configuration")?;

    // A partially loaded dataset must never serve traffic.
    let dataset = ReferenceDataset::load(&config.dataset_path).with_context(|| {
        format!(
            "failed to load reference dataset from {}",
            config.dataset_path.display()
        )
    })?;

    let client =
        RekognitionClient::new(config.rekognition()).context("failed to build Rekognition client")?;

    let persons = dataset.len();
    let search = PersonSearch::new(Arc::new(dataset), Arc::new(client), config.search_options());

    let shutdown = CancelToken::new();
    let state = http::AppState {
        search: Arc::new(search),
        search_timeout: config.search_timeout,
        shutdown: shutdown.clone(),
        region: config.region.clone(),
    };
    let app = http::router(state, config.body_limit_bytes);

    let addr = SocketAddr::new(config.bind_addr, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        %addr,
        persons,
        region = %config.region,
        threshold = config.similarity_threshold,
        "djookd ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("djookd shutting down");
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    Ok(())
}
