use anyhow::{Context, Result};
use facemark_core::{CommandProvider, FaceProvider, RecognitionSession};
use facemark_store::CatalogService;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod routes;

use config::Config;
use routes::{AppState, Session};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(?config, "facemarkd starting");

    let catalog = CatalogService::open(&config.catalog_path, &config.images_dir)
        .await
        .with_context(|| format!("failed to open catalog {}", config.catalog_path.display()))?;

    if catalog.migrate().await? {
        tracing::info!(path = %config.catalog_path.display(), "legacy catalog migrated");
    }

    let session = match &config.provider_cmd {
        Some(command_line) => Some(start_session(&config, command_line, &catalog).await?),
        None => {
            tracing::warn!("FACEMARK_PROVIDER_CMD not set; recognition session disabled");
            None
        }
    };

    let app = routes::router(
        AppState { catalog, session },
        &config.public_dir,
        config.max_upload_bytes,
    );

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(addr = %config.bind, "facemarkd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facemarkd shutting down");
    Ok(())
}

async fn start_session(config: &Config, command_line: &str, catalog: &CatalogService) -> Result<Session> {
    let mut provider = CommandProvider::from_command_line(command_line)
        .context("FACEMARK_PROVIDER_CMD is empty")?;
    provider
        .load_models(&config.model_dir)
        .context("failed to load provider models")?;

    let provider: Box<dyn FaceProvider> = Box::new(provider);
    let session = RecognitionSession::new(provider, config.match_threshold)?;

    let summary = routes::reload(catalog, session.clone())
        .await
        .map_err(|e| anyhow::anyhow!("initial reference build failed: {e:?}"))?;
    tracing::info!(labels = %summary["labels"], "recognition session ready");

    Ok(session)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
