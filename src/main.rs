//! S3 Attachments Server
//!
//! Accepts file uploads, stores them in an S3-compatible bucket with MD5
//! verification, and redirects downloads to public or signed URLs.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use s3_attachments::config::{ConnectionConfig, EnvSource, FileSource, ServerConfig};
use s3_attachments::routes;
use s3_attachments::state::AppState;
use s3_attachments::AttachmentStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "s3_attachments=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let storage_config = match std::env::var("S3_CONFIG_FILE") {
        Ok(path) => {
            let source = FileSource::for_current_env(path);
            tracing::info!(
                "Storage config: {} ({})",
                source.path().display(),
                source.environment()
            );
            ConnectionConfig::new(source)
        }
        Err(_) => {
            tracing::info!("Storage config: S3_* environment variables");
            ConnectionConfig::new(EnvSource)
        }
    };
    let storage_config = Arc::new(storage_config);

    // Fail fast on missing settings instead of on the first request
    let bucket = storage_config.bucket().context("invalid storage configuration")?;
    storage_config
        .credentials()
        .context("invalid storage configuration")?;

    tracing::info!("Starting S3 Attachments v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("S3 bucket: {}", bucket);

    let store = AttachmentStore::new(storage_config);
    if let Err(e) = store.client().ensure_bucket().await {
        tracing::warn!("Could not verify bucket {}: {}. Will attempt operations anyway.", bucket, e);
    }

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::router(AppState::new(store))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let server = ServerConfig::from_env();
    let addr: SocketAddr = format!("{}:{}", server.host, server.port)
        .parse()
        .context("invalid SERVER_HOST/SERVER_PORT")?;
    tracing::info!("S3 Attachments listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
