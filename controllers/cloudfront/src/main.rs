//! CloudFront Controller
//!
//! Reconciles CDN resource CRDs against the remote service:
//! - CachePolicy: cache key and TTL policies
//! - Distribution: edge distributions, disabled and redeployed before deletion
//!
//! All kinds share one generic reconciler; per-kind behavior comes from the
//! kind table (built in, or loaded from `KIND_CONFIG_PATH`).

mod config;
mod controller;
mod error;
mod kube_store;
mod resource;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls client needs a process-wide crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting CloudFront Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Backend URL: {}", config.backend_url);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Workers per kind: {}", config.workers);
    info!("  Resync interval: {:?}", config.resync_interval);

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
