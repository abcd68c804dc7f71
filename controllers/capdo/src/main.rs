//! CAPDO Controller
//!
//! Cluster API infrastructure provider for DigitalOcean:
//! - DOCluster: provisions the control-plane load balancer and publishes the
//!   API server endpoint
//! - DOMachine: provisions droplets and registers control-plane droplets with
//!   the load balancer

mod backoff;
mod config;
mod controller;
mod error;
mod metrics;
mod probes;
mod reconciler;
mod store;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // kube and reqwest both pull in rustls; pick the provider explicitly
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting CAPDO Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  DigitalOcean API: {}", config.api_url);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Workers per kind: {}", config.workers);
    info!("  Resync interval: {:?}", config.resync_interval);
    info!("  Probe address: {}", config.probe_bind_address);
    info!("  Intervals: {:?}", config.intervals);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
