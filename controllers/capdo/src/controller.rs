//! Main controller implementation.
//!
//! Wires the Kubernetes client, the DigitalOcean client, the kube-runtime
//! controllers and the probe server together, then runs until one of the
//! long-lived tasks exits.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::probes::{self, ProbeState};
use crate::reconciler::{Context, DOClusterReconciler, DOMachineReconciler, Reconcile};
use crate::store::KubeStore;
use crate::watcher::{ErrorPolicy, WatchContext, Watcher};
use digitalocean_client::{DigitalOceanClient, DigitalOceanClientTrait};
use futures::future::select_all;
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Main controller for DOCluster and DOMachine resources.
pub struct Controller {
    watchers: Vec<JoinHandle<Result<(), ControllerError>>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing CAPDO Controller");

        let kube_client = Client::try_default().await?;

        let cloud = DigitalOceanClient::new(config.api_url.clone(), config.token.clone(), config.api_timeout)?;

        info!("Validating DigitalOcean token and connectivity...");
        cloud.validate_token().await.map_err(|e| {
            error!("Failed to validate DigitalOcean token: {}", e);
            error!("Please ensure:");
            error!("  1. DIGITALOCEAN_ACCESS_TOKEN is set correctly");
            error!("  2. The token has read and write scope");
            error!("  3. The API is reachable at {}", config.api_url);
            ControllerError::Cloud(e)
        })?;
        info!("DigitalOcean token validated and connectivity established");

        let cloud: Arc<dyn DigitalOceanClientTrait> = Arc::new(cloud);
        let ctx = Arc::new(Context::new(
            cloud,
            Arc::new(KubeStore::new(kube_client.clone())),
            Arc::new(KubeStore::new(kube_client.clone())),
            Arc::new(KubeStore::new(kube_client.clone())),
            Arc::new(KubeStore::new(kube_client.clone())),
            Arc::new(KubeStore::new(kube_client.clone())),
            config.intervals,
        ));

        let metrics = Arc::new(Metrics::new()?);
        let policy = ErrorPolicy::from_intervals(&config.intervals);

        let cluster_reconciler: Arc<dyn Reconcile> = Arc::new(DOClusterReconciler::new(Arc::clone(&ctx)));
        let machine_reconciler: Arc<dyn Reconcile> = Arc::new(DOMachineReconciler::new(Arc::clone(&ctx)));

        let watchers = Watcher::new(
            kube_client,
            config.namespace.clone(),
            config.workers,
            Arc::new(WatchContext::new(
                cluster_reconciler,
                policy,
                config.resync_interval,
                Some(Arc::clone(&metrics)),
            )),
            Arc::new(WatchContext::new(
                machine_reconciler,
                policy,
                config.resync_interval,
                Some(Arc::clone(&metrics)),
            )),
        )
        .spawn();

        let probe_state = ProbeState::new(metrics);
        let probe_server = tokio::spawn(probes::serve(config.probe_bind_address, probe_state.clone()));
        probe_state.set_ready(true);

        info!("CAPDO Controller initialized");

        Ok(Self { watchers, probe_server })
    }

    /// Runs until a controller or the probe server exits.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("CAPDO Controller running");

        let Self { watchers, probe_server } = self;

        // Controllers and the probe server should run forever
        let result = tokio::select! {
            (result, index, _) = select_all(watchers) => {
                result.map_err(|e| ControllerError::Watch(format!("controller {} panicked: {}", index, e)))?
            }
            result = probe_server => {
                result.map_err(|e| ControllerError::Watch(format!("probe server panicked: {}", e)))?
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                Ok(())
            }
        };

        info!("CAPDO Controller stopped");
        result
    }
}
