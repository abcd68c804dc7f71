//! Reconciliation logic for the DigitalOcean infrastructure CRDs.
//!
//! - `cluster`: DOCluster (control-plane load balancer and endpoint)
//! - `machine`: DOMachine (droplet lifecycle and load balancer membership)
//!
//! Both reconcilers share a [`Context`] holding the cloud client, the object
//! stores and the per-object transient backoff state.

pub mod cluster;
pub mod machine;

#[cfg(test)]
mod cluster_test;

pub use cluster::DOClusterReconciler;
pub use machine::DOMachineReconciler;

use crate::backoff::ExponentialBackoff;
use crate::config::RequeueIntervals;
use crate::error::ControllerError;
use crate::store::ObjectStore;
use async_trait::async_trait;
use crds::{has_paused_annotation, Cluster, DOCluster, DOMachine, Machine};
use digitalocean_client::{DigitalOceanClientTrait, ErrorClass};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Key of a namespaced object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn from_object<K: ResourceExt>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What to do with a key after a successful pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Run again after the delay
    Requeue(Duration),
    /// Nothing to do until the object (or a related one) changes
    AwaitChange,
}

/// One reconciler per kind, driven by a kube-runtime controller
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Kind name used in logs and metrics
    fn kind(&self) -> &'static str;

    /// Converges the object behind `key` one step towards its desired state
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ControllerError>;
}

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: ExponentialBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new(intervals: &RequeueIntervals) -> Self {
        Self {
            backoff: ExponentialBackoff::new(intervals.backoff_min, intervals.backoff_max),
            error_count: 0,
        }
    }
}

/// Shared dependencies of the reconcilers
pub struct Context {
    pub cloud: Arc<dyn DigitalOceanClientTrait>,
    pub clusters: Arc<dyn ObjectStore<Cluster>>,
    pub machines: Arc<dyn ObjectStore<Machine>>,
    pub do_clusters: Arc<dyn ObjectStore<DOCluster>>,
    pub do_machines: Arc<dyn ObjectStore<DOMachine>>,
    pub secrets: Arc<dyn ObjectStore<Secret>>,
    pub intervals: RequeueIntervals,
    /// Transient error tracking per resource (kind:namespace/name -> BackoffState)
    backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("intervals", &self.intervals).finish()
    }
}

impl Context {
    pub fn new(
        cloud: Arc<dyn DigitalOceanClientTrait>,
        clusters: Arc<dyn ObjectStore<Cluster>>,
        machines: Arc<dyn ObjectStore<Machine>>,
        do_clusters: Arc<dyn ObjectStore<DOCluster>>,
        do_machines: Arc<dyn ObjectStore<DOMachine>>,
        secrets: Arc<dyn ObjectStore<Secret>>,
        intervals: RequeueIntervals,
    ) -> Self {
        Self {
            cloud,
            clusters,
            machines,
            do_clusters,
            do_machines,
            secrets,
            intervals,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    /// Next transient backoff for a resource, with its consecutive error count
    pub fn next_backoff(&self, resource_key: &str) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(|| BackoffState::new(&self.intervals));
                state.error_count += 1;
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using minimum backoff", e);
                (self.intervals.backoff_min, 0)
            }
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_backoff(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(resource_key);
        }
    }

    /// Turns a transient error into a bounded backoff requeue; anything else
    /// is returned to the controller.
    pub fn handle_error(&self, resource_key: &str, err: ControllerError) -> Result<Action, ControllerError> {
        match err.class() {
            ErrorClass::Transient => {
                let (delay, count) = self.next_backoff(resource_key);
                warn!(
                    "Transient error reconciling {} (attempt {}): {}, retrying in {:?}",
                    resource_key, count, err, delay
                );
                Ok(Action::Requeue(delay))
            }
            _ => Err(err),
        }
    }
}

/// True when reconciliation of `obj` is paused by its cluster or its own annotation
pub fn is_paused<K: ResourceExt>(cluster: Option<&Cluster>, obj: &K) -> bool {
    cluster.is_some_and(|c| c.spec.paused) || has_paused_annotation(obj.annotations())
}

pub fn has_finalizer<K: ResourceExt>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Adds `finalizer` to `obj`, returning the updated object
pub async fn add_finalizer<K>(store: &dyn ObjectStore<K>, obj: &K, finalizer: &str) -> Result<K, ControllerError>
where
    K: ResourceExt + Send + Sync,
{
    let mut finalizers = obj.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    debug!("Adding finalizer {} to {}/{}", finalizer, obj.namespace().unwrap_or_default(), obj.name_any());
    store
        .patch(obj, json!({ "metadata": { "finalizers": finalizers } }))
        .await
}

/// Removes `finalizer` from `obj`, letting the API server complete a pending deletion
pub async fn remove_finalizer<K>(store: &dyn ObjectStore<K>, obj: &K, finalizer: &str) -> Result<(), ControllerError>
where
    K: ResourceExt + Send + Sync,
{
    let finalizers: Vec<String> = obj
        .finalizers()
        .iter()
        .filter(|f| *f != finalizer)
        .cloned()
        .collect();
    debug!("Removing finalizer {} from {}/{}", finalizer, obj.namespace().unwrap_or_default(), obj.name_any());
    store
        .patch(obj, json!({ "metadata": { "finalizers": finalizers } }))
        .await
        .map(|_| ())
}

/// Name of the owner reference of `kind` in the Cluster API group
pub fn owner_name<K: ResourceExt>(obj: &K, kind: &str) -> Option<String> {
    obj.owner_references()
        .iter()
        .find(|o| o.kind == kind && o.api_version.starts_with("cluster.x-k8s.io/"))
        .map(|o| o.name.clone())
}

/// Tag shared by every cloud resource of a cluster
pub fn cluster_tag(cluster_name: &str) -> String {
    format!("capdo-{}", cluster_name)
}

pub const CONTROL_PLANE_TAG: &str = "capdo-controlplane";
pub const WORKER_TAG: &str = "capdo-worker";

/// Key used for the transient backoff of an object
pub(crate) fn resource_key(kind: &str, key: &ObjectKey) -> String {
    format!("{}:{}", kind, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_context, TestHarness};
    use crds::{DOClusterSpec, PAUSED_ANNOTATION};
    use digitalocean_client::CloudError;

    #[test]
    fn test_paused_by_cluster_or_annotation() {
        let mut do_cluster = DOCluster::new("demo", DOClusterSpec::default());
        let mut cluster = Cluster::new("demo", Default::default());
        assert!(!is_paused(Some(&cluster), &do_cluster));

        cluster.spec.paused = true;
        assert!(is_paused(Some(&cluster), &do_cluster));

        do_cluster
            .annotations_mut()
            .insert(PAUSED_ANNOTATION.to_string(), String::new());
        assert!(is_paused(None, &do_cluster));
    }

    #[test]
    fn test_transient_errors_back_off_per_resource() {
        let harness = TestHarness::new();
        let ctx = test_context(&harness);

        let err = || ControllerError::Cloud(CloudError::RateLimited("429".to_string()));
        assert_eq!(ctx.handle_error("a", err()).unwrap(), Action::Requeue(Duration::from_secs(5)));
        assert_eq!(ctx.handle_error("a", err()).unwrap(), Action::Requeue(Duration::from_secs(10)));
        assert_eq!(ctx.handle_error("b", err()).unwrap(), Action::Requeue(Duration::from_secs(5)));

        ctx.reset_backoff("a");
        assert_eq!(ctx.handle_error("a", err()).unwrap(), Action::Requeue(Duration::from_secs(5)));
    }

    #[test]
    fn test_other_errors_surface() {
        let harness = TestHarness::new();
        let ctx = test_context(&harness);
        let result = ctx.handle_error("a", ControllerError::InvalidSpec("size".to_string()));
        assert!(matches!(result, Err(ControllerError::InvalidSpec(_))));
    }
}
