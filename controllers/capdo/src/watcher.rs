//! Kubernetes resource watchers.
//!
//! One `kube_runtime::Controller` per reconciled kind. Related kinds are
//! mapped onto the objects they affect:
//!
//! - DOCluster controller: Cluster (its `infrastructureRef`) and DOMachine
//!   (the DOCluster of its cluster; deletion of a cluster waits for its
//!   machines)
//! - DOMachine controller: Machine (its `infrastructureRef`), plus Cluster
//!   and DOCluster (every DOMachine of the cluster)
//!
//! Fan-out lookups read the controllers' own reflector stores.

use crate::backoff::ExponentialBackoff;
use crate::config::RequeueIntervals;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::cluster::cluster_name;
use crate::reconciler::{Action, ObjectKey, Reconcile};
use crds::{Cluster, DOCluster, DOMachine, Machine, CLUSTER_NAME_LABEL};
use digitalocean_client::ErrorClass;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::controller::{self, Config as ControllerConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// DOMachines labelled with `cluster` in `namespace`
pub fn machine_keys_for_cluster(namespace: &str, cluster: &str, do_machines: &[Arc<DOMachine>]) -> Vec<ObjectKey> {
    do_machines
        .iter()
        .filter(|dm| dm.namespace().as_deref() == Some(namespace))
        .filter(|dm| dm.labels().get(CLUSTER_NAME_LABEL).map(String::as_str) == Some(cluster))
        .map(|dm| ObjectKey::from_object(dm.as_ref()))
        .collect()
}

/// DOClusters belonging to `cluster` in `namespace`
pub fn cluster_keys_for_cluster(namespace: &str, cluster: &str, do_clusters: &[Arc<DOCluster>]) -> Vec<ObjectKey> {
    do_clusters
        .iter()
        .filter(|dc| dc.namespace().as_deref() == Some(namespace))
        .filter(|dc| cluster_name(dc, None) == cluster)
        .map(|dc| ObjectKey::from_object(dc.as_ref()))
        .collect()
}

/// DOMachine referenced by a Machine
pub fn infra_key_for_machine(machine: &Machine) -> Option<ObjectKey> {
    let r = &machine.spec.infrastructure_ref;
    if !r.is_kind("DOMachine") || r.name.is_empty() {
        return None;
    }
    let namespace = machine.namespace().unwrap_or_default();
    Some(ObjectKey::new(r.namespace_or(&namespace), r.name.clone()))
}

/// DOCluster referenced by a Cluster
pub fn infra_key_for_cluster(cluster: &Cluster) -> Option<ObjectKey> {
    let r = cluster.infrastructure_ref()?;
    let namespace = cluster.namespace().unwrap_or_default();
    Some(ObjectKey::new(r.namespace_or(&namespace), r.name.clone()))
}

fn object_ref<K>(key: ObjectKey) -> ObjectRef<K>
where
    K: Resource<DynamicType = ()>,
{
    ObjectRef::new(&key.name).within(&key.namespace)
}

fn object_refs<K>(keys: Vec<ObjectKey>) -> Vec<ObjectRef<K>>
where
    K: Resource<DynamicType = ()>,
{
    keys.into_iter().map(object_ref).collect()
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Requeue policy for passes that returned an error
#[derive(Debug, Clone, Copy)]
pub struct ErrorPolicy {
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub permanent: Duration,
}

impl ErrorPolicy {
    pub fn from_intervals(intervals: &RequeueIntervals) -> Self {
        Self {
            backoff_min: intervals.backoff_min,
            backoff_max: intervals.backoff_max,
            permanent: intervals.permanent,
        }
    }

    /// Delay before retrying after `failures` consecutive failures
    pub fn delay(&self, err: &ControllerError, failures: u32) -> Duration {
        match err.class() {
            ErrorClass::Permanent => self.permanent,
            _ => ExponentialBackoff::calculate_for_error_count(failures, self.backoff_min, self.backoff_max),
        }
    }
}

/// Shared by the reconcile and error policy callbacks of one controller
pub struct WatchContext {
    reconciler: Arc<dyn Reconcile>,
    policy: ErrorPolicy,
    resync_interval: Duration,
    metrics: Option<Arc<Metrics>>,
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl WatchContext {
    pub fn new(
        reconciler: Arc<dyn Reconcile>,
        policy: ErrorPolicy,
        resync_interval: Duration,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            reconciler,
            policy,
            resync_interval,
            metrics,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Runs one pass for `key`. Objects waiting for a change are still
    /// revisited every resync interval.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<controller::Action, ControllerError> {
        let started = Instant::now();
        let result = self.reconciler.reconcile(key).await;
        if let Some(metrics) = &self.metrics {
            metrics.observe(self.reconciler.kind(), &result, started.elapsed());
        }

        let action = result?;
        self.forget(key);
        Ok(match action {
            Action::Requeue(delay) => {
                debug!("{} {} requeued in {:?}", self.reconciler.kind(), key, delay);
                controller::Action::requeue(delay)
            }
            Action::AwaitChange => controller::Action::requeue(self.resync_interval),
        })
    }

    /// Next run of `key` after a failed pass
    pub fn on_error(&self, key: &ObjectKey, err: &ControllerError) -> controller::Action {
        let failures = self.record_failure(key);
        let delay = self.policy.delay(err, failures);
        error!(
            "Reconciliation of {} {} failed ({} consecutive): {}, retrying in {:?}",
            self.reconciler.kind(),
            key,
            failures,
            err,
            delay
        );
        controller::Action::requeue(delay)
    }

    fn record_failure(&self, key: &ObjectKey) -> u32 {
        match self.failures.lock() {
            Ok(mut failures) => {
                let count = failures.entry(key.clone()).or_insert(0);
                *count = count.saturating_add(1);
                *count
            }
            Err(_) => 1,
        }
    }

    fn forget(&self, key: &ObjectKey) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(key);
        }
    }
}

async fn reconcile<K: ResourceExt>(obj: Arc<K>, ctx: Arc<WatchContext>) -> Result<controller::Action, ControllerError> {
    ctx.reconcile(&ObjectKey::from_object(obj.as_ref())).await
}

fn error_policy<K: ResourceExt>(obj: Arc<K>, err: &ControllerError, ctx: Arc<WatchContext>) -> controller::Action {
    ctx.on_error(&ObjectKey::from_object(obj.as_ref()), err)
}

/// Drives `controller` until its watch streams end
async fn run_controller<K>(controller: Controller<K>, ctx: Arc<WatchContext>, workers: u16) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let kind = ctx.reconciler.kind();
    info!("Starting {} controller", kind);

    controller
        .with_config(ControllerConfig::default().concurrency(workers))
        .run(reconcile::<K>, error_policy::<K>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {} {}", kind, obj),
                Err(e) => warn!("{} controller error: {}", kind, e),
            }
        })
        .await;

    Err(ControllerError::Watch(format!("{} controller stopped", kind)))
}

/// Watches the four kinds and drives the DOCluster and DOMachine reconcilers
pub struct Watcher {
    client: Client,
    namespace: Option<String>,
    workers: u16,
    clusters: Arc<WatchContext>,
    machines: Arc<WatchContext>,
}

impl Watcher {
    pub fn new(
        client: Client,
        namespace: Option<String>,
        workers: usize,
        clusters: Arc<WatchContext>,
        machines: Arc<WatchContext>,
    ) -> Self {
        Self {
            client,
            namespace,
            workers: u16::try_from(workers).unwrap_or(u16::MAX),
            clusters,
            machines,
        }
    }

    /// Spawns both controllers
    pub fn spawn(self) -> Vec<JoinHandle<Result<(), ControllerError>>> {
        let ns = self.namespace.as_deref();

        let do_clusters = Controller::new(api::<DOCluster>(&self.client, ns), watcher::Config::default());
        let do_cluster_store = do_clusters.store();
        let do_machines = Controller::new(api::<DOMachine>(&self.client, ns), watcher::Config::default());
        let do_machine_store = do_machines.store();

        let do_clusters = do_clusters
            .watches(api::<Cluster>(&self.client, ns), watcher::Config::default(), |cluster| {
                infra_key_for_cluster(&cluster).map(object_ref)
            })
            .watches(api::<DOMachine>(&self.client, ns), watcher::Config::default(), move |dm| {
                let Some(cluster) = dm.labels().get(CLUSTER_NAME_LABEL) else {
                    return Vec::new();
                };
                let namespace = dm.namespace().unwrap_or_default();
                object_refs(cluster_keys_for_cluster(&namespace, cluster, &do_cluster_store.state()))
            });

        let machines_of_cluster = do_machine_store.clone();
        let do_machines = do_machines
            .watches(api::<Machine>(&self.client, ns), watcher::Config::default(), |machine| {
                infra_key_for_machine(&machine).map(object_ref)
            })
            .watches(api::<Cluster>(&self.client, ns), watcher::Config::default(), move |cluster| {
                let namespace = cluster.namespace().unwrap_or_default();
                object_refs(machine_keys_for_cluster(
                    &namespace,
                    &cluster.name_any(),
                    &machines_of_cluster.state(),
                ))
            })
            .watches(api::<DOCluster>(&self.client, ns), watcher::Config::default(), move |dc| {
                let namespace = dc.namespace().unwrap_or_default();
                object_refs(machine_keys_for_cluster(
                    &namespace,
                    &cluster_name(&dc, None),
                    &do_machine_store.state(),
                ))
            });

        vec![
            tokio::spawn(run_controller(do_clusters, self.clusters, self.workers)),
            tokio::spawn(run_controller(do_machines, self.machines, self.workers)),
        ]
    }
}
