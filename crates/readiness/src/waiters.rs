//! Kubernetes-backed waiters
//!
//! Named waits for the cluster lifecycle milestones an end-to-end run goes
//! through: infrastructure ready, control plane initialized, bootstrap ready,
//! DOMachine running and ready, node reference set, and deletion.

use crate::predicates;
use crate::wait::{wait_for, wait_until_gone, WaitError, WaitOptions};
use crds::{Cluster, DOMachine, Machine};
use kube::api::Api;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::info;

/// Polls objects through the Kubernetes API
#[derive(Clone)]
pub struct Waiter {
    client: Client,
    options: WaitOptions,
}

impl Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter").field("options", &self.options).finish()
    }
}

impl Waiter {
    pub fn new(client: Client, options: WaitOptions) -> Self {
        Self { client, options }
    }

    async fn until<K, P>(&self, what: &str, namespace: &str, name: &str, predicate: P) -> Result<K, WaitError>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + DeserializeOwned,
        P: Fn(&K) -> bool,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let what = format!("{} {}/{}", what, namespace, name);
        let obj = wait_for(&what, self.options, || api.get_opt(name), predicate).await?;
        info!("Done waiting for {}", what);
        Ok(obj)
    }

    /// `Cluster.status.infrastructureReady`
    pub async fn cluster_infrastructure_ready(&self, namespace: &str, name: &str) -> Result<Cluster, WaitError> {
        self.until("cluster infrastructure ready", namespace, name, predicates::is_infrastructure_ready)
            .await
    }

    /// `Cluster.status.controlPlaneInitialized`
    pub async fn cluster_control_plane_initialized(&self, namespace: &str, name: &str) -> Result<Cluster, WaitError> {
        self.until(
            "cluster control plane initialized",
            namespace,
            name,
            predicates::is_control_plane_initialized,
        )
        .await
    }

    /// `Machine.status.bootstrapReady`
    pub async fn machine_bootstrap_ready(&self, namespace: &str, name: &str) -> Result<Machine, WaitError> {
        self.until("machine bootstrap ready", namespace, name, predicates::is_bootstrap_ready)
            .await
    }

    /// DOMachine droplet active
    pub async fn do_machine_running(&self, namespace: &str, name: &str) -> Result<DOMachine, WaitError> {
        self.until("DOMachine running", namespace, name, predicates::is_infra_machine_running)
            .await
    }

    /// `DOMachine.status.ready`
    pub async fn do_machine_ready(&self, namespace: &str, name: &str) -> Result<DOMachine, WaitError> {
        self.until("DOMachine ready", namespace, name, predicates::is_infra_machine_ready)
            .await
    }

    /// `Machine.status.nodeRef`
    pub async fn machine_node_ref(&self, namespace: &str, name: &str) -> Result<Machine, WaitError> {
        self.until("machine node ref", namespace, name, predicates::has_node_ref)
            .await
    }

    /// Object removed from the API server
    pub async fn deletion<K>(&self, namespace: &str, name: &str) -> Result<(), WaitError>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + DeserializeOwned,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let what = format!("deletion of {} {}/{}", K::kind(&()), namespace, name);
        wait_until_gone(&what, self.options, || api.get_opt(name)).await?;
        info!("Done waiting for {}", what);
        Ok(())
    }
}
