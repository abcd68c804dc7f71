//! Cluster API `Cluster`
//!
//! The generic cluster object owned by the user and the Cluster API core
//! controllers. The provider only reads it, except for propagating
//! infrastructure readiness and the control-plane endpoint into its status.

use crate::do_cluster::ApiEndpoint;
use crate::references::ObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    namespaced,
    status = "ClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Pauses reconciliation of the cluster and everything in it
    #[serde(default)]
    pub paused: bool,

    /// Cluster network configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_network: Option<ClusterNetwork>,

    /// Reference to the provider-specific infrastructure object (a DOCluster)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetwork {
    /// API server port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_port: Option<i32>,

    /// Domain name for services
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_domain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Infrastructure (DOCluster) is ready
    #[serde(default)]
    pub infrastructure_ready: bool,

    /// The first control-plane node has been initialized
    #[serde(default)]
    pub control_plane_initialized: bool,

    /// Endpoint of the control plane, copied from the DOCluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,

    /// Phase reported by the Cluster API core controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl Cluster {
    /// Reference to the DOCluster backing this cluster, if any
    pub fn infrastructure_ref(&self) -> Option<&ObjectReference> {
        self.spec
            .infrastructure_ref
            .as_ref()
            .filter(|r| r.is_kind("DOCluster"))
    }
}
