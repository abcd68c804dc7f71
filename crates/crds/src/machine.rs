//! Cluster API `Machine`
//!
//! One Machine exists per node. The Cluster API core controller fills in the
//! bootstrap status and the node reference; the provider reads those to decide
//! when a droplet may be created.

use crate::labels::{CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL};
use crate::references::ObjectReference;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Name of the Cluster this machine belongs to
    #[serde(default)]
    pub cluster_name: String,

    /// Bootstrap configuration reference and rendered data
    #[serde(default)]
    pub bootstrap: Bootstrap,

    /// Reference to the provider-specific machine (a DOMachine)
    pub infrastructure_ref: ObjectReference,

    /// Kubernetes version of the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Provider ID copied from the infrastructure machine
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    /// Reference to the bootstrap provider config (e.g. a KubeadmConfig)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<ObjectReference>,

    /// Secret holding the rendered bootstrap user-data under key `value`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Bootstrap data has been rendered
    #[serde(default)]
    pub bootstrap_ready: bool,

    /// Infrastructure machine is ready
    #[serde(default)]
    pub infrastructure_ready: bool,

    /// Node object that joined for this machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ref: Option<NodeReference>,

    /// Phase reported by the Cluster API core controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl Machine {
    /// True when the machine carries the control-plane label
    pub fn is_control_plane(&self) -> bool {
        self.labels().contains_key(CONTROL_PLANE_LABEL)
    }

    /// Name of the owning cluster (spec first, label as fallback)
    pub fn cluster_name(&self) -> Option<&str> {
        if !self.spec.cluster_name.is_empty() {
            return Some(self.spec.cluster_name.as_str());
        }
        self.labels().get(CLUSTER_NAME_LABEL).map(String::as_str)
    }
}
