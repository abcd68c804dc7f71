//! DOCluster CRD
//!
//! DigitalOcean infrastructure for one Cluster API cluster: the region and the
//! load balancer that fronts the control plane.

use crate::conditions::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Region used when `spec.region` is left empty
pub const DEFAULT_REGION: &str = "nyc1";

/// Port the control-plane load balancer forwards to the API servers
pub const API_SERVER_PORT: u16 = 6443;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "DOCluster",
    namespaced,
    status = "DOClusterStatus",
    shortname = "docl",
    printcolumn = r#"{"name":"Region","type":"string","jsonPath":".spec.region"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".status.controlPlaneEndpoint.host"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DOClusterSpec {
    /// DigitalOcean region slug (e.g., "nyc1")
    #[serde(default)]
    pub region: String,
}

impl DOClusterSpec {
    /// Region slug, defaulted when empty
    pub fn region(&self) -> &str {
        if self.region.is_empty() {
            DEFAULT_REGION
        } else {
            &self.region
        }
    }
}

/// Host/port pair of the Kubernetes API server endpoint
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    pub host: String,
    pub port: i32,
}

impl ApiEndpoint {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: i32::from(API_SERVER_PORT),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DOClusterStatus {
    /// Load balancer is provisioned and has an address
    #[serde(default)]
    pub ready: bool,

    /// Lifecycle phase (Pending, Provisioning, Ready, Deleting)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Control-plane endpoint (load balancer address)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,

    /// DigitalOcean load balancer ID, the sole authority for lookups once set
    #[serde(default, rename = "loadBalancerID", skip_serializing_if = "Option::is_none")]
    pub load_balancer_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Lifecycle of a DOCluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterInfraState {
    /// No load balancer recorded yet
    Pending,
    /// Load balancer exists but has no address yet
    Provisioning { load_balancer_id: String },
    /// Load balancer has an address and the endpoint is published
    Ready {
        load_balancer_id: String,
        endpoint: ApiEndpoint,
    },
    /// Deletion in progress
    Deleting { load_balancer_id: Option<String> },
}

impl ClusterInfraState {
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Provisioning { .. } => "Provisioning",
            Self::Ready { .. } => "Ready",
            Self::Deleting { .. } => "Deleting",
        }
    }

    pub fn load_balancer_id(&self) -> Option<&str> {
        match self {
            Self::Pending => None,
            Self::Provisioning { load_balancer_id } | Self::Ready { load_balancer_id, .. } => {
                Some(load_balancer_id)
            }
            Self::Deleting { load_balancer_id } => load_balancer_id.as_deref(),
        }
    }
}

impl DOClusterStatus {
    /// Builds the persisted status for `state`
    pub fn from_state(state: &ClusterInfraState, conditions: Vec<Condition>) -> Self {
        let control_plane_endpoint = match state {
            ClusterInfraState::Ready { endpoint, .. } => Some(endpoint.clone()),
            _ => None,
        };
        Self {
            ready: matches!(state, ClusterInfraState::Ready { .. }),
            phase: Some(state.phase().to_string()),
            control_plane_endpoint,
            load_balancer_id: state.load_balancer_id().map(str::to_string),
            conditions,
        }
    }

    /// Reads the persisted status back into a state.
    ///
    /// Combinations that no state can produce (ready without a load balancer,
    /// ready without an endpoint) degrade to the closest legal state.
    pub fn state(&self) -> ClusterInfraState {
        let load_balancer_id = self.load_balancer_id.clone().filter(|id| !id.is_empty());
        if self.phase.as_deref() == Some("Deleting") {
            return ClusterInfraState::Deleting { load_balancer_id };
        }
        match (load_balancer_id, &self.control_plane_endpoint) {
            (Some(load_balancer_id), Some(endpoint)) if self.ready => ClusterInfraState::Ready {
                load_balancer_id,
                endpoint: endpoint.clone(),
            },
            (Some(load_balancer_id), _) => ClusterInfraState::Provisioning { load_balancer_id },
            (None, _) => ClusterInfraState::Pending,
        }
    }
}

impl DOCluster {
    /// Current lifecycle state (Pending when no status has been written)
    pub fn infra_state(&self) -> ClusterInfraState {
        self.status
            .as_ref()
            .map(DOClusterStatus::state)
            .unwrap_or(ClusterInfraState::Pending)
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.infra_state(), ClusterInfraState::Ready { .. })
    }
}
