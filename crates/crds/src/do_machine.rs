//! DOMachine CRD
//!
//! A single DigitalOcean droplet backing one Cluster API Machine.

use crate::conditions::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "DOMachine",
    namespaced,
    status = "DOMachineStatus",
    shortname = "doma",
    printcolumn = r#"{"name":"ProviderID","type":"string","jsonPath":".spec.providerID"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.instanceStatus"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DOMachineSpec {
    /// Provider ID (`digitalocean://<droplet-id>`), set once the droplet exists
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Droplet size slug (e.g., "s-2vcpu-2gb")
    pub size: String,

    /// Image slug or numeric image ID
    #[schemars(schema_with = "int_or_string")]
    pub image: ImageRef,

    /// SSH key fingerprints or numeric key IDs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "int_or_string_list")]
    pub ssh_keys: Vec<SshKeyRef>,

    /// Extra droplet tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_tags: Vec<String>,
}

fn int_or_string(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "x-kubernetes-int-or-string": true
    })
}

fn int_or_string_list(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "array",
        "items": { "x-kubernetes-int-or-string": true }
    })
}

/// Droplet image, either a numeric ID or a slug
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(untagged)]
pub enum ImageRef {
    Id(u64),
    Slug(String),
}

impl Default for ImageRef {
    fn default() -> Self {
        Self::Slug(String::new())
    }
}

impl ImageRef {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Slug(s) if s.is_empty())
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Slug(slug) => f.write_str(slug),
        }
    }
}

/// SSH key, either a numeric ID or a fingerprint
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(untagged)]
pub enum SshKeyRef {
    Id(u64),
    Fingerprint(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum MachineAddressType {
    Hostname,
    #[serde(rename = "ExternalIP")]
    ExternalIp,
    #[serde(rename = "InternalIP")]
    InternalIp,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct MachineAddress {
    #[serde(rename = "type")]
    pub type_: MachineAddressType,
    pub address: String,
}

impl MachineAddress {
    pub fn new(type_: MachineAddressType, address: impl Into<String>) -> Self {
        Self {
            type_,
            address: address.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DOMachineStatus {
    /// Droplet is running (and registered with the load balancer for control-plane machines)
    #[serde(default)]
    pub ready: bool,

    /// Lifecycle phase (Pending, Provisioning, Running, Ready, Deleting)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Droplet ID, the sole authority for lookups once set
    #[serde(default, rename = "instanceID", skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    /// Droplet status as reported by DigitalOcean (new, active, off, archive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_status: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Lifecycle of a DOMachine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineInfraState {
    /// No droplet recorded yet
    Pending,
    /// Droplet created, not active yet
    Provisioning { instance_id: String },
    /// Droplet active, load balancer registration still outstanding.
    /// Addresses are only published once ready.
    Running { instance_id: String },
    /// Droplet active and fully wired up
    Ready {
        instance_id: String,
        addresses: Vec<MachineAddress>,
    },
    /// Deletion in progress
    Deleting { instance_id: Option<String> },
}

impl MachineInfraState {
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Provisioning { .. } => "Provisioning",
            Self::Running { .. } => "Running",
            Self::Ready { .. } => "Ready",
            Self::Deleting { .. } => "Deleting",
        }
    }

    pub fn instance_id(&self) -> Option<&str> {
        match self {
            Self::Pending => None,
            Self::Provisioning { instance_id }
            | Self::Running { instance_id }
            | Self::Ready { instance_id, .. } => Some(instance_id),
            Self::Deleting { instance_id } => instance_id.as_deref(),
        }
    }

    pub fn addresses(&self) -> &[MachineAddress] {
        match self {
            Self::Ready { addresses, .. } => addresses,
            _ => &[],
        }
    }
}

impl DOMachineStatus {
    /// Builds the persisted status for `state`
    pub fn from_state(
        state: &MachineInfraState,
        instance_status: Option<String>,
        conditions: Vec<Condition>,
    ) -> Self {
        Self {
            ready: matches!(state, MachineInfraState::Ready { .. }),
            phase: Some(state.phase().to_string()),
            instance_id: state.instance_id().map(str::to_string),
            instance_status,
            addresses: state.addresses().to_vec(),
            conditions,
        }
    }

    /// Reads the persisted status back into a state.
    ///
    /// `ready` or `Running` without an instance ID degrades to `Pending`.
    pub fn state(&self) -> MachineInfraState {
        let instance_id = self.instance_id.clone().filter(|id| !id.is_empty());
        if self.phase.as_deref() == Some("Deleting") {
            return MachineInfraState::Deleting { instance_id };
        }
        let Some(instance_id) = instance_id else {
            return MachineInfraState::Pending;
        };
        if self.ready {
            MachineInfraState::Ready {
                instance_id,
                addresses: self.addresses.clone(),
            }
        } else if self.phase.as_deref() == Some("Running") {
            MachineInfraState::Running { instance_id }
        } else {
            MachineInfraState::Provisioning { instance_id }
        }
    }
}

impl DOMachine {
    /// Current lifecycle state (Pending when no status has been written)
    pub fn infra_state(&self) -> MachineInfraState {
        self.status
            .as_ref()
            .map(DOMachineStatus::state)
            .unwrap_or(MachineInfraState::Pending)
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    pub fn instance_status(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.instance_status.as_deref())
    }
}
