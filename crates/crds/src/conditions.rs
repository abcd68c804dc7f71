//! Status conditions
//!
//! Conditions are the only failure-reporting channel of the provider: every
//! wait, transient problem and configuration error ends up as a named condition
//! on the DOCluster/DOMachine status.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Load balancer for the control-plane endpoint is provisioned and has an address
pub const LOAD_BALANCER_READY: &str = "LoadBalancerReady";
/// Droplet backing a DOMachine exists and is active
pub const INSTANCE_READY: &str = "InstanceReady";
/// Control-plane droplet is a member of the cluster load balancer
pub const LOAD_BALANCER_ATTACHED: &str = "LoadBalancerAttached";

/// Condition reasons
pub mod reasons {
    pub const WAITING_FOR_CLUSTER_INFRASTRUCTURE: &str = "WaitingForClusterInfrastructure";
    pub const WAITING_FOR_BOOTSTRAP_DATA: &str = "WaitingForBootstrapData";
    pub const WAITING_FOR_CONTROL_PLANE: &str = "WaitingForControlPlane";
    pub const WAITING_FOR_MACHINES: &str = "WaitingForMachines";
    pub const LOAD_BALANCER_PROVISIONING: &str = "LoadBalancerProvisioning";
    pub const INSTANCE_PROVISIONING: &str = "InstanceProvisioning";
    pub const REGISTERING_WITH_LOAD_BALANCER: &str = "RegisteringWithLoadBalancer";
    pub const INVALID_CONFIGURATION: &str = "InvalidConfiguration";
    pub const INSTANCE_NOT_FOUND: &str = "InstanceNotFound";
    pub const DELETING: &str = "Deleting";
    pub const PROVISIONED: &str = "Provisioned";
}

/// Condition status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A named observation about a resource
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g., "LoadBalancerReady")
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition
    pub status: ConditionStatus,

    /// Machine-readable reason for the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the status flipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// A `True` condition
    pub fn true_(type_: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::True,
            reason: None,
            message: None,
            last_transition_time: None,
        }
    }

    /// A `False` condition with reason and message
    pub fn false_(type_: &str, reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::False,
            reason: Some(reason.to_string()),
            message: Some(message.into()),
            last_transition_time: None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Sets `condition` in `conditions`, replacing any condition of the same type.
///
/// `lastTransitionTime` is carried over when the status did not flip, so
/// re-applying an identical condition leaves the list unchanged.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time
            } else {
                Some(Utc::now())
            };
            *existing = condition;
        }
        None => {
            condition.last_transition_time = Some(Utc::now());
            conditions.push(condition);
        }
    }
}

/// Looks up a condition by type
pub fn get_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}
