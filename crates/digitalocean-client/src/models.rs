//! DigitalOcean API models
//!
//! Subset of the v2 droplet and load balancer schemas used by the provider.
//! See: https://docs.digitalocean.com/reference/api/api-reference/

use serde::{Deserialize, Serialize};

/// Droplet power/provisioning status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DropletStatus {
    New,
    Active,
    Off,
    Archive,
    #[serde(other)]
    Unknown,
}

impl DropletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Active => "active",
            Self::Off => "off",
            Self::Archive => "archive",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Public,
    Private,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkAddress {
    pub ip_address: String,
    #[serde(rename = "type")]
    pub type_: NetworkType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Networks {
    #[serde(default)]
    pub v4: Vec<NetworkAddress>,
    #[serde(default)]
    pub v6: Vec<NetworkAddress>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamedRegion {
    pub slug: String,
}

/// Droplet model matching the `droplet` object of the v2 API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Droplet {
    pub id: u64,
    pub name: String,
    pub status: DropletStatus,
    #[serde(default)]
    pub networks: Networks,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<NamedRegion>,
}

impl Droplet {
    pub fn is_active(&self) -> bool {
        self.status == DropletStatus::Active
    }

    fn ipv4(&self, type_: NetworkType) -> Option<&str> {
        self.networks
            .v4
            .iter()
            .find(|n| n.type_ == type_)
            .map(|n| n.ip_address.as_str())
    }

    pub fn public_ipv4(&self) -> Option<&str> {
        self.ipv4(NetworkType::Public)
    }

    pub fn private_ipv4(&self) -> Option<&str> {
        self.ipv4(NetworkType::Private)
    }
}

/// Request body for `POST /v2/droplets`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub region: String,
    pub size: String,
    /// Image slug or numeric image ID
    pub image: serde_json::Value,
    /// SSH key fingerprints or numeric IDs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_keys: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// cloud-init user data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default)]
    pub private_networking: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoadBalancerStatus {
    New,
    Active,
    Errored,
    #[serde(other)]
    Unknown,
}

/// Load balancer model matching the `load_balancer` object of the v2 API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadBalancer {
    pub id: String,
    pub name: String,
    /// Public IP, empty until provisioning completes
    #[serde(default)]
    pub ip: String,
    pub status: LoadBalancerStatus,
    #[serde(default)]
    pub droplet_ids: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<NamedRegion>,
}

impl LoadBalancer {
    /// Public address, once assigned
    pub fn address(&self) -> Option<&str> {
        Some(self.ip.as_str()).filter(|ip| !ip.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForwardingRule {
    pub entry_protocol: String,
    pub entry_port: u16,
    pub target_protocol: String,
    pub target_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheck {
    pub protocol: String,
    pub port: u16,
    pub check_interval_seconds: u32,
    pub response_timeout_seconds: u32,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

/// Request body for `POST /v2/load_balancers`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateLoadBalancerRequest {
    pub name: String,
    pub region: String,
    pub forwarding_rules: Vec<ForwardingRule>,
    pub health_check: HealthCheck,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl CreateLoadBalancerRequest {
    /// TCP pass-through to the Kubernetes API servers on `port`
    pub fn api_server(name: impl Into<String>, region: impl Into<String>, port: u16, tags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            forwarding_rules: vec![ForwardingRule {
                entry_protocol: "tcp".to_string(),
                entry_port: port,
                target_protocol: "tcp".to_string(),
                target_port: port,
            }],
            health_check: HealthCheck {
                protocol: "tcp".to_string(),
                port,
                check_interval_seconds: 10,
                response_timeout_seconds: 5,
                healthy_threshold: 5,
                unhealthy_threshold: 3,
            },
            tags,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pages {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub pages: Option<Pages>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_droplet_addresses() {
        let droplet: Droplet = serde_json::from_value(serde_json::json!({
            "id": 3164444,
            "name": "cp-1",
            "status": "active",
            "networks": {
                "v4": [
                    {"ip_address": "10.128.192.124", "netmask": "255.255.0.0", "type": "private"},
                    {"ip_address": "192.241.165.154", "netmask": "255.255.255.0", "type": "public"}
                ],
                "v6": []
            },
            "tags": ["capdo-demo"],
            "region": {"slug": "nyc1", "name": "New York 1"}
        }))
        .unwrap();
        assert!(droplet.is_active());
        assert_eq!(droplet.public_ipv4(), Some("192.241.165.154"));
        assert_eq!(droplet.private_ipv4(), Some("10.128.192.124"));
    }

    #[test]
    fn test_unknown_droplet_status() {
        let status: DropletStatus = serde_json::from_value(serde_json::json!("rebooting")).unwrap();
        assert_eq!(status, DropletStatus::Unknown);
    }

    #[test]
    fn test_load_balancer_without_ip() {
        let lb: LoadBalancer = serde_json::from_value(serde_json::json!({
            "id": "4de7ac8b-495b-4884-9a69-1050c6793cd6",
            "name": "default-demo-apiserver",
            "ip": "",
            "status": "new"
        }))
        .unwrap();
        assert_eq!(lb.address(), None);
        assert!(lb.droplet_ids.is_empty());
    }

    #[test]
    fn test_api_server_load_balancer_request() {
        let req = CreateLoadBalancerRequest::api_server("lb", "nyc1", 6443, vec!["capdo-demo".to_string()]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["forwarding_rules"][0]["entry_port"], 6443);
        assert_eq!(json["health_check"]["protocol"], "tcp");
    }
}
