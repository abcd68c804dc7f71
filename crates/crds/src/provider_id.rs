//! Provider IDs and bootstrap templates
//!
//! Nodes register with `digitalocean://<droplet-id>`. The droplet ID is only
//! known at boot, so kubeadm bootstrap configs interpolate it from cloud-init
//! instance metadata.

use std::collections::BTreeMap;

pub const PROVIDER_ID_PREFIX: &str = "digitalocean://";

/// Node name resolved by cloud-init at boot
pub const NODE_NAME_TEMPLATE: &str = r#"{{ ds.meta_data["local_hostname"] }}"#;

/// Provider ID resolved by cloud-init at boot
pub const PROVIDER_ID_TEMPLATE: &str = r#"digitalocean://{{ ds.meta_data["instance_id"] }}"#;

/// `digitalocean://<id>`
pub fn format_provider_id(instance_id: &str) -> String {
    format!("{}{}", PROVIDER_ID_PREFIX, instance_id)
}

/// Droplet ID from a provider ID, `None` if malformed
pub fn parse_provider_id(provider_id: &str) -> Option<u64> {
    provider_id
        .strip_prefix(PROVIDER_ID_PREFIX)
        .and_then(|id| id.parse().ok())
}

/// Kubelet arguments making the node register with the DigitalOcean provider ID
pub fn kubelet_extra_args() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("cloud-provider".to_string(), "external".to_string()),
        ("provider-id".to_string(), PROVIDER_ID_TEMPLATE.to_string()),
    ])
}
