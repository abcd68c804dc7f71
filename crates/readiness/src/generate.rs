//! End-to-end object generators
//!
//! Builds the Cluster/DOCluster pair and Machine/KubeadmConfig/DOMachine
//! triples an e2e run applies to a management cluster.

use crds::provider_id::{kubelet_extra_args, NODE_NAME_TEMPLATE};
use crds::{
    Bootstrap, Cluster, ClusterNetwork, ClusterSpec, DOCluster, DOClusterSpec, DOMachine,
    DOMachineSpec, ImageRef, Machine, MachineSpec, ObjectReference, SshKeyRef,
    CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL, DEFAULT_REGION,
};
use kube::api::ObjectMeta;
use serde_json::json;
use std::collections::BTreeMap;

/// API version of kubeadm bootstrap configs
pub const KUBEADM_CONFIG_API_VERSION: &str = "bootstrap.cluster.x-k8s.io/v1beta1";

/// Tag applied to every e2e droplet
pub const E2E_TAG: &str = "e2e-test";

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// Six lowercase alphanumerics
pub fn random_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..6].to_string()
}

/// Parses an int-or-string value: digits become an ID, anything else a slug
pub fn parse_image(value: &str) -> ImageRef {
    value
        .parse()
        .map(ImageRef::Id)
        .unwrap_or_else(|_| ImageRef::Slug(value.to_string()))
}

fn parse_ssh_key(value: &str) -> SshKeyRef {
    value
        .parse()
        .map(SshKeyRef::Id)
        .unwrap_or_else(|_| SshKeyRef::Fingerprint(value.to_string()))
}

#[derive(Debug, Clone, Default)]
pub struct ClusterGenerator;

impl ClusterGenerator {
    /// Cluster in `namespace` backed by a DOCluster of the same name in nyc1
    pub fn generate(&self, namespace: &str, name: &str) -> (Cluster, DOCluster) {
        let do_cluster = DOCluster {
            metadata: meta(namespace, name),
            spec: DOClusterSpec {
                region: DEFAULT_REGION.to_string(),
            },
            status: None,
        };

        let cluster = Cluster {
            metadata: meta(namespace, name),
            spec: ClusterSpec {
                paused: false,
                cluster_network: Some(ClusterNetwork::default()),
                infrastructure_ref: Some(ObjectReference::infrastructure("DOCluster", name, namespace)),
            },
            status: None,
        };

        (cluster, do_cluster)
    }
}

/// Machine settings shared by every generated machine
#[derive(Debug, Clone)]
pub struct MachineGenerator {
    pub kubernetes_version: String,
    pub size: String,
    /// Image slug or numeric ID
    pub image: String,
    /// SSH key fingerprint or numeric ID
    pub ssh_key: String,
}

impl MachineGenerator {
    /// Machine, kubeadm bootstrap config and DOMachine for one node
    ///
    /// The kubeadm config is returned as a manifest since the bootstrap
    /// provider owns its type.
    pub fn generate(
        &self,
        namespace: &str,
        cluster_name: &str,
        is_control_plane: bool,
    ) -> (Machine, serde_json::Value, DOMachine) {
        let role = if is_control_plane { "controlplane" } else { "node" };
        let name = format!("{}-{}-{}", cluster_name, role, random_suffix());

        let node_registration = json!({
            "name": NODE_NAME_TEMPLATE,
            "kubeletExtraArgs": kubelet_extra_args(),
        });
        let kubeadm_config = json!({
            "apiVersion": KUBEADM_CONFIG_API_VERSION,
            "kind": "KubeadmConfig",
            "metadata": { "namespace": namespace, "name": name },
            "spec": {
                "initConfiguration": { "nodeRegistration": node_registration.clone() },
                "joinConfiguration": { "nodeRegistration": node_registration },
            },
        });

        let do_machine = DOMachine {
            metadata: meta(namespace, &name),
            spec: DOMachineSpec {
                provider_id: None,
                size: self.size.clone(),
                image: parse_image(&self.image),
                ssh_keys: vec![parse_ssh_key(&self.ssh_key)],
                additional_tags: vec![E2E_TAG.to_string()],
            },
            status: None,
        };

        let mut labels = BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster_name.to_string())]);
        if is_control_plane {
            labels.insert(CONTROL_PLANE_LABEL.to_string(), "true".to_string());
        }
        let machine = Machine {
            metadata: ObjectMeta {
                labels: Some(labels),
                ..meta(namespace, &name)
            },
            spec: MachineSpec {
                cluster_name: cluster_name.to_string(),
                bootstrap: Bootstrap {
                    config_ref: Some(ObjectReference {
                        api_version: Some(KUBEADM_CONFIG_API_VERSION.to_string()),
                        kind: Some("KubeadmConfig".to_string()),
                        name: name.clone(),
                        namespace: Some(namespace.to_string()),
                    }),
                    data_secret_name: None,
                },
                infrastructure_ref: ObjectReference::infrastructure("DOMachine", &name, namespace),
                version: Some(self.kubernetes_version.clone()),
                provider_id: None,
            },
            status: None,
        };

        (machine, kubeadm_config, do_machine)
    }
}
