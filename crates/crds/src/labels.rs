//! Well-known labels, annotations and finalizers

use std::collections::BTreeMap;

/// Label carrying the owning cluster name
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label marking control-plane machines
pub const CONTROL_PLANE_LABEL: &str = "cluster.x-k8s.io/control-plane";

/// Annotation pausing reconciliation of a single object
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

pub const DO_CLUSTER_FINALIZER: &str = "docluster.infrastructure.cluster.x-k8s.io";
pub const DO_MACHINE_FINALIZER: &str = "domachine.infrastructure.cluster.x-k8s.io";

/// True when the paused annotation is present
pub fn has_paused_annotation(annotations: &BTreeMap<String, String>) -> bool {
    annotations.contains_key(PAUSED_ANNOTATION)
}
