//! Kubernetes object references used across Cluster API resources
//!
//! Cluster API links resources with `corev1.ObjectReference`-shaped fields
//! (`Cluster.spec.infrastructureRef`, `Machine.spec.bootstrap.configRef`, ...).
//! This is a schema-friendly copy of that shape with only the fields the
//! provider reads.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group/version of the DigitalOcean infrastructure resources
pub const INFRASTRUCTURE_API_VERSION: &str = "infrastructure.cluster.x-k8s.io/v1beta1";

/// API group/version of the generic Cluster API resources
pub const CLUSTER_API_VERSION: &str = "cluster.x-k8s.io/v1beta1";

/// Kubernetes-style object reference
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referent (e.g., "infrastructure.cluster.x-k8s.io/v1beta1")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Kind of the referent (e.g., "DOCluster")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Name of the referent
    pub name: String,

    /// Namespace of the referent (defaults to the referencing object's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ObjectReference {
    /// Reference to a DigitalOcean infrastructure object of the given kind
    pub fn infrastructure(kind: &str, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            api_version: Some(INFRASTRUCTURE_API_VERSION.to_string()),
            kind: Some(kind.to_string()),
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// True when the reference points at `kind` (kind is optional on older objects)
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind.as_deref().is_none_or(|k| k == kind)
    }

    /// Namespace of the referent, falling back to `default_namespace`
    pub fn namespace_or<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default_namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infrastructure_reference() {
        let r = ObjectReference::infrastructure("DOCluster", "demo", "default");
        assert_eq!(r.api_version.as_deref(), Some(INFRASTRUCTURE_API_VERSION));
        assert!(r.is_kind("DOCluster"));
        assert!(!r.is_kind("DOMachine"));
        assert_eq!(r.namespace_or("other"), "default");
    }

    #[test]
    fn test_reference_without_kind_matches_any() {
        let r = ObjectReference {
            name: "demo".to_string(),
            ..Default::default()
        };
        assert!(r.is_kind("DOCluster"));
        assert_eq!(r.namespace_or("fallback"), "fallback");
    }
}
