//! Object store abstraction
//!
//! The reconcilers read and write Kubernetes objects only through
//! [`ObjectStore`], so they can run against the API server or against the
//! in-memory store used by the tests.
//!
//! Writes are JSON merge patches pinned to the `resourceVersion` the caller
//! read. The API server rejects a patch whose `resourceVersion` is stale with
//! HTTP 409, which surfaces as [`ControllerError::Conflict`].

use crate::error::ControllerError;
use async_trait::async_trait;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Debug;
use std::marker::PhantomData;

/// Read/patch access to one namespaced kind
#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    /// Fetches an object, `None` when it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ControllerError>;

    /// Lists all objects in a namespace
    async fn list(&self, namespace: &str) -> Result<Vec<K>, ControllerError>;

    /// Merge-patches metadata/spec of `obj`
    async fn patch(&self, obj: &K, patch: Value) -> Result<K, ControllerError>;

    /// Merge-patches the status subresource of `obj`
    async fn patch_status(&self, obj: &K, status: Value) -> Result<K, ControllerError>;
}

/// `namespace/name` of an object, used in log lines and error messages
pub fn object_ref<K: ResourceExt>(obj: &K) -> String {
    format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Adds `metadata.resourceVersion` of `obj` to a merge patch
pub fn pin_resource_version<K: ResourceExt>(obj: &K, mut patch: Value) -> Value {
    if let Some(version) = obj.resource_version() {
        if let Value::Object(map) = &mut patch {
            let metadata = map
                .entry("metadata")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Value::Object(metadata) = metadata {
                metadata.insert("resourceVersion".to_string(), Value::String(version));
            }
        }
    }
    patch
}

/// Status merge patch from the previously written status to `new`.
///
/// Merge patches leave absent keys untouched, so fields that `new` no longer
/// carries are explicitly nulled.
pub fn status_patch<S: Serialize>(old: Option<&S>, new: &S) -> Result<Value, ControllerError> {
    let mut patch = serde_json::to_value(new)?;
    if let (Some(old), Value::Object(patch_map)) = (old, &mut patch) {
        if let Value::Object(old_map) = serde_json::to_value(old)? {
            for key in old_map.keys() {
                if !patch_map.contains_key(key) {
                    patch_map.insert(key.clone(), Value::Null);
                }
            }
        }
    }
    Ok(patch)
}

/// [`ObjectStore`] backed by the Kubernetes API
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

fn map_conflict<K: ResourceExt>(obj: &K, err: kube::Error) -> ControllerError {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => ControllerError::Conflict(object_ref(obj)),
        e => ControllerError::Kube(e),
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ControllerError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>, ControllerError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch(&self, obj: &K, patch: Value) -> Result<K, ControllerError> {
        let namespace = obj.namespace().unwrap_or_default();
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        let patch = pin_resource_version(obj, patch);
        api.patch(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_conflict(obj, e))
    }

    async fn patch_status(&self, obj: &K, status: Value) -> Result<K, ControllerError> {
        let namespace = obj.namespace().unwrap_or_default();
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        let patch = pin_resource_version(obj, json!({ "status": status }));
        api.patch_status(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_conflict(obj, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{DOCluster, DOClusterSpec, DOClusterStatus};

    #[test]
    fn test_pin_resource_version() {
        let mut do_cluster = DOCluster::new("demo", DOClusterSpec::default());
        do_cluster.metadata.resource_version = Some("7".to_string());
        let patch = pin_resource_version(&do_cluster, json!({"metadata": {"finalizers": ["f"]}}));
        assert_eq!(patch["metadata"]["resourceVersion"], "7");
        assert_eq!(patch["metadata"]["finalizers"][0], "f");

        let patch = pin_resource_version(&do_cluster, json!({"status": {"ready": true}}));
        assert_eq!(patch["metadata"]["resourceVersion"], "7");
    }

    #[test]
    fn test_status_patch_nulls_dropped_fields() {
        let old = DOClusterStatus {
            load_balancer_id: Some("lb-1".to_string()),
            phase: Some("Provisioning".to_string()),
            ..Default::default()
        };
        let new = DOClusterStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        };
        let patch = status_patch(Some(&old), &new).unwrap();
        assert_eq!(patch.get("loadBalancerID"), Some(&Value::Null));
        assert_eq!(patch["phase"], "Pending");

        let patch = status_patch(None, &new).unwrap();
        assert!(patch.get("loadBalancerID").is_none());
    }
}
