//! Test utilities for unit testing reconcilers
//!
//! `MemoryStore` stands in for the API server: it keeps objects as JSON,
//! applies merge patches, bumps `resourceVersion` on every write and rejects
//! writes pinned to a stale version. Deleting an object with finalizers only
//! sets its deletion timestamp; it disappears once the finalizers are gone.

use crate::config::RequeueIntervals;
use crate::error::ControllerError;
use crate::reconciler::{Action, Context, DOClusterReconciler, DOMachineReconciler, ObjectKey, Reconcile};
use crate::store::{object_ref, ObjectStore};
use async_trait::async_trait;
use crds::*;
use digitalocean_client::MockDigitalOceanClient;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const TEST_NAMESPACE: &str = "default";

/// RFC 7386 JSON merge patch
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    objects: BTreeMap<(String, String), Value>,
    version: u64,
    conflicts: usize,
}

/// In-memory [`ObjectStore`]
#[derive(Debug)]
pub struct MemoryStore<K> {
    state: Mutex<StoreState>,
    writes: AtomicUsize,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            writes: AtomicUsize::new(0),
            _kind: PhantomData,
        }
    }
}

fn is_purgeable(obj: &Value) -> bool {
    let metadata = &obj["metadata"];
    let deleting = !metadata["deletionTimestamp"].is_null();
    let finalizers = metadata["finalizers"].as_array().is_none_or(|f| f.is_empty());
    deleting && finalizers
}

impl<K> MemoryStore<K>
where
    K: ResourceExt + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces an object, assigning it a fresh resourceVersion
    pub fn insert(&self, obj: K) -> K {
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        let mut value = serde_json::to_value(&obj).unwrap();
        value["metadata"]["resourceVersion"] = Value::String(state.version.to_string());
        if value["metadata"]["namespace"].is_null() {
            value["metadata"]["namespace"] = Value::String(TEST_NAMESPACE.to_string());
        }
        let key = (
            value["metadata"]["namespace"].as_str().unwrap().to_string(),
            obj.name_any(),
        );
        state.objects.insert(key, value.clone());
        serde_json::from_value(value).unwrap()
    }

    pub fn get_now(&self, name: &str) -> Option<K> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&(TEST_NAMESPACE.to_string(), name.to_string()))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    /// Mutates an object as another controller would (bumps resourceVersion)
    pub fn update(&self, name: &str, f: impl FnOnce(&mut K)) {
        let mut obj = self.get_now(name).unwrap();
        f(&mut obj);
        self.insert(obj);
    }

    /// Deletes an object the way the API server does
    pub fn delete(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        let key = (TEST_NAMESPACE.to_string(), name.to_string());
        let Some(obj) = state.objects.get_mut(&key) else {
            return;
        };
        obj["metadata"]["deletionTimestamp"] = Value::String("2026-01-01T00:00:00Z".to_string());
        if is_purgeable(obj) {
            state.objects.remove(&key);
        }
    }

    /// Number of successful patches
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes the next `n` writes fail with a conflict
    pub fn fail_next_writes(&self, n: usize) {
        self.state.lock().unwrap().conflicts = n;
    }

    fn apply(&self, obj: &K, patch: Value) -> Result<K, ControllerError> {
        let mut state = self.state.lock().unwrap();
        let key = (obj.namespace().unwrap_or_default(), obj.name_any());
        if state.conflicts > 0 {
            state.conflicts -= 1;
            return Err(ControllerError::Conflict(object_ref(obj)));
        }
        let current_version = state
            .objects
            .get(&key)
            .and_then(|v| v["metadata"]["resourceVersion"].as_str())
            .map(str::to_string);
        // Deleted since it was read
        let Some(current_version) = current_version else {
            return Err(ControllerError::Conflict(object_ref(obj)));
        };
        if obj.resource_version().as_deref() != Some(current_version.as_str()) {
            return Err(ControllerError::Conflict(object_ref(obj)));
        }

        state.version += 1;
        let version = state.version.to_string();
        let stored = state.objects.get_mut(&key).unwrap();
        merge_patch(stored, &patch);
        stored["metadata"]["resourceVersion"] = Value::String(version);
        let updated: K = serde_json::from_value(stored.clone()).unwrap();
        if is_purgeable(stored) {
            state.objects.remove(&key);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: ResourceExt + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ControllerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .map(|v| serde_json::from_value(v.clone()).unwrap()))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>, ControllerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, v)| serde_json::from_value(v.clone()).unwrap())
            .collect())
    }

    async fn patch(&self, obj: &K, mut patch: Value) -> Result<K, ControllerError> {
        if let Some(metadata) = patch.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.remove("resourceVersion");
        }
        self.apply(obj, patch)
    }

    async fn patch_status(&self, obj: &K, status: Value) -> Result<K, ControllerError> {
        self.apply(obj, serde_json::json!({ "status": status }))
    }
}

/// Mock cloud plus one store per kind
pub struct TestHarness {
    pub cloud: MockDigitalOceanClient,
    pub clusters: Arc<MemoryStore<Cluster>>,
    pub machines: Arc<MemoryStore<Machine>>,
    pub do_clusters: Arc<MemoryStore<DOCluster>>,
    pub do_machines: Arc<MemoryStore<DOMachine>>,
    pub secrets: Arc<MemoryStore<Secret>>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_cloud(MockDigitalOceanClient::new())
    }

    pub fn with_cloud(cloud: MockDigitalOceanClient) -> Self {
        Self {
            cloud,
            clusters: Arc::new(MemoryStore::new()),
            machines: Arc::new(MemoryStore::new()),
            do_clusters: Arc::new(MemoryStore::new()),
            do_machines: Arc::new(MemoryStore::new()),
            secrets: Arc::new(MemoryStore::new()),
        }
    }

    pub fn cluster_reconciler(&self) -> DOClusterReconciler {
        DOClusterReconciler::new(test_context(self))
    }

    pub fn machine_reconciler(&self) -> DOMachineReconciler {
        DOMachineReconciler::new(test_context(self))
    }

    /// Cluster + DOCluster pair named `name`
    pub fn add_cluster(&self, name: &str) {
        self.clusters.insert(create_test_cluster(name));
        self.do_clusters.insert(create_test_do_cluster(name));
    }

    /// Machine + DOMachine pair, bootstrap data ready
    pub fn add_machine(&self, name: &str, cluster: &str, control_plane: bool) {
        let secret_name = format!("{}-bootstrap", name);
        self.secrets
            .insert(create_test_bootstrap_secret(&secret_name, "#cloud-config\n"));
        self.machines
            .insert(create_test_machine(name, cluster, control_plane, Some(&secret_name)));
        self.do_machines
            .insert(create_test_do_machine(name, cluster, control_plane));
    }

    /// Marks the control plane of `cluster` initialized, as the core controller does
    pub fn initialize_control_plane(&self, cluster: &str) {
        self.clusters.update(cluster, |c| {
            c.status.get_or_insert_with(Default::default).control_plane_initialized = true;
        });
    }

    /// Reconciles `reconciler` on `name` until it waits for a change or
    /// `max_passes` is exhausted, returning the last result
    pub async fn converge(
        &self,
        reconciler: &dyn Reconcile,
        name: &str,
        max_passes: usize,
    ) -> Result<Action, ControllerError> {
        let key = ObjectKey::new(TEST_NAMESPACE, name);
        let mut last = reconciler.reconcile(&key).await;
        for _ in 1..max_passes {
            if matches!(last, Ok(Action::AwaitChange)) {
                break;
            }
            last = reconciler.reconcile(&key).await;
        }
        last
    }
}

/// Context over the harness stores with default intervals
pub fn test_context(harness: &TestHarness) -> Arc<Context> {
    Arc::new(Context::new(
        Arc::new(harness.cloud.clone()),
        harness.clusters.clone(),
        harness.machines.clone(),
        harness.do_clusters.clone(),
        harness.do_machines.clone(),
        harness.secrets.clone(),
        RequeueIntervals::default(),
    ))
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::new(TEST_NAMESPACE, name)
}

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(TEST_NAMESPACE.to_string()),
        ..Default::default()
    }
}

fn owner(kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: CLUSTER_API_VERSION.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("{}-uid", name),
        ..Default::default()
    }
}

/// Helper to create test Cluster referencing a DOCluster of the same name
pub fn create_test_cluster(name: &str) -> Cluster {
    Cluster {
        metadata: meta(name),
        spec: ClusterSpec {
            paused: false,
            cluster_network: None,
            infrastructure_ref: Some(ObjectReference::infrastructure("DOCluster", name, TEST_NAMESPACE)),
        },
        status: None,
    }
}

/// Helper to create test DOCluster in nyc1 owned by the Cluster of the same name
pub fn create_test_do_cluster(name: &str) -> DOCluster {
    DOCluster {
        metadata: ObjectMeta {
            owner_references: Some(vec![owner("Cluster", name)]),
            ..meta(name)
        },
        spec: DOClusterSpec {
            region: DEFAULT_REGION.to_string(),
        },
        status: None,
    }
}

/// Helper to create test Machine with optional bootstrap secret
pub fn create_test_machine(name: &str, cluster: &str, control_plane: bool, bootstrap_secret: Option<&str>) -> Machine {
    let mut labels = BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster.to_string())]);
    if control_plane {
        labels.insert(CONTROL_PLANE_LABEL.to_string(), String::new());
    }
    Machine {
        metadata: ObjectMeta {
            labels: Some(labels),
            ..meta(name)
        },
        spec: MachineSpec {
            cluster_name: cluster.to_string(),
            bootstrap: Bootstrap {
                config_ref: None,
                data_secret_name: bootstrap_secret.map(str::to_string),
            },
            infrastructure_ref: ObjectReference::infrastructure("DOMachine", name, TEST_NAMESPACE),
            version: Some("v1.30.2".to_string()),
            provider_id: None,
        },
        status: Some(MachineStatus {
            bootstrap_ready: bootstrap_secret.is_some(),
            ..Default::default()
        }),
    }
}

/// Helper to create test DOMachine owned by the Machine of the same name
pub fn create_test_do_machine(name: &str, cluster: &str, control_plane: bool) -> DOMachine {
    let mut labels = BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster.to_string())]);
    if control_plane {
        labels.insert(CONTROL_PLANE_LABEL.to_string(), String::new());
    }
    DOMachine {
        metadata: ObjectMeta {
            labels: Some(labels),
            owner_references: Some(vec![owner("Machine", name)]),
            ..meta(name)
        },
        spec: DOMachineSpec {
            provider_id: None,
            size: "s-2vcpu-2gb".to_string(),
            image: ImageRef::Slug("ubuntu-22-04-x64".to_string()),
            ssh_keys: vec![SshKeyRef::Id(12345)],
            additional_tags: Vec::new(),
        },
        status: None,
    }
}

/// Helper to create test bootstrap data secret
pub fn create_test_bootstrap_secret(name: &str, user_data: &str) -> Secret {
    Secret {
        metadata: meta(name),
        data: Some(BTreeMap::from([(
            "value".to_string(),
            ByteString(user_data.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

/// Condition of `type_` on a status condition list
pub fn condition<'a>(conditions: &'a [Condition], type_: &str) -> &'a Condition {
    conditions::get_condition(conditions, type_).unwrap()
}

/// Tags of every droplet, keyed by name
pub fn droplet_tags(cloud: &MockDigitalOceanClient) -> HashMap<String, Vec<String>> {
    cloud
        .instances()
        .into_iter()
        .map(|d| (d.name, d.tags))
        .collect()
}
