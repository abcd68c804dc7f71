//! Mock DigitalOceanClient for unit testing
//!
//! In-memory implementation of `DigitalOceanClientTrait`, organized like the
//! real API:
//! - `droplets.rs` - droplet lookups, creation and deletion
//! - `load_balancers.rs` - load balancers and their droplet membership
//!
//! Every call is appended to a call log so tests can assert which cloud
//! operations a reconcile pass issued. Failures can be queued per operation,
//! and droplets/load balancers only become active after a configurable number
//! of lookups to exercise polling.

mod droplets;
mod load_balancers;

use crate::do_trait::DigitalOceanClientTrait;
use crate::error::CloudError;
use crate::models::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Cloud operation, used to target injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ValidateToken,
    FindInstance,
    GetInstance,
    CreateInstance,
    DeleteInstance,
    FindLoadBalancer,
    GetLoadBalancer,
    CreateLoadBalancer,
    DeleteLoadBalancer,
    Register,
    Deregister,
}

/// One recorded call against the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudCall {
    ValidateToken,
    FindInstance(String),
    GetInstance(u64),
    CreateInstance(String),
    DeleteInstance(u64),
    FindLoadBalancer(String),
    GetLoadBalancer(String),
    CreateLoadBalancer(String),
    DeleteLoadBalancer(String),
    Register { load_balancer_id: String, instance_id: u64 },
    Deregister { load_balancer_id: String, instance_id: u64 },
}

impl CloudCall {
    pub fn operation(&self) -> Operation {
        match self {
            Self::ValidateToken => Operation::ValidateToken,
            Self::FindInstance(_) => Operation::FindInstance,
            Self::GetInstance(_) => Operation::GetInstance,
            Self::CreateInstance(_) => Operation::CreateInstance,
            Self::DeleteInstance(_) => Operation::DeleteInstance,
            Self::FindLoadBalancer(_) => Operation::FindLoadBalancer,
            Self::GetLoadBalancer(_) => Operation::GetLoadBalancer,
            Self::CreateLoadBalancer(_) => Operation::CreateLoadBalancer,
            Self::DeleteLoadBalancer(_) => Operation::DeleteLoadBalancer,
            Self::Register { .. } => Operation::Register,
            Self::Deregister { .. } => Operation::Deregister,
        }
    }

    /// True for calls that change cloud state
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateInstance(_)
                | Self::DeleteInstance(_)
                | Self::CreateLoadBalancer(_)
                | Self::DeleteLoadBalancer(_)
                | Self::Register { .. }
                | Self::Deregister { .. }
        )
    }
}

/// Error to return from an injected failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    NotFound,
    Conflict,
    RateLimited,
    Unavailable,
    InvalidRequest(String),
    Authentication,
}

impl FailureKind {
    fn to_error(&self, operation: Operation) -> CloudError {
        let context = format!("injected failure for {:?}", operation);
        match self {
            Self::NotFound => CloudError::NotFound(context),
            Self::Conflict => CloudError::Conflict(context),
            Self::RateLimited => CloudError::RateLimited(context),
            Self::Unavailable => CloudError::Unavailable(context),
            Self::InvalidRequest(msg) => CloudError::InvalidRequest(msg.clone()),
            Self::Authentication => CloudError::Authentication(context),
        }
    }
}

#[derive(Debug)]
pub(crate) struct MockDroplet {
    pub(crate) droplet: Droplet,
    /// Lookups left before the droplet turns active
    pub(crate) polls_remaining: u32,
}

#[derive(Debug)]
pub(crate) struct MockLoadBalancer {
    pub(crate) load_balancer: LoadBalancer,
    pub(crate) members: BTreeSet<u64>,
    /// Lookups left before an IP is assigned
    pub(crate) polls_remaining: u32,
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub(crate) droplets: BTreeMap<u64, MockDroplet>,
    pub(crate) load_balancers: BTreeMap<String, MockLoadBalancer>,
    pub(crate) calls: Vec<CloudCall>,
    pub(crate) failures: HashMap<Operation, VecDeque<FailureKind>>,
    pub(crate) rejected_regions: BTreeSet<String>,
    pub(crate) boot_polls: u32,
    pub(crate) load_balancer_polls: u32,
    pub(crate) next_id: u64,
}

/// Mock DigitalOceanClient for testing
///
/// Clones share state, so a test can keep a handle while the reconcilers
/// hold another behind `Arc<dyn DigitalOceanClientTrait>`.
#[derive(Debug, Clone)]
pub struct MockDigitalOceanClient {
    pub(crate) state: Arc<Mutex<MockState>>,
}

impl Default for MockDigitalOceanClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDigitalOceanClient {
    /// Create a new mock client where resources become ready on first lookup
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                next_id: 1000,
                ..Default::default()
            })),
        }
    }

    /// Droplets stay `new` for `polls` lookups after creation
    pub fn with_boot_polls(self, polls: u32) -> Self {
        self.lock().boot_polls = polls;
        self
    }

    /// Load balancers stay without IP for `polls` lookups after creation
    pub fn with_load_balancer_polls(self, polls: u32) -> Self {
        self.lock().load_balancer_polls = polls;
        self
    }

    /// Creates in `region` fail with `InvalidRequest`
    pub fn reject_region(&self, region: &str) {
        self.lock().rejected_regions.insert(region.to_string());
    }

    /// Make the next `times` calls of `operation` fail with `kind`
    pub fn fail_next(&self, operation: Operation, kind: FailureKind, times: usize) {
        let mut state = self.lock();
        let queue = state.failures.entry(operation).or_default();
        queue.extend(std::iter::repeat_n(kind, times));
    }

    /// Drop all queued failures
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// All calls recorded so far
    pub fn calls(&self) -> Vec<CloudCall> {
        self.lock().calls.clone()
    }

    /// Calls that changed cloud state
    pub fn mutations(&self) -> Vec<CloudCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    /// Number of recorded calls of `operation`
    pub fn count(&self, operation: Operation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Snapshot of all droplets
    pub fn instances(&self) -> Vec<Droplet> {
        self.lock()
            .droplets
            .values()
            .map(|d| d.droplet.clone())
            .collect()
    }

    /// Droplets with the given name
    pub fn instances_named(&self, name: &str) -> Vec<Droplet> {
        self.instances().into_iter().filter(|d| d.name == name).collect()
    }

    /// Snapshot of all load balancers (with current membership)
    pub fn load_balancers(&self) -> Vec<LoadBalancer> {
        self.lock()
            .load_balancers
            .values()
            .map(load_balancers::snapshot)
            .collect()
    }

    /// Droplet IDs registered with a load balancer
    pub fn members(&self, load_balancer_id: &str) -> Vec<u64> {
        self.lock()
            .load_balancers
            .get(load_balancer_id)
            .map(|lb| lb.members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove a droplet behind the controller's back
    pub fn remove_instance(&self, id: u64) {
        self.lock().droplets.remove(&id);
    }

    /// Remove a load balancer behind the controller's back
    pub fn remove_load_balancer(&self, id: &str) {
        self.lock().load_balancers.remove(id);
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `call` and returns the injected failure, if any
    pub(crate) fn record(&self, call: CloudCall) -> Result<(), CloudError> {
        let mut state = self.lock();
        let operation = call.operation();
        state.calls.push(call);
        match state.failures.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(kind) => Err(kind.to_error(operation)),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl DigitalOceanClientTrait for MockDigitalOceanClient {
    async fn validate_token(&self) -> Result<(), CloudError> {
        self.record(CloudCall::ValidateToken)
    }

    // Droplets - delegated to droplets module
    async fn find_instance(&self, name: &str) -> Result<Option<Droplet>, CloudError> {
        droplets::find_instance(self, name).await
    }

    async fn get_instance(&self, id: u64) -> Result<Droplet, CloudError> {
        droplets::get_instance(self, id).await
    }

    async fn create_instance(&self, request: CreateInstanceRequest) -> Result<Droplet, CloudError> {
        droplets::create_instance(self, request).await
    }

    async fn delete_instance(&self, id: u64) -> Result<(), CloudError> {
        droplets::delete_instance(self, id).await
    }

    // Load balancers - delegated to load_balancers module
    async fn find_load_balancer(&self, name: &str) -> Result<Option<LoadBalancer>, CloudError> {
        load_balancers::find_load_balancer(self, name).await
    }

    async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancer, CloudError> {
        load_balancers::get_load_balancer(self, id).await
    }

    async fn create_load_balancer(&self, request: CreateLoadBalancerRequest) -> Result<LoadBalancer, CloudError> {
        load_balancers::create_load_balancer(self, request).await
    }

    async fn delete_load_balancer(&self, id: &str) -> Result<(), CloudError> {
        load_balancers::delete_load_balancer(self, id).await
    }

    async fn register_with_load_balancer(&self, load_balancer_id: &str, instance_id: u64) -> Result<(), CloudError> {
        load_balancers::register(self, load_balancer_id, instance_id).await
    }

    async fn deregister_from_load_balancer(&self, load_balancer_id: &str, instance_id: u64) -> Result<(), CloudError> {
        load_balancers::deregister(self, load_balancer_id, instance_id).await
    }
}
