//! DigitalOceanClient trait for mocking
//!
//! The reconcilers only see this trait. The concrete `DigitalOceanClient`
//! implements it against the REST API, and tests use the in-memory mock.

use crate::error::CloudError;
use crate::models::*;

/// Cloud provisioning operations used by the reconcilers
///
/// Every operation is safe to retry. `find_*` look up by deterministic name
/// and return `Ok(None)` when nothing matches; `get_*` look up by a recorded
/// ID and return `CloudError::NotFound` when it is gone. Errors are returned
/// as-is and classified with `CloudError::class`.
#[async_trait::async_trait]
pub trait DigitalOceanClientTrait: Send + Sync {
    /// Validate the API token
    async fn validate_token(&self) -> Result<(), CloudError>;

    // Droplets
    async fn find_instance(&self, name: &str) -> Result<Option<Droplet>, CloudError>;
    async fn get_instance(&self, id: u64) -> Result<Droplet, CloudError>;
    async fn create_instance(&self, request: CreateInstanceRequest) -> Result<Droplet, CloudError>;
    async fn delete_instance(&self, id: u64) -> Result<(), CloudError>;

    // Load balancers
    async fn find_load_balancer(&self, name: &str) -> Result<Option<LoadBalancer>, CloudError>;
    async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancer, CloudError>;
    async fn create_load_balancer(&self, request: CreateLoadBalancerRequest) -> Result<LoadBalancer, CloudError>;
    async fn delete_load_balancer(&self, id: &str) -> Result<(), CloudError>;

    /// Add a droplet to a load balancer; already registered is success
    async fn register_with_load_balancer(&self, load_balancer_id: &str, instance_id: u64) -> Result<(), CloudError>;

    /// Remove a droplet from a load balancer; not registered is success
    async fn deregister_from_load_balancer(&self, load_balancer_id: &str, instance_id: u64) -> Result<(), CloudError>;
}
