//! DigitalOcean API client
//!
//! Implements the v2 REST API calls the provider needs:
//! /v2/droplets and /v2/load_balancers.

use crate::common::HttpClient;
use crate::error::CloudError;
use crate::models::*;
use crate::do_trait::DigitalOceanClientTrait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Public DigitalOcean API endpoint
pub const DEFAULT_API_URL: &str = "https://api.digitalocean.com";

const PAGE_SIZE: &str = "200";

#[derive(Deserialize)]
struct DropletEnvelope {
    droplet: Droplet,
}

#[derive(Deserialize)]
struct LoadBalancerEnvelope {
    load_balancer: LoadBalancer,
}

/// DigitalOcean API client
#[derive(Debug, Clone)]
pub struct DigitalOceanClient {
    http: HttpClient,
}

impl DigitalOceanClient {
    /// Create a new DigitalOcean client
    ///
    /// # Arguments
    /// * `base_url` - API base URL (e.g., "https://api.digitalocean.com")
    /// * `token` - personal access token
    /// * `timeout` - per-call deadline, so one stuck call cannot starve a worker
    pub fn new(base_url: String, token: String, timeout: Duration) -> Result<Self, CloudError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http: HttpClient::new(client, base_url, token),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }

    /// Validate the API token with a lightweight authenticated request
    pub async fn validate_token(&self) -> Result<(), CloudError> {
        debug!("Validating DigitalOcean token and connectivity");
        let _: serde_json::Value = self.http.get("/v2/account").await?;
        debug!("Token validated successfully");
        Ok(())
    }

    /// Droplets whose name matches exactly
    pub async fn list_droplets_by_name(&self, name: &str) -> Result<Vec<Droplet>, CloudError> {
        let path = format!(
            "/v2/droplets?{}",
            self.http.build_query_string(&[("name", name), ("per_page", PAGE_SIZE)])
        );
        let droplets: Vec<Droplet> = self.http.fetch_all_pages(&path, "droplets").await?;
        Ok(droplets.into_iter().filter(|d| d.name == name).collect())
    }

    /// All load balancers of the account
    pub async fn list_load_balancers(&self) -> Result<Vec<LoadBalancer>, CloudError> {
        let path = format!(
            "/v2/load_balancers?{}",
            self.http.build_query_string(&[("per_page", PAGE_SIZE)])
        );
        self.http.fetch_all_pages(&path, "load_balancers").await
    }
}

#[async_trait::async_trait]
impl DigitalOceanClientTrait for DigitalOceanClient {
    async fn validate_token(&self) -> Result<(), CloudError> {
        self.validate_token().await
    }

    async fn find_instance(&self, name: &str) -> Result<Option<Droplet>, CloudError> {
        let mut droplets = self.list_droplets_by_name(name).await?;
        // Oldest first if a previous crash left more than one behind
        droplets.sort_by_key(|d| d.id);
        Ok(droplets.into_iter().next())
    }

    async fn get_instance(&self, id: u64) -> Result<Droplet, CloudError> {
        let envelope: DropletEnvelope = self.http.get(&format!("/v2/droplets/{}", id)).await?;
        Ok(envelope.droplet)
    }

    async fn create_instance(&self, request: CreateInstanceRequest) -> Result<Droplet, CloudError> {
        let body = serde_json::to_value(&request)?;
        let envelope: DropletEnvelope = self.http.post("/v2/droplets", &body).await?;
        info!("Created droplet {} (id {})", envelope.droplet.name, envelope.droplet.id);
        Ok(envelope.droplet)
    }

    async fn delete_instance(&self, id: u64) -> Result<(), CloudError> {
        self.http.delete(&format!("/v2/droplets/{}", id), None).await?;
        info!("Deleted droplet {}", id);
        Ok(())
    }

    async fn find_load_balancer(&self, name: &str) -> Result<Option<LoadBalancer>, CloudError> {
        let load_balancers = self.list_load_balancers().await?;
        Ok(load_balancers.into_iter().find(|lb| lb.name == name))
    }

    async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancer, CloudError> {
        let envelope: LoadBalancerEnvelope = self
            .http
            .get(&format!("/v2/load_balancers/{}", urlencoding::encode(id)))
            .await?;
        Ok(envelope.load_balancer)
    }

    async fn create_load_balancer(&self, request: CreateLoadBalancerRequest) -> Result<LoadBalancer, CloudError> {
        let body = serde_json::to_value(&request)?;
        let envelope: LoadBalancerEnvelope = self.http.post("/v2/load_balancers", &body).await?;
        info!(
            "Created load balancer {} (id {})",
            envelope.load_balancer.name, envelope.load_balancer.id
        );
        Ok(envelope.load_balancer)
    }

    async fn delete_load_balancer(&self, id: &str) -> Result<(), CloudError> {
        self.http
            .delete(&format!("/v2/load_balancers/{}", urlencoding::encode(id)), None)
            .await?;
        info!("Deleted load balancer {}", id);
        Ok(())
    }

    async fn register_with_load_balancer(&self, load_balancer_id: &str, instance_id: u64) -> Result<(), CloudError> {
        // The API accepts droplets that are already members
        let body = serde_json::json!({ "droplet_ids": [instance_id] });
        self.http
            .post_no_content(
                &format!("/v2/load_balancers/{}/droplets", urlencoding::encode(load_balancer_id)),
                &body,
            )
            .await
    }

    async fn deregister_from_load_balancer(&self, load_balancer_id: &str, instance_id: u64) -> Result<(), CloudError> {
        let body = serde_json::json!({ "droplet_ids": [instance_id] });
        self.http
            .delete(
                &format!("/v2/load_balancers/{}/droplets", urlencoding::encode(load_balancer_id)),
                Some(&body),
            )
            .await
    }
}
