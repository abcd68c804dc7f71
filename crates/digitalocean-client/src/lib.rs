//! DigitalOcean REST API Client
//!
//! The cloud provisioning surface of the CAPDO controller: droplets, load
//! balancers and load balancer membership.
//!
//! # Example
//!
//! ```no_run
//! use digitalocean_client::{CreateLoadBalancerRequest, DigitalOceanClient, DigitalOceanClientTrait};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = DigitalOceanClient::new(
//!     "https://api.digitalocean.com".to_string(),
//!     "your-api-token".to_string(),
//!     Duration::from_secs(30),
//! )?;
//!
//! // Find-or-create by deterministic name
//! let name = "default-demo-apiserver";
//! let lb = match client.find_load_balancer(name).await? {
//!     Some(lb) => lb,
//!     None => {
//!         let request = CreateLoadBalancerRequest::api_server(name, "nyc1", 6443, vec![]);
//!         client.create_load_balancer(request).await?
//!     }
//! };
//! println!("load balancer {} at {:?}", lb.id, lb.address());
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Classified errors**: `CloudError::class` drives retry policy
//! - **Pagination**: follows `links.pages.next`
//! - **Mocking**: `MockDigitalOceanClient` behind the `test-util` feature

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod do_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{DigitalOceanClient, DEFAULT_API_URL};
pub use common::HttpClient;
pub use do_trait::DigitalOceanClientTrait;
pub use error::{CloudError, ErrorClass};
pub use models::*;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{CloudCall, FailureKind, MockDigitalOceanClient, Operation};
