//! Readiness gates for CAPDO
//!
//! Side-effect free predicates over Cluster API and DigitalOcean object
//! status, a generic poll-until-true waiter, Kubernetes-backed waiters for
//! test harnesses, and generators for e2e objects.

pub mod generate;
pub mod predicates;
pub mod wait;
pub mod waiters;

pub use generate::{ClusterGenerator, MachineGenerator};
pub use predicates::*;
pub use wait::{wait_for, wait_until_gone, WaitError, WaitOptions};
pub use waiters::Waiter;
