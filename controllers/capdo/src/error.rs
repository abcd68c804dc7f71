//! Controller-specific error types.
//!
//! Every error a reconcile pass can return is mapped onto the same
//! [`ErrorClass`] the cloud adapter uses, so the retry policy is decided in
//! one place regardless of where the failure came from.

use digitalocean_client::{CloudError, ErrorClass};
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the CAPDO controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// DigitalOcean API error
    #[error("DigitalOcean error: {0}")]
    Cloud(#[from] CloudError),

    /// Object changed since it was read (stale resourceVersion)
    #[error("Conflict writing {0}: object was modified")]
    Conflict(String),

    /// Spec cannot be provisioned as written
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// Recorded droplet no longer exists
    #[error("Instance not found: {0}")]
    InstanceGone(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Probe server I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ControllerError {
    /// Classifies the error for the retry policy
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Cloud(e) => e.class(),
            Self::Kube(KubeError::Api(ae)) => match ae.code {
                404 => ErrorClass::NotFound,
                409 | 429 => ErrorClass::Transient,
                code if code >= 500 => ErrorClass::Transient,
                _ => ErrorClass::Unclassified,
            },
            Self::Conflict(_) => ErrorClass::Transient,
            Self::InvalidSpec(_) | Self::InstanceGone(_) | Self::InvalidConfig(_) => ErrorClass::Permanent,
            _ => ErrorClass::Unclassified,
        }
    }

    /// True when the error means the target is already gone
    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }
}
