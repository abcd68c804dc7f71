//! DigitalOcean client errors

use thiserror::Error;

/// Errors that can occur when interacting with the DigitalOcean API
#[derive(Debug, Error)]
pub enum CloudError {
    /// HTTP transport error (connect failure, timeout, TLS)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource is busy, e.g. a load balancer still being provisioned (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request rate limit exceeded (429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// DigitalOcean is temporarily unavailable (5xx)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Invalid request such as an unknown region, size or image (400/422)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication failed (invalid or expired token, 401/403)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Any other API error
    #[error("DigitalOcean API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How a reconciler should react to a [`CloudError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The resource does not exist (success for deletes)
    NotFound,
    /// Retry with backoff
    Transient,
    /// Misconfiguration that only a spec change can fix
    Permanent,
    /// Anything else
    Unclassified,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Unclassified => "unclassified",
        }
    }
}

impl CloudError {
    /// Classifies the error for the reconcilers' retry policy
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Conflict(_) | Self::RateLimited(_) | Self::Unavailable(_) => ErrorClass::Transient,
            Self::Http(e) if e.is_timeout() || e.is_connect() => ErrorClass::Transient,
            Self::InvalidRequest(_) | Self::Authentication(_) => ErrorClass::Permanent,
            Self::Http(_) | Self::Api(_) | Self::Serialization(_) => ErrorClass::Unclassified,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }

    /// Maps a non-success HTTP status to an error
    pub fn from_status(status: reqwest::StatusCode, context: String) -> Self {
        match status.as_u16() {
            404 => Self::NotFound(context),
            409 => Self::Conflict(context),
            429 => Self::RateLimited(context),
            400 | 422 => Self::InvalidRequest(context),
            401 | 403 => Self::Authentication(context),
            500..=599 => Self::Unavailable(context),
            _ => Self::Api(context),
        }
    }
}
