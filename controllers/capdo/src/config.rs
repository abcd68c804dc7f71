//! Controller configuration
//!
//! Everything is read from environment variables at startup. Only the API
//! token is required; every interval has a default.

use crate::error::ControllerError;
use digitalocean_client::DEFAULT_API_URL;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Requeue intervals used by the reconcilers and the controllers' error policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequeueIntervals {
    /// Poll interval while a droplet or load balancer is provisioning
    pub instance_poll: Duration,
    /// Requeue interval while waiting for another object
    pub precondition: Duration,
    /// First transient-error backoff
    pub backoff_min: Duration,
    /// Cap of the transient-error backoff
    pub backoff_max: Duration,
    /// Requeue interval after a permanent error
    pub permanent: Duration,
}

impl Default for RequeueIntervals {
    fn default() -> Self {
        Self {
            instance_poll: Duration::from_secs(10),
            precondition: Duration::from_secs(15),
            backoff_min: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            permanent: Duration::from_secs(600),
        }
    }
}

#[derive(Clone)]
pub struct ControllerConfig {
    pub api_url: String,
    pub token: String,
    pub api_timeout: Duration,
    /// Namespace to watch, all namespaces when unset
    pub namespace: Option<String>,
    pub workers: usize,
    pub resync_interval: Duration,
    pub intervals: RequeueIntervals,
    pub probe_bind_address: SocketAddr,
}

// Keep the token out of logs
impl fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("api_url", &self.api_url)
            .field("token", &"<redacted>")
            .field("api_timeout", &self.api_timeout)
            .field("namespace", &self.namespace)
            .field("workers", &self.workers)
            .field("resync_interval", &self.resync_interval)
            .field("intervals", &self.intervals)
            .field("probe_bind_address", &self.probe_bind_address)
            .finish()
    }
}

impl ControllerConfig {
    /// Loads the configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("DIGITALOCEAN_ACCESS_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig(
                    "DIGITALOCEAN_ACCESS_TOKEN environment variable is required".to_string(),
                )
            })?;

        let seconds = |key: &str, default: u64| -> Result<Duration, ControllerError> {
            match lookup(key) {
                None => Ok(Duration::from_secs(default)),
                Some(value) => value.trim().parse().map(Duration::from_secs).map_err(|_| {
                    ControllerError::InvalidConfig(format!("{} must be a number of seconds, got '{}'", key, value))
                }),
            }
        };

        let intervals = RequeueIntervals {
            instance_poll: seconds("INSTANCE_POLL_INTERVAL_SECS", 10)?,
            precondition: seconds("PRECONDITION_REQUEUE_SECS", 15)?,
            backoff_min: seconds("TRANSIENT_BACKOFF_MIN_SECS", 5)?,
            backoff_max: seconds("TRANSIENT_BACKOFF_MAX_SECS", 300)?,
            permanent: seconds("PERMANENT_REQUEUE_SECS", 600)?,
        };
        if intervals.backoff_min.is_zero() || intervals.backoff_min > intervals.backoff_max {
            return Err(ControllerError::InvalidConfig(format!(
                "transient backoff bounds are invalid: min {:?}, max {:?}",
                intervals.backoff_min, intervals.backoff_max
            )));
        }

        let workers = match lookup("RECONCILE_WORKERS") {
            None => 3,
            Some(value) => match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ControllerError::InvalidConfig(format!(
                        "RECONCILE_WORKERS must be a positive integer, got '{}'",
                        value
                    )))
                }
            },
        };

        let probe_bind_address = lookup("PROBE_BIND_ADDRESS")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let probe_bind_address = probe_bind_address.parse().map_err(|_| {
            ControllerError::InvalidConfig(format!(
                "PROBE_BIND_ADDRESS is not a socket address: '{}'",
                probe_bind_address
            ))
        })?;

        Ok(Self {
            api_url: lookup("DIGITALOCEAN_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            token,
            api_timeout: seconds("DIGITALOCEAN_API_TIMEOUT_SECS", 30)?,
            namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            workers,
            resync_interval: seconds("RESYNC_INTERVAL_SECS", 600)?,
            intervals,
            probe_bind_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::from_lookup(lookup(&[("DIGITALOCEAN_ACCESS_TOKEN", "dop_v1_abc")])).unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.api_timeout, Duration::from_secs(30));
        assert_eq!(config.namespace, None);
        assert_eq!(config.workers, 3);
        assert_eq!(config.resync_interval, Duration::from_secs(600));
        assert_eq!(config.intervals, RequeueIntervals::default());
        assert_eq!(config.probe_bind_address.port(), 8080);
    }

    #[test]
    fn test_token_required() {
        let err = ControllerConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));

        let err = ControllerConfig::from_lookup(lookup(&[("DIGITALOCEAN_ACCESS_TOKEN", "  ")])).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }

    #[test]
    fn test_overrides() {
        let config = ControllerConfig::from_lookup(lookup(&[
            ("DIGITALOCEAN_ACCESS_TOKEN", "dop_v1_abc"),
            ("WATCH_NAMESPACE", "capdo-system"),
            ("RECONCILE_WORKERS", "8"),
            ("INSTANCE_POLL_INTERVAL_SECS", "3"),
            ("PROBE_BIND_ADDRESS", "127.0.0.1:9440"),
        ]))
        .unwrap();
        assert_eq!(config.namespace.as_deref(), Some("capdo-system"));
        assert_eq!(config.workers, 8);
        assert_eq!(config.intervals.instance_poll, Duration::from_secs(3));
        assert_eq!(config.probe_bind_address.port(), 9440);
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        for (key, value) in [
            ("RECONCILE_WORKERS", "0"),
            ("RESYNC_INTERVAL_SECS", "ten"),
            ("TRANSIENT_BACKOFF_MIN_SECS", "600"),
            ("PROBE_BIND_ADDRESS", "localhost"),
        ] {
            let result = ControllerConfig::from_lookup(lookup(&[("DIGITALOCEAN_ACCESS_TOKEN", "t"), (key, value)]));
            assert!(matches!(result, Err(ControllerError::InvalidConfig(_))), "{} = {}", key, value);
        }
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = ControllerConfig::from_lookup(lookup(&[("DIGITALOCEAN_ACCESS_TOKEN", "dop_v1_secret")])).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("dop_v1_secret"));
        assert!(debug.contains("<redacted>"));
    }
}
