//! Controller configuration from environment variables

use crate::error::ControllerError;
use std::time::Duration;

/// Everything `main` reads from the environment
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    pub backend_url: String,
    pub backend_token: String,
    /// YAML kind table overriding the built-in kinds
    pub kind_config_path: Option<String>,
    /// YAML file of shared read-only references
    pub references_path: Option<String>,
    pub resync_interval: Duration,
    pub workers: usize,
    pub call_timeout: Duration,
    pub backoff_min_seconds: u64,
    pub backoff_max_seconds: u64,
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend_token = lookup("BACKEND_TOKEN").ok_or_else(|| {
            ControllerError::InvalidConfig("BACKEND_TOKEN environment variable is required".to_string())
        })?;

        let config = Self {
            namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            backend_url: lookup("BACKEND_URL")
                .unwrap_or_else(|| "http://cloud-api.converge-system:8080".to_string()),
            backend_token,
            kind_config_path: lookup("KIND_CONFIG_PATH"),
            references_path: lookup("BOOTSTRAP_REFERENCES_PATH"),
            resync_interval: Duration::from_secs(parse(&lookup, "RESYNC_SECONDS", 300)?),
            workers: parse(&lookup, "WORKERS", 4)?,
            call_timeout: Duration::from_secs(parse(&lookup, "CALL_TIMEOUT_SECONDS", 30)?),
            backoff_min_seconds: parse(&lookup, "BACKOFF_MIN_SECONDS", reconciler::backoff::DEFAULT_MIN_SECONDS)?,
            backoff_max_seconds: parse(&lookup, "BACKOFF_MAX_SECONDS", reconciler::backoff::DEFAULT_MAX_SECONDS)?,
        };

        if config.resync_interval.is_zero() {
            return Err(ControllerError::InvalidConfig("RESYNC_SECONDS must be at least 1".to_string()));
        }
        if config.call_timeout.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "CALL_TIMEOUT_SECONDS must be at least 1".to_string(),
            ));
        }
        if config.workers == 0 {
            return Err(ControllerError::InvalidConfig("WORKERS must be at least 1".to_string()));
        }
        if config.backoff_max_seconds < config.backoff_min_seconds {
            return Err(ControllerError::InvalidConfig(format!(
                "BACKOFF_MAX_SECONDS ({}) is below BACKOFF_MIN_SECONDS ({})",
                config.backoff_max_seconds, config.backoff_min_seconds
            )));
        }
        Ok(config)
    }
}

fn parse<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ControllerError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            ControllerError::InvalidConfig(format!("{} must be a number, got {:?}", name, raw))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ControllerConfig, ControllerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ControllerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("BACKEND_TOKEN", "secret")]).unwrap();
        assert_eq!(config.namespace, None);
        assert_eq!(config.workers, 4);
        assert_eq!(config.resync_interval, Duration::from_secs(300));
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert_eq!(config.backoff_min_seconds, 5);
        assert_eq!(config.backoff_max_seconds, 300);
    }

    #[test]
    fn test_token_is_required() {
        assert!(matches!(config(&[]), Err(ControllerError::InvalidConfig(_))));
    }

    #[test]
    fn test_overrides_and_validation() {
        let config = config(&[
            ("BACKEND_TOKEN", "secret"),
            ("WATCH_NAMESPACE", "edge"),
            ("WORKERS", "8"),
            ("RESYNC_SECONDS", "60"),
        ])
        .unwrap();
        assert_eq!(config.namespace.as_deref(), Some("edge"));
        assert_eq!(config.workers, 8);
        assert_eq!(config.resync_interval, Duration::from_secs(60));

        assert!(config_err(&[("BACKEND_TOKEN", "s"), ("WORKERS", "many")]));
        assert!(config_err(&[("BACKEND_TOKEN", "s"), ("WORKERS", "0")]));
        assert!(config_err(&[("BACKEND_TOKEN", "s"), ("RESYNC_SECONDS", "0")]));
        assert!(config_err(&[("BACKEND_TOKEN", "s"), ("CALL_TIMEOUT_SECONDS", "0")]));
        assert!(config_err(&[
            ("BACKEND_TOKEN", "s"),
            ("BACKOFF_MIN_SECONDS", "60"),
            ("BACKOFF_MAX_SECONDS", "10"),
        ]));
    }

    fn config_err(vars: &[(&str, &str)]) -> bool {
        config(vars).is_err()
    }
}
