use std::{collections::HashMap, net::SocketAddr};

use config::{Config, Environment};
use serde::Deserialize;
use tokio::time::Duration;

use crate::util::errors::StdError;

/// Prefix of every environment variable read by [`OperatorConfig::from_env`].
pub const ENV_PREFIX: &str = "GLANCE_OPERATOR";

/// Operator settings, read from `GLANCE_OPERATOR_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Requeue after a pass that left the instance Ready
    pub requeue_seconds: u64,
    /// Requeue while the workload or the keystone endpoint is not ready yet
    pub wait_seconds: u64,
    /// Upper bound of a single call to the cluster API
    pub api_timeout_seconds: u64,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
    /// Restrict the controller to one namespace, all namespaces when unset
    pub watch_namespace: Option<String>,
    pub bind_address: String,
    pub log_json: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            requeue_seconds: 300,
            wait_seconds: 10,
            api_timeout_seconds: 30,
            backoff_base_seconds: 5,
            backoff_max_seconds: 300,
            watch_namespace: None,
            bind_address: "0.0.0.0:8080".to_string(),
            log_json: false,
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self, StdError> {
        Self::from_environment(Environment::with_prefix(ENV_PREFIX))
    }

    /// Same as [`OperatorConfig::from_env`] but reading from the given variables.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, StdError> {
        Self::from_environment(Environment::with_prefix(ENV_PREFIX).source(Some(vars)))
    }

    fn from_environment(environment: Environment) -> Result<Self, StdError> {
        let settings = Config::builder()
            .add_source(environment.try_parsing(true))
            .build()
            .map_err(|e| StdError::ConfigError(e.to_string()))?;

        let mut config: OperatorConfig = settings
            .try_deserialize()
            .map_err(|e| StdError::ConfigError(e.to_string()))?;
        if config.watch_namespace.as_deref().is_some_and(|ns| ns.trim().is_empty()) {
            config.watch_namespace = None;
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), StdError> {
        if self.api_timeout_seconds == 0 {
            return Err(StdError::ConfigError(
                "api_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.backoff_base_seconds == 0 || self.backoff_base_seconds > self.backoff_max_seconds {
            return Err(StdError::ConfigError(format!(
                "backoff_base_seconds must be in 1..={}, got {}",
                self.backoff_max_seconds, self.backoff_base_seconds
            )));
        }
        self.bind_address
            .parse::<SocketAddr>()
            .map_err(|e| StdError::ConfigError(format!("bind_address {}: {}", self.bind_address, e)))?;
        Ok(())
    }

    pub fn requeue(&self) -> Duration {
        Duration::from_secs(self.requeue_seconds)
    }

    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_seconds)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_seconds)
    }

    /// Delay before retry number `attempt` (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let secs = self
            .backoff_base_seconds
            .saturating_mul(factor)
            .min(self.backoff_max_seconds);
        Duration::from_secs(secs)
    }
}
