use std::time::Duration;

use crate::config::helpers::{optional_env, parse_bool_env, parse_optional_env};
use crate::error::ConfigError;

/// `DOCKER_HOST` schemes the Docker runtime can connect through. TLS
/// endpoints are not supported.
pub(crate) const DOCKER_HOST_SCHEMES: &[&str] = &["unix://", "npipe://", "tcp://", "http://"];

/// Container engine connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Engine endpoint (`unix://`, `npipe://`, `tcp://`, `http://`).
    /// `None` uses the platform defaults.
    pub docker_host: Option<String>,
    /// Host at which published ports are reachable. Overrides the value
    /// derived from `docker_host`.
    pub host_override: Option<String>,
    /// Pull images that are not present locally.
    pub auto_pull: bool,
    /// Leave containers behind when a running handle is dropped (for debugging).
    pub keep_containers: bool,
    /// Timeout for individual engine requests.
    pub connect_timeout: Duration,
    /// Grace period given to a container before it is killed on stop.
    pub stop_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            docker_host: None,
            host_override: None,
            auto_pull: true,
            keep_containers: false,
            connect_timeout: Duration::from_secs(120),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    /// Build the configuration from environment variables.
    pub fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let docker_host = optional_env("DOCKER_HOST")?;
        if let Some(ref host) = docker_host
            && !DOCKER_HOST_SCHEMES
                .iter()
                .any(|scheme| host.starts_with(scheme))
        {
            return Err(ConfigError::InvalidValue {
                key: "DOCKER_HOST".to_string(),
                message: format!(
                    "unsupported scheme in '{host}', expected one of {}",
                    DOCKER_HOST_SCHEMES.join(", ")
                ),
            });
        }

        Ok(Self {
            docker_host,
            host_override: optional_env("TESTBOX_HOST_OVERRIDE")?,
            auto_pull: parse_bool_env("TESTBOX_AUTO_PULL", defaults.auto_pull)?,
            keep_containers: parse_bool_env("TESTBOX_KEEP_CONTAINERS", defaults.keep_containers)?,
            connect_timeout: Duration::from_secs(parse_optional_env(
                "TESTBOX_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout.as_secs(),
            )?),
            stop_timeout: Duration::from_secs(parse_optional_env(
                "TESTBOX_STOP_TIMEOUT_SECS",
                defaults.stop_timeout.as_secs(),
            )?),
        })
    }

    /// Address at which published container ports can be reached.
    ///
    /// Remote engines (`tcp://` and friends) publish ports on their own
    /// interface, so the engine's host name is used in that case.
    pub fn host_address(&self) -> String {
        if let Some(ref host) = self.host_override {
            return host.clone();
        }

        self.docker_host
            .as_deref()
            .filter(|h| !h.starts_with("unix://") && !h.starts_with("npipe://"))
            .and_then(|h| url::Url::parse(h).ok())
            .and_then(|u| u.host_str().map(|s| s.to_string()))
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }
}
