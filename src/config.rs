//! Operator configuration loaded from a YAML file.
//!
//! Controls the proxy webserver image/container name used for rendered
//! workloads and injected sidecars, and the admission webhook's independent
//! validation timeout. All fields are optional; built-in defaults apply.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default nginx image used when the config file does not override it.
pub const DEFAULT_NGINX_IMAGE: &str = "nginx:1.25.3";

/// Default name of the proxy container, also the name stripped on cleanup.
pub const DEFAULT_NGINX_CONTAINER_NAME: &str = "nginx";

const DEFAULT_VALIDATION_TIMEOUT_SECS: u64 = 5;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OperatorConfig {
    #[serde(default)]
    pub webserver: WebserverConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebserverConfig {
    /// Override for the proxy container image.
    #[serde(default)]
    pub image: Option<String>,

    /// Override for the proxy container name.
    #[serde(default)]
    pub container_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookConfig {
    /// Timeout for credential-secret lookups during admission, in seconds.
    /// Independent of the reconcile deadline.
    #[serde(default)]
    pub validation_timeout_second: Option<u64>,
}

impl OperatorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("failed to read {}: {e}", path.display()))
        })?;
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::ConfigError(format!("failed to parse {}: {e}", path.display())))
    }

    pub fn nginx_image(&self) -> &str {
        self.webserver
            .image
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_NGINX_IMAGE)
    }

    pub fn nginx_container_name(&self) -> &str {
        self.webserver
            .container_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_NGINX_CONTAINER_NAME)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(
            self.webhook
                .validation_timeout_second
                .unwrap_or(DEFAULT_VALIDATION_TIMEOUT_SECS),
        )
    }
}
