//! Build service connection settings.

use serde::{Deserialize, Serialize};

/// Hosted build service.
pub const DEFAULT_BASE_URL: &str = "https://api.sdkci.dev";

/// Build service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Service root URL
    pub base_url: String,
    /// Bearer token (unauthenticated requests are rejected by the hosted service)
    pub api_key: Option<String>,
    /// Project the builds belong to
    pub project: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: std::env::var("SDKCI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            api_key: std::env::var("SDKCI_API_KEY").ok().filter(|k| !k.is_empty()),
            project: std::env::var("SDKCI_PROJECT").unwrap_or_default(),
        }
    }
}

impl ApiConfig {
    /// Create a config from `SDKCI_BASE_URL`, `SDKCI_API_KEY` and `SDKCI_PROJECT`
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create config for a specific service and project
    pub fn new(base_url: &str, project: &str) -> Self {
        ApiConfig {
            base_url: base_url.to_string(),
            api_key: None,
            project: project.to_string(),
        }
    }

    /// Set the bearer token
    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }
}
