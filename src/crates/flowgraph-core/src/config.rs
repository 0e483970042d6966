//! Engine configuration and presets
//!
//! The engine receives a typed configuration; parsing a config file into
//! it is the embedder's job. Keys deserialize from snake_case, with the
//! legacy PascalCase spellings accepted as aliases. Durations are seconds.
//!
//! # Presets
//!
//! | Preset | Intent |
//! |---|---|
//! | `default()` | Balanced limits, plain HTTP allowed, private IPs blocked |
//! | `development()` | Local targets reachable: private IPs and plain HTTP allowed |
//! | `production()` | HTTPS only, tight response caps |
//! | `testing()` | Small limits so runaway workflows fail fast |
//!
//! # Examples
//!
//! ```rust
//! use flowgraph_core::config::EngineConfig;
//!
//! let config = EngineConfig::production();
//! assert!(config.validate().is_ok());
//! assert!(!config.allow_http);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Authentication settings for a named HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HttpClientConfig {
    pub name: String,
    /// none | basic | bearer
    #[serde(alias = "AuthType")]
    pub auth_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub default_headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub default_query_params: HashMap<String, String>,
    /// Per-client request timeout in seconds; falls back to `default_timeout`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

/// Typed engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Overall execution deadline in seconds; `None` = unbounded
    #[serde(alias = "MaxExecutionTime", skip_serializing_if = "Option::is_none")]
    pub max_execution_time: Option<f64>,

    /// Ceiling on the payload's node count
    #[serde(alias = "MaxNodes")]
    pub max_nodes: usize,

    /// Ceiling on `while_loop` / `for_each` iterations
    #[serde(alias = "MaxIterations")]
    pub max_iterations: u64,

    /// Allow the plain `http` scheme (https is always allowed)
    #[serde(alias = "AllowHTTP")]
    pub allow_http: bool,

    /// Reject hosts resolving to loopback / link-local / private ranges
    #[serde(alias = "BlockPrivateIPs", skip_serializing_if = "Option::is_none")]
    pub block_private_ips: Option<bool>,

    /// Deprecated alias for `block_private_ips`; honoured only when the
    /// primary key is absent
    #[serde(alias = "BlockInternalIPs", skip_serializing_if = "Option::is_none")]
    pub block_internal_ips: Option<bool>,

    /// Non-empty = only these hosts (and their subdomains) may be called
    #[serde(alias = "AllowedDomains")]
    pub allowed_domains: Vec<String>,

    /// Response body cap in bytes
    #[serde(alias = "MaxResponseSize")]
    pub max_response_size: u64,

    /// Follow 3xx responses (each hop re-validated)
    #[serde(alias = "FollowRedirects")]
    pub follow_redirects: bool,

    /// Redirect hop ceiling
    #[serde(alias = "MaxRedirects")]
    pub max_redirects: u32,

    /// Default HTTP request timeout in seconds
    #[serde(alias = "DefaultTimeout")]
    pub default_timeout: f64,

    /// Bounded concurrency for parallel `for_each`; `None` = available
    /// parallelism at runtime
    #[serde(alias = "MaxParallelism", skip_serializing_if = "Option::is_none")]
    pub max_parallelism: Option<usize>,

    /// Named, pre-authenticated HTTP clients
    #[serde(alias = "HTTPClients")]
    pub http_clients: Vec<HttpClientConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_execution_time: None,
            max_nodes: 1_000,
            max_iterations: 10_000,
            allow_http: true,
            block_private_ips: None,
            block_internal_ips: None,
            allowed_domains: Vec::new(),
            max_response_size: 10 * 1024 * 1024,
            follow_redirects: true,
            max_redirects: 5,
            default_timeout: 30.0,
            max_parallelism: None,
            http_clients: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Local development: private and loopback targets reachable.
    pub fn development() -> Self {
        Self {
            block_private_ips: Some(false),
            max_execution_time: Some(300.0),
            ..Self::default()
        }
    }

    /// Production hardening: HTTPS only, tighter caps.
    pub fn production() -> Self {
        Self {
            allow_http: false,
            block_private_ips: Some(true),
            max_execution_time: Some(120.0),
            max_response_size: 4 * 1024 * 1024,
            max_redirects: 3,
            default_timeout: 15.0,
            ..Self::default()
        }
    }

    /// Test runs: small limits so broken workflows fail fast.
    pub fn testing() -> Self {
        Self {
            max_execution_time: Some(10.0),
            max_nodes: 100,
            max_iterations: 1_000,
            max_response_size: 1024 * 1024,
            default_timeout: 5.0,
            ..Self::default()
        }
    }

    /// Effective private-IP policy, resolving the deprecated alias.
    pub fn blocks_private_ips(&self) -> bool {
        self.block_private_ips
            .or(self.block_internal_ips)
            .unwrap_or(true)
    }

    /// Effective `for_each` concurrency bound.
    pub fn effective_parallelism(&self) -> usize {
        self.max_parallelism.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    /// Reject invalid combinations before any execution starts.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_nodes == 0 {
            return Err("max_nodes must be positive".to_string());
        }
        if self.max_iterations == 0 {
            return Err("max_iterations must be positive".to_string());
        }
        if self.max_response_size == 0 {
            return Err("max_response_size must be positive".to_string());
        }
        if self.default_timeout <= 0.0 {
            return Err("default_timeout must be positive".to_string());
        }
        if let Some(t) = self.max_execution_time {
            if t <= 0.0 {
                return Err("max_execution_time must be positive".to_string());
            }
        }
        if let Some(p) = self.max_parallelism {
            if p == 0 {
                return Err("max_parallelism must be positive".to_string());
            }
        }

        let mut seen = std::collections::HashSet::new();
        for client in &self.http_clients {
            if client.name.is_empty() {
                return Err("http client name must not be empty".to_string());
            }
            if !seen.insert(client.name.as_str()) {
                return Err(format!("duplicate http client name '{}'", client.name));
            }
            if let Some(t) = client.timeout {
                if t <= 0.0 {
                    return Err(format!(
                        "http client '{}' timeout must be positive",
                        client.name
                    ));
                }
            }
            match client.auth_type.as_str() {
                "" | "none" => {}
                "basic" => {
                    if client.username.is_none() || client.password.is_none() {
                        return Err(format!(
                            "http client '{}' uses basic auth but lacks username/password",
                            client.name
                        ));
                    }
                }
                "bearer" => {
                    if client.token.is_none() {
                        return Err(format!(
                            "http client '{}' uses bearer auth but lacks a token",
                            client.name
                        ));
                    }
                }
                other => {
                    return Err(format!(
                        "http client '{}' has unknown auth_type '{}'",
                        client.name, other
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_presets_validate() {
        for config in [
            EngineConfig::default(),
            EngineConfig::development(),
            EngineConfig::production(),
            EngineConfig::testing(),
        ] {
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_default_blocks_private_ips() {
        assert!(EngineConfig::default().blocks_private_ips());
        assert!(!EngineConfig::development().blocks_private_ips());
    }

    #[test]
    fn test_deprecated_alias_honoured_when_primary_absent() {
        let config: EngineConfig =
            serde_json::from_value(json!({"block_internal_ips": false})).unwrap();
        assert!(!config.blocks_private_ips());

        // The primary key wins when both are present.
        let config: EngineConfig = serde_json::from_value(
            json!({"block_internal_ips": false, "block_private_ips": true}),
        )
        .unwrap();
        assert!(config.blocks_private_ips());
    }

    #[test]
    fn test_pascal_case_aliases() {
        let config: EngineConfig = serde_json::from_value(json!({
            "MaxNodes": 5,
            "AllowHTTP": false,
            "MaxRedirects": 1
        }))
        .unwrap();
        assert_eq!(config.max_nodes, 5);
        assert!(!config.allow_http);
        assert_eq!(config.max_redirects, 1);
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        let mut config = EngineConfig::default();
        config.max_nodes = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.max_execution_time = Some(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inconsistent_auth() {
        let mut config = EngineConfig::default();
        config.http_clients.push(HttpClientConfig {
            name: "api".to_string(),
            auth_type: "bearer".to_string(),
            ..Default::default()
        });
        assert!(config.validate().is_err());

        config.http_clients[0].token = Some("secret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_client_names() {
        let mut config = EngineConfig::default();
        for _ in 0..2 {
            config.http_clients.push(HttpClientConfig {
                name: "api".to_string(),
                auth_type: "none".to_string(),
                ..Default::default()
            });
        }
        assert!(config.validate().is_err());
    }
}
