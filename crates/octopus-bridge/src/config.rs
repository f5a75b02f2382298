//! Configuration for octopusd

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use octopus_session::{
    NativeAppConfig, SessionConfig, DEFAULT_AUTH_BASE_URL, DEFAULT_FABRIC_RESOURCE_SERVER,
    DEFAULT_FABRIC_SCOPE, DEFAULT_REDIRECT_URI,
};

/// Public client registered for the bridge.
pub const DEFAULT_CLIENT_ID: &str = "ee05bbfa-2a1a-4659-95df-ed8946e3aae6";

/// Main bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Login flow configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Event fabric configuration
    #[serde(default)]
    pub fabric: FabricConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: SocketAddr,

    /// Route serving MCP messages
    #[serde(default = "default_mcp_path")]
    pub mcp_path: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            mcp_path: default_mcp_path(),
            request_timeout_secs: default_request_timeout(),
            max_body_size: default_max_body_size(),
        }
    }
}

/// Login flow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Native-app client id; empty disables login
    #[serde(default)]
    pub client_id: Option<String>,

    /// Authorization server base URL
    #[serde(default = "default_auth_base_url")]
    pub base_url: String,

    /// Page that shows the code after approval
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    /// Requested scopes
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Resource server whose token authorizes control-plane calls
    #[serde(default = "default_fabric_resource_server")]
    pub fabric_resource_server: String,

    /// Request refresh tokens
    #[serde(default = "default_true")]
    pub refresh_tokens: bool,

    /// Persist tokens to this file; in memory when unset
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    /// Authorization server request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: Some(DEFAULT_CLIENT_ID.to_string()),
            base_url: default_auth_base_url(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            fabric_resource_server: default_fabric_resource_server(),
            refresh_tokens: true,
            token_file: None,
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl AuthConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            client_id: self.client_id.clone(),
            scopes: self.scopes.clone(),
            fabric_resource_server: self.fabric_resource_server.clone(),
        }
    }

    pub fn native_app_config(&self) -> NativeAppConfig {
        NativeAppConfig {
            base_url: self.base_url.clone(),
            redirect_uri: self.redirect_uri.clone(),
            refresh_tokens: self.refresh_tokens,
            request_timeout: Duration::from_secs(self.http_timeout_secs),
        }
    }
}

/// Broker backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-process broker (for development/testing)
    Memory {
        /// Partitions for newly registered topics
        #[serde(default = "default_partitions")]
        partitions: i32,
    },

    /// Remote fabric: HTTP control plane and Kafka REST proxy
    Rest {
        /// Control-plane base URL
        service_url: String,

        /// REST proxy base URL
        proxy_url: String,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Memory {
            partitions: default_partitions(),
        }
    }
}

/// Event fabric configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricConfig {
    #[serde(default)]
    pub backend: BackendConfig,

    /// Upper bound on a synchronous publish, in seconds
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,

    /// Broker and control-plane request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            delivery_timeout_secs: default_delivery_timeout(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_mcp_path() -> String {
    "/mcps/diaspora".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_auth_base_url() -> String {
    DEFAULT_AUTH_BASE_URL.to_string()
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_string()
}

fn default_scopes() -> Vec<String> {
    vec![DEFAULT_FABRIC_SCOPE.to_string(), "openid".to_string()]
}

fn default_fabric_resource_server() -> String {
    DEFAULT_FABRIC_RESOURCE_SERVER.to_string()
}

fn default_partitions() -> i32 {
    octopus_fabric::DEFAULT_PARTITIONS
}

fn default_delivery_timeout() -> u64 {
    10
}

fn default_http_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl BridgeConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `OCTOPUS__SECTION__KEY` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&BridgeConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("OCTOPUS")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.fabric.delivery_timeout_secs)
    }

    pub fn fabric_http_timeout(&self) -> Duration {
        Duration::from_secs(self.fabric.http_timeout_secs)
    }
}
