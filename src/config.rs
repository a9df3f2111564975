//! Portal configuration from TOML or environment

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::validation::DEFAULT_ACCESSION_UPLOAD_LIMIT;

/// Default host address
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default port number
pub const DEFAULT_PORT: u16 = 7007;

/// Default analysis service base URI
pub const DEFAULT_GATEWAY_URI: &str = "http://localhost:8007";

/// Default timeout for each call to the analysis service
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum upload size in bytes
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50_000;

/// Substitution models accepted out of the box
pub const DEFAULT_SUBSTITUTION_MODELS: &[&str] = &["HKY"];

/// Default CORS origins (localhost for development)
pub const DEFAULT_CORS_ORIGINS: &[&str] = &["http://localhost:7007", "http://127.0.0.1:7007"];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },

    /// A value failed validation
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Portal configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Server host address
    pub host: String,

    /// Server port
    pub port: u16,

    /// Allowed CORS origins
    pub cors_origins: Vec<String>,

    /// Base URI of the analysis service
    pub gateway_uri: String,

    /// Timeout applied to every analysis service call, in seconds
    pub request_timeout_secs: u64,

    /// Directory uploads are staged in
    pub upload_dir: PathBuf,

    /// Directory predictor templates are written to
    pub download_dir: PathBuf,

    /// Maximum upload size in bytes
    pub max_upload_bytes: usize,

    /// Accepted substitution models
    pub substitution_models: Vec<String>,

    /// Maximum number of lines read from an accession list
    pub accession_upload_limit: usize,

    /// Log level for tracing
    pub log_level: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
            gateway_uri: DEFAULT_GATEWAY_URI.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            upload_dir: PathBuf::from("uploads"),
            download_dir: PathBuf::from("public/downloads"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            substitution_models: DEFAULT_SUBSTITUTION_MODELS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            accession_upload_limit: DEFAULT_ACCESSION_UPLOAD_LIMIT,
            log_level: "info".to_string(),
        }
    }
}

impl PortalConfig {
    /// Load config from a TOML file
    ///
    /// Missing keys fall back to their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load config from environment variables with fallback to defaults
    ///
    /// Environment variables:
    /// - `ZOOPHY_HOST` - Server host
    /// - `ZOOPHY_PORT` - Server port
    /// - `ZOOPHY_GATEWAY_URI` - Analysis service base URI
    /// - `ZOOPHY_TIMEOUT_SECS` - Per-call timeout
    /// - `ZOOPHY_UPLOAD_DIR` - Upload staging directory
    /// - `ZOOPHY_DOWNLOAD_DIR` - Template download directory
    /// - `ZOOPHY_LOG_LEVEL` - Log level (trace, debug, info, warn, error)
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment overrides on top of this config
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = std::env::var("ZOOPHY_HOST") {
            self.host = host;
        }

        if let Ok(port_str) = std::env::var("ZOOPHY_PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                self.port = port;
            }
        }

        if let Ok(uri) = std::env::var("ZOOPHY_GATEWAY_URI") {
            self.gateway_uri = uri;
        }

        if let Ok(secs) = std::env::var("ZOOPHY_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.request_timeout_secs = secs;
            }
        }

        if let Ok(dir) = std::env::var("ZOOPHY_UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("ZOOPHY_DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(dir);
        }

        if let Ok(log_level) = std::env::var("ZOOPHY_LOG_LEVEL") {
            self.log_level = log_level;
        }

        self
    }

    /// Per-call timeout for the analysis service
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get the socket address for the server
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("Invalid address: {}", e)))
    }

    /// Get the full server URL
    #[must_use]
    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("Port cannot be zero".to_string()));
        }

        if self.host.is_empty() {
            return Err(ConfigError::Invalid("Host cannot be empty".to_string()));
        }

        if self.gateway_uri.trim().is_empty() {
            return Err(ConfigError::Invalid("Gateway URI cannot be empty".to_string()));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "Request timeout must be greater than zero".to_string(),
            ));
        }

        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "Max upload size must be greater than zero".to_string(),
            ));
        }

        if self.substitution_models.iter().all(|m| m.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "At least one substitution model must be configured".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.log_level
                )));
            }
        }

        Ok(())
    }
}
