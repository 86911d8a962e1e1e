//! Configuration for winrmcp.
//!
//! Settings are merged from several sources, later ones winning:
//! - Default values
//! - An optional TOML file (`--config` or `WINRMCP_CONFIG`)
//! - Environment variables (`WINRMCP_*`)
//! - Command-line arguments (applied by the binary)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Default WinRM HTTP port
pub const DEFAULT_WINRM_PORT: u16 = 5985;

/// Default WinRM HTTPS port
pub const DEFAULT_WINRM_SSL_PORT: u16 = 5986;

/// Default maximum envelope size in bytes
pub const DEFAULT_MAX_ENVELOPE_SIZE: usize = 500 * 1000;

/// Default cap on pooled HTTP connections to the listener
pub const DEFAULT_MAX_CONNECTIONS_PER_HOST: usize = 300;

/// Default number of shells used by the copier
pub const DEFAULT_PARALLELISM: usize = 1;

/// Endpoint and transport settings for one WinRM listener.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Target hostname or IP address
    pub host: String,
    /// WinRM port (5985 for HTTP, 5986 for HTTPS)
    pub port: u16,
    /// Use HTTPS instead of HTTP
    pub use_tls: bool,
    /// User name sent with every request
    pub user: String,
    /// Password sent with every request
    pub password: String,
    /// Maximum envelope size announced to the listener; also bounds chunk size
    pub max_envelope_size: usize,
    /// Maximum pooled connections kept to the listener
    pub max_connections_per_host: usize,
    /// Skip TLS certificate verification
    pub insecure: bool,
    /// WS-Management operation timeout (long-poll duration for receives)
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
    /// HTTP request timeout; must exceed the operation timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Code page for console output
    pub codepage: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_WINRM_SSL_PORT,
            use_tls: true,
            user: String::new(),
            password: String::new(),
            max_envelope_size: DEFAULT_MAX_ENVELOPE_SIZE,
            max_connections_per_host: DEFAULT_MAX_CONNECTIONS_PER_HOST,
            insecure: false,
            operation_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(90),
            codepage: 65001, // UTF-8
        }
    }
}

impl ClientConfig {
    /// Create a new config for a host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Get the WinRM endpoint URL
    pub fn endpoint_url(&self) -> String {
        format_url(self.use_tls, &self.host, self.port)
    }

    /// Operation timeout in the `xs:duration` form used by WS-Management.
    pub fn operation_timeout_xml(&self) -> String {
        format!("PT{}S", self.operation_timeout.as_secs().max(1))
    }

    /// Checks the settings that can be rejected without a network round trip.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::validation("host must not be empty"));
        }
        if self.port == 0 {
            return Err(Error::validation("port must be in 1..=65535"));
        }
        if self.max_envelope_size == 0 {
            return Err(Error::validation("max envelope size must be positive"));
        }
        url::Url::parse(&self.endpoint_url())
            .map_err(|e| Error::validation(format!("invalid endpoint '{}': {e}", self.host)))?;
        Ok(())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("max_envelope_size", &self.max_envelope_size)
            .field("max_connections_per_host", &self.max_connections_per_host)
            .field("insecure", &self.insecure)
            .field("operation_timeout", &self.operation_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("codepage", &self.codepage)
            .finish()
    }
}

/// Formats the HTTP URL of a WinRM endpoint.
pub fn format_url(use_tls: bool, host: &str, port: u16) -> String {
    let scheme = if use_tls { "https" } else { "http" };
    format!("{}://{}:{}/wsman", scheme, host, port)
}

/// Copy settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CopyConfig {
    /// Number of shells opened for the copy
    pub parallelism: usize,
    /// Local directory to copy
    pub local_root: PathBuf,
    /// Remote directory the tree is written to
    pub remote_root: String,
    /// Remove the remote root before copying
    pub clean: bool,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            local_root: PathBuf::from("."),
            remote_root: "C:\\workspace".to_string(),
            clean: true,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listener settings
    pub client: ClientConfig,
    /// Copy settings
    pub copy: CopyConfig,
    /// Output polling backoff
    pub retry: RetryPolicy,
}

impl Config {
    /// Load configuration from an explicit path, `WINRMCP_CONFIG`, and the environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os("WINRMCP_CONFIG").map(PathBuf::from);
        let mut config = match config_path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => Config::default(),
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse '{}': {e}", path.display())))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // WINRMCP_HOST
        if let Ok(host) = std::env::var("WINRMCP_HOST") {
            self.client.host = host;
        }

        // WINRMCP_PORT
        if let Ok(port) = std::env::var("WINRMCP_PORT") {
            self.client.port = port
                .parse()
                .map_err(|e| Error::Config(format!("WINRMCP_PORT '{port}': {e}")))?;
        }

        // WINRMCP_USER
        if let Ok(user) = std::env::var("WINRMCP_USER") {
            self.client.user = user;
        }

        // WINRMCP_PASSWORD
        if let Ok(password) = std::env::var("WINRMCP_PASSWORD") {
            self.client.password = password;
        }

        // WINRMCP_PARALLELISM
        if let Ok(parallelism) = std::env::var("WINRMCP_PARALLELISM") {
            self.copy.parallelism = parallelism
                .parse()
                .map_err(|e| Error::Config(format!("WINRMCP_PARALLELISM '{parallelism}': {e}")))?;
        }

        // WINRMCP_INSECURE
        if std::env::var("WINRMCP_INSECURE").is_ok() {
            self.client.insecure = true;
        }

        Ok(())
    }
}
