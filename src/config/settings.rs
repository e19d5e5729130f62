//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::credentials::Credential;
use crate::error::ConfigError;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Transport settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// FetchFox service settings.
    #[serde(default)]
    pub fetchfox: FetchFoxConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Applies environment overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `PORT` is not a port number.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// `PORT`, `FETCHFOX_API_KEY` and `FETCHFOX_HOST` replace the matching
    /// file values. Empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if `PORT` is not a port number.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(port) = var("PORT") {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::ValidationError {
                message: format!("PORT must be a port number, got '{port}'"),
            })?;
        }
        if let Some(key) = var("FETCHFOX_API_KEY") {
            self.fetchfox.api_key = Some(Credential::new(key.trim()));
        }
        if let Some(host) = var("FETCHFOX_HOST") {
            self.fetchfox.host = host.trim().to_string();
        }
        Ok(())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.transport == TransportKind::Http && self.server.port == 0 {
            return Err(ConfigError::ValidationError {
                message: "server.port must be between 1 and 65535".to_string(),
            });
        }

        if self.fetchfox.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "fetchfox.poll_interval_ms must be greater than 0".to_string(),
            });
        }

        if self.fetchfox.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError {
                message: "fetchfox.request_timeout_secs must be greater than 0".to_string(),
            });
        }

        self.fetchfox.host_url()?;
        Ok(())
    }
}

/// Which transport the server listens on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Newline-delimited JSON-RPC on stdin/stdout.
    #[default]
    Stdio,
    /// Streamable HTTP with per-client sessions.
    Http,
}

/// Transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Transport to serve. Default: stdio
    #[serde(default)]
    pub transport: TransportKind,

    /// Address the HTTP transport binds. Default: 0.0.0.0
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Port the HTTP transport binds. Default: 3000
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds without a request after which an idle HTTP session is
    /// closed. 0 keeps sessions until they are deleted. Default: 1800
    #[serde(default = "default_session_idle_timeout_secs")]
    pub session_idle_timeout_secs: u64,
}

impl ServerConfig {
    /// Socket address for the HTTP transport.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Idle time after which an HTTP session expires, if sessions expire.
    #[must_use]
    pub const fn session_idle_timeout(&self) -> Option<Duration> {
        match self.session_idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            bind_address: default_bind_address(),
            port: default_port(),
            session_idle_timeout_secs: default_session_idle_timeout_secs(),
        }
    }
}

const fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    3000
}

const fn default_session_idle_timeout_secs() -> u64 {
    1800
}

/// FetchFox service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchFoxConfig {
    /// Service base URL. Default: `https://api.fetchfox.ai`
    #[serde(default = "default_host")]
    pub host: String,

    /// Process-wide API key, used when a call carries no bearer token.
    #[serde(default)]
    pub api_key: Option<Credential>,

    /// Delay between job status polls in milliseconds. Default: 1000
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Timeout for a single HTTP request in seconds. Default: 30
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl FetchFoxConfig {
    /// Parses the service base URL.
    ///
    /// # Errors
    ///
    /// Returns an error unless the host is an absolute http(s) URL.
    pub fn host_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.host).map_err(|e| ConfigError::ValidationError {
            message: format!("fetchfox.host '{}' is not a valid URL: {e}", self.host),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError {
                message: format!("fetchfox.host must use http or https, got '{}'", url.scheme()),
            });
        }
        Ok(url)
    }

    /// Delay between job status polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Timeout for a single HTTP request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for FetchFoxConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            api_key: None,
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "https://api.fetchfox.ai".to_string()
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_request_timeout_secs() -> u64 {
    30
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}
