//! Server configuration.
//!
//! By default the server listens on `localhost:9090`, reads requests in
//! 2 KiB chunks and answers with `application/json`.
//!
//! | Variable                 | Field                  |
//! |--------------------------|------------------------|
//! | `MICROHTTP_HOST`         | `host`                 |
//! | `MICROHTTP_PORT`         | `port`                 |
//! | `MICROHTTP_READ_BUFFER`  | `read_buffer_size`     |
//! | `MICROHTTP_CONTENT_TYPE` | `default_content_type` |

use serde::Deserialize;
use thiserror::Error;

use crate::http::response::JSON_CONTENT_TYPE;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 9090;
/// Size of the single read performed per request.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 2 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },
}

/// Listener and protocol settings.
///
/// # Examples
///
/// ```
/// use microhttp::ServerConfig;
///
/// let config = ServerConfig::new("127.0.0.1", 8080);
/// assert_eq!(config.address(), "127.0.0.1:8080");
/// assert_eq!(config.read_buffer_size, 2048);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on the bytes read for one request; anything larger is cut
    /// off.
    pub read_buffer_size: usize,
    /// Content type for text replies that do not set their own.
    pub default_content_type: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            default_content_type: JSON_CONTENT_TYPE.to_owned(),
        }
    }
}

impl ServerConfig {
    /// Default settings listening on `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Returns `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Loads the configuration from `MICROHTTP_*` environment variables,
    /// falling back to defaults for unset ones.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] if a numeric variable does not parse or
    /// the read buffer size is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("MICROHTTP_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("MICROHTTP_PORT") {
            config.port = parse_var("MICROHTTP_PORT", port)?;
        }
        if let Some(size) = lookup("MICROHTTP_READ_BUFFER") {
            config.read_buffer_size = parse_var("MICROHTTP_READ_BUFFER", size)?;
        }
        if let Some(content_type) = lookup("MICROHTTP_CONTENT_TYPE") {
            config.default_content_type = content_type;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks values that parse but cannot be served with.
    ///
    /// Called by [`from_lookup`](Self::from_lookup) and again when binding, so
    /// configs built by hand or deserialized are covered too.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] if `read_buffer_size` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                var: "MICROHTTP_READ_BUFFER",
                value: "0".to_owned(),
            });
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { var, value })
}
