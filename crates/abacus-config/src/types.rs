//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [server]                 # what `abacus serve` advertises and binds
//! [client]                 # where the CLI connects, and how long it waits
//! [logging]                # console level and file output
//! ```
//!
//! Every field is optional so a project-local file can override a single
//! value from the user config. Accessors on [`AbacusConfig`] fill in defaults.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Name advertised by the server during the handshake.
pub const DEFAULT_SERVER_NAME: &str = "math_server";

/// TCP listen address for `abacus serve`.
pub const DEFAULT_BIND: &str = "127.0.0.1:7878";

/// Endpoint the CLI connects to.
pub const DEFAULT_ENDPOINT: &str = "tcp://127.0.0.1:7878";

/// Per-request timeout, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Console log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbacusConfig {
    /// Server settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerSection>,

    /// Client settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientSection>,

    /// Logging settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingSection>,
}

impl AbacusConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// A config with every field set to its default, for `config init`.
    pub fn with_defaults() -> Self {
        Self {
            server: Some(ServerSection {
                name: Some(DEFAULT_SERVER_NAME.to_string()),
                bind: Some(DEFAULT_BIND.to_string()),
            }),
            client: Some(ClientSection {
                endpoint: Some(DEFAULT_ENDPOINT.to_string()),
                request_timeout_ms: Some(DEFAULT_REQUEST_TIMEOUT_MS),
            }),
            logging: Some(LoggingSection {
                level: Some(DEFAULT_LOG_LEVEL.to_string()),
                file: Some(true),
            }),
        }
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one, field by field (other takes priority).
    pub fn merge(&mut self, other: AbacusConfig) {
        if let Some(server) = other.server {
            self.server.get_or_insert_with(Default::default).merge(server);
        }
        if let Some(client) = other.client {
            self.client.get_or_insert_with(Default::default).merge(client);
        }
        if let Some(logging) = other.logging {
            self.logging.get_or_insert_with(Default::default).merge(logging);
        }
    }

    /// Check every set field, returning the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.server_bind()?;
        self.request_timeout()?;
        self.log_level()?;
        Ok(())
    }

    /// Server name, or the default.
    pub fn server_name(&self) -> &str {
        self.server
            .as_ref()
            .and_then(|s| s.name.as_deref())
            .unwrap_or(DEFAULT_SERVER_NAME)
    }

    /// Parsed listen address.
    pub fn server_bind(&self) -> Result<SocketAddr> {
        let bind = self
            .server
            .as_ref()
            .and_then(|s| s.bind.as_deref())
            .unwrap_or(DEFAULT_BIND);
        bind.parse()
            .map_err(|e| ConfigError::invalid("server.bind", format!("'{}': {}", bind, e)))
    }

    /// Client endpoint string, or the default.
    pub fn client_endpoint(&self) -> &str {
        self.client
            .as_ref()
            .and_then(|c| c.endpoint.as_deref())
            .unwrap_or(DEFAULT_ENDPOINT)
    }

    /// Per-request timeout. Zero is rejected.
    pub fn request_timeout(&self) -> Result<Duration> {
        let ms = self
            .client
            .as_ref()
            .and_then(|c| c.request_timeout_ms)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        if ms == 0 {
            return Err(ConfigError::invalid(
                "client.request_timeout_ms",
                "must be greater than zero",
            ));
        }
        Ok(Duration::from_millis(ms))
    }

    /// Console log level, or the default.
    pub fn log_level(&self) -> Result<&str> {
        let level = self
            .logging
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .unwrap_or(DEFAULT_LOG_LEVEL);
        if !LOG_LEVELS.contains(&level) {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("'{}' is not one of {}", level, LOG_LEVELS.join(", ")),
            ));
        }
        Ok(level)
    }

    /// Whether to write the JSON log file.
    pub fn log_to_file(&self) -> bool {
        self.logging.as_ref().and_then(|l| l.file).unwrap_or(true)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// `[server]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Name advertised in the handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// TCP listen address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

impl ServerSection {
    fn merge(&mut self, other: ServerSection) {
        if other.name.is_some() {
            self.name = other.name;
        }
        if other.bind.is_some() {
            self.bind = other.bind;
        }
    }
}

/// `[client]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// `tcp://host:port`, `host:port`, or `stdio:command args`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Bound on the wait for each response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

impl ClientSection {
    fn merge(&mut self, other: ClientSection) {
        if other.endpoint.is_some() {
            self.endpoint = other.endpoint;
        }
        if other.request_timeout_ms.is_some() {
            self.request_timeout_ms = other.request_timeout_ms;
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Console level (`trace` .. `error`, or `off`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Write JSON logs under `<config dir>/logs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<bool>,
}

impl LoggingSection {
    fn merge(&mut self, other: LoggingSection) {
        if other.level.is_some() {
            self.level = other.level;
        }
        if other.file.is_some() {
            self.file = other.file;
        }
    }
}
