//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files (`~/.config/spnego/config.toml` by default)
//! - Environment variables (`SPNEGO_*`)
//! - CLI arguments (applied by the binary on top)
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//! service_name = "HTTP@api.example.com"
//!
//! [engine]
//! realm_secret_file = "/etc/spnego/realm.key"
//! token_lifetime_secs = 600
//!
//! [client]
//! principal = "alice@EXAMPLE.COM"
//! mutual = true
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{RealmEngine, RealmSecret};
use crate::error::{Result, SpnegoError};
use crate::server::ServerConfig;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP service configuration
    #[serde(default)]
    pub server: ServerSection,

    /// Security engine configuration
    #[serde(default)]
    pub engine: EngineSection,

    /// Client configuration
    #[serde(default)]
    pub client: ClientSection,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            SpnegoError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;

        toml::from_str(&content)
            .map_err(|e| SpnegoError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from `SPNEGO_*` environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        // Server settings
        if let Some(host) = lookup("SPNEGO_HOST") {
            config.server.host = host;
        }
        if let Some(port) = lookup("SPNEGO_PORT") {
            if let Ok(port) = port.parse() {
                config.server.port = port;
            }
        }
        if let Some(name) = lookup("SPNEGO_SERVICE_NAME") {
            config.server.service_name = Some(name);
        }

        // Engine settings
        if let Some(path) = lookup("SPNEGO_REALM_SECRET_FILE") {
            config.engine.realm_secret_file = Some(PathBuf::from(path));
        }
        if let Some(secret) = lookup("SPNEGO_REALM_SECRET") {
            config.engine.realm_secret = Some(secret);
        }

        // Client settings
        if let Some(principal) = lookup("SPNEGO_PRINCIPAL") {
            config.client.principal = Some(principal);
        }
        if let Some(mutual) = lookup("SPNEGO_MUTUAL") {
            config.client.mutual = matches!(mutual.as_str(), "1" | "true" | "yes");
        }

        config
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("spnego").join("config.toml"))
    }

    /// Load `path` (or the default file if it exists), then apply the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(path)?,
                None => Self::default(),
            },
        };
        Ok(base.merge(Self::from_env()))
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(self, other: Self) -> Self {
        let server_defaults = ServerSection::default();
        let engine_defaults = EngineSection::default();

        Self {
            server: ServerSection {
                host: pick(self.server.host, other.server.host, &server_defaults.host),
                port: pick(self.server.port, other.server.port, &server_defaults.port),
                service_name: other.server.service_name.or(self.server.service_name),
                max_body_size: pick(
                    self.server.max_body_size,
                    other.server.max_body_size,
                    &server_defaults.max_body_size,
                ),
                logging: self.server.logging && other.server.logging,
            },
            engine: EngineSection {
                realm_secret_file: other
                    .engine
                    .realm_secret_file
                    .or(self.engine.realm_secret_file),
                realm_secret: other.engine.realm_secret.or(self.engine.realm_secret),
                principal: pick(
                    self.engine.principal,
                    other.engine.principal,
                    &engine_defaults.principal,
                ),
                token_lifetime_secs: pick(
                    self.engine.token_lifetime_secs,
                    other.engine.token_lifetime_secs,
                    &engine_defaults.token_lifetime_secs,
                ),
                clock_skew_secs: pick(
                    self.engine.clock_skew_secs,
                    other.engine.clock_skew_secs,
                    &engine_defaults.clock_skew_secs,
                ),
            },
            client: ClientSection {
                principal: other.client.principal.or(self.client.principal),
                service_name: other.client.service_name.or(self.client.service_name),
                mutual: self.client.mutual || other.client.mutual,
                timeout_secs: pick(
                    self.client.timeout_secs,
                    other.client.timeout_secs,
                    &ClientSection::default().timeout_secs,
                ),
            },
        }
    }
}

fn pick<T: PartialEq>(base: T, other: T, default: &T) -> T {
    if other != *default {
        other
    } else {
        base
    }
}

/// `[server]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Accepting principal (engine principal if unset)
    pub service_name: Option<String>,

    /// Maximum request body size in bytes
    pub max_body_size: usize,

    /// Enable request tracing
    pub logging: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            host: defaults.addr.ip().to_string(),
            port: defaults.addr.port(),
            service_name: None,
            max_body_size: defaults.max_body_size,
            logging: true,
        }
    }
}

impl ServerSection {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build the runtime server configuration
    pub fn to_server_config(&self) -> Result<ServerConfig> {
        let addr: SocketAddr = self.listen_addr().parse().map_err(|e| {
            SpnegoError::Config(format!("invalid listen address {}: {e}", self.listen_addr()))
        })?;

        let mut config = ServerConfig::default()
            .with_addr(addr)
            .with_max_body_size(self.max_body_size);
        if let Some(name) = &self.service_name {
            config = config.with_service_name(name.clone());
        }
        if !self.logging {
            config = config.without_logging();
        }
        Ok(config)
    }
}

/// `[engine]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// File holding the base64 realm secret
    pub realm_secret_file: Option<PathBuf>,

    /// Inline base64 realm secret (prefer `realm_secret_file`)
    pub realm_secret: Option<String>,

    /// Default principal of this process
    pub principal: String,

    /// Token and context lifetime in seconds
    pub token_lifetime_secs: u64,

    /// Tolerated clock skew in seconds
    pub clock_skew_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            realm_secret_file: None,
            realm_secret: None,
            principal: "HTTP@localhost".to_string(),
            token_lifetime_secs: 600,
            clock_skew_secs: 300,
        }
    }
}

impl EngineSection {
    /// Default realm secret location
    pub fn default_secret_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("spnego").join("realm.key"))
    }

    /// Resolve the realm secret: inline, configured file, then default file.
    pub fn load_secret(&self) -> Result<RealmSecret> {
        if let Some(secret) = &self.realm_secret {
            return Ok(RealmSecret::from_base64(secret)?);
        }

        let path = self
            .realm_secret_file
            .clone()
            .or_else(Self::default_secret_path)
            .ok_or_else(|| SpnegoError::Config("no realm secret configured".to_string()))?;

        RealmSecret::load(&path).map_err(|e| {
            SpnegoError::Config(format!("Failed to load realm secret {}: {e}", path.display()))
        })
    }

    /// Build the shared-realm engine for `principal` (or the configured one)
    pub fn build_engine(&self, principal: Option<&str>) -> Result<RealmEngine> {
        let principal = principal.unwrap_or(&self.principal);
        Ok(RealmEngine::new(self.load_secret()?, principal)
            .with_token_lifetime(Duration::from_secs(self.token_lifetime_secs))
            .with_clock_skew(Duration::from_secs(self.clock_skew_secs)))
    }
}

/// `[client]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// Initiating principal
    pub principal: Option<String>,

    /// Fixed target service name (derived from the URL if unset)
    pub service_name: Option<String>,

    /// Require mutual authentication
    pub mutual: bool,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            principal: None,
            service_name: None,
            mutual: false,
            timeout_secs: 30,
        }
    }
}
