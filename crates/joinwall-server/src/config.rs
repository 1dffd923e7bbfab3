//! Panel configuration

use ipnetwork::IpNetwork;
use joinwall_gate::{ForwardedPolicy, GateOptions, DEFAULT_BLOCK_REASON};
use joinwall_store::{CoercionPolicy, StoreOptions};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "joinwall.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub gate: GateConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: IpAddr,

    /// Server port
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the JSON record file
    pub path: PathBuf,

    /// Create an empty record file on first start
    pub create_if_missing: bool,

    /// Treatment of non-numeric `max_accounts_per_ip` updates
    pub coercion: CoercionPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardedMode {
    Never,
    Always,
    Trusted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// When to believe `X-Forwarded-For`
    pub forwarded_for: ForwardedMode,

    /// Proxies allowed to set forwarding headers when `forwarded_for = "trusted"`
    pub trusted_proxies: Vec<IpNetwork>,

    /// Reason stored for blocks issued without one
    pub default_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port: 3000,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/database.json"),
            create_if_missing: true,
            coercion: CoercionPolicy::Lenient,
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            forwarded_for: ForwardedMode::Always,
            trusted_proxies: Vec::new(),
            default_reason: DEFAULT_BLOCK_REASON.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl PanelConfig {
    /// Loads the configuration.
    ///
    /// An explicitly named file must exist. Without one, `joinwall.toml` in the
    /// working directory is used when present, defaults otherwise. `JOINWALL_*`
    /// environment variables are applied on top.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load_from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Applies `JOINWALL_BIND`, `JOINWALL_PORT`, `JOINWALL_DATA` and `JOINWALL_LOG`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("JOINWALL_BIND") {
            self.server.bind_address = bind
                .parse()
                .map_err(|_| ConfigError::invalid("JOINWALL_BIND", format!("not an IP address: {}", bind)))?;
        }
        if let Some(port) = lookup("JOINWALL_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::invalid("JOINWALL_PORT", format!("not a port: {}", port)))?;
        }
        if let Some(path) = lookup("JOINWALL_DATA") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(level) = lookup("JOINWALL_LOG") {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::invalid("server.port", "must not be 0"));
        }
        if self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("store.path", "must not be empty"));
        }
        if self.gate.forwarded_for == ForwardedMode::Trusted && self.gate.trusted_proxies.is_empty() {
            return Err(ConfigError::invalid(
                "gate.trusted_proxies",
                "required when forwarded_for = \"trusted\"",
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.bind_address, self.server.port)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            create_if_missing: self.store.create_if_missing,
        }
    }

    pub fn gate_options(&self) -> GateOptions {
        GateOptions {
            default_reason: self.gate.default_reason.clone(),
        }
    }

    pub fn forwarded_policy(&self) -> ForwardedPolicy {
        match self.gate.forwarded_for {
            ForwardedMode::Never => ForwardedPolicy::Never,
            ForwardedMode::Always => ForwardedPolicy::Always,
            ForwardedMode::Trusted => {
                ForwardedPolicy::TrustedProxies(self.gate.trusted_proxies.clone())
            }
        }
    }
}
