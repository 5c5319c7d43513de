//! Bridge configuration.
//!
//! [`BridgeConfig`] is a plain struct shared by every subsystem. It is
//! layered from, lowest to highest precedence:
//!
//! 1. built-in defaults
//! 2. a TOML file (`--config` or `<config_dir>/rotator-bridge/config.toml`)
//! 3. environment variables (`ROTATOR_DEVICE`, `ROTATOR_SECRET`, `ROTATOR_TCP_PORT`)
//! 4. CLI flags, applied by the binary
//!
//! Durations are stored in milliseconds so the file format stays flat.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rotator_protocol::AUTH_SEPARATOR;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default TCP control port.
pub const DEFAULT_TCP_PORT: u16 = 9999;

/// Default UDP discovery port.
pub const DEFAULT_DISCOVERY_PORT: u16 = 8888;

/// Default serial baud rate of the rotator controller.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default device path.
pub const DEFAULT_DEVICE_PATH: &str = "/dev/ttyUSB0";

/// Shared secret used when none is configured.
pub const DEFAULT_SECRET: &str = "MyRotatorPassword";

/// Environment variable overriding the device path.
pub const ENV_DEVICE: &str = "ROTATOR_DEVICE";

/// Environment variable overriding the shared secret.
pub const ENV_SECRET: &str = "ROTATOR_SECRET";

/// Environment variable overriding the TCP port.
pub const ENV_TCP_PORT: &str = "ROTATOR_TCP_PORT";

/// Runtime configuration for the bridge.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Serial device path (e.g. `/dev/ttyUSB0`, `COM3`)
    pub device_path: String,

    /// Serial baud rate; the controller expects 9600 8-N-1
    pub baud_rate: u32,

    /// Address the TCP listener binds to
    pub bind_address: IpAddr,

    /// TCP control protocol port (0 picks an ephemeral port)
    pub tcp_port: u16,

    /// Destination address of discovery broadcasts
    pub discovery_address: Ipv4Addr,

    /// Destination port of discovery broadcasts
    pub discovery_port: u16,

    /// Shared secret clients must present as `<secret>|`
    pub secret: String,

    /// Wait after a failed device open
    pub reconnect_backoff_ms: u64,

    /// Wait after a read failure before reopening the device
    pub read_failure_delay_ms: u64,

    /// Bound on one serial write+flush
    pub write_timeout_ms: u64,

    /// Heartbeat period
    pub heartbeat_interval_ms: u64,

    /// Discovery broadcast period
    pub discovery_interval_ms: u64,

    /// State publication period
    pub publish_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device_path: DEFAULT_DEVICE_PATH.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tcp_port: DEFAULT_TCP_PORT,
            discovery_address: Ipv4Addr::BROADCAST,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            secret: DEFAULT_SECRET.to_string(),
            reconnect_backoff_ms: 5_000,
            read_failure_delay_ms: 1_000,
            write_timeout_ms: 1_000,
            heartbeat_interval_ms: 1_000,
            discovery_interval_ms: 2_000,
            publish_interval_ms: 500,
        }
    }
}

impl BridgeConfig {
    /// Returns the platform config file location, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("rotator-bridge").join("config.toml"))
    }

    /// Loads defaults, then the given file (or the default location).
    ///
    /// A missing file at the default location is not an error; a missing
    /// file that was named explicitly is.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Reads and parses a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml(&text).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: Some(path.to_path_buf()),
                error,
            },
            other => other,
        })
    }

    /// Parses TOML text; absent keys keep their defaults.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: None,
            error: e.to_string(),
        })
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Applies `ROTATOR_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(device) = lookup(ENV_DEVICE) {
            self.device_path = device;
        }
        if let Some(secret) = lookup(ENV_SECRET) {
            self.secret = secret;
        }
        if let Some(port) = lookup(ENV_TCP_PORT) {
            self.tcp_port = port.trim().parse().map_err(|_| ConfigError::Invalid {
                field: ENV_TCP_PORT,
                reason: format!("'{port}' is not a port number"),
            })?;
        }
        Ok(())
    }

    /// Checks values that would make the bridge unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.is_empty() {
            return Err(ConfigError::Invalid {
                field: "secret",
                reason: "must not be empty".to_string(),
            });
        }
        if self.secret.contains(AUTH_SEPARATOR) {
            return Err(ConfigError::Invalid {
                field: "secret",
                reason: format!("must not contain '{AUTH_SEPARATOR}'"),
            });
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid {
                field: "baud_rate",
                reason: "must be positive".to_string(),
            });
        }

        let intervals = [
            ("reconnect_backoff_ms", self.reconnect_backoff_ms),
            ("write_timeout_ms", self.write_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("discovery_interval_ms", self.discovery_interval_ms),
            ("publish_interval_ms", self.publish_interval_ms),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be positive".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Address of the TCP listener.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.tcp_port)
    }

    /// Destination of discovery datagrams.
    pub fn discovery_target(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.discovery_address, self.discovery_port))
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn read_failure_delay(&self) -> Duration {
        Duration::from_millis(self.read_failure_delay_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("device_path", &self.device_path)
            .field("baud_rate", &self.baud_rate)
            .field("listen_addr", &self.listen_addr())
            .field("discovery_target", &self.discovery_target())
            .field("secret", &"<redacted>")
            .field("reconnect_backoff_ms", &self.reconnect_backoff_ms)
            .field("read_failure_delay_ms", &self.read_failure_delay_ms)
            .field("write_timeout_ms", &self.write_timeout_ms)
            .field("heartbeat_interval_ms", &self.heartbeat_interval_ms)
            .field("discovery_interval_ms", &self.discovery_interval_ms)
            .field("publish_interval_ms", &self.publish_interval_ms)
            .finish()
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config{}: {error}", describe_path(.path))]
    Parse { path: Option<PathBuf>, error: String },

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn describe_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" file {}", p.display()))
        .unwrap_or_default()
}
