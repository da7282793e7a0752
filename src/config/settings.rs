//! Configuration structures for echolog

use crate::{EchoLogError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener settings
    pub server: ServerSettings,
    /// Log store settings
    pub storage: StorageSettings,
    /// Timestamp writer settings
    pub timestamp: TimestampSettings,
    /// Shutdown and drain settings
    pub shutdown: ShutdownSettings,
    /// Diagnostic logging settings
    pub logging: LoggingSettings,
}

/// Core listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind; `::` listens on both IPv6 and IPv4 where the OS allows it
    pub bind_address: IpAddr,
    /// TCP port; 0 picks an ephemeral port
    pub port: u16,
    /// Maximum bytes read from a client per receive call
    pub recv_chunk_size: usize,
}

/// Log store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Backing file of the shared log. Truncated at startup, removed at shutdown.
    pub data_file: PathBuf,
}

/// Timestamp writer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampSettings {
    /// Run the background timestamp writer
    pub enabled: bool,
    /// Period between timestamp records, in milliseconds
    pub interval_ms: u64,
}

/// Shutdown settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    /// How long draining waits for live workers before aborting their sockets
    pub drain_grace_ms: u64,
}

/// Diagnostic logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Forward diagnostics to the systemd journal (requires the `journald` feature)
    pub journald: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            port: 9000,
            recv_chunk_size: 1024,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("/var/tmp/aesdsocketdata"),
        }
    }
}

impl Default for TimestampSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 10_000,
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_grace_ms: 1_000,
        }
    }
}

impl ServerConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EchoLogError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ServerConfig = toml::from_str(content)
            .map_err(|e| EchoLogError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.recv_chunk_size == 0 {
            return Err(EchoLogError::Config(
                "Receive chunk size must be greater than zero".to_string(),
            ));
        }
        if self.storage.data_file.as_os_str().is_empty() {
            return Err(EchoLogError::Config("Data file path cannot be empty".to_string()));
        }
        if self.timestamp.enabled && self.timestamp.interval_ms == 0 {
            return Err(EchoLogError::Config(
                "Timestamp interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Socket address the listener binds to
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.bind_address, self.server.port)
    }

    /// Timestamp period as a `Duration`
    pub fn timestamp_interval(&self) -> Duration {
        Duration::from_millis(self.timestamp.interval_ms)
    }

    /// Drain grace period as a `Duration`
    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown.drain_grace_ms)
    }
}
