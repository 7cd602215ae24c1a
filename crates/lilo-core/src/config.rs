//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broadcaster::DEFAULT_MAX_ROOM_ID_LEN;
use crate::oplog::LogLimits;

/// Top-level Lilo configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rooms: Option<RoomsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Largest accepted WebSocket message. Image pieces carry their raster
    /// inline, so this is generous.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// How often the server pings each connection.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            max_message_bytes: default_max_message_bytes(),
            ping_interval_secs: default_ping_interval_secs(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

fn default_max_message_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_ping_interval_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// A member silent for longer than this is evicted.
    #[serde(default = "default_presence_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    5
}

fn default_presence_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsConfig {
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,

    #[serde(default = "default_max_operations")]
    pub max_operations: usize,

    #[serde(default = "default_retain_operations")]
    pub retain_operations: usize,

    #[serde(default = "default_max_room_id_len")]
    pub max_room_id_len: usize,
}

fn default_gc_interval_secs() -> u64 {
    60
}

fn default_max_operations() -> usize {
    LogLimits::default().max_len
}

fn default_retain_operations() -> usize {
    LogLimits::default().retain
}

fn default_max_room_id_len() -> usize {
    DEFAULT_MAX_ROOM_ID_LEN
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "lilo_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> crate::error::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| crate::error::LiloError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw)?;

        json5::from_str(&substituted).map_err(|e| crate::error::LiloError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or_else(default_port)
    }

    pub fn bind_addr(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn max_message_bytes(&self) -> usize {
        self.gateway
            .as_ref()
            .map(|g| g.max_message_bytes)
            .unwrap_or_else(default_max_message_bytes)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(
            self.gateway
                .as_ref()
                .map(|g| g.ping_interval_secs)
                .unwrap_or_else(default_ping_interval_secs),
        )
    }

    pub fn cors_origins(&self) -> &[String] {
        self.gateway
            .as_ref()
            .map(|g| g.cors_origins.as_slice())
            .unwrap_or_default()
    }

    pub fn presence_sweep_interval(&self) -> Duration {
        Duration::from_secs(
            self.presence
                .as_ref()
                .map(|p| p.sweep_interval_secs)
                .unwrap_or_else(default_sweep_interval_secs),
        )
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_secs(
            self.presence
                .as_ref()
                .map(|p| p.timeout_secs)
                .unwrap_or_else(default_presence_timeout_secs),
        )
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(
            self.rooms
                .as_ref()
                .map(|r| r.gc_interval_secs)
                .unwrap_or_else(default_gc_interval_secs),
        )
    }

    pub fn log_limits(&self) -> LogLimits {
        self.rooms
            .as_ref()
            .map(|r| LogLimits {
                max_len: r.max_operations,
                retain: r.retain_operations,
            })
            .unwrap_or_default()
    }

    pub fn max_room_id_len(&self) -> usize {
        self.rooms
            .as_ref()
            .map(|r| r.max_room_id_len)
            .unwrap_or_else(default_max_room_id_len)
    }

    /// Get a config value by dotted path (e.g. "gateway.port").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
            if gw.ping_interval_secs == 0 {
                errors.push("gateway.ping_interval_secs must be positive".to_string());
            }
        }

        if let Some(presence) = &self.presence {
            if presence.sweep_interval_secs == 0 {
                errors.push("presence.sweep_interval_secs must be positive".to_string());
            }
            if presence.timeout_secs == 0 {
                errors.push("presence.timeout_secs must be positive".to_string());
            }
        }

        if self.presence_timeout() <= self.ping_interval() {
            warnings.push(format!(
                "presence timeout ({:?}) does not exceed the ping interval ({:?}); live clients may be evicted",
                self.presence_timeout(),
                self.ping_interval()
            ));
        }

        if let Some(rooms) = &self.rooms {
            if rooms.gc_interval_secs == 0 {
                errors.push("rooms.gc_interval_secs must be positive".to_string());
            }
            if rooms.retain_operations == 0 {
                errors.push("rooms.retain_operations must be positive".to_string());
            }
            if rooms.retain_operations > rooms.max_operations {
                errors.push(format!(
                    "rooms.retain_operations ({}) exceeds rooms.max_operations ({})",
                    rooms.retain_operations, rooms.max_operations
                ));
            }
            if rooms.max_room_id_len == 0 {
                errors.push("rooms.max_room_id_len must be positive".to_string());
            }
        }

        if let Some(logging) = &self.logging {
            if !matches!(logging.format.as_str(), "plain" | "json") {
                warnings.push(format!(
                    "Unknown log format '{}', falling back to plain",
                    logging.format
                ));
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Lilo data: `~/.lilo/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lilo")
}
