//! Configuration loading.
//!
//! Values are layered: built-in defaults, then the TOML config file, then
//! `ROOMCAST__SECTION__KEY` environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const APP_NAME: &str = "roomcast";

// ============================================================================
// Hub / liveness
// ============================================================================

/// Liveness and capacity parameters for the hub and connection pumps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Seconds between transport pings sent by the write pump.
    pub probe_interval_secs: u64,
    /// Seconds the read pump waits for any frame (pongs included).
    pub pong_timeout_secs: u64,
    /// Seconds a single write/flush may take before the peer is dropped.
    pub write_timeout_secs: u64,
    /// Largest accepted inbound frame in bytes.
    pub max_frame_bytes: usize,
    /// Per-connection outbound queue capacity.
    pub outbound_capacity: usize,
    /// Capacity of the hub's command channel.
    pub command_capacity: usize,
    /// Seconds a router callback may run before the client gets an error.
    pub router_timeout_secs: u64,
    /// Seconds between stale-connection sweeps.
    pub sweep_interval_secs: u64,
    /// Connections silent for longer than this are evicted by the sweep.
    pub stale_after_secs: u64,
    /// Seconds between statistics log lines.
    pub stats_interval_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 54,
            pong_timeout_secs: 60,
            write_timeout_secs: 10,
            max_frame_bytes: 10 * 1024 * 1024,
            outbound_capacity: 256,
            command_capacity: 256,
            router_timeout_secs: 30,
            sweep_interval_secs: 30,
            stale_after_secs: 300,
            stats_interval_secs: 300,
        }
    }
}

/// Ticker periods never drop below one second; a zero period would stall a loop.
fn tick_period(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

impl HubConfig {
    pub fn probe_interval(&self) -> Duration {
        tick_period(self.probe_interval_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn router_timeout(&self) -> Duration {
        Duration::from_secs(self.router_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        tick_period(self.sweep_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        tick_period(self.stats_interval_secs)
    }

    /// Reject settings the pumps cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbound_capacity == 0 {
            return Err(ConfigError::Invalid(
                "hub.outbound_capacity must be greater than zero".into(),
            ));
        }
        if self.command_capacity == 0 {
            return Err(ConfigError::Invalid(
                "hub.command_capacity must be greater than zero".into(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid(
                "hub.max_frame_bytes must be greater than zero".into(),
            ));
        }
        for (name, value) in [
            ("probe_interval_secs", self.probe_interval_secs),
            ("pong_timeout_secs", self.pong_timeout_secs),
            ("write_timeout_secs", self.write_timeout_secs),
            ("router_timeout_secs", self.router_timeout_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("stats_interval_secs", self.stats_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "hub.{name} must be greater than zero"
                )));
            }
        }
        if self.probe_interval_secs >= self.pong_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "hub.probe_interval_secs ({}) must be shorter than hub.pong_timeout_secs ({})",
                self.probe_interval_secs, self.pong_timeout_secs
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Application
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed to call the HTTP API from a browser. Empty denies
    /// every cross-origin request.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
        }
    }
}

/// Behavior of the built-in room relay router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Stream a canned assistant reply after every user message.
    pub assistant_replies: bool,
    /// Milliseconds between streamed assistant deltas.
    pub delta_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            assistant_replies: true,
            delta_interval_ms: 50,
        }
    }
}

impl RelayConfig {
    pub fn delta_interval(&self) -> Duration {
        Duration::from_millis(self.delta_interval_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub hub: HubConfig,
    pub relay: RelayConfig,
}

/// Load configuration from `path` (optional on disk) and the environment.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let env_prefix = env_prefix();
    let built = Config::builder()
        .set_default("logging.level", "info")?
        .add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
        .build()
        .with_context(|| format!("loading config from {}", path.display()))?;

    let config: AppConfig = built
        .try_deserialize()
        .context("deserializing configuration")?;
    config.hub.validate()?;
    Ok(config)
}

pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = String::new();
    body.push_str("# Configuration for ");
    body.push_str(APP_NAME);
    body.push('\n');
    body.push_str("# File: ");
    body.push_str(&path.display().to_string());
    body.push_str("\n\n");
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

/// Resolve the config file path, honoring an explicit override.
pub fn resolve_config_path(override_path: Option<PathBuf>) -> Result<PathBuf> {
    let config_file = match override_path {
        Some(path) => {
            let expanded = expand_path(path)?;
            if expanded.is_dir() {
                expanded.join("config.toml")
            } else {
                expanded
            }
        }
        None => default_config_dir()?.join("config.toml"),
    };

    if config_file.parent().is_none() {
        return Err(anyhow!("invalid config file path: {config_file:?}"));
    }
    Ok(config_file)
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    match path.to_str() {
        Some(text) => {
            let expanded = shellexpand::full(text).context("expanding path")?;
            Ok(PathBuf::from(expanded.to_string()))
        }
        None => Ok(path),
    }
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_hub_config_is_valid() {
        let config = HubConfig::default();
        config.validate().unwrap();
        assert!(config.probe_interval() < config.pong_timeout());
    }

    #[test]
    fn test_probe_interval_must_be_shorter_than_pong_timeout() {
        let config = HubConfig {
            probe_interval_secs: 60,
            pong_timeout_secs: 60,
            ..HubConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("probe_interval_secs"));
    }

    #[test]
    fn test_zero_tick_periods_are_clamped() {
        let config = HubConfig {
            probe_interval_secs: 0,
            sweep_interval_secs: 0,
            stats_interval_secs: 0,
            ..HubConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.probe_interval(), Duration::from_secs(1));
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
        assert_eq!(config.stats_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = HubConfig {
            outbound_capacity: 0,
            ..HubConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[server]\nport = 9191\n\n[hub]\noutbound_capacity = 8\nstale_after_secs = 5\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 9191);
        assert_eq!(config.hub.outbound_capacity, 8);
        assert_eq!(config.hub.stale_after(), Duration::from_secs(5));
        // Untouched values keep their defaults.
        assert_eq!(config.hub.pong_timeout_secs, 60);
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.hub, HubConfig::default());
        assert!(config.relay.assistant_replies);
    }

    #[test]
    fn test_write_default_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        write_default_config(&path).unwrap();

        let body = fs::read_to_string(&path).unwrap();
        assert!(body.starts_with("# Configuration for roomcast"));
        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 8080);
    }
}
