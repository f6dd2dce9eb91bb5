//! Configuration loading and management.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server to connect to.
    pub server: ServerConfig,
    /// Bot identity and behavior.
    #[serde(default)]
    pub bot: BotConfig,
    /// Outbound flood-control policy.
    #[serde(default)]
    pub flood: FloodConfig,
    /// Command execution policy.
    #[serde(default)]
    pub exec: ExecConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

/// IRC server connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Hostname of the IRC server.
    pub host: String,
    /// Port of the IRC server.
    pub port: u16,
    /// Whether to connect with TLS.
    #[serde(default)]
    pub tls: bool,
    /// Optional PEM bundle of trusted CA certificates; the system store is
    /// used when unset.
    pub ca_file: Option<PathBuf>,
    /// Optional connection password (PASS), e.g. for NickServ
    /// identification.
    pub password: Option<String>,
}

/// Bot identity and reply behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Nickname to register with.
    pub nickname: String,
    /// Real name; defaults to the nickname.
    pub realname: Option<String>,
    /// Channels to join after registration.
    pub channels: Vec<String>,
    /// Prefix that identifies commands to run (a space separates it from
    /// the command text).
    pub prefix: String,
    /// Run commands from private queries as well as channels.
    pub allow_queries: bool,
    /// Maximum number of output lines sent per command.
    pub max_lines: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        BotConfig {
            nickname: "shrike".into(),
            realname: None,
            channels: Vec::new(),
            prefix: "!$".into(),
            allow_queries: false,
            max_lines: 10,
        }
    }
}

/// Outbound message pacing. The defaults are policy, not protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FloodConfig {
    /// Whether outbound pacing is enabled at all.
    pub enabled: bool,
    /// Per-consecutive-message delay step, in milliseconds.
    pub unit_delay_ms: u64,
    /// Upper bound on a single message's delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Idle time after which the consecutive counter resets, in seconds.
    pub idle_reset_secs: u64,
}

impl Default for FloodConfig {
    fn default() -> Self {
        FloodConfig {
            enabled: true,
            unit_delay_ms: 100,
            max_delay_ms: 1500,
            idle_reset_secs: 5,
        }
    }
}

impl FloodConfig {
    /// Delay step as a [`Duration`].
    #[must_use]
    pub fn unit_delay(&self) -> Duration {
        Duration::from_millis(self.unit_delay_ms)
    }

    /// Delay cap as a [`Duration`].
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Idle reset threshold as a [`Duration`].
    #[must_use]
    pub fn idle_reset(&self) -> Duration {
        Duration::from_secs(self.idle_reset_secs)
    }
}

/// Shell command execution policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Shell interpreter invoked as `<shell> -c <command>`.
    pub shell: PathBuf,
    /// Seconds to wait before the termination escalation begins.
    pub timeout_secs: f64,
    /// User to run commands as. Requires starting the daemon as root.
    pub user: Option<String>,
    /// Working directory for all commands.
    pub working_dir: Option<PathBuf>,
    /// Combined output capture limit in bytes.
    pub output_cap: usize,
    /// Fixed PATH for the command environment (everything else is cleared).
    pub path_env: String,
}

impl Default for ExecConfig {
    fn default() -> Self {
        ExecConfig {
            shell: PathBuf::from("/bin/sh"),
            timeout_secs: 4.0,
            user: None,
            working_dir: None,
            output_cap: 100_000,
            path_env: "/usr/bin:/bin".into(),
        }
    }
}

impl ExecConfig {
    /// Command timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }
}
