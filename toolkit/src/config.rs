//! Toolkit configuration.
//!
//! The bar declares its helper daemons and monitor tuning in one TOML file:
//!
//! ```toml
//! [[daemon]]
//! name = "notifier"
//! command = ["dunst"]
//!
//! [network]
//! poll_interval_ms = 10000
//!
//! [audio]
//! restart_delay_ms = 500
//! ```
//!
//! Every field has a default, so an empty (or absent) file yields a working
//! configuration with no daemons.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::audio::AudioMonitorConfig;
use crate::net::NetworkMonitorConfig;
use crate::supervisor::Supervisor;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_RESTART_DELAY_MS: u64 = 1000;

/// Root configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: Vec<DaemonConfig>,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub audio: AudioSection,
}

/// One supervised helper daemon.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Registry key; re-using a name replaces that daemon's command.
    pub name: String,
    /// Argv vector, program first.
    pub command: Vec<String>,
}

/// Tuning for the network monitor.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct NetworkSection {
    /// Signal poll cadence while associated, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Monitor-process respawn delay in milliseconds.
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    /// Override for the long-lived monitor process.
    #[serde(default = "default_network_monitor_command")]
    pub monitor_command: Vec<String>,
    /// Override for the one-shot query tool.
    #[serde(default = "default_network_tool_command")]
    pub tool_command: Vec<String>,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            restart_delay_ms: DEFAULT_RESTART_DELAY_MS,
            monitor_command: default_network_monitor_command(),
            tool_command: default_network_tool_command(),
        }
    }
}

impl NetworkSection {
    /// Lowers this section into the monitor's runtime configuration.
    pub fn monitor_config(&self) -> NetworkMonitorConfig {
        NetworkMonitorConfig {
            monitor_command: self.monitor_command.clone(),
            tool_command: self.tool_command.clone(),
            restart_delay: Duration::from_millis(self.restart_delay_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ..NetworkMonitorConfig::default()
        }
    }
}

/// Tuning for the audio monitor.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct AudioSection {
    /// Subscription-process respawn delay in milliseconds.
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    /// Override for the long-lived subscription process.
    #[serde(default = "default_audio_subscribe_command")]
    pub subscribe_command: Vec<String>,
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            restart_delay_ms: DEFAULT_RESTART_DELAY_MS,
            subscribe_command: default_audio_subscribe_command(),
        }
    }
}

impl AudioSection {
    /// Lowers this section into the monitor's runtime configuration.
    pub fn monitor_config(&self) -> AudioMonitorConfig {
        AudioMonitorConfig {
            subscribe_command: self.subscribe_command.clone(),
            restart_delay: Duration::from_millis(self.restart_delay_ms),
            ..AudioMonitorConfig::default()
        }
    }
}

impl Config {
    /// Upserts every declared daemon into `supervisor`. New entries start
    /// stopped; running daemons keep running with their command replaced.
    pub fn register_daemons(&self, supervisor: &Supervisor) {
        for daemon in &self.daemon {
            supervisor.set(&daemon.name, daemon.command.clone());
        }
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file
/// does not exist. Returns an error if the file exists but cannot be read or
/// parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Spawns a file watcher on the parent directory of `path`. Whenever the
/// config file is created or modified, reloads it and sends the new config
/// over `tx`.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<Config>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "failed to create config watcher");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // editor-style atomic saves (write-new + rename).
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            warn!(path = %path.display(), "config path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        warn!(error = %e, "failed to watch config directory");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write {
            match load_or_default(&path) {
                Ok(config) => {
                    if tx.send(config).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "failed to reload config"),
            }
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_restart_delay_ms() -> u64 {
    DEFAULT_RESTART_DELAY_MS
}

fn default_network_monitor_command() -> Vec<String> {
    vec!["nmcli".into(), "monitor".into()]
}

fn default_network_tool_command() -> Vec<String> {
    vec!["nmcli".into()]
}

fn default_audio_subscribe_command() -> Vec<String> {
    vec!["pactl".into(), "subscribe".into()]
}
