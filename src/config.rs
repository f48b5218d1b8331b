//! Stream source configuration and its persistence

use crate::error::ConfigError;
use crate::resolver;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

/// Key under which the config blob is stored
pub const CONFIG_KEY: &str = "IPTVConfig";

/// Name of the notification broadcast after every successful save
pub const CONFIGURATION_CHANGED: &str = "configurationChanged";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistFormat {
    #[default]
    Ts,
    Hls,
}

impl PlaylistFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaylistFormat::Ts => "ts",
            PlaylistFormat::Hls => "hls",
        }
    }
}

impl fmt::Display for PlaylistFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaylistFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ts" => Ok(PlaylistFormat::Ts),
            "hls" | "m3u8" => Ok(PlaylistFormat::Hls),
            other => Err(format!("unknown playlist format '{}' (expected ts or hls)", other)),
        }
    }
}

/// Connection descriptor for an IPTV source plus the fields derived from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSourceConfig {
    pub host_dns: String,
    pub username: String,
    pub password: String,
    pub port: String,
    pub alternative_dns: String,
    pub playlist_format: PlaylistFormat,
    /// Derived by the resolver
    pub playlist_url: String,
    /// Minutes between automatic playlist refreshes
    pub update_interval: String,
    pub auto_reconnect: bool,
    pub hardware_acceleration: bool,
    /// Derived by the resolver
    #[serde(rename = "isDirectM3U")]
    pub is_direct_m3u: bool,
    pub config_changed: bool,
    /// Unix timestamp of the last save
    pub last_config_update: i64,
}

impl Default for StreamSourceConfig {
    fn default() -> Self {
        Self {
            host_dns: String::new(),
            username: String::new(),
            password: String::new(),
            port: "80".to_string(),
            alternative_dns: String::new(),
            playlist_format: PlaylistFormat::Ts,
            playlist_url: String::new(),
            update_interval: "30".to_string(),
            auto_reconnect: true,
            hardware_acceleration: true,
            is_direct_m3u: false,
            config_changed: false,
            last_config_update: chrono::Utc::now().timestamp(),
        }
    }
}

impl StreamSourceConfig {
    /// Refresh interval in minutes, `None` when unset or not a positive number
    pub fn update_interval_minutes(&self) -> Option<u64> {
        self.update_interval
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|m| *m > 0)
    }

    pub fn is_configured(&self) -> bool {
        !self.host_dns.trim().is_empty()
    }

    /// Human-readable export of the configuration. The password is never included.
    pub fn summary(&self) -> String {
        use chrono::{Local, TimeZone};

        let updated = Local
            .timestamp_opt(self.last_config_update, 0)
            .single()
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string());

        format!(
            "Stream source configuration\n\
             ===========================\n\
             Host/DNS: {}\n\
             Username: {}\n\
             Format: {}\n\
             Port: {}\n\
             Alternative DNS: {}\n\
             Mode: {}\n\
             Playlist URL: {}\n\
             Update interval: {} min\n\
             Updated: {}",
            self.host_dns,
            self.username,
            self.playlist_format,
            self.port,
            if self.alternative_dns.is_empty() { "-" } else { &self.alternative_dns },
            if self.is_direct_m3u { "direct M3U" } else { "Xtream credentials" },
            self.playlist_url,
            self.update_interval,
            updated,
        )
    }
}

/// Opaque key-value settings store
pub trait ConfigStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError>;
    fn remove(&mut self, key: &str) -> Result<(), ConfigError>;
}

/// Settings persisted as a flat JSON object on disk
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileStore {
    /// `<config_dir>/family_cinema/settings.json`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("family_cinema");
        path.push("settings.json");
        path
    }

    /// Open the store, starting empty when the file is missing or unreadable
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt settings file");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: self.path.display().to_string(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&self.path, content).map_err(io_err)
    }
}

impl ConfigStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.entries.insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<(), ConfigError> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

/// In-memory store. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), ConfigError> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
        Ok(())
    }
}

/// Emitted once per successful save
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigEvent {
    ConfigurationChanged {
        revision: u64,
        config: StreamSourceConfig,
    },
}

impl ConfigEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConfigEvent::ConfigurationChanged { .. } => CONFIGURATION_CHANGED,
        }
    }

    pub fn revision(&self) -> u64 {
        match self {
            ConfigEvent::ConfigurationChanged { revision, .. } => *revision,
        }
    }
}

/// Owns the active configuration and its store
pub struct ConfigService {
    store: Box<dyn ConfigStore>,
    config: StreamSourceConfig,
    revision: u64,
    listeners: Vec<Sender<ConfigEvent>>,
    last_error: Option<String>,
}

impl ConfigService {
    pub fn new(store: Box<dyn ConfigStore>) -> Self {
        let mut service = Self {
            store,
            config: StreamSourceConfig::default(),
            revision: 0,
            listeners: Vec::new(),
            last_error: None,
        };
        service.load();
        service
    }

    /// Reload the config blob from the store, keeping defaults when absent or unreadable
    pub fn load(&mut self) {
        let Some(raw) = self.store.get(CONFIG_KEY) else {
            tracing::info!("No saved configuration, using defaults");
            return;
        };

        match serde_json::from_str::<StreamSourceConfig>(&raw) {
            Ok(config) => {
                tracing::info!(host = %config.host_dns, dirty = config.config_changed, "Configuration loaded");
                self.config = config;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Saved configuration is unreadable, using defaults");
                self.last_error = Some(format!("Failed to read configuration: {}", e));
            }
        }
    }

    pub fn config(&self) -> &StreamSourceConfig {
        &self.config
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Receive a `ConfigurationChanged` event after every save
    pub fn subscribe(&mut self) -> Receiver<ConfigEvent> {
        let (tx, rx) = channel();
        self.listeners.push(tx);
        rx
    }

    /// Resolve derived fields, persist and broadcast. Returns the new revision.
    pub fn save(&mut self, mut config: StreamSourceConfig) -> Result<u64, ConfigError> {
        resolver::apply(&mut config);
        config.config_changed = true;
        config.last_config_update = chrono::Utc::now().timestamp();

        if let Err(e) = self.persist(&config) {
            tracing::error!(error = %e, "Failed to save configuration");
            self.last_error = Some(format!("Failed to save configuration: {}", e));
            return Err(e);
        }

        self.config = config;
        self.revision += 1;
        self.last_error = None;
        tracing::info!(
            revision = self.revision,
            direct = self.config.is_direct_m3u,
            "Configuration saved"
        );

        let event = ConfigEvent::ConfigurationChanged {
            revision: self.revision,
            config: self.config.clone(),
        };
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
        Ok(self.revision)
    }

    /// Event to replay at startup when a saved config was never ingested
    pub fn pending_change(&self) -> Option<ConfigEvent> {
        self.config
            .config_changed
            .then(|| ConfigEvent::ConfigurationChanged {
                revision: self.revision,
                config: self.config.clone(),
            })
    }

    /// Clear the dirty flag for `revision`. Only the latest revision can be
    /// acknowledged, and only once.
    pub fn acknowledge(&mut self, revision: u64) -> bool {
        if revision != self.revision || !self.config.config_changed {
            tracing::debug!(revision, current = self.revision, "Ignoring stale acknowledgement");
            return false;
        }

        self.config.config_changed = false;
        let config = self.config.clone();
        if let Err(e) = self.persist(&config) {
            tracing::warn!(error = %e, "Failed to persist cleared change flag");
        }
        true
    }

    /// Remove the stored config and reset to defaults
    pub fn clear(&mut self) -> Result<(), ConfigError> {
        self.store.remove(CONFIG_KEY)?;
        self.config = StreamSourceConfig::default();
        tracing::info!("Configuration cleared");
        Ok(())
    }

    fn persist(&mut self, config: &StreamSourceConfig) -> Result<(), ConfigError> {
        let json = serde_json::to_string(config)?;
        self.store.set(CONFIG_KEY, &json)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
