//! Configuration resolution for `SatSip`.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/satsip/settings.json)
//! 3. Project config (.satsip/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the caller)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Relays used when neither the caller nor a stored session supplies any.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
    "wss://relay.primal.net",
];

/// Complete `SatSip` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relays: RelayConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub zaps: ZapConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relays: RelayConfig::default(),
            session: SessionConfig::default(),
            zaps: ZapConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Relay connection and query configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Relays to fall back to when none are requested.
    pub default_relays: Vec<String>,
    /// Bound on opening the relay sockets.
    pub connect_timeout_ms: u64,
    /// Bound on waiting for the first relay to report connected.
    pub first_relay_timeout_ms: u64,
    /// Bound on a single query, including retries of that attempt.
    pub query_timeout_ms: u64,
    /// How long a fetch waits for end-of-stored-events from every relay.
    pub eose_timeout_ms: u64,
    /// Attempts for queries failing with a non-timeout error.
    pub query_attempts: u32,
    /// How long a publish waits for relays to accept or reject the event.
    pub publish_ack_timeout_ms: u64,
    /// First wait before re-opening a dropped relay socket.
    pub reconnect_initial_delay_ms: u64,
    /// Ceiling for the doubling reconnect wait.
    pub reconnect_max_delay_ms: u64,
    /// Consecutive failed re-opens before a relay is dropped. `0` never gives up.
    pub reconnect_max_attempts: u32,
    /// Poll interval for the signer capability. `None` disables polling.
    pub signer_poll_interval_ms: Option<u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_relays: DEFAULT_RELAYS.iter().map(ToString::to_string).collect(),
            connect_timeout_ms: 5_000,
            first_relay_timeout_ms: 10_000,
            query_timeout_ms: 10_000,
            eose_timeout_ms: 4_000,
            query_attempts: 3,
            publish_ack_timeout_ms: 5_000,
            reconnect_initial_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            reconnect_max_attempts: 8,
            signer_poll_interval_ms: None,
        }
    }
}

impl RelayConfig {
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub const fn first_relay_timeout(&self) -> Duration {
        Duration::from_millis(self.first_relay_timeout_ms)
    }

    pub const fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub const fn eose_timeout(&self) -> Duration {
        Duration::from_millis(self.eose_timeout_ms)
    }

    pub const fn publish_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_ack_timeout_ms)
    }

    pub const fn reconnect_initial_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_delay_ms)
    }

    pub const fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn signer_poll_interval(&self) -> Option<Duration> {
        self.signer_poll_interval_ms.map(Duration::from_millis)
    }
}

/// Session persistence configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory holding the session blob. Defaults to `~/.satsip`.
    pub storage_dir: Option<PathBuf>,
    /// Path to the local signing key (nsec). Defaults to `~/.satsip/identity.nsec`.
    pub key_path: Option<PathBuf>,
}

impl SessionConfig {
    /// Resolved storage directory.
    pub fn resolved_storage_dir(&self) -> PathBuf {
        self.storage_dir.clone().unwrap_or_else(data_dir)
    }

    /// Resolved key path.
    pub fn resolved_key_path(&self) -> PathBuf {
        self.key_path
            .clone()
            .unwrap_or_else(|| data_dir().join("identity.nsec"))
    }
}

/// Zap and LNURL configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZapConfig {
    /// HTTP timeout for LNURL requests.
    pub lnurl_timeout_ms: u64,
    /// Amount used when the caller does not pass one.
    pub default_amount_sats: u64,
}

impl Default for ZapConfig {
    fn default() -> Self {
        Self {
            lnurl_timeout_ms: 15_000,
            default_amount_sats: 21,
        }
    }
}

impl ZapConfig {
    pub const fn lnurl_timeout(&self) -> Duration {
        Duration::from_millis(self.lnurl_timeout_ms)
    }
}

/// Load configuration with hierarchical resolution: defaults, then the
/// global file, then the project file, then `SATSIP_*` variables.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut files = Vec::new();
    files.extend(global_config_path());
    if let Some(dir) = project_dir {
        files.push(dir.join(".satsip").join("settings.json"));
    }

    let mut config = load_config_files(&files)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Layer settings files over the defaults in order. Missing files are
/// skipped; each file only overrides the fields it names.
pub fn load_config_files(paths: &[PathBuf]) -> Result<Config> {
    let mut config = Config::default();
    for path in paths.iter().filter(|p| p.exists()) {
        read_layer(path)?.apply(&mut config);
    }
    Ok(config)
}

/// Per-user data directory: `~/.satsip`.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".satsip")
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".satsip").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/satsip/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("satsip").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

pub fn load_config_file(path: &Path) -> Result<Config> {
    let mut config = Config::default();
    read_layer(path)?.apply(&mut config);
    Ok(config)
}

fn read_layer(path: &Path) -> Result<ConfigLayer> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::ReadSettings {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| Error::ParseSettings {
        path: path.to_path_buf(),
        source,
    })
}

/// One settings file as written. Absent fields stay `None` so a later file
/// never resets what an earlier one set.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigLayer {
    relays: RelayLayer,
    session: SessionConfig,
    zaps: ZapLayer,
    log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RelayLayer {
    default_relays: Option<Vec<String>>,
    connect_timeout_ms: Option<u64>,
    first_relay_timeout_ms: Option<u64>,
    query_timeout_ms: Option<u64>,
    eose_timeout_ms: Option<u64>,
    query_attempts: Option<u32>,
    publish_ack_timeout_ms: Option<u64>,
    reconnect_initial_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    reconnect_max_attempts: Option<u32>,
    signer_poll_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ZapLayer {
    lnurl_timeout_ms: Option<u64>,
    default_amount_sats: Option<u64>,
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

impl ConfigLayer {
    fn apply(self, config: &mut Config) {
        let relays = &mut config.relays;
        let layer = self.relays;
        // An empty list would leave nothing to connect to.
        set(
            &mut relays.default_relays,
            layer.default_relays.filter(|r| !r.is_empty()),
        );
        set(&mut relays.connect_timeout_ms, layer.connect_timeout_ms);
        set(&mut relays.first_relay_timeout_ms, layer.first_relay_timeout_ms);
        set(&mut relays.query_timeout_ms, layer.query_timeout_ms);
        set(&mut relays.eose_timeout_ms, layer.eose_timeout_ms);
        set(&mut relays.query_attempts, layer.query_attempts);
        set(&mut relays.publish_ack_timeout_ms, layer.publish_ack_timeout_ms);
        set(
            &mut relays.reconnect_initial_delay_ms,
            layer.reconnect_initial_delay_ms,
        );
        set(&mut relays.reconnect_max_delay_ms, layer.reconnect_max_delay_ms);
        set(&mut relays.reconnect_max_attempts, layer.reconnect_max_attempts);
        if layer.signer_poll_interval_ms.is_some() {
            relays.signer_poll_interval_ms = layer.signer_poll_interval_ms;
        }

        if self.session.storage_dir.is_some() {
            config.session.storage_dir = self.session.storage_dir;
        }
        if self.session.key_path.is_some() {
            config.session.key_path = self.session.key_path;
        }

        set(&mut config.zaps.lnurl_timeout_ms, self.zaps.lnurl_timeout_ms);
        set(
            &mut config.zaps.default_amount_sats,
            self.zaps.default_amount_sats,
        );
        set(&mut config.log_level, self.log_level);
    }
}

/// Apply `SATSIP_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("SATSIP_RELAYS") {
        let relays: Vec<String> = val
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();
        if !relays.is_empty() {
            config.relays.default_relays = relays;
        }
    }
    if let Some(n) = lookup("SATSIP_QUERY_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.relays.query_timeout_ms = n;
    }
    if let Some(n) = lookup("SATSIP_CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.relays.connect_timeout_ms = n;
    }
    if let Some(val) = lookup("SATSIP_SESSION_DIR") {
        config.session.storage_dir = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("SATSIP_KEY_PATH") {
        config.session.key_path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("SATSIP_LOG_LEVEL") {
        config.log_level = val;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_uses_builtin_relays() {
        let config = Config::default();
        assert_eq!(config.relays.default_relays.len(), DEFAULT_RELAYS.len());
        assert!(
            config
                .relays
                .default_relays
                .iter()
                .all(|r| r.starts_with("wss://"))
        );
    }

    #[test]
    fn first_relay_wait_is_longer_than_connect_timeout() {
        let relays = RelayConfig::default();
        assert!(relays.first_relay_timeout() > relays.connect_timeout());
        assert_eq!(relays.query_attempts, 3);
        assert!(relays.signer_poll_interval().is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"relays": {"query_timeout_ms": 2500}}"#).unwrap();

        let loaded = load_config_file(&path).unwrap();
        assert_eq!(loaded.relays.query_timeout_ms, 2500);
        assert_eq!(loaded.relays.connect_timeout_ms, 5_000);
        assert_eq!(loaded.log_level, "info");
        assert_eq!(loaded.zaps.default_amount_sats, 21);
    }

    #[test]
    fn invalid_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(&err, Error::ParseSettings { path: p, .. } if *p == path));
        assert!(err.to_string().contains("settings.json"));
    }

    #[test]
    fn unreadable_settings_path_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config_files(&[dir.path().to_path_buf()]).unwrap_err();
        assert!(matches!(err, Error::ReadSettings { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("SATSIP_RELAYS", " wss://a.example , ,wss://b.example"),
            ("SATSIP_QUERY_TIMEOUT_MS", "1234"),
            ("SATSIP_CONNECT_TIMEOUT_MS", "not-a-number"),
            ("SATSIP_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| vars.get(k).map(ToString::to_string));

        assert_eq!(
            config.relays.default_relays,
            vec!["wss://a.example".to_string(), "wss://b.example".to_string()]
        );
        assert_eq!(config.relays.query_timeout_ms, 1234);
        assert_eq!(config.relays.connect_timeout_ms, 5_000);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn empty_relay_list_in_file_keeps_earlier_relays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"relays": {"default_relays": [], "query_attempts": 1}}"#,
        )
        .unwrap();

        let loaded = load_config_file(&path).unwrap();
        assert_eq!(loaded.relays.default_relays.len(), DEFAULT_RELAYS.len());
        assert_eq!(loaded.relays.query_attempts, 1);
    }

    #[test]
    fn project_file_only_overrides_fields_it_names() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("global.json");
        let project = dir.path().join("project.json");
        std::fs::write(
            &global,
            r#"{
                "relays": {"query_timeout_ms": 7000, "publish_ack_timeout_ms": 9000},
                "zaps": {"default_amount_sats": 1000},
                "log_level": "debug"
            }"#,
        )
        .unwrap();
        std::fs::write(&project, r#"{"relays": {"query_attempts": 5}}"#).unwrap();

        let config = load_config_files(&[global, project]).unwrap();
        assert_eq!(config.relays.query_attempts, 5);
        assert_eq!(config.relays.query_timeout_ms, 7000);
        assert_eq!(config.relays.publish_ack_timeout_ms, 9000);
        assert_eq!(config.zaps.default_amount_sats, 1000);
        assert_eq!(config.zaps.lnurl_timeout_ms, 15_000);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn missing_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_files(&[dir.path().join("absent.json")]).unwrap();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn publish_ack_and_reconnect_settings_have_own_defaults() {
        let relays = RelayConfig::default();
        assert_eq!(relays.publish_ack_timeout(), Duration::from_secs(5));
        assert_ne!(relays.publish_ack_timeout(), relays.eose_timeout());
        assert!(relays.reconnect_initial_delay() < relays.reconnect_max_delay());
        assert_eq!(relays.reconnect_max_attempts, 8);
    }

    #[test]
    fn session_paths_resolve_under_data_dir() {
        let session = SessionConfig::default();
        assert!(session.resolved_storage_dir().ends_with(".satsip"));
        assert!(session.resolved_key_path().ends_with("identity.nsec"));
    }
}
