//! Configuration resolution for SchiNET.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/schinet/settings.json)
//! 3. Project config (.schinet/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete SchiNET configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Daemon-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub database_path: Option<PathBuf>,
    /// Where platform events are accepted as NDJSON.
    pub ingest_addr: SocketAddr,
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            ingest_addr: SocketAddr::from(([127, 0, 0, 1], 8440)),
            log_level: "info".to_string(),
        }
    }
}

/// Watch-log relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Host the rendezvous listener binds and the viewer dials.
    pub host: String,
    /// First port probed by the allocator.
    pub port_base: u16,
    /// Number of consecutive ports probed before giving up.
    pub port_span: u16,
    pub handshake_timeout_secs: u64,
    pub write_timeout_secs: u64,
    /// Pause after every relayed line.
    pub write_delay_ms: u64,
    pub shutdown_grace_secs: u64,
    /// Optional argv prefix that opens the viewer in its own terminal window
    /// on Unix, e.g. `["xterm", "-e"]`.
    pub viewer_terminal: Option<Vec<String>>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port_base: 8444,
            port_span: 64,
            handshake_timeout_secs: 30,
            write_timeout_secs: 10,
            write_delay_ms: 1,
            shutdown_grace_secs: 5,
            viewer_terminal: None,
        }
    }
}

impl WatchConfig {
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub const fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub const fn write_delay(&self) -> Duration {
        Duration::from_millis(self.write_delay_ms)
    }

    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Load configuration with hierarchical resolution.
///
/// Files are merged key by key, so a project file only overrides the keys it
/// actually names.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut layered = Value::Object(Map::new());

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        merge_values(&mut layered, read_config_value(&global_path)?);
    }

    if let Some(dir) = project_dir {
        let project_path = dir.join(".schinet").join("settings.json");
        if project_path.exists() {
            merge_values(&mut layered, read_config_value(&project_path)?);
        }
    }

    let mut config: Config = serde_json::from_value(layered)
        .map_err(|e| Error::Config(format!("Invalid merged configuration: {e}")))?;
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".schinet").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/schinet/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("schinet").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn read_config_value(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

#[cfg(test)]
fn load_config_file(path: &Path) -> Result<Config> {
    serde_json::from_value(read_config_value(path)?).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Overlay `overlay` onto `base`. Objects merge recursively; any other value
/// replaces what was there.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("SCHINET_LOG_LEVEL") {
        config.daemon.log_level = val;
    }
    if let Ok(val) = std::env::var("SCHINET_WATCH_HOST") {
        config.watch.host = val;
    }
    if let Ok(val) = std::env::var("SCHINET_WATCH_PORT_BASE")
        && let Ok(n) = val.parse()
    {
        config.watch.port_base = n;
    }
    if let Ok(val) = std::env::var("SCHINET_HANDSHAKE_TIMEOUT")
        && let Ok(n) = val.parse()
    {
        config.watch.handshake_timeout_secs = n;
    }
    if let Ok(val) = std::env::var("SCHINET_WRITE_TIMEOUT")
        && let Ok(n) = val.parse()
    {
        config.watch.write_timeout_secs = n;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_watch_port_base_is_8444() {
        let config = Config::default();
        assert_eq!(config.watch.port_base, 8444);
        assert_eq!(config.watch.port_span, 64);
    }

    #[test]
    fn default_timeouts_are_bounded() {
        let watch = WatchConfig::default();
        assert_eq!(watch.handshake_timeout(), Duration::from_secs(30));
        assert_eq!(watch.write_timeout(), Duration::from_secs(10));
        assert_eq!(watch.write_delay(), Duration::from_millis(1));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"watch": {"port_base": 9000}}"#).unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.watch.port_base, 9000);
        assert_eq!(config.watch.host, "127.0.0.1");
        assert_eq!(config.daemon.log_level, "info");
    }

    #[test]
    fn project_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".schinet")).unwrap();
        std::fs::write(
            dir.path().join(".schinet").join("settings.json"),
            r#"{"watch": {"viewer_terminal": ["xterm", "-e"], "write_delay_ms": 0}}"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path())).unwrap();
        assert_eq!(
            config.watch.viewer_terminal,
            Some(vec!["xterm".to_string(), "-e".to_string()])
        );
        assert_eq!(config.watch.write_delay_ms, 0);
    }

    #[test]
    fn project_layer_only_overrides_named_keys() {
        let mut layered = Value::Object(Map::new());
        merge_values(
            &mut layered,
            serde_json::json!({"watch": {"port_base": 9000, "handshake_timeout_secs": 99}}),
        );
        merge_values(&mut layered, serde_json::json!({"watch": {"write_delay_ms": 0}}));

        let config: Config = serde_json::from_value(layered).unwrap();
        assert_eq!(config.watch.port_base, 9000);
        assert_eq!(config.watch.handshake_timeout_secs, 99);
        assert_eq!(config.watch.write_delay_ms, 0);
        assert_eq!(config.watch.port_span, 64);
    }

    #[test]
    fn project_layer_can_replace_lists_and_clear_options() {
        let mut layered = serde_json::json!({
            "daemon": {"database_path": "/var/lib/schinet.db"},
            "watch": {"viewer_terminal": ["xterm", "-e"]}
        });
        merge_values(
            &mut layered,
            serde_json::json!({
                "daemon": {"database_path": null},
                "watch": {"viewer_terminal": ["kitty"]}
            }),
        );

        let config: Config = serde_json::from_value(layered).unwrap();
        assert_eq!(config.daemon.database_path, None);
        assert_eq!(config.watch.viewer_terminal, Some(vec!["kitty".to_string()]));
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
