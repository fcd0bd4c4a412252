use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::ViewerError;
use crate::mqtt::config::LinkConfig;

/// Env var pointing at an explicit config file.
pub const CONFIG_PATH_ENV: &str = "MQTT_VIEWER_CONFIG";
/// Env var that replaces the bridge URL from the file.
pub const WS_URL_ENV: &str = "MQTT_WS_URL";

const APP_DIR: &str = "mqtt-ws-viewer";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
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

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ViewerConfig {
    pub link: LinkConfig,
    pub logging: LoggingConfig,
}

/// What [`ViewerConfig::load`] did, kept so it can be logged once the
/// subscriber is installed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadReport {
    /// File the settings were read from. `None` means built-in defaults.
    pub file: Option<PathBuf>,
    pub url_from_env: bool,
}

impl LoadReport {
    pub fn log(&self) {
        match &self.file {
            Some(path) => info!("Loaded config from {}", path.display()),
            None => debug!("No config file found, using defaults"),
        }
        if self.url_from_env {
            debug!("Bridge URL overridden by {}", WS_URL_ENV);
        }
    }
}

impl ViewerConfig {
    /// Loads the file named by `MQTT_VIEWER_CONFIG` or the per-user default,
    /// then applies environment overrides.
    pub fn load() -> Result<(Self, LoadReport), ViewerError> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(default_config_path);
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    pub fn load_with(
        path: Option<PathBuf>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(Self, LoadReport), ViewerError> {
        let mut report = LoadReport::default();
        let mut config = match path {
            Some(path) if path.exists() => {
                let config = Self::load_from(&path)?;
                report.file = Some(path);
                config
            }
            _ => Self::default(),
        };
        report.url_from_env = config.apply_env_overrides(lookup);
        config.link.validate()?;
        Ok((config, report))
    }

    /// Reads a TOML file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ViewerError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ViewerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ViewerError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Returns true if the bridge URL was replaced.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> bool {
        match lookup(WS_URL_ENV).filter(|url| !url.is_empty()) {
            Some(url) => {
                self.link.url = url;
                true
            }
            None => false,
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ViewerConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ViewerConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[link]
url = "ws://bridge.local:9000/ws/mqtt/"

[link.reconnect]
max_attempts = 8

[logging]
level = "debug"
"#
        )
        .unwrap();

        let config = ViewerConfig::load_from(file.path()).unwrap();
        assert_eq!(config.link.url, "ws://bridge.local:9000/ws/mqtt/");
        assert_eq!(config.link.reconnect.max_attempts, 8);
        assert_eq!(config.link.reconnect.base_delay_ms, 1000);
        assert_eq!(config.link.history_capacity, 1000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn broken_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[link\nurl = ").unwrap();
        assert!(matches!(
            ViewerConfig::load_from(file.path()),
            Err(ViewerError::ConfigParse { .. })
        ));
    }

    #[test]
    fn env_url_wins_over_file() {
        let mut config = ViewerConfig::default();
        assert!(config.apply_env_overrides(|key| {
            (key == WS_URL_ENV).then(|| "wss://example.org/ws/mqtt/".to_string())
        }));
        assert_eq!(config.link.url, "wss://example.org/ws/mqtt/");

        let mut untouched = ViewerConfig::default();
        assert!(!untouched.apply_env_overrides(|_| Some(String::new())));
        assert_eq!(untouched.link.url, crate::mqtt::config::DEFAULT_WS_URL);
    }

    #[test]
    fn load_reports_file_and_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"warn\"").unwrap();

        let (config, report) = ViewerConfig::load_with(Some(file.path().to_path_buf()), |key| {
            (key == WS_URL_ENV).then(|| "ws://override:1/".to_string())
        })
        .unwrap();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.link.url, "ws://override:1/");
        assert_eq!(report.file.as_deref(), Some(file.path()));
        assert!(report.url_from_env);
    }

    #[test]
    fn load_without_file_reports_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, report) =
            ViewerConfig::load_with(Some(dir.path().join("absent.toml")), |_| None).unwrap();
        assert_eq!(config, ViewerConfig::default());
        assert_eq!(report, LoadReport::default());
    }
}
