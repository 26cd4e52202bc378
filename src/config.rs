use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::fetch::{FetchSettings, DEFAULT_READER_PROXY};
use crate::reduce::DEFAULT_MAX_CHARS;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const DEFAULT_PROMPT_PATH: &str = "prompts/prompt_extracao.txt";

/// Problems that stop a run before any URL is processed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("file not found: {0}")]
    MissingFile(PathBuf),
    #[error("failed to read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Contents of the run config file.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    #[serde(rename = "urls_vagas", default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub max_chars: Option<usize>,
    /// Reader proxy prefix; an empty string disables the proxy.
    #[serde(default)]
    pub reader_proxy: Option<String>,
    #[serde(default)]
    pub min_interval_secs: Option<f64>,
    #[serde(default)]
    pub jitter_secs: Option<f64>,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = read_required(path)?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Invalid {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars.unwrap_or(DEFAULT_MAX_CHARS)
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        let defaults = FetchSettings::default();
        let reader_proxy = match self.reader_proxy.as_deref().map(str::trim) {
            Some("") => None,
            Some(prefix) => Some(prefix.to_string()),
            None => Some(DEFAULT_READER_PROXY.to_string()),
        };

        FetchSettings {
            reader_proxy,
            min_interval: seconds_or(self.min_interval_secs, defaults.min_interval),
            jitter: seconds_or(self.jitter_secs, defaults.jitter),
            ..defaults
        }
    }
}

fn seconds_or(value: Option<f64>, default: Duration) -> Duration {
    value
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(default)
}

pub fn load_prompt(path: &Path) -> Result<String, ConfigError> {
    read_required(path)
}

fn read_required(path: &Path) -> Result<String, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingFile(path.to_path_buf()));
    }
    fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("config.json");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), r#"{"urls_vagas": ["https://acme.gupy.io/jobs/1"]}"#);
        let config = RunConfig::load(&path).unwrap();

        assert_eq!(config.urls, vec!["https://acme.gupy.io/jobs/1"]);
        assert_eq!(config.max_chars(), DEFAULT_MAX_CHARS);
        let settings = config.fetch_settings();
        assert_eq!(settings.reader_proxy.as_deref(), Some(DEFAULT_READER_PROXY));
        assert_eq!(settings.min_interval, FetchSettings::default().min_interval);
    }

    #[test]
    fn test_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{"urls_vagas": [], "max_chars": 4000, "reader_proxy": "", "min_interval_secs": 2.5, "jitter_secs": -1}"#,
        );
        let config = RunConfig::load(&path).unwrap();

        assert_eq!(config.max_chars(), 4000);
        let settings = config.fetch_settings();
        assert_eq!(settings.reader_proxy, None);
        assert_eq!(settings.min_interval, Duration::from_millis(2500));
        assert_eq!(settings.jitter, FetchSettings::default().jitter);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = RunConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile(_)));
        assert!(matches!(
            load_prompt(&dir.path().join("prompt.txt")),
            Err(ConfigError::MissingFile(_))
        ));
    }

    #[test]
    fn test_malformed_config_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "{ urls_vagas: ");
        assert!(matches!(RunConfig::load(&path), Err(ConfigError::Invalid { .. })));
    }
}
