use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const BASE_URL_ENV: &str = "WB_EXPLORER_BASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid base url '{0}'")]
    BaseUrl(String),

    #[error("timeout must be at least one second")]
    ZeroTimeout,
}

/// Runtime settings for talking to the explorer backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub download_dir: PathBuf,
    pub timeout_secs: u64,
    pub plot_width: usize,
    pub plot_height: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            download_dir: PathBuf::from("."),
            timeout_secs: 30,
            plot_width: 80,
            plot_height: 20,
        }
    }
}

impl Config {
    /// Defaults, then the YAML file (if any), then the environment, then
    /// an explicit `--base-url`.
    pub fn load(file: Option<&Path>, base_url_flag: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            debug!("Base url taken from {}", BASE_URL_ENV);
            config.base_url = url;
        }
        if let Some(url) = base_url_flag {
            config.base_url = url.to_string();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        // an empty file deserializes to unit, not to a map
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|_| ConfigError::BaseUrl(self.base_url.clone()))?;
        if url.cannot_be_a_base() {
            return Err(ConfigError::BaseUrl(self.base_url.clone()));
        }
        Ok(url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config =
            Config::from_yaml("base_url: http://explorer.local:8080\ntimeout_secs: 5\n").unwrap();
        assert_eq!(config.base_url, "http://explorer.local:8080");
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.download_dir, PathBuf::from("."));
        assert_eq!(config.plot_width, 80);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(Config::from_yaml("  \n").unwrap(), Config::default());
    }

    #[test]
    fn test_flag_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_url: http://from-file:1\nplot_height: 12").unwrap();

        let config = Config::load(Some(file.path()), Some("http://from-flag:2")).unwrap();
        assert_eq!(config.base_url, "http://from-flag:2");
        assert_eq!(config.plot_height, 12);
    }

    #[test]
    fn test_env_sits_between_file_and_flag() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_url: http://from-file:1").unwrap();

        // the only test that touches this variable
        std::env::set_var(BASE_URL_ENV, "http://from-env:3");
        let from_env = Config::load(Some(file.path()), None);
        let from_flag = Config::load(Some(file.path()), Some("http://from-flag:2"));
        std::env::remove_var(BASE_URL_ENV);

        assert_eq!(from_env.unwrap().base_url, "http://from-env:3");
        assert_eq!(from_flag.unwrap().base_url, "http://from-flag:2");
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTimeout)));

        config.timeout_secs = 10;
        config.base_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::BaseUrl(_))));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = Config::from_file(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.yaml"));
    }
}
