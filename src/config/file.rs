//! Configuration file management
//!
//! Handles finding, loading, and validating the tool configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{AppConfig, ReportingConfig};
use crate::output::OutputFormat;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./testset-runner.yaml",
    "./testset-runner.yml",
    "./testset-runner.json",
    "./.testset-runner.yaml",
    "~/.config/testset-runner/config.yaml",
];

/// Full configuration file structure
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Application settings
    #[serde(default)]
    pub app: AppConfig,

    /// External reporting
    #[serde(default)]
    pub reporting: ReportingConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            reporting: ReportingConfig::default(),
        }
    }
}

impl ConfigFile {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        match Self::find() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !["1.0"].contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }

        if self.app.group_threads == Some(0) {
            anyhow::bail!("app.groupThreads must be positive");
        }

        if let Some(format) = &self.app.format {
            if OutputFormat::from_str(format).is_none() {
                anyhow::bail!("Unknown output format '{}' in app.format", format);
            }
        }

        if let Some(url) = &self.reporting.status_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("reporting.statusUrl must be an http(s) URL: {}", url);
            }
        }

        if self.reporting.timeout_secs == 0 {
            anyhow::bail!("reporting.timeoutSecs must be positive");
        }

        Ok(())
    }

    /// Generate example configuration
    pub fn example() -> Self {
        Self {
            version: default_version(),
            app: AppConfig {
                controller: Some("ctl-01".to_string()),
                group_threads: Some(2),
                log_dir: Some(PathBuf::from("./logs")),
                results_dir: None,
                format: Some("table".to_string()),
            },
            reporting: ReportingConfig {
                status_url: Some("http://localhost:8080/api".to_string()),
                upload_dir: Some(PathBuf::from("./uploads")),
                timeout_secs: 10,
            },
        }
    }

    /// Merge with another config (other takes precedence where set)
    pub fn merge(&mut self, other: ConfigFile) {
        let app = other.app;
        if app.controller.is_some() {
            self.app.controller = app.controller;
        }
        if app.group_threads.is_some() {
            self.app.group_threads = app.group_threads;
        }
        if app.log_dir.is_some() {
            self.app.log_dir = app.log_dir;
        }
        if app.results_dir.is_some() {
            self.app.results_dir = app.results_dir;
        }
        if app.format.is_some() {
            self.app.format = app.format;
        }

        let reporting = other.reporting;
        if reporting.status_url.is_some() {
            self.reporting.status_url = reporting.status_url;
        }
        if reporting.upload_dir.is_some() {
            self.reporting.upload_dir = reporting.upload_dir;
        }
        if reporting.timeout_secs != default_timeout() {
            self.reporting.timeout_secs = reporting.timeout_secs;
        }
    }
}

fn default_timeout() -> u64 {
    ReportingConfig::default().timeout_secs
}

/// Expand ~ to home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_file_default() {
        let config = ConfigFile::default();
        assert_eq!(config.version, "1.0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_save_load_yaml_and_json() {
        let dir = tempdir().unwrap();
        let config = ConfigFile::example();

        for name in ["config.yaml", "nested/config.json"] {
            let path = dir.path().join(name);
            config.save(&path).unwrap();
            let loaded = ConfigFile::load(&path).unwrap();
            assert_eq!(loaded, config);
        }
    }

    #[test]
    fn test_camel_case_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "app:\n  groupThreads: 4\nreporting:\n  statusUrl: https://ctl.example/api\n",
        )
        .unwrap();

        let loaded = ConfigFile::load(&path).unwrap();
        assert_eq!(loaded.app.group_threads, Some(4));
        assert_eq!(loaded.reporting.timeout_secs, 10);
    }

    #[test]
    fn test_validate_config() {
        let mut config = ConfigFile::default();
        config.app.group_threads = Some(0);
        assert!(config.validate().is_err());

        let mut config = ConfigFile::default();
        config.app.format = Some("xml".to_string());
        assert!(config.validate().is_err());

        let mut config = ConfigFile::default();
        config.reporting.status_url = Some("ftp://nope".to_string());
        assert!(config.validate().is_err());

        let mut config = ConfigFile::default();
        config.version = "9.9".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_prefers_set_values() {
        let mut base = ConfigFile::example();
        let mut other = ConfigFile::default();
        other.app.controller = Some("ctl-02".to_string());
        other.reporting.timeout_secs = 30;

        base.merge(other);
        assert_eq!(base.app.controller.as_deref(), Some("ctl-02"));
        assert_eq!(base.app.group_threads, Some(2));
        assert_eq!(base.reporting.timeout_secs, 30);
    }

    #[test]
    fn test_expand_path() {
        let path = expand_path("./test.yaml");
        assert_eq!(path, PathBuf::from("./test.yaml"));
    }
}
