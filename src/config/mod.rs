//! Configuration module
//!
//! Tool settings are layered: CLI flags, then `TESTSET_RUNNER_*` environment
//! variables, then the configuration file, then built-in defaults. The run
//! document itself is handled by [`input`].

pub mod env;
pub mod file;
pub mod input;

pub use env::EnvConfig;
pub use file::ConfigFile;
pub use input::{load_plan, run_input_schema, ConfigError, RunInput, DEFAULT_GROUP};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::results::ResultsStorage;

/// Application settings from the configuration file
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Controller id reported to sinks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<String>,

    /// Maximum concurrent groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_threads: Option<usize>,

    /// Root of per-unit log directories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Where run reports are stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_dir: Option<PathBuf>,

    /// Default output format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// External reporting settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportingConfig {
    /// Base URL of the status endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_url: Option<String>,

    /// Directory unit logs are copied to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_dir: Option<PathBuf>,

    /// HTTP timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    10
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            status_url: None,
            upload_dir: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Values given on the command line
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub controller: Option<String>,
    pub group_threads: Option<usize>,
    pub log_dir: Option<PathBuf>,
    pub format: Option<String>,
    pub status_url: Option<String>,
    pub upload_dir: Option<PathBuf>,
    pub verbose: bool,
}

/// Effective settings after layering
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Controller id; `None` leaves the run document's value in charge
    pub controller: Option<String>,
    pub group_threads: Option<usize>,
    pub log_dir: Option<PathBuf>,
    pub results_dir: PathBuf,
    pub format: String,
    pub status_url: Option<String>,
    pub upload_dir: Option<PathBuf>,
    pub timeout_secs: u64,
    pub verbose: bool,
}

impl Settings {
    /// Merge the layers, highest precedence first
    pub fn resolve(file: &ConfigFile, env: &EnvConfig, cli: &Overrides) -> Self {
        Self {
            controller: cli
                .controller
                .clone()
                .or_else(|| env.controller.clone())
                .or_else(|| file.app.controller.clone()),
            group_threads: cli
                .group_threads
                .or(env.group_threads)
                .or(file.app.group_threads),
            log_dir: cli
                .log_dir
                .clone()
                .or_else(|| env.log_dir.clone())
                .or_else(|| file.app.log_dir.clone()),
            results_dir: env
                .results_dir
                .clone()
                .or_else(|| file.app.results_dir.clone())
                .unwrap_or_else(ResultsStorage::default_dir),
            format: cli
                .format
                .clone()
                .or_else(|| env.format.clone())
                .or_else(|| file.app.format.clone())
                .unwrap_or_else(|| "table".to_string()),
            status_url: cli
                .status_url
                .clone()
                .or_else(|| env.status_url.clone())
                .or_else(|| file.reporting.status_url.clone()),
            upload_dir: cli
                .upload_dir
                .clone()
                .or_else(|| env.upload_dir.clone())
                .or_else(|| file.reporting.upload_dir.clone()),
            timeout_secs: file.reporting.timeout_secs,
            verbose: cli.verbose || env.verbose.unwrap_or(false),
        }
    }
}

/// Controller id used when nothing else names one
pub fn default_controller() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "localhost".to_string())
}
