//! Environment variable configuration
//!
//! Provides `TESTSET_RUNNER_*` overrides for the configuration file.

use std::env;
use std::path::PathBuf;

/// Environment variable prefix
const ENV_PREFIX: &str = "TESTSET_RUNNER";

/// Configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Config file from TESTSET_RUNNER_CONFIG
    pub config_file: Option<String>,
    /// Controller id from TESTSET_RUNNER_CONTROLLER
    pub controller: Option<String>,
    /// Concurrent groups from TESTSET_RUNNER_GROUP_THREADS
    pub group_threads: Option<usize>,
    /// Log root from TESTSET_RUNNER_LOG_DIR
    pub log_dir: Option<PathBuf>,
    /// Results directory from TESTSET_RUNNER_RESULTS_DIR
    pub results_dir: Option<PathBuf>,
    /// Output format from TESTSET_RUNNER_FORMAT
    pub format: Option<String>,
    /// Status endpoint from TESTSET_RUNNER_STATUS_URL
    pub status_url: Option<String>,
    /// Upload directory from TESTSET_RUNNER_UPLOAD_DIR
    pub upload_dir: Option<PathBuf>,
    /// Verbose from TESTSET_RUNNER_VERBOSE
    pub verbose: Option<bool>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            config_file: get_env("CONFIG"),
            controller: get_env("CONTROLLER"),
            group_threads: get_env_parse::<usize>("GROUP_THREADS").filter(|n| *n > 0),
            log_dir: get_env("LOG_DIR").map(PathBuf::from),
            results_dir: get_env("RESULTS_DIR").map(PathBuf::from),
            format: get_env("FORMAT"),
            status_url: get_env("STATUS_URL"),
            upload_dir: get_env("UPLOAD_DIR").map(PathBuf::from),
            verbose: get_env_bool("VERBOSE"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.config_file.is_some()
            || self.controller.is_some()
            || self.group_threads.is_some()
            || self.log_dir.is_some()
            || self.results_dir.is_some()
            || self.format.is_some()
            || self.status_url.is_some()
            || self.upload_dir.is_some()
            || self.verbose.is_some()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_CONFIG:        {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_CONTROLLER:    {:?}", ENV_PREFIX, self.controller);
        println!("  {}_GROUP_THREADS: {:?}", ENV_PREFIX, self.group_threads);
        println!("  {}_LOG_DIR:       {:?}", ENV_PREFIX, self.log_dir);
        println!("  {}_RESULTS_DIR:   {:?}", ENV_PREFIX, self.results_dir);
        println!("  {}_FORMAT:        {:?}", ENV_PREFIX, self.format);
        println!("  {}_STATUS_URL:    {:?}", ENV_PREFIX, self.status_url);
        println!("  {}_UPLOAD_DIR:    {:?}", ENV_PREFIX, self.upload_dir);
        println!("  {}_VERBOSE:       {:?}", ENV_PREFIX, self.verbose);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables (useful for testing)
#[derive(Default)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
        self
    }

    pub fn controller(self, controller: impl Into<String>) -> Self {
        self.var("CONTROLLER", controller)
    }

    pub fn group_threads(self, threads: usize) -> Self {
        self.var("GROUP_THREADS", threads.to_string())
    }

    pub fn log_dir(self, dir: impl Into<String>) -> Self {
        self.var("LOG_DIR", dir)
    }

    pub fn status_url(self, url: impl Into<String>) -> Self {
        self.var("STATUS_URL", url)
    }

    pub fn verbose(self, verbose: bool) -> Self {
        self.var("VERBOSE", verbose.to_string())
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all TESTSET_RUNNER environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_CONFIG         Path to configuration file");
    println!("  {ENV_PREFIX}_CONTROLLER     Controller id reported to sinks");
    println!("  {ENV_PREFIX}_GROUP_THREADS  Maximum concurrent groups");
    println!("  {ENV_PREFIX}_LOG_DIR        Root of per-unit log directories");
    println!("  {ENV_PREFIX}_RESULTS_DIR    Directory for stored run reports");
    println!("  {ENV_PREFIX}_FORMAT         Output format (table, json, json-pretty, csv, summary)");
    println!("  {ENV_PREFIX}_STATUS_URL     Base URL of the status endpoint");
    println!("  {ENV_PREFIX}_UPLOAD_DIR     Directory unit logs are copied to");
    println!("  {ENV_PREFIX}_VERBOSE        Enable debug logging (true/false)");
    println!("  RUST_LOG                       Overrides the log filter");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_GROUP_THREADS=4");
    println!("  testset-runner run --input run.yaml");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(config.controller.is_none());
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_builder() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvBuilder::new()
            .controller("ctl-env")
            .group_threads(3)
            .log_dir("/tmp/testset-logs")
            .apply_scoped();

        let config = EnvConfig::load();
        assert_eq!(config.controller, Some("ctl-env".to_string()));
        assert_eq!(config.group_threads, Some(3));
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/testset-logs")));
        assert!(config.has_any());
    }

    #[test]
    fn test_env_bool_parsing() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvBuilder::new().verbose(true).apply_scoped();

        let config = EnvConfig::load();
        assert_eq!(config.verbose, Some(true));
    }

    #[test]
    fn test_zero_group_threads_ignored() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvBuilder::new()
            .status_url("http://ctl:8080")
            .var("GROUP_THREADS", "0")
            .apply_scoped();

        let config = EnvConfig::load();
        assert_eq!(config.status_url.as_deref(), Some("http://ctl:8080"));
        assert!(config.group_threads.is_none());
    }
}
