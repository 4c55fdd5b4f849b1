//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Overrides;

/// Concurrent testset scheduler
#[derive(Parser, Debug)]
#[command(name = "testset-runner")]
#[command(author = "hephaex@gmail.com")]
#[command(version)]
#[command(about = "Run groups of test units concurrently with dependency-aware skip rules")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Tool configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a run document
    Run(RunArgs),

    /// Print the normalized form of a run document
    Convert(ConvertArgs),

    /// Load and validate a run document without executing it
    Validate(InputArgs),

    /// Show groups, execution waves and units of a run document
    List(InputArgs),

    /// List the built-in unit kinds
    Units,

    /// Print the JSON Schema of the run document
    Schema,

    /// View stored run results
    Results(ResultsArgs),

    /// Manage the tool configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Run document (JSON or YAML)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Only run these unit ids (repeatable)
    #[arg(short, long = "unit")]
    pub units: Vec<String>,

    /// Only run these groups, case-insensitive (repeatable)
    #[arg(short, long = "group")]
    pub groups: Vec<String>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Maximum groups running at once
    #[arg(long)]
    pub group_threads: Option<usize>,

    /// Controller id reported to sinks
    #[arg(long)]
    pub controller: Option<String>,

    /// Root of per-unit log directories
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Base URL of the status endpoint
    #[arg(long)]
    pub status_url: Option<String>,

    /// Copy unit logs of reported groups here
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Do not store the run report
    #[arg(long)]
    pub no_save: bool,
}

impl RunArgs {
    pub fn overrides(&self, verbose: bool) -> Overrides {
        Overrides {
            controller: self.controller.clone(),
            group_threads: self.group_threads,
            log_dir: self.log_dir.clone(),
            format: self.format.clone(),
            status_url: self.status_url.clone(),
            upload_dir: self.upload_dir.clone(),
            verbose,
        }
    }
}

/// Arguments for convert command
#[derive(Parser, Debug)]
pub struct ConvertArgs {
    /// Run document (JSON or YAML)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Write here instead of stdout; YAML if the extension says so
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// A command that only needs the run document
#[derive(Parser, Debug)]
pub struct InputArgs {
    /// Run document (JSON or YAML)
    #[arg(short, long)]
    pub input: PathBuf,
}

/// Arguments for results command
#[derive(Parser, Debug)]
pub struct ResultsArgs {
    /// Show one run; the latest with `latest`
    #[arg(short, long)]
    pub run: Option<String>,

    /// Output format
    #[arg(short, long)]
    pub format: Option<String>,

    /// Export the selected run to a file (json, csv, md)
    #[arg(short, long)]
    pub export: Option<PathBuf>,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Destination path
        #[arg(default_value = "./testset-runner.yaml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show,

    /// Describe the environment variables
    Env,
}
