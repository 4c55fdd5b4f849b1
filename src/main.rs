//! testset-runner - concurrent testset scheduler
//!
//! Runs groups of test units from a JSON or YAML run document. Units of a
//! group are drained by a pool of worker threads; groups can skip
//! themselves (or single units) when a group or unit they depend on failed.
//!
//! ## Usage
//!
//! ```bash
//! # Run everything in a run document
//! testset-runner run --input run.yaml
//!
//! # Only two units of one group, four groups at a time
//! testset-runner run --input run.yaml -g database -u 1001 -u 1002 --group-threads 4
//!
//! # Inspect the plan without running it
//! testset-runner list --input run.yaml
//!
//! # Show the last stored run
//! testset-runner results --run latest
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use testset_runner::cli::{self, Args, ConfigAction, ConvertArgs, InputArgs, ResultsArgs, RunArgs};
use testset_runner::config::{
    self, default_controller, env::print_env_help, ConfigFile, EnvConfig, Overrides, RunInput,
    Settings,
};
use testset_runner::executor::{CancelFlag, Scheduler, SchedulerOptions};
use testset_runner::models::RunPlan;
use testset_runner::output::{write_report_to_file, OutputFormat, ResultFormatter};
use testset_runner::reporting::{DirectoryUploadSink, HttpStatusSink, StatusReporter};
use testset_runner::results::{generate_run_id, ExportFormat, ResultsStorage};
use testset_runner::units::UnitRegistry;
use testset_runner::utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env = EnvConfig::load();
    init_logger(LogLevel::for_verbosity(
        args.verbose || env.verbose.unwrap_or(false),
    ));

    let file = load_config_file(&args, &env)?;

    match args.command {
        cli::Command::Run(ref run_args) => {
            let settings = Settings::resolve(&file, &env, &run_args.overrides(args.verbose));
            let code = run(run_args, settings).await?;
            std::process::exit(code);
        }
        cli::Command::Convert(convert_args) => convert(&convert_args)?,
        cli::Command::Validate(input_args) => validate(&input_args)?,
        cli::Command::List(input_args) => list_plan(&input_args)?,
        cli::Command::Units => list_units(),
        cli::Command::Schema => {
            println!(
                "{}",
                serde_json::to_string_pretty(&config::run_input_schema())?
            );
        }
        cli::Command::Results(ref results_args) => {
            let settings = Settings::resolve(&file, &env, &Overrides::default());
            show_results(results_args, &settings)?;
        }
        cli::Command::Config(config_args) => match config_args.action {
            ConfigAction::Init { path, force } => {
                if path.exists() && !force {
                    anyhow::bail!(
                        "{} already exists; pass --force to overwrite",
                        path.display()
                    );
                }
                ConfigFile::example().save(&path)?;
                println!("Wrote example configuration to {}", path.display());
            }
            ConfigAction::Show => {
                let settings = Settings::resolve(&file, &env, &Overrides::default());
                println!("{}", serde_yaml::to_string(&file)?);
                println!("Effective settings:\n{settings:#?}");
            }
            ConfigAction::Env => {
                env.print_summary();
                println!();
                print_env_help();
            }
        },
    }

    Ok(())
}

/// Explicit `--config`, then `TESTSET_RUNNER_CONFIG`, then the standard locations
fn load_config_file(args: &Args, env: &EnvConfig) -> Result<ConfigFile> {
    let explicit = args
        .config
        .clone()
        .or_else(|| env.config_file.clone().map(Into::into));

    match explicit {
        Some(path) => ConfigFile::load(&path),
        None => ConfigFile::load_default(),
    }
}

fn parse_format(format: &str) -> Result<OutputFormat> {
    OutputFormat::from_str(format).with_context(|| format!("Unknown output format: {format}"))
}

async fn run(args: &RunArgs, settings: Settings) -> Result<i32> {
    let format = parse_format(&settings.format)?;
    let mut plan = config::load_plan(&args.input)?;

    if !args.units.is_empty() {
        plan.unit_filter = args.units.clone();
    }
    if !args.groups.is_empty() {
        plan.group_filter = args.groups.clone();
    }

    let run_id = generate_run_id();
    let controller = settings
        .controller
        .clone()
        .or_else(|| plan.controller.clone())
        .unwrap_or_else(default_controller);
    let runtime = Handle::current();

    let mut reporter = StatusReporter::new(run_id.clone(), controller.clone());
    if let Some(url) = &settings.status_url {
        let sink = HttpStatusSink::new(url.clone(), settings.timeout_secs, runtime.clone())?;
        reporter = reporter.with_status_sink(Arc::new(sink));
        info!("Reporting status to {}", url);
    }
    if let Some(dir) = &settings.upload_dir {
        reporter = reporter.with_upload_sink(Arc::new(DirectoryUploadSink::new(dir, &run_id)));
        info!("Uploading unit logs to {}", dir.display());
    }

    let options = SchedulerOptions {
        run_id,
        controller,
        log_dir: settings.log_dir.clone(),
        group_threads: settings.group_threads,
        runtime: Some(runtime),
    };

    let cancel = CancelFlag::new();
    let scheduler = Scheduler::new(Arc::new(UnitRegistry::with_builtins()))
        .with_options(options)
        .with_reporter(reporter)
        .with_cancel_flag(cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, remaining units will be recorded as skipped");
            cancel.cancel();
        }
    });

    let report = tokio::task::spawn_blocking(move || scheduler.run(&plan))
        .await
        .context("Scheduler thread failed")??;

    if !args.no_save {
        let storage = ResultsStorage::new(&settings.results_dir);
        if let Err(e) = storage.save(&report) {
            warn!("Failed to store run results: {:#}", e);
        }
    }

    match &args.output {
        Some(path) => {
            write_report_to_file(path, &report, format)?;
            println!("Results written to {}", path.display());
        }
        None => {
            println!("{}", ResultFormatter::new(format).format_report(&report));
        }
    }

    Ok(report.exit_code())
}

fn convert(args: &ConvertArgs) -> Result<()> {
    let plan = config::load_plan(&args.input)?;
    let normalized = RunInput::from_plan(&plan);

    match &args.output {
        Some(path) => {
            let is_yaml = path
                .extension()
                .map(|e| e == "yaml" || e == "yml")
                .unwrap_or(false);
            let content = if is_yaml {
                serde_yaml::to_string(&normalized)?
            } else {
                serde_json::to_string_pretty(&normalized)?
            };
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Normalized input written to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&normalized)?),
    }

    Ok(())
}

fn validate(args: &InputArgs) -> Result<()> {
    let plan = config::load_plan(&args.input)?;
    let registry = UnitRegistry::with_builtins();

    let mut unresolved = 0;
    for group in plan.groups.values() {
        for unit in &group.units {
            if let Err(e) = registry.can_resolve(&unit.id, &unit.inputs) {
                warn!("Group {}: {}", group.name, e);
                unresolved += 1;
            }
        }
    }

    println!(
        "{} is valid: {} group(s), {} unit(s)",
        args.input.display(),
        plan.groups.len(),
        plan.unit_count()
    );
    if unresolved > 0 {
        println!("{unresolved} unit(s) have no registered implementation and would fail");
    }
    Ok(())
}

fn list_plan(args: &InputArgs) -> Result<()> {
    let plan = config::load_plan(&args.input)?;
    print_plan(&plan)
}

fn print_plan(plan: &RunPlan) -> Result<()> {
    let names: Vec<&str> = plan.groups.keys().map(String::as_str).collect();
    let waves = plan
        .execution_waves(&names)
        .map_err(config::ConfigError::DependencyCycle)?;

    println!("\nGroups ({} unit(s), up to {} at a time):", plan.unit_count(), plan.group_threads);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for (idx, wave) in waves.iter().enumerate() {
        println!("Wave {}:", idx + 1);
        for name in wave {
            let Some(group) = plan.group(name) else {
                continue;
            };
            println!(
                "  {} - {} unit(s), {} thread(s){}{}",
                group.name,
                group.units.len(),
                group.effective_threads(group.units.len()),
                if group.report_externally { ", reported" } else { "" },
                if group.skip_if_group_failed.is_empty() {
                    String::new()
                } else {
                    format!(", after {}", group.skip_if_group_failed.join(", "))
                }
            );
            for unit in &group.units {
                let kind = unit
                    .inputs
                    .get("kind")
                    .and_then(|v| v.as_str())
                    .unwrap_or("-");
                println!("      {:<16} {}", unit.id, kind);
            }
        }
    }
    Ok(())
}

fn list_units() {
    let registry = UnitRegistry::with_builtins();

    println!("\nBuilt-in unit kinds (select with the \"kind\" input):");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for (kind, description) in registry.kinds() {
        println!("  {kind:<10} {description}");
    }
}

fn show_results(args: &ResultsArgs, settings: &Settings) -> Result<()> {
    let storage = ResultsStorage::new(&settings.results_dir);
    let format = parse_format(args.format.as_deref().unwrap_or(&settings.format))?;
    let formatter = ResultFormatter::new(format);
    debug!("Reading results from {}", storage.base_dir().display());

    let report = match args.run.as_deref() {
        None if args.export.is_none() => {
            let runs = storage.list()?;
            if runs.is_empty() {
                println!("No stored runs in {}", storage.base_dir().display());
            } else {
                println!("{}", formatter.format_runs(&runs));
            }
            return Ok(());
        }
        None | Some("latest") => storage.latest()?.context("No stored runs")?,
        Some(run_id) => storage.load(run_id)?,
    };

    match &args.export {
        Some(path) => {
            let export_format = ExportFormat::from_extension(path).unwrap_or(ExportFormat::Json);
            storage.export(&report, path, export_format)?;
            println!("Exported run {} to {}", report.run_id, path.display());
        }
        None => println!("{}", formatter.format_report(&report)),
    }

    Ok(())
}

