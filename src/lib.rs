//! Testset runner library
//!
//! Executes groups ("testsets") of independent test units concurrently.
//! Each group drains its own work queue with a pool of named worker
//! threads; groups are ordered by their `skipIfGroupFailed` dependencies
//! and may run side by side up to a configured limit.
//!
//! ```no_run
//! use std::sync::Arc;
//! use testset_runner::config::load_plan;
//! use testset_runner::executor::Scheduler;
//! use testset_runner::units::UnitRegistry;
//!
//! # fn main() -> anyhow::Result<()> {
//! let plan = load_plan("run.yaml")?;
//! let scheduler = Scheduler::new(Arc::new(UnitRegistry::with_builtins()));
//! let report = scheduler.run(&plan)?;
//! std::process::exit(report.exit_code());
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod executor;
pub mod http;
pub mod models;
pub mod output;
pub mod reporting;
pub mod results;
pub mod units;
pub mod utils;
