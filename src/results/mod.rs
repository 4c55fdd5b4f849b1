//! Results storage and reporting module
//!
//! Provides persistent storage and report generation for run reports.

mod report;
mod storage;

pub use report::{ReportFormat, ReportGenerator};
pub use storage::{generate_run_id, ExportFormat, ResultsStorage, RunInfo};
