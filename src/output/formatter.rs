//! Output formatters for run results
//!
//! Provides table, JSON, CSV and summary output formats.

use std::io::Write;
use std::path::Path;

use crate::models::{GroupReport, ResultRecord, RunReport, UnitStatus, NO_REASON};
use crate::results::RunInfo;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn status_label(&self, status: UnitStatus) -> String {
        let plain = format!("{} {}", status.symbol(), status);
        if !self.colorize {
            return plain;
        }
        let color = match status {
            UnitStatus::Passed => "32",
            UnitStatus::Failed => "31",
            UnitStatus::Skipped => "33",
        };
        format!("\x1b[{color}m{plain}\x1b[0m")
    }

    /// Format a single record line
    pub fn format_record(&self, record: &ResultRecord) -> String {
        let mut line = format!(
            "{:<16} {:<24} {} [{:>6}ms]",
            record.unit_id,
            record.name.as_deref().unwrap_or(""),
            self.status_label(record.status),
            record.duration_ms
        );
        if record.message != NO_REASON && !record.message.is_empty() {
            line.push_str(&format!(" {}", record.message));
        }
        for warning in &record.warnings {
            line.push_str(&format!("\n{:>18}warning: {}", "", warning));
        }
        line
    }

    /// Format one group block
    pub fn format_group(&self, group: &GroupReport) -> String {
        let mut output = String::new();

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!(
            "║  {:<44} {:>14} ║\n",
            group.name,
            group.status.to_string()
        ));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        for record in &group.records {
            output.push_str(&format!("  {}\n", self.format_record(record)));
        }

        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        let pass_str = if self.colorize {
            format!("\x1b[32m{}\x1b[0m", group.passed)
        } else {
            group.passed.to_string()
        };
        let fail_str = if self.colorize && group.failed > 0 {
            format!("\x1b[31m{}\x1b[0m", group.failed)
        } else {
            group.failed.to_string()
        };

        output.push_str(&format!(
            "║  Total: {:3} | Pass: {} | Fail: {} | Skip: {:3}\n",
            group.total, pass_str, fail_str, group.skipped
        ));
        output.push_str(&format!(
            "║  Pass Rate: {:5.1}% | Duration: {:6}ms\n",
            group.pass_rate(),
            group.duration_ms
        ));
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        output
    }

    /// Format a whole run
    pub fn format_report(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Table => self.format_report_table(report),
            OutputFormat::Json => serde_json::to_string(report).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Csv => format_report_csv(report).unwrap_or_default(),
            OutputFormat::Summary => self.format_report_summary(report),
        }
    }

    fn format_report_table(&self, report: &RunReport) -> String {
        let mut output = String::new();
        for group in report.groups.values() {
            output.push_str(&self.format_group(group));
        }
        output.push('\n');
        output.push_str(&self.format_report_summary(report));
        output.push('\n');
        output
    }

    fn format_report_summary(&self, report: &RunReport) -> String {
        let verdict = if report.is_success() {
            UnitStatus::Passed
        } else {
            UnitStatus::Failed
        };
        let mut line = format!(
            "Run {} on {}: {} group(s), {}/{} passed, {} failed, {} skipped in {}ms - {}",
            report.run_id,
            report.controller,
            report.groups.len(),
            report.count(UnitStatus::Passed),
            report.total(),
            report.count(UnitStatus::Failed),
            report.count(UnitStatus::Skipped),
            report.duration_ms(),
            self.status_label(verdict)
        );
        if report.cancelled {
            line.push_str(" (cancelled)");
        }
        line
    }

    /// Format the stored-run listing
    pub fn format_runs(&self, runs: &[RunInfo]) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => {
                let json: Vec<_> = runs
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "id": r.id,
                            "controller": r.controller,
                            "startedAt": r.started_at,
                            "groups": r.groups,
                            "total": r.total,
                            "failed": r.failed,
                            "cancelled": r.cancelled,
                        })
                    })
                    .collect();
                if self.format == OutputFormat::JsonPretty {
                    serde_json::to_string_pretty(&json).unwrap_or_default()
                } else {
                    serde_json::to_string(&json).unwrap_or_default()
                }
            }
            _ => {
                let mut output = format!(
                    "{:<24} {:<16} {:<20} {:>6} {:>6} {:>6}\n",
                    "Run ID", "Controller", "Started", "Groups", "Units", "Failed"
                );
                output.push_str(&format!("{:-<83}\n", ""));
                for run in runs {
                    output.push_str(&format!(
                        "{:<24} {:<16} {:<20} {:>6} {:>6} {:>6}{}\n",
                        run.id,
                        run.controller,
                        run.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        run.groups,
                        run.total,
                        run.failed,
                        if run.cancelled { " (cancelled)" } else { "" }
                    ));
                }
                output
            }
        }
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

fn format_report_csv(report: &RunReport) -> anyhow::Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["group", "unit_id", "name", "status", "duration_ms", "message"])?;
    for group in report.groups.values() {
        for record in &group.records {
            let status = record.status.to_string();
            let duration = record.duration_ms.to_string();
            writer.write_record([
                group.name.as_str(),
                record.unit_id.as_str(),
                record.name.as_deref().unwrap_or(""),
                status.as_str(),
                duration.as_str(),
                record.message.as_str(),
            ])?;
        }
    }
    Ok(String::from_utf8(writer.into_inner()?)?)
}

/// Write a run report to a file, without colors
pub fn write_report_to_file(
    path: impl AsRef<Path>,
    report: &RunReport,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let formatter = ResultFormatter::new(format).no_color();
    let content = formatter.format_report(report);

    let mut file = std::fs::File::create(path.as_ref())?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
