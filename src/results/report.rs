//! Report generation for run results
//!
//! Renders a stored [`RunReport`] as plain text or Markdown.

use chrono::{DateTime, Utc};
use std::fmt::{self, Write};

use crate::models::{RunReport, UnitStatus, NO_REASON};

/// Report format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Markdown,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "markdown" | "md" => Some(ReportFormat::Markdown),
            _ => None,
        }
    }
}

/// Report generator
pub struct ReportGenerator;

impl ReportGenerator {
    /// Render a run report
    pub fn run_report(report: &RunReport, format: ReportFormat) -> String {
        let mut output = String::new();
        // Writing into a String cannot fail.
        let _ = match format {
            ReportFormat::Text => write_text(&mut output, report),
            ReportFormat::Markdown => write_markdown(&mut output, report),
        };
        output
    }
}

fn write_text(output: &mut String, report: &RunReport) -> fmt::Result {
    writeln!(output, "\n{:=^70}", " Testset Run Report ")?;
    writeln!(output)?;

    writeln!(output, "Run ID: {}", report.run_id)?;
    writeln!(output, "Controller: {}", report.controller)?;
    writeln!(output, "Started: {}", format_datetime(&report.started_at))?;
    writeln!(output, "Finished: {}", format_datetime(&report.finished_at))?;
    if report.cancelled {
        writeln!(output, "Cancelled: yes")?;
    }
    writeln!(
        output,
        "Units: {} passed, {} failed, {} skipped of {}",
        report.count(UnitStatus::Passed),
        report.count(UnitStatus::Failed),
        report.count(UnitStatus::Skipped),
        report.total()
    )?;

    writeln!(output, "\n{:-^70}", " Groups ")?;
    writeln!(
        output,
        "{:<30} {:>8} {:>6} {:>6} {:>6} {:>9}",
        "Group", "Status", "Pass", "Fail", "Skip", "Time(ms)"
    )?;
    writeln!(output, "{:-<70}", "")?;
    for group in report.groups.values() {
        writeln!(
            output,
            "{:<30} {:>8} {:>6} {:>6} {:>6} {:>9}",
            truncate(&group.name, 30),
            group.status,
            group.passed,
            group.failed,
            group.skipped,
            group.duration_ms
        )?;
    }

    let problems: Vec<_> = report
        .groups
        .values()
        .flat_map(|g| g.records.iter().map(move |r| (g, r)))
        .filter(|(_, r)| r.status != UnitStatus::Passed)
        .collect();
    if !problems.is_empty() {
        writeln!(output, "\n{:-^70}", " Not Passed ")?;
        for (group, record) in problems {
            writeln!(
                output,
                "{} {}/{}: {}",
                record.status.symbol(),
                group.name,
                record.display_name(),
                record.message
            )?;
        }
    }

    writeln!(output, "\n{:=^70}", "")
}

fn write_markdown(output: &mut String, report: &RunReport) -> fmt::Result {
    writeln!(output, "# Testset Run Report\n")?;
    writeln!(output, "## Summary\n")?;
    writeln!(output, "| Property | Value |")?;
    writeln!(output, "|----------|-------|")?;
    writeln!(output, "| Run ID | `{}` |", report.run_id)?;
    writeln!(output, "| Controller | {} |", report.controller)?;
    writeln!(output, "| Started | {} |", format_datetime(&report.started_at))?;
    writeln!(output, "| Finished | {} |", format_datetime(&report.finished_at))?;
    writeln!(output, "| Duration | {}ms |", report.duration_ms())?;
    writeln!(output, "| Cancelled | {} |", report.cancelled)?;
    writeln!(
        output,
        "| Result | {} |",
        if report.is_success() { "PASSED" } else { "FAILED" }
    )?;

    writeln!(output, "\n## Groups\n")?;
    writeln!(output, "| Group | Status | Passed | Failed | Skipped | Duration |")?;
    writeln!(output, "|-------|--------|--------|--------|---------|----------|")?;
    for group in report.groups.values() {
        writeln!(
            output,
            "| {} | {} | {} | {} | {} | {}ms |",
            group.name, group.status, group.passed, group.failed, group.skipped, group.duration_ms
        )?;
    }

    for group in report.groups.values() {
        writeln!(output, "\n### {}\n", group.name)?;
        writeln!(output, "| Unit | Status | Message | Duration |")?;
        writeln!(output, "|------|--------|---------|----------|")?;
        for record in &group.records {
            let message = if record.message == NO_REASON {
                ""
            } else {
                record.message.as_str()
            };
            writeln!(
                output,
                "| {} | {} {} | {} | {}ms |",
                record.display_name(),
                record.status.symbol(),
                record.status,
                escape_cell(message),
                record.duration_ms
            )?;
        }
    }

    Ok(())
}

fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
