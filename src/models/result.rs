//! Result models for testset execution
//!
//! Defines unit statuses, per-unit result records, and the group/run reports
//! built from them.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Result message used when a unit finishes without setting one
pub const NO_REASON: &str = "--";

/// Terminal status of a unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatus {
    Passed,
    Failed,
    Skipped,
}

impl UnitStatus {
    /// Numeric code forwarded to external reporting sinks
    pub fn code(&self) -> u8 {
        match self {
            UnitStatus::Passed => 0,
            UnitStatus::Failed => 1,
            UnitStatus::Skipped => 2,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            UnitStatus::Passed => "✓",
            UnitStatus::Failed => "✗",
            UnitStatus::Skipped => "○",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UnitStatus::Passed)
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PASSED" => Some(UnitStatus::Passed),
            "FAILED" => Some(UnitStatus::Failed),
            "SKIPPED" => Some(UnitStatus::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Passed => write!(f, "PASSED"),
            UnitStatus::Failed => write!(f, "FAILED"),
            UnitStatus::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Mutable execution state of one unit, owned by the worker running it.
///
/// A fresh state starts as `PASSED`. It can move to `FAILED` or `SKIPPED`
/// once; later transitions are ignored so the first terminal outcome wins.
#[derive(Clone, Debug)]
pub struct UnitState {
    status: UnitStatus,
    message: Option<String>,
    warnings: Vec<String>,
}

impl UnitState {
    pub fn new() -> Self {
        Self {
            status: UnitStatus::Passed,
            message: None,
            warnings: Vec::new(),
        }
    }

    pub fn status(&self) -> UnitStatus {
        self.status
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Mark the unit failed. Returns false if it already left `PASSED`.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        self.transition(UnitStatus::Failed, message.into())
    }

    /// Mark the unit skipped. Returns false if it already left `PASSED`.
    pub fn skip(&mut self, message: impl Into<String>) -> bool {
        self.transition(UnitStatus::Skipped, message.into())
    }

    /// Set the message of a unit that is still passing
    pub fn set_message(&mut self, message: impl Into<String>) {
        if self.status == UnitStatus::Passed {
            self.message = Some(message.into());
        }
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    fn transition(&mut self, to: UnitStatus, message: String) -> bool {
        if self.status != UnitStatus::Passed {
            return false;
        }
        self.status = to;
        self.message = Some(message);
        true
    }

    pub fn into_parts(self) -> (UnitStatus, String, Vec<String>) {
        let message = self.message.unwrap_or_else(|| NO_REASON.to_string());
        (self.status, message, self.warnings)
    }
}

impl Default for UnitState {
    fn default() -> Self {
        Self::new()
    }
}

/// Finalized outcome of one unit. Immutable once appended to an aggregator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub unit_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: UnitStatus,
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ResultRecord {
    pub fn new(unit_id: impl Into<String>, status: UnitStatus, message: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            name: None,
            status,
            message: message.into(),
            attachments: Vec::new(),
            warnings: Vec::new(),
            started_at: None,
            ended_at: None,
            duration_ms: 0,
        }
    }

    pub fn passed(unit_id: impl Into<String>) -> Self {
        Self::new(unit_id, UnitStatus::Passed, NO_REASON)
    }

    pub fn failed(unit_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(unit_id, UnitStatus::Failed, message)
    }

    pub fn skipped(unit_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(unit_id, UnitStatus::Skipped, message)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_timing(mut self, started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        self.duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;
        self.started_at = Some(started_at);
        self.ended_at = Some(ended_at);
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<PathBuf>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.unit_id)
    }
}

impl fmt::Display for ResultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.display_name(),
            self.duration_ms
        )?;
        if self.message != NO_REASON && !self.message.is_empty() {
            write!(f, " - {}", self.message)?;
        }
        Ok(())
    }
}

/// Results of one group after its queue drained
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupReport {
    pub name: String,
    pub status: UnitStatus,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub records: Vec<ResultRecord>,
}

impl GroupReport {
    pub fn new(name: impl Into<String>, records: Vec<ResultRecord>, duration_ms: u64) -> Self {
        let count = |status: UnitStatus| records.iter().filter(|r| r.status == status).count();
        let passed = count(UnitStatus::Passed);
        let failed = count(UnitStatus::Failed);
        let skipped = count(UnitStatus::Skipped);

        Self {
            name: name.into(),
            status: aggregate_status(&records),
            total: records.len(),
            passed,
            failed,
            skipped,
            duration_ms,
            records,
        }
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

impl fmt::Display for GroupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Group {} [{}]", self.name, self.status)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for record in &self.records {
            writeln!(f, "  {record}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {} | Duration: {}ms",
            self.total, self.passed, self.failed, self.skipped, self.duration_ms
        )
    }
}

/// `FAILED` if any unit failed or was skipped, `PASSED` otherwise
pub fn aggregate_status(records: &[ResultRecord]) -> UnitStatus {
    if records.iter().any(|r| r.status != UnitStatus::Passed) {
        UnitStatus::Failed
    } else {
        UnitStatus::Passed
    }
}

/// Output of one scheduler run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub controller: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub cancelled: bool,
    pub groups: IndexMap<String, GroupReport>,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.groups.values().map(|g| g.total).sum()
    }

    pub fn count(&self, status: UnitStatus) -> usize {
        self.records().filter(|r| r.status == status).count()
    }

    pub fn records(&self) -> impl Iterator<Item = &ResultRecord> + '_ {
        self.groups.values().flat_map(|g| g.records.iter())
    }

    /// True if no unit of the run recorded `FAILED`
    pub fn is_success(&self) -> bool {
        !self.groups.values().any(GroupReport::has_failures)
    }

    /// Process exit code for this run
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}
