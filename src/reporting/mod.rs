//! External status reporting
//!
//! Forwards finalized results of externally reported groups to optional
//! sinks. Every sink call is a single best-effort attempt: errors and panics
//! are logged and never change a recorded status.

mod http;
mod upload;

pub use http::HttpStatusSink;
pub use upload::DirectoryUploadSink;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::executor::panic_message;
use crate::models::{GroupReport, ResultRecord, UnitStatus};

/// Sink failure; logged only
#[derive(Error, Debug)]
pub enum ReportingError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("sink rejected update with status {status}")]
    Rejected { status: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload target {} overlaps log directory {}", .target.display(), .log_dir.display())]
    Overlap { log_dir: PathBuf, target: PathBuf },

    #[error("sink panicked: {0}")]
    Panicked(String),
}

/// Per-unit status forwarded to a run-status sink
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub run_id: String,
    pub group: String,
    pub unit_id: String,
    pub controller: String,
    pub status: UnitStatus,
    /// Numeric status code (0 passed, 1 failed, 2 skipped)
    pub status_code: u8,
    pub message: String,
}

/// Group lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupState {
    Running,
    Passed,
    Failed,
}

impl From<UnitStatus> for GroupState {
    fn from(status: UnitStatus) -> Self {
        match status {
            UnitStatus::Passed => GroupState::Passed,
            _ => GroupState::Failed,
        }
    }
}

/// Group-level status, sent when a group starts and when it drains
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStatusUpdate {
    pub run_id: String,
    pub group: String,
    pub controller: String,
    pub state: GroupState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_location: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub failed: usize,
}

/// Lightweight run-status collaborator
pub trait RunStatusSink: Send + Sync {
    fn report_status(&self, update: &StatusUpdate) -> Result<(), ReportingError>;

    fn report_group(&self, _update: &GroupStatusUpdate) -> Result<(), ReportingError> {
        Ok(())
    }
}

/// Log upload collaborator
pub trait LogUploadSink: Send + Sync {
    fn upload_log(&self, group: &str, unit_id: &str, log_dir: &Path) -> Result<(), ReportingError>;
}

/// Fans finalized results out to the configured sinks
#[derive(Clone, Default)]
pub struct StatusReporter {
    run_id: String,
    controller: String,
    status_sinks: Vec<Arc<dyn RunStatusSink>>,
    upload_sinks: Vec<Arc<dyn LogUploadSink>>,
}

impl StatusReporter {
    pub fn new(run_id: impl Into<String>, controller: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            controller: controller.into(),
            ..Default::default()
        }
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn RunStatusSink>) -> Self {
        self.status_sinks.push(sink);
        self
    }

    pub fn with_upload_sink(mut self, sink: Arc<dyn LogUploadSink>) -> Self {
        self.upload_sinks.push(sink);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status_sinks.is_empty() && self.upload_sinks.is_empty()
    }

    /// Forward one finalized record. Returns the number of sink calls that
    /// failed.
    pub fn report_unit(&self, group: &str, record: &ResultRecord, log_dir: Option<&Path>) -> usize {
        let update = StatusUpdate {
            run_id: self.run_id.clone(),
            group: group.to_string(),
            unit_id: record.unit_id.clone(),
            controller: self.controller.clone(),
            status: record.status,
            status_code: record.status.code(),
            message: record.message.clone(),
        };

        let mut failures = 0;
        for sink in &self.status_sinks {
            failures += usize::from(!attempt("status", || sink.report_status(&update)));
        }

        if let Some(dir) = log_dir.filter(|d| d.exists()) {
            for sink in &self.upload_sinks {
                failures += usize::from(!attempt("upload", || {
                    sink.upload_log(group, &record.unit_id, dir)
                }));
            }
        }

        failures
    }

    /// Announce that a group started running
    pub fn group_started(&self, group: &str, log_location: Option<&Path>) -> usize {
        self.send_group(GroupStatusUpdate {
            run_id: self.run_id.clone(),
            group: group.to_string(),
            controller: self.controller.clone(),
            state: GroupState::Running,
            log_location: log_location.map(Path::to_path_buf),
            timestamp: Utc::now(),
            total: 0,
            failed: 0,
        })
    }

    /// Announce the final state of a drained group
    pub fn group_finished(&self, report: &GroupReport, log_location: Option<&Path>) -> usize {
        self.send_group(GroupStatusUpdate {
            run_id: self.run_id.clone(),
            group: report.name.clone(),
            controller: self.controller.clone(),
            state: report.status.into(),
            log_location: log_location.map(Path::to_path_buf),
            timestamp: Utc::now(),
            total: report.total,
            failed: report.failed,
        })
    }

    fn send_group(&self, update: GroupStatusUpdate) -> usize {
        self.status_sinks
            .iter()
            .filter(|sink| !attempt("group status", || sink.report_group(&update)))
            .count()
    }
}

/// One guarded sink call; false if it failed
fn attempt(kind: &str, call: impl FnOnce() -> Result<(), ReportingError>) -> bool {
    let outcome = panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
        Err(ReportingError::Panicked(panic_message(payload.as_ref())))
    });

    match outcome {
        Ok(()) => {
            debug!("Reported {}", kind);
            true
        }
        Err(e) => {
            warn!("Failed to report {}: {}", kind, e);
            false
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every update; optionally fails each call
    #[derive(Default)]
    pub struct RecordingSink {
        pub fail: bool,
        pub panic: bool,
        pub updates: Mutex<Vec<StatusUpdate>>,
        pub groups: Mutex<Vec<GroupStatusUpdate>>,
        pub uploads: Mutex<Vec<(String, String, PathBuf)>>,
    }

    impl RecordingSink {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn panicking() -> Self {
            Self {
                panic: true,
                ..Default::default()
            }
        }

        fn outcome(&self) -> Result<(), ReportingError> {
            if self.panic {
                panic!("sink crashed");
            }
            if self.fail {
                return Err(ReportingError::Rejected { status: 503 });
            }
            Ok(())
        }
    }

    impl RunStatusSink for RecordingSink {
        fn report_status(&self, update: &StatusUpdate) -> Result<(), ReportingError> {
            self.updates.lock().unwrap().push(update.clone());
            self.outcome()
        }

        fn report_group(&self, update: &GroupStatusUpdate) -> Result<(), ReportingError> {
            self.groups.lock().unwrap().push(update.clone());
            self.outcome()
        }
    }

    impl LogUploadSink for RecordingSink {
        fn upload_log(&self, group: &str, unit_id: &str, log_dir: &Path) -> Result<(), ReportingError> {
            self.uploads.lock().unwrap().push((
                group.to_string(),
                unit_id.to_string(),
                log_dir.to_path_buf(),
            ));
            self.outcome()
        }
    }
}
