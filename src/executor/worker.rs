//! Per-unit processing performed by every pool worker

use chrono::Utc;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, info, info_span, warn};

use super::aggregator::{ResultAggregator, RunResults};
use super::boundary::{self, panic_message};
use super::gate::{self, SkipReason};
use super::queue::WorkItem;
use super::CancelFlag;
use crate::models::{GroupDefinition, ResultRecord, UnitState, UnitStatus};
use crate::reporting::StatusReporter;
use crate::units::{UnitContext, UnitRegistry};

/// Everything a worker of one group needs, shared by all its threads
pub(crate) struct GroupWorker {
    pub group: Arc<GroupDefinition>,
    pub registry: Arc<UnitRegistry>,
    pub results: Arc<RunResults>,
    pub aggregator: Arc<ResultAggregator>,
    pub reporter: Arc<StatusReporter>,
    pub cancel: CancelFlag,
    pub run_id: String,
    pub controller: String,
    pub log_root: Option<PathBuf>,
    pub runtime: Option<Handle>,
}

impl GroupWorker {
    fn unit_log_dir(&self, unit_id: &str) -> Option<PathBuf> {
        self.log_root
            .as_ref()
            .map(|root| root.join(&self.group.name).join(unit_id))
    }

    /// Gate, execute, record and report one dequeued unit. Always leaves
    /// exactly one record for the unit, even if processing itself panics.
    pub fn process(&self, item: WorkItem) {
        let seq = item.seq;
        let unit_id = item.unit_id.clone();
        self.guarded(seq, &unit_id, |appended| self.process_unit(item, appended));
    }

    /// Run `body`; if it panics before a record was appended, append a
    /// `FAILED` record in its place
    fn guarded<F: FnOnce(&mut bool)>(&self, seq: usize, unit_id: &str, body: F) {
        let mut appended = false;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&mut appended)));

        if let Err(payload) = outcome {
            let message = format!("worker fault: {}", panic_message(payload.as_ref()));
            error!("Unit {} of group {}: {}", unit_id, self.group.name, message);
            if !appended {
                self.aggregator
                    .append(seq, ResultRecord::failed(unit_id, message));
            }
        }
    }

    fn process_unit(&self, item: WorkItem, appended: &mut bool) {
        let span = info_span!("unit", group = %self.group.name, id = %item.unit_id);
        let _enter = span.enter();

        let log_dir = self.unit_log_dir(&item.unit_id);
        let mut ctx = UnitContext::new(self.group.name.clone(), item.unit_id.clone(), item.inputs)
            .with_run(self.run_id.clone(), self.controller.clone())
            .with_runtime(self.runtime.clone());
        if let Some(dir) = &log_dir {
            ctx = ctx.with_log_dir(dir.clone());
        }

        let started_at = Utc::now();
        let mut state = UnitState::new();

        let skip = if self.cancel.is_cancelled() {
            Some(SkipReason::Cancelled)
        } else {
            gate::evaluate(&self.group, &self.results)
        };

        match skip {
            Some(reason) => {
                info!("Skipping unit: {}", reason);
                state.skip(reason.message());
            }
            None => {
                debug!("Executing unit");
                boundary::execute(&self.registry, &mut ctx, &mut state);
            }
        }

        let ended_at = Utc::now();
        let (name, message, attachments) = ctx.finish();
        if let Some(message) = message {
            state.set_message(message);
        }
        let (status, message, warnings) = state.into_parts();

        let mut record = ResultRecord::new(item.unit_id, status, message)
            .with_timing(started_at, ended_at)
            .with_attachments(attachments)
            .with_warnings(warnings);
        if let Some(name) = name {
            record = record.with_name(name);
        }

        match record.status {
            UnitStatus::Passed => info!("{}", record),
            UnitStatus::Failed => warn!("{}", record),
            UnitStatus::Skipped => info!("{}", record),
        }
        for warning in &record.warnings {
            warn!("Unit warning: {}", warning);
        }

        let report = self.group.report_externally.then(|| record.clone());
        self.aggregator.append(item.seq, record);
        *appended = true;

        if let Some(record) = report {
            let failures = self
                .reporter
                .report_unit(&self.group.name, &record, log_dir.as_deref());
            if failures > 0 {
                debug!("{} sink call(s) failed for unit {}", failures, record.unit_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Inputs;
    use serde_json::json;

    fn worker() -> GroupWorker {
        let results = Arc::new(RunResults::new());
        GroupWorker {
            group: Arc::new(GroupDefinition::new("G1")),
            registry: Arc::new(UnitRegistry::with_builtins()),
            results: results.clone(),
            aggregator: Arc::new(ResultAggregator::new("G1", results)),
            reporter: Arc::new(StatusReporter::default()),
            cancel: CancelFlag::new(),
            run_id: "run-1".to_string(),
            controller: "ctl".to_string(),
            log_root: None,
            runtime: None,
        }
    }

    #[test]
    fn test_process_appends_one_record() {
        let worker = worker();
        let inputs: Inputs = serde_json::from_value(json!({ "kind": "noop" })).unwrap();
        worker.process(WorkItem {
            seq: 0,
            unit_id: "1001".to_string(),
            inputs,
        });

        let records = worker.aggregator.finalize();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, UnitStatus::Passed);
    }

    #[test]
    fn test_panic_before_append_records_failure() {
        let worker = worker();
        worker.guarded(3, "1001", |_| panic!("record building broke"));

        let records = worker.aggregator.finalize();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].unit_id, "1001");
        assert_eq!(records[0].status, UnitStatus::Failed);
        assert!(records[0].message.contains("record building broke"));
        assert!(worker.results.unit_failed("1001"));
    }

    #[test]
    fn test_panic_after_append_keeps_single_record() {
        let worker = worker();
        worker.guarded(0, "1001", |appended| {
            worker.aggregator.append(0, ResultRecord::passed("1001"));
            *appended = true;
            panic!("late failure");
        });

        let records = worker.aggregator.finalize();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, UnitStatus::Passed);
    }
}
