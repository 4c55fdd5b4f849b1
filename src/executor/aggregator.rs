//! Result aggregation
//!
//! [`ResultAggregator`] collects the records of one group while its workers
//! run. [`RunResults`] holds what the skip gates may read: failed unit ids
//! across the run and the reports of groups that already drained.

use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::models::{GroupReport, ResultRecord, UnitStatus};

/// Finalized results visible to the whole run
#[derive(Debug, Default)]
pub struct RunResults {
    failed_units: RwLock<HashSet<String>>,
    groups: RwLock<IndexMap<String, GroupReport>>,
}

impl RunResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a record for `unit_id` with status `FAILED` was appended
    pub fn unit_failed(&self, unit_id: &str) -> bool {
        self.failed_units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(unit_id)
    }

    /// True if `group` already drained and recorded at least one `FAILED` unit
    pub fn group_failed(&self, group: &str) -> bool {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group)
            .is_some_and(GroupReport::has_failures)
    }

    pub fn group_completed(&self, group: &str) -> bool {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(group)
    }

    fn mark_failed(&self, unit_id: &str) {
        self.failed_units
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(unit_id.to_string());
    }

    /// Publish the report of a drained group
    pub fn complete_group(&self, report: GroupReport) {
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(report.name.clone(), report);
    }

    /// Completed group reports, in completion order
    pub fn reports(&self) -> IndexMap<String, GroupReport> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Append-only record list of one group
#[derive(Debug)]
pub struct ResultAggregator {
    group: String,
    records: Mutex<Vec<(usize, ResultRecord)>>,
    run: Arc<RunResults>,
}

impl ResultAggregator {
    pub fn new(group: impl Into<String>, run: Arc<RunResults>) -> Self {
        Self {
            group: group.into(),
            records: Mutex::new(Vec::new()),
            run,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Append the record of the unit enqueued at position `seq`
    pub fn append(&self, seq: usize, record: ResultRecord) {
        if record.status == UnitStatus::Failed {
            self.run.mark_failed(&record.unit_id);
        }
        self.lock().push((seq, record));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Records in enqueue order; call once the queue has drained
    pub fn finalize(&self) -> Vec<ResultRecord> {
        let mut records = self.lock().clone();
        records.sort_by_key(|(seq, _)| *seq);
        records.into_iter().map(|(_, record)| record).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(usize, ResultRecord)>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
