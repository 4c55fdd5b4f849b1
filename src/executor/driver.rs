//! Scheduler driver
//!
//! Runs a [`RunPlan`]: filters groups and units, orders groups into
//! dependency waves and drains one queue and worker pool per group.

use chrono::Utc;
use crossbeam_channel::unbounded;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::aggregator::{ResultAggregator, RunResults};
use super::pool::WorkerPool;
use super::queue::{WorkItem, WorkQueue};
use super::worker::GroupWorker;
use crate::config::ConfigError;
use crate::models::{
    GroupDefinition, GroupReport, ResultRecord, RunPlan, RunReport, UnitSpec, UnitStatus,
};
use crate::reporting::StatusReporter;
use crate::results::generate_run_id;
use crate::units::UnitRegistry;
use crate::utils::{Stopwatch, Timer};

/// Shared cancellation flag; once set, dequeued units are recorded
/// `SKIPPED` instead of executed
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run scheduler settings
#[derive(Clone, Debug)]
pub struct SchedulerOptions {
    pub run_id: String,
    pub controller: String,
    /// Root for unit log directories (`<root>/<run>/<group>/<unit>`)
    pub log_dir: Option<PathBuf>,
    /// Overrides the plan's `groupThreads`
    pub group_threads: Option<usize>,
    /// Async runtime handed to units and sinks
    pub runtime: Option<Handle>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            run_id: generate_run_id(),
            controller: "localhost".to_string(),
            log_dir: None,
            group_threads: None,
            runtime: None,
        }
    }
}

/// Executes run plans against a unit registry
pub struct Scheduler {
    registry: Arc<UnitRegistry>,
    reporter: Arc<StatusReporter>,
    options: SchedulerOptions,
    cancel: CancelFlag,
}

/// A selected group with its filtered units
struct GroupJob {
    group: Arc<GroupDefinition>,
    units: Vec<UnitSpec>,
}

impl Scheduler {
    pub fn new(registry: Arc<UnitRegistry>) -> Self {
        Self {
            registry,
            reporter: Arc::new(StatusReporter::default()),
            options: SchedulerOptions::default(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_reporter(mut self, reporter: StatusReporter) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    fn run_log_dir(&self) -> Option<PathBuf> {
        self.options
            .log_dir
            .as_ref()
            .map(|dir| dir.join(&self.options.run_id))
    }

    /// Apply the group and unit filters, in configuration order
    fn select(&self, plan: &RunPlan) -> IndexMap<String, GroupJob> {
        let mut jobs = IndexMap::new();

        for (name, group) in &plan.groups {
            if !plan.group_selected(name) {
                info!("Group {} not selected by filter, skipping", name);
                continue;
            }

            let units: Vec<UnitSpec> = group
                .units
                .iter()
                .filter(|unit| {
                    let selected = plan.unit_selected(&unit.id);
                    if !selected {
                        debug!("Unit {} of group {} filtered out", unit.id, name);
                    }
                    selected
                })
                .cloned()
                .collect();

            if units.is_empty() {
                warn!("Group {} has no units left after filtering, not running it", name);
                continue;
            }

            jobs.insert(
                name.clone(),
                GroupJob {
                    group: Arc::new(group.clone()),
                    units,
                },
            );
        }

        jobs
    }

    /// Run every selected group and return the aggregated report.
    ///
    /// Only a dependency cycle among the selected groups is an error; every
    /// unit-level fault ends up in a record.
    pub fn run(&self, plan: &RunPlan) -> Result<RunReport, ConfigError> {
        let started_at = Utc::now();
        let jobs = self.select(plan);
        let names: Vec<&str> = jobs.keys().map(String::as_str).collect();
        let waves = plan
            .execution_waves(&names)
            .map_err(ConfigError::DependencyCycle)?;

        let group_threads = self
            .options
            .group_threads
            .unwrap_or(plan.group_threads)
            .max(1);
        info!(
            "Run {} started: {} group(s), {} unit(s), {} wave(s), up to {} concurrent group(s)",
            self.options.run_id,
            jobs.len(),
            jobs.values().map(|j| j.units.len()).sum::<usize>(),
            waves.len(),
            group_threads
        );

        let results = Arc::new(RunResults::new());
        let mut stopwatch = Stopwatch::new();

        for (idx, wave) in waves.iter().enumerate() {
            let wave_jobs: Vec<&GroupJob> = wave.iter().filter_map(|name| jobs.get(name)).collect();
            self.run_wave(&wave_jobs, group_threads, &results);
            stopwatch.lap(format!("wave {}", idx + 1));
        }
        debug!("Run timing:\n{}", stopwatch.format());

        let mut completed = results.reports();
        let groups: IndexMap<String, GroupReport> = jobs
            .keys()
            .filter_map(|name| completed.shift_remove(name).map(|r| (name.clone(), r)))
            .collect();

        let report = RunReport {
            run_id: self.options.run_id.clone(),
            controller: self.options.controller.clone(),
            started_at,
            finished_at: Utc::now(),
            cancelled: self.cancel.is_cancelled(),
            groups,
        };

        info!(
            "Run {} finished in {}ms: {} unit(s), {} failed",
            report.run_id,
            report.duration_ms(),
            report.total(),
            report.count(UnitStatus::Failed)
        );
        Ok(report)
    }

    /// Run the groups of one wave, at most `group_threads` at a time
    fn run_wave(&self, jobs: &[&GroupJob], group_threads: usize, results: &Arc<RunResults>) {
        if jobs.len() == 1 || group_threads == 1 {
            for job in jobs {
                self.run_group(job, results);
            }
            return;
        }

        let (sender, receiver) = unbounded();
        for job in jobs {
            let _ = sender.send(*job);
        }
        drop(sender);

        thread::scope(|scope| {
            for idx in 0..group_threads.min(jobs.len()) {
                let receiver = receiver.clone();
                let spawned = thread::Builder::new()
                    .name(format!("group-runner-{idx}"))
                    .spawn_scoped(scope, move || {
                        for job in receiver.iter() {
                            self.run_group(job, results);
                        }
                    });
                if let Err(e) = spawned {
                    error!("Failed to start group runner {}: {}", idx, e);
                }
            }
        });

        // Groups left behind if no runner thread could start
        for job in receiver.try_iter() {
            self.run_group(job, results);
        }
    }

    /// Queue, execute and drain one group
    fn run_group(&self, job: &GroupJob, results: &Arc<RunResults>) -> GroupReport {
        let group = &job.group;
        let timer = Timer::start(format!("group {}", group.name));
        let threads = group.effective_threads(job.units.len());
        let log_root = self.run_log_dir();
        let group_log_dir = log_root.as_ref().map(|root| root.join(&group.name));

        info!(
            "Group {} started: {} unit(s) on {} worker(s)",
            group.name,
            job.units.len(),
            threads
        );
        if group.report_externally {
            self.reporter
                .group_started(&group.name, group_log_dir.as_deref());
        }

        let aggregator = Arc::new(ResultAggregator::new(group.name.clone(), results.clone()));
        let queue = Arc::new(WorkQueue::new(group.name.clone(), job.units.len()));
        let worker = Arc::new(GroupWorker {
            group: group.clone(),
            registry: self.registry.clone(),
            results: results.clone(),
            aggregator: aggregator.clone(),
            reporter: self.reporter.clone(),
            cancel: self.cancel.clone(),
            run_id: self.options.run_id.clone(),
            controller: self.options.controller.clone(),
            log_root,
            runtime: self.options.runtime.clone(),
        });

        let handler = worker.clone();
        match WorkerPool::start(threads, queue.clone(), move |item| handler.process(item)) {
            Ok(pool) => {
                for (seq, unit) in job.units.iter().enumerate() {
                    let item = WorkItem {
                        seq,
                        unit_id: unit.id.clone(),
                        inputs: unit.inputs.clone(),
                    };
                    if let Err(e) = queue.enqueue(item) {
                        error!("{}", e);
                        aggregator.append(seq, ResultRecord::failed(&unit.id, e.to_string()));
                    }
                }
                queue.close();
                queue.join();
                let handled = pool.shutdown();
                debug!("Group {} workers handled {:?} unit(s)", group.name, handled);
            }
            Err(e) => {
                error!("No worker could start for group {}: {}", group.name, e);
                queue.close();
                for (seq, unit) in job.units.iter().enumerate() {
                    aggregator.append(
                        seq,
                        ResultRecord::failed(&unit.id, format!("failed to start workers: {e}")),
                    );
                }
            }
        }

        let duration_ms = timer.stop().as_millis() as u64;
        let report = GroupReport::new(group.name.clone(), aggregator.finalize(), duration_ms);
        results.complete_group(report.clone());
        if group.report_externally {
            self.reporter
                .group_finished(&report, group_log_dir.as_deref());
        }

        info!(
            "Group {} finished [{}] in {}ms - Pass: {} Fail: {} Skip: {}",
            report.name, report.status, report.duration_ms, report.passed, report.failed, report.skipped
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporting::testing::RecordingSink;
    use crate::units::{Inputs, Unit, UnitContext};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Calls {
        setup: AtomicUsize,
        run: AtomicUsize,
        teardown: AtomicUsize,
    }

    impl Calls {
        fn total(&self) -> usize {
            self.setup.load(Ordering::SeqCst)
                + self.run.load(Ordering::SeqCst)
                + self.teardown.load(Ordering::SeqCst)
        }
    }

    struct CountingUnit(Arc<Calls>);

    impl Unit for CountingUnit {
        fn setup(&mut self, _ctx: &mut UnitContext) -> anyhow::Result<()> {
            self.0.setup.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn run(&mut self, _ctx: &mut UnitContext) -> anyhow::Result<()> {
            self.0.run.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn teardown(&mut self, _ctx: &mut UnitContext) -> anyhow::Result<()> {
            self.0.teardown.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct PanickingUnit;

    impl Unit for PanickingUnit {
        fn run(&mut self, _ctx: &mut UnitContext) -> anyhow::Result<()> {
            panic!("unit body crashed")
        }
    }

    /// Records the worker thread it ran on
    struct ThreadProbe(Arc<Mutex<HashSet<String>>>);

    impl Unit for ThreadProbe {
        fn run(&mut self, _ctx: &mut UnitContext) -> anyhow::Result<()> {
            let name = thread::current().name().unwrap_or_default().to_string();
            self.0.lock().unwrap().insert(name);
            thread::sleep(Duration::from_millis(100));
            Ok(())
        }
    }

    fn kind(kind: &str) -> Inputs {
        inputs(json!({ "kind": kind }))
    }

    fn inputs(value: serde_json::Value) -> Inputs {
        serde_json::from_value(value).unwrap()
    }

    fn scheduler(registry: UnitRegistry) -> Scheduler {
        Scheduler::new(Arc::new(registry))
    }

    fn statuses(report: &RunReport, group: &str) -> Vec<UnitStatus> {
        report.groups[group].records.iter().map(|r| r.status).collect()
    }

    #[test]
    fn test_three_units_two_threads_all_pass() {
        let plan = RunPlan::new().with_group(
            GroupDefinition::new("G1")
                .with_threads(2)
                .with_unit("1", kind("noop"))
                .with_unit("2", kind("noop"))
                .with_unit("3", kind("noop")),
        );

        let report = scheduler(UnitRegistry::with_builtins()).run(&plan).unwrap();
        assert_eq!(statuses(&report, "G1"), vec![UnitStatus::Passed; 3]);
        assert_eq!(report.groups["G1"].status, UnitStatus::Passed);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_group_gate_skips_dependent_group() {
        let plan = RunPlan::new()
            .with_group(
                GroupDefinition::new("G2")
                    .skip_if_group_failed("G1")
                    .with_unit("20", kind("noop"))
                    .with_unit("21", kind("noop")),
            )
            .with_group(
                GroupDefinition::new("G1")
                    .with_unit("10", kind("noop"))
                    .with_unit("11", kind("fail")),
            );

        let mut options = SchedulerOptions::default();
        options.group_threads = Some(2);
        let report = scheduler(UnitRegistry::with_builtins())
            .with_options(options)
            .run(&plan)
            .unwrap();

        assert_eq!(
            statuses(&report, "G1"),
            vec![UnitStatus::Passed, UnitStatus::Failed]
        );
        assert_eq!(statuses(&report, "G2"), vec![UnitStatus::Skipped; 2]);
        assert!(report.groups["G2"].records.iter().all(|r| r.message.is_empty()));
        // configuration order is kept in the report
        assert_eq!(report.groups.keys().collect::<Vec<_>>(), vec!["G2", "G1"]);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_run_fault_does_not_stop_queue() {
        let registry = UnitRegistry::with_builtins().with_unit("boom", || Box::new(PanickingUnit));
        let plan = RunPlan::new().with_group(
            GroupDefinition::new("G1")
                .with_unit("1", inputs(json!({ "kind": "fail", "message": "disk full" })))
                .with_unit("boom", Inputs::new())
                .with_unit("3", kind("noop")),
        );

        let report = scheduler(registry).run(&plan).unwrap();
        let records = &report.groups["G1"].records;
        assert_eq!(records[0].status, UnitStatus::Failed);
        assert_eq!(records[0].message, "disk full");
        assert_eq!(records[1].status, UnitStatus::Failed);
        assert_eq!(records[1].message, "run panicked: unit body crashed");
        assert_eq!(records[2].status, UnitStatus::Passed);
    }

    #[test]
    fn test_parallel_group_uses_one_worker_per_unit() {
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let probe = seen.clone();
        let registry =
            UnitRegistry::new().with_kind("probe", "", move || Box::new(ThreadProbe(probe.clone())));

        let mut group = GroupDefinition::new("P").parallel();
        for id in 0..5 {
            group = group.with_unit(id.to_string(), kind("probe"));
        }
        assert_eq!(group.effective_threads(5), 5);

        let report = scheduler(registry).run(&RunPlan::new().with_group(group)).unwrap();
        assert_eq!(report.groups["P"].passed, 5);
        assert_eq!(seen.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_unit_filter_selects_single_unit() {
        let mut plan = RunPlan::new().with_group(
            GroupDefinition::new("G1")
                .with_unit("1", kind("noop"))
                .with_unit("2", kind("noop"))
                .with_unit("3", kind("noop"))
                .with_unit("4", kind("noop")),
        );
        plan.unit_filter = vec!["3".to_string()];

        let report = scheduler(UnitRegistry::with_builtins()).run(&plan).unwrap();
        assert_eq!(report.total(), 1);
        assert_eq!(report.groups["G1"].records[0].unit_id, "3");
    }

    #[test]
    fn test_group_without_selected_units_is_not_run() {
        let mut plan = RunPlan::new()
            .with_group(GroupDefinition::new("Alpha").with_unit("1", kind("noop")))
            .with_group(GroupDefinition::new("Beta").with_unit("2", kind("noop")));
        plan.group_filter = vec!["alpha".to_string(), "beta".to_string()];
        plan.unit_filter = vec!["1".to_string()];

        let report = scheduler(UnitRegistry::with_builtins()).run(&plan).unwrap();
        assert_eq!(report.groups.keys().collect::<Vec<_>>(), vec!["Alpha"]);
    }

    #[test]
    fn test_unit_gate_never_invokes_lifecycle() {
        let calls = Arc::new(Calls::default());
        let counted = calls.clone();
        let registry = UnitRegistry::with_builtins()
            .with_unit("B", move || Box::new(CountingUnit(counted.clone())));

        let plan = RunPlan::new()
            .with_group(GroupDefinition::new("G1").with_unit("A", kind("fail")))
            .with_group(
                GroupDefinition::new("G2")
                    .skip_if_unit_failed("A")
                    .with_unit("B", Inputs::new()),
            );

        let report = scheduler(registry).run(&plan).unwrap();
        assert_eq!(statuses(&report, "G2"), vec![UnitStatus::Skipped]);
        assert_eq!(calls.total(), 0);
    }

    #[test]
    fn test_unit_gate_waits_for_later_scheduled_owner() {
        let plan = RunPlan::new()
            .with_group(
                GroupDefinition::new("A")
                    .skip_if_group_failed("C")
                    .with_unit("a1", kind("fail")),
            )
            .with_group(
                GroupDefinition::new("B")
                    .skip_if_unit_failed("a1")
                    .with_unit("b1", kind("noop")),
            )
            .with_group(GroupDefinition::new("C").with_unit("c1", kind("noop")));

        let report = scheduler(UnitRegistry::with_builtins()).run(&plan).unwrap();
        assert_eq!(statuses(&report, "C"), vec![UnitStatus::Passed]);
        assert_eq!(statuses(&report, "A"), vec![UnitStatus::Failed]);
        assert_eq!(statuses(&report, "B"), vec![UnitStatus::Skipped]);
        assert_eq!(
            report.groups["B"].records[0].message,
            "skipped: unit a1 failed"
        );
    }

    #[test]
    fn test_unit_gate_within_sequential_group() {
        let calls = Arc::new(Calls::default());
        let counted = calls.clone();
        let registry = UnitRegistry::with_builtins()
            .with_unit("B", move || Box::new(CountingUnit(counted.clone())));

        let plan = RunPlan::new().with_group(
            GroupDefinition::new("G1")
                .skip_if_unit_failed("A")
                .with_unit("A", kind("fail"))
                .with_unit("B", Inputs::new()),
        );

        let report = scheduler(registry).run(&plan).unwrap();
        assert_eq!(
            statuses(&report, "G1"),
            vec![UnitStatus::Failed, UnitStatus::Skipped]
        );
        assert_eq!(
            report.groups["G1"].records[1].message,
            "skipped: unit A failed"
        );
        assert_eq!(calls.total(), 0);
    }

    #[test]
    fn test_failing_sinks_do_not_change_status() {
        let failing = Arc::new(RecordingSink::failing());
        let panicking = Arc::new(RecordingSink::panicking());
        let reporter = StatusReporter::new("run", "ctl")
            .with_status_sink(failing.clone())
            .with_status_sink(panicking);

        let plan = RunPlan::new().with_group(
            GroupDefinition::new("G1")
                .report_externally()
                .with_unit("1", kind("noop"))
                .with_unit("2", kind("noop")),
        );

        let report = scheduler(UnitRegistry::with_builtins())
            .with_reporter(reporter)
            .run(&plan)
            .unwrap();
        assert_eq!(statuses(&report, "G1"), vec![UnitStatus::Passed; 2]);
        assert_eq!(failing.updates.lock().unwrap().len(), 2);
        assert_eq!(failing.groups.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_groups_not_reported_externally_stay_local() {
        let sink = Arc::new(RecordingSink::default());
        let plan = RunPlan::new().with_group(GroupDefinition::new("G1").with_unit("1", kind("noop")));

        scheduler(UnitRegistry::with_builtins())
            .with_reporter(StatusReporter::new("run", "ctl").with_status_sink(sink.clone()))
            .run(&plan)
            .unwrap();
        assert!(sink.updates.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_run_skips_remaining_units() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let plan = RunPlan::new().with_group(
            GroupDefinition::new("G1")
                .with_unit("1", kind("noop"))
                .with_unit("2", kind("noop")),
        );

        let report = scheduler(UnitRegistry::with_builtins())
            .with_cancel_flag(cancel)
            .run(&plan)
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(statuses(&report, "G1"), vec![UnitStatus::Skipped; 2]);
        assert_eq!(report.groups["G1"].records[0].message, "run cancelled");
    }

    #[test]
    fn test_unknown_unit_is_recorded_failed() {
        let plan = RunPlan::new().with_group(
            GroupDefinition::new("G1")
                .with_unit("ghost", Inputs::new())
                .with_unit("2", kind("noop")),
        );

        let report = scheduler(UnitRegistry::with_builtins()).run(&plan).unwrap();
        assert_eq!(
            statuses(&report, "G1"),
            vec![UnitStatus::Failed, UnitStatus::Passed]
        );
    }

    #[test]
    fn test_dependency_cycle_is_rejected() {
        let plan = RunPlan::new()
            .with_group(
                GroupDefinition::new("A")
                    .skip_if_group_failed("B")
                    .with_unit("1", kind("noop")),
            )
            .with_group(
                GroupDefinition::new("B")
                    .skip_if_group_failed("A")
                    .with_unit("2", kind("noop")),
            );

        let err = scheduler(UnitRegistry::with_builtins()).run(&plan).unwrap_err();
        assert!(matches!(err, ConfigError::DependencyCycle(_)));
    }

    #[test]
    fn test_many_units_drain_with_concurrent_groups() {
        let mut plan = RunPlan::new();
        plan.group_threads = 3;
        for g in 0..3 {
            let mut group = GroupDefinition::new(format!("G{g}")).with_threads(4);
            for u in 0..20 {
                group = group.with_unit(format!("{g}-{u}"), kind("noop"));
            }
            plan = plan.with_group(group);
        }

        let report = scheduler(UnitRegistry::with_builtins()).run(&plan).unwrap();
        assert_eq!(report.total(), 60);
        for group in report.groups.values() {
            assert_eq!(group.total, 20);
            assert_eq!(group.records.len(), 20);
            assert_eq!(group.records[0].unit_id, format!("{}-0", &group.name[1..]));
        }
    }

    #[test]
    fn test_unit_log_dir_layout() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let options = SchedulerOptions {
            run_id: "run-7".to_string(),
            log_dir: Some(dir.path().to_path_buf()),
            runtime: Some(runtime.handle().clone()),
            ..Default::default()
        };

        let registry = UnitRegistry::new().with_kind("touch", "", || Box::new(TouchUnit));
        let plan = RunPlan::new().with_group(GroupDefinition::new("G1").with_unit("9", kind("touch")));

        let report = scheduler(registry).with_options(options).run(&plan).unwrap();
        let expected = dir.path().join("run-7").join("G1").join("9").join("out.txt");
        assert!(expected.exists());
        assert_eq!(report.groups["G1"].records[0].attachments, vec![expected]);
    }

    struct TouchUnit;

    impl Unit for TouchUnit {
        fn run(&mut self, ctx: &mut UnitContext) -> anyhow::Result<()> {
            let dir = ctx
                .ensure_log_dir()?
                .map(|d| d.to_path_buf())
                .ok_or_else(|| anyhow::anyhow!("no log dir"))?;
            let path = dir.join("out.txt");
            std::fs::write(&path, "ok")?;
            ctx.attach(path);
            Ok(())
        }
    }
}
