//! Results storage and retrieval
//!
//! Run reports are stored as pretty JSON, one file per run:
//! `<base_dir>/<run-id>.json`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::report::{ReportFormat, ReportGenerator};
use crate::models::{RunReport, UnitStatus};

/// Generate unique run ID, e.g. `20240102_150405_042917`
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 1_000_000;
    format!("{timestamp}_{random:06}")
}

/// Results storage manager
#[derive(Clone, Debug)]
pub struct ResultsStorage {
    /// Base directory for results
    base_dir: PathBuf,
}

impl ResultsStorage {
    /// Create a new results storage
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Default results directory under the user data directory
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("testset-runner")
            .join("results")
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Ensure storage directory exists
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!("Failed to create results directory: {}", self.base_dir.display())
        })
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(format!("{run_id}.json"))
    }

    /// Save a run report
    pub fn save(&self, report: &RunReport) -> Result<PathBuf> {
        self.ensure_dir()?;

        let path = self.run_path(&report.run_id);
        let file = File::create(&path).context("Failed to create results file")?;
        let writer = BufWriter::new(file);

        serde_json::to_writer_pretty(writer, report).context("Failed to write results")?;

        info!("Saved run results to {}", path.display());
        Ok(path)
    }

    /// Load a run by id
    pub fn load(&self, run_id: &str) -> Result<RunReport> {
        let path = self.run_path(run_id);
        let report = self
            .load_from_path(&path)
            .with_context(|| format!("No stored run '{run_id}'"))?;
        debug!("Loaded run results from {}", path.display());
        Ok(report)
    }

    /// Load from a specific path
    pub fn load_from_path(&self, path: &Path) -> Result<RunReport> {
        let file = File::open(path).context("Failed to open results file")?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).context("Failed to parse results")
    }

    /// All stored runs, newest first; unreadable files are skipped
    pub fn list(&self) -> Result<Vec<RunInfo>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }

            match self.load_from_path(&path) {
                Ok(report) => runs.push(RunInfo::from(&report)),
                Err(e) => debug!("Failed to load {}: {}", path.display(), e),
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    /// Most recent run
    pub fn latest(&self) -> Result<Option<RunReport>> {
        match self.list()?.first() {
            Some(info) => self.load(&info.id).map(Some),
            None => Ok(None),
        }
    }

    /// Delete a run
    pub fn delete(&self, run_id: &str) -> Result<()> {
        let path = self.run_path(run_id);
        if path.exists() {
            fs::remove_file(&path)?;
            info!("Deleted results: {}", path.display());
        }
        Ok(())
    }

    /// Export run to a file
    pub fn export(&self, report: &RunReport, path: &Path, format: ExportFormat) -> Result<()> {
        match format {
            ExportFormat::Json => {
                let file = File::create(path)?;
                let writer = BufWriter::new(file);
                serde_json::to_writer_pretty(writer, report)?;
            }
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_path(path)?;

                writer.write_record([
                    "group",
                    "unit_id",
                    "name",
                    "status",
                    "status_code",
                    "message",
                    "duration_ms",
                    "warnings",
                ])?;

                for group in report.groups.values() {
                    for record in &group.records {
                        writer.write_record([
                            group.name.clone(),
                            record.unit_id.clone(),
                            record.name.clone().unwrap_or_default(),
                            record.status.to_string(),
                            record.status.code().to_string(),
                            record.message.clone(),
                            record.duration_ms.to_string(),
                            record.warnings.join("; "),
                        ])?;
                    }
                }
                writer.flush()?;
            }
            ExportFormat::Markdown => {
                let content = ReportGenerator::run_report(report, ReportFormat::Markdown);
                fs::write(path, content)?;
            }
        }

        info!("Exported results to {}", path.display());
        Ok(())
    }
}

/// Brief run information
#[derive(Clone, Debug)]
pub struct RunInfo {
    pub id: String,
    pub controller: String,
    pub started_at: DateTime<Utc>,
    pub groups: usize,
    pub total: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl From<&RunReport> for RunInfo {
    fn from(report: &RunReport) -> Self {
        Self {
            id: report.run_id.clone(),
            controller: report.controller.clone(),
            started_at: report.started_at,
            groups: report.groups.len(),
            total: report.total(),
            failed: report.count(UnitStatus::Failed),
            cancelled: report.cancelled,
        }
    }
}

/// Export format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Markdown,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            "md" | "markdown" => Some(ExportFormat::Markdown),
            _ => None,
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GroupReport, ResultRecord};
    use chrono::Duration;
    use indexmap::IndexMap;

    fn sample_report(run_id: &str, started_at: DateTime<Utc>) -> RunReport {
        let records = vec![
            ResultRecord::passed("1"),
            ResultRecord::failed("2", "boom, with comma"),
            ResultRecord::skipped("3", "skipped: unit 2 failed"),
        ];
        let mut groups = IndexMap::new();
        groups.insert("G1".to_string(), GroupReport::new("G1", records, 12));

        RunReport {
            run_id: run_id.to_string(),
            controller: "ctl".to_string(),
            started_at,
            finished_at: started_at + Duration::seconds(1),
            cancelled: false,
            groups,
        }
    }

    #[test]
    fn test_generate_run_id() {
        let id1 = generate_run_id();
        let id2 = generate_run_id();
        assert!(!id1.is_empty());
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_save_load_list() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path().join("results"));
        assert!(storage.list().unwrap().is_empty());
        assert!(storage.latest().unwrap().is_none());

        let now = Utc::now();
        storage.save(&sample_report("old", now - Duration::hours(1))).unwrap();
        let path = storage.save(&sample_report("new", now)).unwrap();
        assert!(path.ends_with("new.json"));
        fs::write(dir.path().join("results").join("junk.json"), "nope").unwrap();

        let runs = storage.list().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, "new");
        assert_eq!(runs[0].total, 3);
        assert_eq!(runs[0].failed, 1);

        let loaded = storage.load("old").unwrap();
        assert_eq!(loaded.groups["G1"].records.len(), 3);
        assert_eq!(storage.latest().unwrap().unwrap().run_id, "new");

        storage.delete("old").unwrap();
        assert!(storage.load("old").is_err());
    }

    #[test]
    fn test_export_csv_and_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path());
        let report = sample_report("r1", Utc::now());

        let csv_path = dir.path().join("out.csv");
        storage.export(&report, &csv_path, ExportFormat::Csv).unwrap();
        let csv = fs::read_to_string(&csv_path).unwrap();
        assert!(csv.starts_with("group,unit_id"));
        assert!(csv.contains("\"boom, with comma\""));
        assert_eq!(csv.lines().count(), 4);

        let md_path = dir.path().join("out.md");
        storage.export(&report, &md_path, ExportFormat::Markdown).unwrap();
        assert!(fs::read_to_string(&md_path).unwrap().contains("| G1 |"));
    }

    #[test]
    fn test_export_format() {
        assert_eq!(ExportFormat::from_str("json"), Some(ExportFormat::Json));
        assert_eq!(ExportFormat::from_str("CSV"), Some(ExportFormat::Csv));
        assert_eq!(
            ExportFormat::from_extension(Path::new("run.md")),
            Some(ExportFormat::Markdown)
        );
        assert!(ExportFormat::from_str("unknown").is_none());
    }
}
