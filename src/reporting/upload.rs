//! Directory log-upload sink

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{LogUploadSink, ReportingError};

/// Copies unit log directories to `<root>/<run>/<group>/<unit>/`
#[derive(Clone, Debug)]
pub struct DirectoryUploadSink {
    root: PathBuf,
    run_id: String,
}

impl DirectoryUploadSink {
    pub fn new(root: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            run_id: run_id.into(),
        }
    }

    /// Upload directory of one unit below `root`
    fn destination(&self, root: &Path, group: &str, unit_id: &str) -> PathBuf {
        root.join(&self.run_id).join(group).join(unit_id)
    }
}

impl LogUploadSink for DirectoryUploadSink {
    fn upload_log(&self, group: &str, unit_id: &str, log_dir: &Path) -> Result<(), ReportingError> {
        let log_dir = fs::canonicalize(log_dir)?;
        fs::create_dir_all(&self.root)?;
        let target = self.destination(&fs::canonicalize(&self.root)?, group, unit_id);

        // copying into the log directory itself would truncate every file
        if target.starts_with(&log_dir) {
            return Err(ReportingError::Overlap { log_dir, target });
        }

        let copied = copy_dir(&log_dir, &target)?;
        debug!("Uploaded {} file(s) to {}", copied, target.display());
        Ok(())
    }
}

fn copy_dir(from: &Path, to: &Path) -> std::io::Result<usize> {
    fs::create_dir_all(to)?;
    let mut copied = 0;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let path = entry.path();
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_dir(&path, &target)?;
        } else {
            fs::copy(&path, &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}
