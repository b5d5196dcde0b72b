//! On-disk layout of task output across the worker's local directories.
//!
//! ```text
//! <local dir>/usercache/<user>/appcache/<app>/output/<sid>/<task>_<attempt>/output/
//!     <partition id>     hash-partitioned output, one file per partition
//!     output             range-partitioned (sorted) output
//!     index              sorted index over `output`
//! ```

use std::path::{Path, PathBuf};

use stagefetch_core::TaskAttempt;

use crate::app::AppIdentity;
use crate::error::PullError;

pub const RANGE_DATA_FILE: &str = "output";
pub const RANGE_INDEX_FILE: &str = "index";

#[derive(Debug, Clone)]
pub struct OutputLayout {
    local_dirs: Vec<PathBuf>,
}

impl OutputLayout {
    pub fn new<I, P>(local_dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            local_dirs: local_dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// Output directory of one task attempt, relative to a local dir.
    pub fn task_output_dir(app: &AppIdentity, stage_id: u32, attempt: TaskAttempt) -> PathBuf {
        PathBuf::from("usercache")
            .join(&app.user)
            .join("appcache")
            .join(&app.app_id)
            .join("output")
            .join(stage_id.to_string())
            .join(attempt.to_string())
            .join("output")
    }

    /// First local dir holding `relative`.
    pub fn find(&self, relative: &Path) -> Option<PathBuf> {
        self.local_dirs
            .iter()
            .map(|dir| dir.join(relative))
            .find(|path| path.exists())
    }

    pub fn hash_file(
        &self,
        app: &AppIdentity,
        stage_id: u32,
        attempt: TaskAttempt,
        partition_id: u32,
    ) -> Result<PathBuf, PullError> {
        let relative =
            Self::task_output_dir(app, stage_id, attempt).join(partition_id.to_string());
        self.find(&relative).ok_or_else(|| self.missing(&relative))
    }

    /// Directory holding the sorted output and its index.
    pub fn range_dir(
        &self,
        app: &AppIdentity,
        stage_id: u32,
        attempt: TaskAttempt,
    ) -> Result<PathBuf, PullError> {
        let relative = Self::task_output_dir(app, stage_id, attempt);
        self.find(&relative.join(RANGE_DATA_FILE))
            .and_then(|data| data.parent().map(Path::to_path_buf))
            .ok_or_else(|| self.missing(&relative.join(RANGE_DATA_FILE)))
    }

    /// Where a task attempt should write its output. Attempts are spread
    /// over the local dirs by task id.
    pub fn allocate_output_dir(
        &self,
        app: &AppIdentity,
        stage_id: u32,
        attempt: TaskAttempt,
    ) -> Result<PathBuf, PullError> {
        if self.local_dirs.is_empty() {
            return Err(PullError::Internal("no local directories configured".into()));
        }
        let dir = &self.local_dirs[attempt.task_id as usize % self.local_dirs.len()];
        Ok(dir.join(Self::task_output_dir(app, stage_id, attempt)))
    }

    fn missing(&self, relative: &Path) -> PullError {
        let searched: Vec<String> = self
            .local_dirs
            .iter()
            .map(|dir| dir.join(relative).display().to_string())
            .collect();
        PullError::NotFound(searched.join(", "))
    }
}
