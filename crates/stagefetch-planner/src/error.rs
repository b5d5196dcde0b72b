//! Typed errors for the partition planner.

use stagefetch_core::PartitionType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("range repartitioning requires at least one sort key")]
    NoSortKeys,

    #[error("no min/max statistics for sort column '{0}'")]
    MissingStatistics(String),

    #[error("invalid statistics for column '{column}': {reason}")]
    InvalidStatistics { column: String, reason: String },

    #[error("task count must be positive")]
    InvalidTaskCount,

    #[error("{mode} planning expects {expected} input stage(s), got {actual}")]
    InputCount {
        mode: &'static str,
        expected: &'static str,
        actual: usize,
    },

    #[error("stage {stage_id} output is not {expected:?} partitioned")]
    PartitionMismatch {
        stage_id: u32,
        expected: PartitionType,
    },

    #[error("cannot assign {0} partition group(s) to zero tasks")]
    NoTasks(usize),

    #[error(transparent)]
    Core(#[from] stagefetch_core::Error),
}

pub type Result<T> = std::result::Result<T, PlanError>;
