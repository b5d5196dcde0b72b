//! stagefetch planner - assigns a finished stage's intermediate output to
//! the tasks of the stage that consumes it.
//!
//! Hash-partitioned output is grouped by partition id; range-partitioned
//! output is split into contiguous key sub-ranges sized by data volume.
//! Groups are dealt onto tasks round-robin; see [`Repartitioner`].

pub mod config;
pub mod error;
pub mod repartitioner;
pub mod stats;
pub mod task;
pub mod uniform;

pub use config::PlannerConfig;
pub use error::{PlanError, Result};
pub use repartitioner::{AssignmentMode, ChildStage, Repartitioner};
pub use stats::{column_stats_to_range, ColumnStats, TableStats};
pub use task::{assign_round_robin, FetchGroup, Task, TaskId, TaskIdAllocator};
pub use uniform::UniformRangePartition;
