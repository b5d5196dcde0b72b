//! Planner tuning knobs.

use serde::{Deserialize, Serialize};

pub const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Target intermediate volume per range-partitioned task.
    pub bytes_per_range_task: u64,
    /// Task count for hash repartitioning when the caller has no better
    /// estimate.
    pub default_max_tasks: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            bytes_per_range_task: 64 * MIB,
            default_max_tasks: 8,
        }
    }
}
