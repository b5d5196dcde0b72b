//! Turns a finished child stage's intermediate output into next-stage tasks.
//!
//! Hash output is grouped by partition id, range output is cut into key
//! sub-ranges, and either kind of group is dealt onto tasks round-robin.
//! Every group carries one fetch descriptor per pull host that holds a
//! piece of it, listing all task attempts on that host.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use stagefetch_core::key_codec::encode_tuple;
use stagefetch_core::{
    FetchDescriptor, FetchRequest, IntermediateEntry, PartitionType, PullAddress, SortKey,
    TaskAttempt, TupleComparator, TupleRange,
};

use crate::config::{PlannerConfig, MIB};
use crate::error::{PlanError, Result};
use crate::stats::{column_stats_to_range, TableStats};
use crate::task::{assign_round_robin, FetchGroup, Task, TaskIdAllocator};
use crate::uniform::UniformRangePartition;

/// A finished child stage as seen by the planner of its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildStage {
    pub stage_id: u32,
    /// Name under which the parent's scan reads this stage's output.
    pub table: String,
    pub output: PartitionType,
    /// Hash partitioning columns. Empty means a global aggregate whose
    /// output fits in a single partition.
    #[serde(default)]
    pub partition_keys: Vec<String>,
    /// Sort schema of range-partitioned output.
    #[serde(default)]
    pub sort_keys: Vec<SortKey>,
    pub stats: TableStats,
    pub entries: Vec<IntermediateEntry>,
}

impl ChildStage {
    pub fn is_empty(&self) -> bool {
        self.stats.num_rows == 0
    }

    /// Task attempts grouped by the pull host holding their output.
    fn attempts_by_host(
        entries: &[&IntermediateEntry],
    ) -> BTreeMap<PullAddress, Vec<TaskAttempt>> {
        let mut hosts: BTreeMap<PullAddress, Vec<TaskAttempt>> = BTreeMap::new();
        for entry in entries {
            hosts
                .entry(entry.pull_address())
                .or_default()
                .push(entry.attempt());
        }
        for attempts in hosts.values_mut() {
            attempts.sort();
            attempts.dedup();
        }
        hosts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentMode {
    Hash { max_tasks: usize },
    Range,
    Broadcast,
}

#[derive(Debug, Clone, Default)]
pub struct Repartitioner {
    config: PlannerConfig,
}

impl Repartitioner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Plan the tasks of a stage reading `inputs` under `mode`.
    pub fn plan(
        &self,
        inputs: &[ChildStage],
        mode: AssignmentMode,
        ids: &mut TaskIdAllocator,
    ) -> Result<Vec<Task>> {
        match (mode, inputs) {
            (AssignmentMode::Hash { max_tasks }, [child]) => self.plan_hash(child, max_tasks, ids),
            (AssignmentMode::Hash { max_tasks }, _) => self.plan_join(inputs, max_tasks, ids),
            (AssignmentMode::Range, [child]) => self.plan_range(child, ids),
            (AssignmentMode::Range, _) => Err(PlanError::InputCount {
                mode: "range",
                expected: "exactly 1",
                actual: inputs.len(),
            }),
            (AssignmentMode::Broadcast, _) => self.plan_broadcast(inputs, ids),
        }
    }

    /// Plan a single-input stage according to how its child partitioned
    /// its output.
    pub fn plan_non_leaf(
        &self,
        child: &ChildStage,
        max_tasks: usize,
        ids: &mut TaskIdAllocator,
    ) -> Result<Vec<Task>> {
        match child.output {
            PartitionType::Hash => self.plan_hash(child, max_tasks, ids),
            PartitionType::Range => self.plan_range(child, ids),
        }
    }

    pub fn plan_hash(
        &self,
        child: &ChildStage,
        max_tasks: usize,
        ids: &mut TaskIdAllocator,
    ) -> Result<Vec<Task>> {
        if child.is_empty() {
            info!("Stage {} produced no rows, no tasks planned", child.stage_id);
            return Ok(Vec::new());
        }
        let desired = if child.partition_keys.is_empty() {
            1
        } else {
            max_tasks
        };
        if desired == 0 {
            return Err(PlanError::InvalidTaskCount);
        }

        let groups = hash_groups(child);
        let mut tasks = ids.create_tasks(desired);
        info!(
            "Hash repartition of stage {}: {} partition(s) onto {} task(s)",
            child.stage_id,
            groups.len(),
            tasks.len()
        );
        assign_round_robin(groups.into_values(), &mut tasks)?;
        Ok(tasks)
    }

    pub fn plan_range(&self, child: &ChildStage, ids: &mut TaskIdAllocator) -> Result<Vec<Task>> {
        if child.is_empty() {
            info!("Stage {} produced no rows, no tasks planned", child.stage_id);
            return Ok(Vec::new());
        }

        let total_mb = child.stats.num_bytes.div_ceil(MIB);
        let per_task_mb = self.config.bytes_per_range_task.div_ceil(MIB).max(1);
        let desired = total_mb.div_ceil(per_task_mb).max(1);

        let groups = range_groups(child, desired)?;
        let mut tasks = ids.create_tasks(groups.len());
        info!(
            "Range repartition of stage {}: {} MB, {} task(s) wanted, {} planned",
            child.stage_id,
            total_mb,
            desired,
            tasks.len()
        );
        assign_round_robin(groups, &mut tasks)?;
        Ok(tasks)
    }

    /// Repartition join: one group per partition id, holding that
    /// partition from every input table.
    pub fn plan_join(
        &self,
        inputs: &[ChildStage],
        max_tasks: usize,
        ids: &mut TaskIdAllocator,
    ) -> Result<Vec<Task>> {
        if inputs.len() < 2 {
            return Err(PlanError::InputCount {
                mode: "hash join",
                expected: "at least 2",
                actual: inputs.len(),
            });
        }
        if max_tasks == 0 {
            return Err(PlanError::InvalidTaskCount);
        }

        let mut merged: BTreeMap<u32, FetchGroup> = BTreeMap::new();
        for child in inputs {
            if child.output != PartitionType::Hash {
                return Err(PlanError::PartitionMismatch {
                    stage_id: child.stage_id,
                    expected: PartitionType::Hash,
                });
            }
            if child.is_empty() {
                debug!("Join input stage {} is empty", child.stage_id);
                continue;
            }
            for (partition, group) in hash_groups(child) {
                merged.entry(partition).or_default().extend(group);
            }
        }
        if merged.is_empty() {
            info!("All join inputs are empty, no tasks planned");
            return Ok(Vec::new());
        }

        let mut tasks = ids.create_tasks(merged.len().min(max_tasks));
        info!(
            "Join repartition of {} input(s): {} partition(s) onto {} task(s)",
            inputs.len(),
            merged.len(),
            tasks.len()
        );
        assign_round_robin(merged.into_values(), &mut tasks)?;
        Ok(tasks)
    }

    /// Broadcast: a single task reads the whole output of every input.
    pub fn plan_broadcast(
        &self,
        inputs: &[ChildStage],
        ids: &mut TaskIdAllocator,
    ) -> Result<Vec<Task>> {
        if inputs.is_empty() {
            return Err(PlanError::InputCount {
                mode: "broadcast",
                expected: "at least 1",
                actual: 0,
            });
        }

        let mut groups: Vec<FetchGroup> = Vec::new();
        for child in inputs.iter().filter(|c| !c.is_empty()) {
            match child.output {
                PartitionType::Hash => groups.extend(hash_groups(child).into_values()),
                PartitionType::Range => groups.extend(range_groups(child, 1)?),
            }
        }
        if groups.is_empty() {
            info!("All broadcast inputs are empty, no tasks planned");
            return Ok(Vec::new());
        }

        let mut tasks = ids.create_tasks(1);
        info!(
            "Broadcast of {} input(s): {} fetch group(s) onto task {}",
            inputs.len(),
            groups.len(),
            tasks[0].id
        );
        assign_round_robin(groups, &mut tasks)?;
        Ok(tasks)
    }
}

/// Hash fetch groups keyed by partition id, one descriptor per host.
fn hash_groups(child: &ChildStage) -> BTreeMap<u32, FetchGroup> {
    let mut by_partition: BTreeMap<u32, Vec<&IntermediateEntry>> = BTreeMap::new();
    for entry in &child.entries {
        by_partition.entry(entry.partition_id).or_default().push(entry);
    }

    by_partition
        .into_iter()
        .map(|(partition, entries)| {
            let group = ChildStage::attempts_by_host(&entries)
                .into_iter()
                .map(|(address, attempts)| {
                    let request = FetchRequest::hash(child.stage_id, partition, attempts);
                    (child.table.clone(), FetchDescriptor::new(address, request))
                })
                .collect();
            (partition, group)
        })
        .collect()
}

/// Range fetch groups, one per key sub-range, in the order the sort
/// comparator visits them.
fn range_groups(child: &ChildStage, desired: u64) -> Result<Vec<FetchGroup>> {
    let keys = &child.sort_keys;
    let global = column_stats_to_range(&child.stats, keys)?;
    let partition = UniformRangePartition::new(keys.clone(), global)?;

    let cardinality = partition.total_cardinality();
    let desired = if cardinality < desired as u128 {
        info!(
            "Stage {} key range {} holds only {} value(s), reducing tasks from {}",
            child.stage_id,
            partition.range(),
            cardinality,
            desired
        );
        cardinality as u64
    } else {
        desired
    };
    let n = usize::try_from(desired).unwrap_or(usize::MAX);
    let ranges = partition.partition(n)?;

    let entries: Vec<&IntermediateEntry> = child.entries.iter().collect();
    let hosts = ChildStage::attempts_by_host(&entries);

    let last = ranges.len() - 1;
    let mut groups: Vec<(TupleRange, FetchGroup)> = Vec::with_capacity(ranges.len());
    for (i, range) in ranges.into_iter().enumerate() {
        let is_final = if range.ascending { i == last } else { i == 0 };
        let start = encode_tuple(keys, &range.start)?;
        let end = encode_tuple(keys, &range.end)?;
        debug!(
            "Stage {} sub-range {}{}",
            child.stage_id,
            range,
            if is_final { " (final)" } else { "" }
        );
        let group = hosts
            .iter()
            .map(|(address, attempts)| {
                let request = FetchRequest::range(
                    child.stage_id,
                    attempts.clone(),
                    start.clone(),
                    end.clone(),
                    is_final,
                );
                (
                    child.table.clone(),
                    FetchDescriptor::new(address.clone(), request),
                )
            })
            .collect();
        groups.push((range, group));
    }

    let comparator = TupleComparator::new(keys.clone());
    groups.sort_by(|a, b| a.0.cmp_by(&b.0, &comparator));
    Ok(groups.into_iter().map(|(_, group)| group).collect())
}
