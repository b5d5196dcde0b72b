//! Next-stage tasks and their fetch assignments.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use stagefetch_core::FetchDescriptor;

use crate::error::{PlanError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    pub stage_id: u32,
    pub seq: u32,
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t_{}_{:06}", self.stage_id, self.seq)
    }
}

/// Hands out sequential task ids within one stage.
#[derive(Debug)]
pub struct TaskIdAllocator {
    stage_id: u32,
    next: u32,
}

impl TaskIdAllocator {
    pub fn new(stage_id: u32) -> Self {
        Self { stage_id, next: 0 }
    }

    pub fn next_id(&mut self) -> TaskId {
        let id = TaskId {
            stage_id: self.stage_id,
            seq: self.next,
        };
        self.next += 1;
        id
    }

    /// `n` new tasks with no fetches.
    pub fn create_tasks(&mut self, n: usize) -> Vec<Task> {
        (0..n).map(|_| Task::new(self.next_id())).collect()
    }
}

/// A next-stage task: for each input table, the fetches it must perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub fetches: BTreeMap<String, Vec<FetchDescriptor>>,
}

impl Task {
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            fetches: BTreeMap::new(),
        }
    }

    pub fn add_fetch(&mut self, table: &str, fetch: FetchDescriptor) {
        self.fetches.entry(table.to_string()).or_default().push(fetch);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.fetch_count() == 0
    }
}

/// Fetches that must stay together on one task: one hash partition, or one
/// key sub-range, across every host that holds a piece of it.
pub type FetchGroup = Vec<(String, FetchDescriptor)>;

/// Deal groups onto `tasks` in order: group `i` goes to task `i % len`.
pub fn assign_round_robin<I>(groups: I, tasks: &mut [Task]) -> Result<()>
where
    I: IntoIterator<Item = FetchGroup>,
{
    let mut groups = groups.into_iter().peekable();
    if tasks.is_empty() {
        return match groups.peek() {
            None => Ok(()),
            Some(_) => Err(PlanError::NoTasks(groups.count())),
        };
    }

    let mut tid = 0;
    for group in groups {
        for (table, fetch) in group {
            tasks[tid].add_fetch(&table, fetch);
        }
        tid = (tid + 1) % tasks.len();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagefetch_core::{FetchRequest, PullAddress, TaskAttempt};

    fn group(partition: u32) -> FetchGroup {
        vec![(
            "t1".to_string(),
            FetchDescriptor::new(
                PullAddress::new("host", 1),
                FetchRequest::hash(1, partition, vec![TaskAttempt::new(0, 0)]),
            ),
        )]
    }

    #[test]
    fn ids_are_sequential() {
        let mut ids = TaskIdAllocator::new(4);
        let tasks = ids.create_tasks(2);
        assert_eq!(tasks[0].id.to_string(), "t_4_000000");
        assert_eq!(tasks[1].id.to_string(), "t_4_000001");
        assert_eq!(ids.next_id().seq, 2);
    }

    #[test]
    fn group_i_lands_on_task_i_mod_n() {
        let mut tasks = TaskIdAllocator::new(1).create_tasks(3);
        assign_round_robin((0..7).map(group), &mut tasks).unwrap();
        for (i, task) in tasks.iter().enumerate() {
            let partitions: Vec<u32> = task.fetches["t1"]
                .iter()
                .map(|f| f.request.partition_id)
                .collect();
            let expected: Vec<u32> = (0..7).filter(|p| *p as usize % 3 == i).collect();
            assert_eq!(partitions, expected);
        }
    }

    #[test]
    fn wraps_exactly_at_task_count() {
        // a count equal to the task number must wrap to task 0, not skip it
        let mut tasks = TaskIdAllocator::new(1).create_tasks(2);
        assign_round_robin((0..3).map(group), &mut tasks).unwrap();
        assert_eq!(tasks[0].fetch_count(), 2);
        assert_eq!(tasks[1].fetch_count(), 1);
    }

    #[test]
    fn no_tasks() {
        let mut tasks: Vec<Task> = Vec::new();
        assert!(assign_round_robin(std::iter::empty(), &mut tasks).is_ok());
        assert!(matches!(
            assign_round_robin((0..2).map(group), &mut tasks),
            Err(PlanError::NoTasks(2))
        ));
    }
}
