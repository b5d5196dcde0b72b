//! Metadata describing the intermediate output of finished child tasks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// How a stage's output was partitioned. Fixed per stage at plan time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionType {
    Hash,
    Range,
}

impl PartitionType {
    /// Value of the `type` query parameter.
    pub fn wire_code(self) -> &'static str {
        match self {
            PartitionType::Hash => "h",
            PartitionType::Range => "r",
        }
    }

    pub fn from_wire_code(code: &str) -> Option<Self> {
        match code {
            "h" => Some(PartitionType::Hash),
            "r" => Some(PartitionType::Range),
            _ => None,
        }
    }
}

/// One attempt of one task, written `<task>_<attempt>` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskAttempt {
    pub task_id: u32,
    pub attempt_id: u32,
}

impl TaskAttempt {
    pub fn new(task_id: u32, attempt_id: u32) -> Self {
        Self {
            task_id,
            attempt_id,
        }
    }
}

impl fmt::Display for TaskAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.task_id, self.attempt_id)
    }
}

impl FromStr for TaskAttempt {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (task, attempt) = s
            .split_once('_')
            .ok_or_else(|| Error::MalformedRequest(format!("task attempt '{}' lacks '_'", s)))?;
        let task_id = task
            .parse()
            .map_err(|_| Error::MalformedRequest(format!("invalid task id in '{}'", s)))?;
        let attempt_id = attempt
            .parse()
            .map_err(|_| Error::MalformedRequest(format!("invalid attempt id in '{}'", s)))?;
        Ok(Self::new(task_id, attempt_id))
    }
}

/// Address of the pull service that holds a task's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PullAddress {
    pub host: String,
    pub port: u16,
}

impl PullAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for PullAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            // IPv6 literal
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Output of one attempt of one task, as reported to the scheduler's task
/// registry on completion. Immutable once reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntermediateEntry {
    pub task_id: u32,
    pub attempt_id: u32,
    /// Hash bucket; only meaningful for hash-partitioned output.
    #[serde(default)]
    pub partition_id: u32,
    pub pull_host: String,
    pub pull_port: u16,
    /// Byte length of this output unit.
    #[serde(default)]
    pub volume: u64,
}

impl IntermediateEntry {
    pub fn new(
        task_id: u32,
        attempt_id: u32,
        partition_id: u32,
        pull_host: impl Into<String>,
        pull_port: u16,
        volume: u64,
    ) -> Self {
        Self {
            task_id,
            attempt_id,
            partition_id,
            pull_host: pull_host.into(),
            pull_port,
            volume,
        }
    }

    pub fn attempt(&self) -> TaskAttempt {
        TaskAttempt::new(self.task_id, self.attempt_id)
    }

    pub fn pull_address(&self) -> PullAddress {
        PullAddress::new(self.pull_host.clone(), self.pull_port)
    }
}
