//! Child-stage statistics and their projection onto a sort schema.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use stagefetch_core::{Datum, SortKey, Tuple, TupleRange};

use crate::error::{PlanError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub column: String,
    #[serde(default)]
    pub min: Option<Datum>,
    #[serde(default)]
    pub max: Option<Datum>,
}

impl ColumnStats {
    pub fn new(column: impl Into<String>, min: Datum, max: Datum) -> Self {
        Self {
            column: column.into(),
            min: Some(min),
            max: Some(max),
        }
    }
}

/// Aggregate statistics of all output produced by a stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableStats {
    pub num_rows: u64,
    pub num_bytes: u64,
    #[serde(default)]
    pub column_stats: Vec<ColumnStats>,
}

impl TableStats {
    pub fn column(&self, name: &str) -> Option<&ColumnStats> {
        self.column_stats.iter().find(|c| c.column == name)
    }
}

/// Build the global key range covered by a stage's output.
///
/// `start`/`end` are the low/high ends in value order of the leading key.
/// Trailing columns are filled so that, under the sort comparator, the end
/// read first in the file sorts before every row and the other end sorts
/// after every row.
pub fn column_stats_to_range(stats: &TableStats, keys: &[SortKey]) -> Result<TupleRange> {
    let leading = keys.first().ok_or(PlanError::NoSortKeys)?;

    let mut bounds = Vec::with_capacity(keys.len());
    for key in keys {
        let col = stats
            .column(&key.column)
            .ok_or_else(|| PlanError::MissingStatistics(key.column.clone()))?;
        let (min, max) = match (&col.min, &col.max) {
            (Some(min), Some(max)) if !min.is_null() && !max.is_null() => (min.clone(), max.clone()),
            _ => return Err(PlanError::MissingStatistics(key.column.clone())),
        };
        if min.cmp_value(&max) == Ordering::Greater {
            return Err(PlanError::InvalidStatistics {
                column: key.column.clone(),
                reason: format!("min {} exceeds max {}", min, max),
            });
        }
        bounds.push((min, max));
    }

    let mut start = vec![bounds[0].0.clone()];
    let mut end = vec![bounds[0].1.clone()];
    for (key, (min, max)) in keys.iter().zip(bounds.iter()).skip(1) {
        let (first, last) = if key.ascending {
            (min.clone(), max.clone())
        } else {
            (max.clone(), min.clone())
        };
        if leading.ascending {
            start.push(first);
            end.push(last);
        } else {
            start.push(last);
            end.push(first);
        }
    }

    Ok(TupleRange::new(
        Tuple::new(start),
        Tuple::new(end),
        leading.ascending,
    ))
}
