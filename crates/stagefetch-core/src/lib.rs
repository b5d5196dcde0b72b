//! stagefetch core - the shuffle data model shared by the partition planner
//! and the pull service.
//!
//! - [`IntermediateEntry`]: output of one finished child task attempt
//! - [`Tuple`], [`SortKey`], [`TupleComparator`], [`TupleRange`]: sort keys and key ranges
//! - [`SortedIndexWriter`] / [`SortedIndexReader`]: on-disk key → offset index
//! - [`FetchDescriptor`] / [`FetchRequest`]: the fetch-URL wire format

pub mod cursor;
pub mod datum;
pub mod error;
pub mod fetch;
pub mod index;
pub mod intermediate;
pub mod key_codec;
pub mod range;

pub use datum::{DataType, Datum, SortKey, Tuple, TupleComparator};
pub use error::{Error, Result};
pub use fetch::{FetchDescriptor, FetchKind, FetchRequest};
pub use index::{SortedIndexReader, SortedIndexWriter};
pub use intermediate::{IntermediateEntry, PartitionType, PullAddress, TaskAttempt};
pub use range::TupleRange;
