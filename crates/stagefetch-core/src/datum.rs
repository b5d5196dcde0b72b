//! Key values, tuples and the sort-order comparator shared by the planner,
//! the sorted index and the pull service.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Column types that may appear in a sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int4,
    Int8,
    Float8,
    Text,
}

impl DataType {
    /// Stable tag used by the binary key and index formats.
    pub fn tag(self) -> u8 {
        match self {
            DataType::Int4 => 1,
            DataType::Int8 => 2,
            DataType::Float8 => 3,
            DataType::Text => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(DataType::Int4),
            2 => Some(DataType::Int8),
            3 => Some(DataType::Float8),
            4 => Some(DataType::Text),
            _ => None,
        }
    }
}

/// A single key value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datum {
    Null,
    Int4(i32),
    Int8(i64),
    Float8(f64),
    Text(String),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Datum::Null => None,
            Datum::Int4(_) => Some(DataType::Int4),
            Datum::Int8(_) => Some(DataType::Int8),
            Datum::Float8(_) => Some(DataType::Float8),
            Datum::Text(_) => Some(DataType::Text),
        }
    }

    /// Integer view used by range arithmetic. `None` for non-integral values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int4(v) => Some(*v as i64),
            Datum::Int8(v) => Some(*v),
            _ => None,
        }
    }

    /// Natural (ascending) order between two non-null values.
    ///
    /// Values of different types order by type tag; integer widths compare
    /// numerically with each other.
    pub fn cmp_value(&self, other: &Datum) -> Ordering {
        match (self, other) {
            (Datum::Float8(a), Datum::Float8(b)) => a.total_cmp(b),
            (Datum::Text(a), Datum::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => type_rank(a).cmp(&type_rank(b)),
            },
        }
    }
}

fn type_rank(d: &Datum) -> u8 {
    d.data_type().map(DataType::tag).unwrap_or(0)
}

impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        match (self.is_null(), other.is_null()) {
            (true, true) => true,
            (false, false) => self.cmp_value(other) == Ordering::Equal,
            _ => false,
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Int4(v) => write!(f, "{}", v),
            Datum::Int8(v) => write!(f, "{}", v),
            Datum::Float8(v) => write!(f, "{}", v),
            Datum::Text(v) => write!(f, "'{}'", v),
        }
    }
}

/// An ordered list of key values, one per sort column.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tuple(pub Vec<Datum>);

impl Tuple {
    pub fn new(values: Vec<Datum>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value at `idx`; positions past the end read as NULL.
    pub fn get(&self, idx: usize) -> &Datum {
        self.0.get(idx).unwrap_or(&Datum::Null)
    }

    pub fn values(&self) -> &[Datum] {
        &self.0
    }
}

impl From<Vec<Datum>> for Tuple {
    fn from(values: Vec<Datum>) -> Self {
        Self(values)
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ")")
    }
}

/// One column of a sort order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    pub data_type: DataType,
    #[serde(default = "default_true")]
    pub ascending: bool,
    #[serde(default)]
    pub nulls_first: bool,
}

fn default_true() -> bool {
    true
}

impl SortKey {
    pub fn new(column: impl Into<String>, data_type: DataType, ascending: bool) -> Self {
        Self {
            column: column.into(),
            data_type,
            ascending,
            nulls_first: false,
        }
    }
}

/// Lexicographic comparator over tuples laid out in sort-key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleComparator {
    keys: Vec<SortKey>,
}

impl TupleComparator {
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn is_ascending_first_key(&self) -> bool {
        self.keys.first().map(|k| k.ascending).unwrap_or(true)
    }

    pub fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering {
        for (i, key) in self.keys.iter().enumerate() {
            let (l, r) = (a.get(i), b.get(i));
            let ord = match (l.is_null(), r.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => {
                    if key.nulls_first {
                        Ordering::Less
                    } else {
                        Ordering::Greater
                    }
                }
                (false, true) => {
                    if key.nulls_first {
                        Ordering::Greater
                    } else {
                        Ordering::Less
                    }
                }
                (false, false) => {
                    let ord = l.cmp_value(r);
                    if key.ascending {
                        ord
                    } else {
                        ord.reverse()
                    }
                }
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}
