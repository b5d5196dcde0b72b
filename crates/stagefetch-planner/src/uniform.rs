//! Uniform splitting of a key range into contiguous sub-ranges.
//!
//! Ranges are cut on the leading sort column only. Interior boundaries pad
//! the trailing columns with their comparator-first values taken from the
//! global range, so every row sharing a boundary's leading value lands on
//! the same side of it.

use std::cmp::Ordering;

use stagefetch_core::{DataType, Datum, SortKey, Tuple, TupleRange};

use crate::error::{PlanError, Result};

#[derive(Debug, Clone)]
pub struct UniformRangePartition {
    keys: Vec<SortKey>,
    range: TupleRange,
}

impl UniformRangePartition {
    pub fn new(keys: Vec<SortKey>, range: TupleRange) -> Result<Self> {
        let leading = keys.first().ok_or(PlanError::NoSortKeys)?;
        let (lo, hi) = (range.start.get(0), range.end.get(0));
        if lo.is_null() || hi.is_null() {
            return Err(PlanError::MissingStatistics(leading.column.clone()));
        }
        if lo.data_type().map(family) != hi.data_type().map(family) {
            return Err(PlanError::InvalidStatistics {
                column: leading.column.clone(),
                reason: format!("bounds {} and {} have different types", lo, hi),
            });
        }
        if lo.cmp_value(hi) == Ordering::Greater {
            return Err(PlanError::InvalidStatistics {
                column: leading.column.clone(),
                reason: format!("range start {} exceeds end {}", lo, hi),
            });
        }
        Ok(Self { keys, range })
    }

    pub fn range(&self) -> &TupleRange {
        &self.range
    }

    /// Number of distinct orderable key combinations in the range,
    /// saturating at `u128::MAX`.
    pub fn total_cardinality(&self) -> u128 {
        (0..self.keys.len()).fold(1u128, |acc, i| {
            let (a, b) = (self.range.start.get(i), self.range.end.get(i));
            let (lo, hi) = if a.cmp_value(b) == Ordering::Greater {
                (b, a)
            } else {
                (a, b)
            };
            acc.saturating_mul(column_cardinality(lo, hi))
        })
    }

    /// Distinct values of the leading column; the most sub-ranges
    /// [`partition`](Self::partition) can produce.
    pub fn split_cardinality(&self) -> u128 {
        column_cardinality(self.range.start.get(0), self.range.end.get(0))
    }

    /// Split into at most `n` contiguous sub-ranges in ascending value
    /// order. The first starts at the global start, the last ends at the
    /// global end, and each one ends where the next begins.
    pub fn partition(&self, n: usize) -> Result<Vec<TupleRange>> {
        if n == 0 {
            return Err(PlanError::InvalidTaskCount);
        }
        let n = self.split_cardinality().min(n as u128) as usize;
        let bounds = leading_boundaries(self.range.start.get(0), self.range.end.get(0), n);

        let ascending = self.range.ascending;
        let pad: &[Datum] = if ascending {
            &self.range.start.values()[1..]
        } else {
            &self.range.end.values()[1..]
        };

        let last = bounds.len() - 1;
        let tuples: Vec<Tuple> = bounds
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                if i == 0 {
                    self.range.start.clone()
                } else if i == last {
                    self.range.end.clone()
                } else {
                    let mut values = Vec::with_capacity(pad.len() + 1);
                    values.push(value);
                    values.extend_from_slice(pad);
                    Tuple::new(values)
                }
            })
            .collect();

        Ok(tuples
            .windows(2)
            .map(|w| TupleRange::new(w[0].clone(), w[1].clone(), ascending))
            .collect())
    }
}

fn family(t: DataType) -> u8 {
    match t {
        DataType::Int4 | DataType::Int8 => 0,
        DataType::Float8 => 1,
        DataType::Text => 2,
    }
}

fn column_cardinality(lo: &Datum, hi: &Datum) -> u128 {
    match (lo, hi) {
        (Datum::Float8(a), Datum::Float8(b)) => {
            (ordered_bits(*b) as u128).saturating_sub(ordered_bits(*a) as u128) + 1
        }
        (Datum::Text(a), Datum::Text(b)) => {
            (leading_code(b) as u128).saturating_sub(leading_code(a) as u128) + 1
        }
        _ => match (lo.as_i64(), hi.as_i64()) {
            (Some(a), Some(b)) => (b as i128 - a as i128).max(0) as u128 + 1,
            _ => 1,
        },
    }
}

/// Boundary values `b_0 = lo < b_1 < ... < b_n = hi` for `n` sub-ranges.
/// May yield fewer when interpolated values collide.
fn leading_boundaries(lo: &Datum, hi: &Datum, n: usize) -> Vec<Datum> {
    let mut bounds = vec![lo.clone()];
    match (lo, hi) {
        (Datum::Float8(a), Datum::Float8(b)) => {
            for i in 1..n {
                let t = i as f64 / n as f64;
                push_increasing(&mut bounds, hi, Datum::Float8(a * (1.0 - t) + b * t));
            }
        }
        (Datum::Text(a), Datum::Text(b)) => {
            let (ca, cb) = (leading_code(a) as u128, leading_code(b) as u128);
            let card = cb - ca + 1;
            for i in 1..n as u128 {
                let code = (ca + card * i / n as u128) as u32;
                if let Some(c) = next_char(code) {
                    push_increasing(&mut bounds, hi, Datum::Text(c.to_string()));
                }
            }
        }
        _ => {
            if let (Some(a), Some(b)) = (lo.as_i64(), hi.as_i64()) {
                let card = (b as i128 - a as i128 + 1) as u128;
                for i in 1..n as u128 {
                    let v = (a as i128 + (card * i / n as u128) as i128) as i64;
                    let value = match lo {
                        Datum::Int4(_) => Datum::Int4(v as i32),
                        _ => Datum::Int8(v),
                    };
                    push_increasing(&mut bounds, hi, value);
                }
            }
        }
    }
    bounds.push(hi.clone());
    bounds
}

fn push_increasing(bounds: &mut Vec<Datum>, hi: &Datum, value: Datum) {
    let above_prev = bounds
        .last()
        .map(|prev| value.cmp_value(prev) == Ordering::Greater)
        .unwrap_or(true);
    if above_prev && value.cmp_value(hi) != Ordering::Greater {
        bounds.push(value);
    }
}

/// Monotone mapping of doubles onto unsigned integers.
fn ordered_bits(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits >> 63 == 1 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

fn leading_code(s: &str) -> u32 {
    s.chars().next().map(|c| c as u32).unwrap_or(0)
}

/// First valid char at or above `code`.
fn next_char(code: u32) -> Option<char> {
    char::from_u32(code).or_else(|| char::from_u32(0xE000.max(code)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_range(lo: i64, hi: i64, asc: bool) -> UniformRangePartition {
        UniformRangePartition::new(
            vec![SortKey::new("k", DataType::Int8, asc)],
            TupleRange::new(
                Tuple::new(vec![Datum::Int8(lo)]),
                Tuple::new(vec![Datum::Int8(hi)]),
                asc,
            ),
        )
        .unwrap()
    }

    fn leading(ranges: &[TupleRange]) -> Vec<(i64, i64)> {
        ranges
            .iter()
            .map(|r| {
                (
                    r.start.get(0).as_i64().unwrap(),
                    r.end.get(0).as_i64().unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn splits_integers_evenly() {
        let ranges = int_range(10, 100, true).partition(3).unwrap();
        assert_eq!(leading(&ranges), vec![(10, 40), (40, 70), (70, 100)]);
    }

    #[test]
    fn sub_ranges_are_contiguous_and_cover_the_range() {
        for n in 1..20 {
            let part = int_range(-7, 33, true);
            let ranges = part.partition(n).unwrap();
            assert_eq!(ranges.len(), n);
            assert_eq!(ranges.first().unwrap().start, part.range().start);
            assert_eq!(ranges.last().unwrap().end, part.range().end);
            for w in ranges.windows(2) {
                assert!(w[0].is_adjacent_to(&w[1]));
                assert_eq!(w[0].start.get(0).cmp_value(w[1].start.get(0)), Ordering::Less);
            }
        }
    }

    #[test]
    fn clamps_to_cardinality() {
        let part = int_range(5, 7, true);
        assert_eq!(part.total_cardinality(), 3);
        let ranges = part.partition(10).unwrap();
        assert_eq!(leading(&ranges), vec![(5, 6), (6, 7), (7, 7)]);
    }

    #[test]
    fn single_value_range() {
        let ranges = int_range(42, 42, true).partition(4).unwrap();
        assert_eq!(leading(&ranges), vec![(42, 42)]);
    }

    #[test]
    fn zero_parts_is_an_error() {
        assert!(matches!(
            int_range(0, 10, true).partition(0),
            Err(PlanError::InvalidTaskCount)
        ));
    }

    #[test]
    fn int4_boundaries_keep_their_width() {
        let part = UniformRangePartition::new(
            vec![SortKey::new("k", DataType::Int4, true)],
            TupleRange::new(
                Tuple::new(vec![Datum::Int4(0)]),
                Tuple::new(vec![Datum::Int4(9)]),
                true,
            ),
        )
        .unwrap();
        let ranges = part.partition(2).unwrap();
        assert!(matches!(ranges[0].end.get(0), Datum::Int4(5)));
    }

    #[test]
    fn float_ranges_interpolate() {
        let part = UniformRangePartition::new(
            vec![SortKey::new("f", DataType::Float8, true)],
            TupleRange::new(
                Tuple::new(vec![Datum::Float8(0.0)]),
                Tuple::new(vec![Datum::Float8(1.0)]),
                true,
            ),
        )
        .unwrap();
        let ranges = part.partition(4).unwrap();
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[1].start.get(0), &Datum::Float8(0.25));
        assert_eq!(ranges[3].end.get(0), &Datum::Float8(1.0));
    }

    #[test]
    fn text_ranges_split_on_leading_character() {
        let part = UniformRangePartition::new(
            vec![SortKey::new("s", DataType::Text, true)],
            TupleRange::new(
                Tuple::new(vec![Datum::Text("apple".into())]),
                Tuple::new(vec![Datum::Text("zebra".into())]),
                true,
            ),
        )
        .unwrap();
        let ranges = part.partition(2).unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].start.get(0), &Datum::Text("apple".into()));
        assert_eq!(ranges[0].end.get(0), &Datum::Text("n".into()));
        assert_eq!(ranges[1].end.get(0), &Datum::Text("zebra".into()));
    }

    #[test]
    fn interior_boundaries_pad_trailing_columns() {
        let keys = vec![
            SortKey::new("a", DataType::Int8, true),
            SortKey::new("b", DataType::Int8, false),
        ];
        let range = TupleRange::new(
            Tuple::new(vec![Datum::Int8(0), Datum::Int8(50)]),
            Tuple::new(vec![Datum::Int8(9), Datum::Int8(1)]),
            true,
        );
        let ranges = UniformRangePartition::new(keys, range).unwrap().partition(2).unwrap();
        assert_eq!(
            ranges[0].end,
            Tuple::new(vec![Datum::Int8(5), Datum::Int8(50)])
        );
        assert!(ranges[0].is_adjacent_to(&ranges[1]));
    }

    #[test]
    fn cardinality_multiplies_columns() {
        let keys = vec![
            SortKey::new("a", DataType::Int8, true),
            SortKey::new("b", DataType::Int8, true),
        ];
        let range = TupleRange::new(
            Tuple::new(vec![Datum::Int8(1), Datum::Int8(1)]),
            Tuple::new(vec![Datum::Int8(10), Datum::Int8(3)]),
            true,
        );
        let part = UniformRangePartition::new(keys, range).unwrap();
        assert_eq!(part.total_cardinality(), 30);
        assert_eq!(part.split_cardinality(), 10);
    }

    #[test]
    fn rejects_inverted_range() {
        let result = UniformRangePartition::new(
            vec![SortKey::new("k", DataType::Int8, true)],
            TupleRange::new(
                Tuple::new(vec![Datum::Int8(9)]),
                Tuple::new(vec![Datum::Int8(1)]),
                true,
            ),
        );
        assert!(matches!(result, Err(PlanError::InvalidStatistics { .. })));
    }
}
