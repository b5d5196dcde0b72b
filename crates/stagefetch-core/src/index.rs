//! Sorted key → byte-offset index written next to a sorted output file.
//!
//! File layout (all integers big-endian):
//!
//! ```text
//! "SFIX" | u8 version
//! u16 key_count | key_count × (u8 type | u8 ascending | u8 nulls_first | u16 name_len | name)
//! u64 entry_count | entry_count × (u32 key_len | key bytes | u64 offset)
//! ```
//!
//! Entries are ordered by the key schema's comparator, which is also the
//! order rows appear in the data file. The reader loads the whole file into
//! memory on open and holds no file handle afterwards.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cursor::ByteCursor;
use crate::datum::{DataType, SortKey, Tuple, TupleComparator};
use crate::error::{Error, Result};
use crate::key_codec::{encode_tuple, read_tuple};

const MAGIC: &[u8; 4] = b"SFIX";
const VERSION: u8 = 1;

/// Builds an index while a sorting stage finalises its output.
pub struct SortedIndexWriter {
    path: PathBuf,
    comparator: TupleComparator,
    entries: Vec<(Tuple, u64)>,
}

impl SortedIndexWriter {
    pub fn new(path: impl AsRef<Path>, keys: Vec<SortKey>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            comparator: TupleComparator::new(keys),
            entries: Vec::new(),
        }
    }

    /// Record that rows with `key` start at byte `offset`.
    ///
    /// Repeated keys keep the first offset. Keys must arrive in comparator
    /// order and offsets must not decrease.
    pub fn write(&mut self, key: Tuple, offset: u64) -> Result<()> {
        if let Some((last_key, last_offset)) = self.entries.last() {
            match self.comparator.compare(last_key, &key) {
                Ordering::Equal => return Ok(()),
                Ordering::Greater => {
                    return Err(Error::OutOfOrder(format!(
                        "key {} follows {}",
                        key, last_key
                    )))
                }
                Ordering::Less => {}
            }
            if offset < *last_offset {
                return Err(Error::OutOfOrder(format!(
                    "offset {} for key {} precedes offset {}",
                    offset, key, last_offset
                )));
            }
        }
        self.entries.push((key, offset));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flush the index to disk.
    pub fn close(self) -> Result<PathBuf> {
        let keys = self.comparator.keys();
        let file = File::create(&self.path)?;
        let mut w = BufWriter::new(file);

        w.write_all(MAGIC)?;
        w.write_all(&[VERSION])?;
        w.write_all(&(keys.len() as u16).to_be_bytes())?;
        for key in keys {
            w.write_all(&[
                key.data_type.tag(),
                key.ascending as u8,
                key.nulls_first as u8,
            ])?;
            let name = key.column.as_bytes();
            w.write_all(&(name.len() as u16).to_be_bytes())?;
            w.write_all(name)?;
        }

        w.write_all(&(self.entries.len() as u64).to_be_bytes())?;
        for (key, offset) in &self.entries {
            let bytes = encode_tuple(keys, key)?;
            w.write_all(&(bytes.len() as u32).to_be_bytes())?;
            w.write_all(&bytes)?;
            w.write_all(&offset.to_be_bytes())?;
        }
        w.flush()?;

        debug!(
            "Wrote index {:?} with {} entries",
            self.path,
            self.entries.len()
        );
        Ok(self.path)
    }
}

/// Read-only view of an index file.
#[derive(Debug)]
pub struct SortedIndexReader {
    comparator: TupleComparator,
    entries: Vec<(Tuple, u64)>,
}

impl SortedIndexReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        parse(bytes).map_err(|e| match e {
            Error::KeyEncoding(msg) => Error::CorruptIndex(msg),
            other => other,
        })
    }

    pub fn key_schema(&self) -> &[SortKey] {
        self.comparator.keys()
    }

    pub fn comparator(&self) -> &TupleComparator {
        &self.comparator
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first_key(&self) -> Option<&Tuple> {
        self.entries.first().map(|(k, _)| k)
    }

    pub fn last_key(&self) -> Option<&Tuple> {
        self.entries.last().map(|(k, _)| k)
    }

    /// Offset of the entry whose key equals `key`.
    pub fn find(&self, key: &Tuple) -> Option<u64> {
        self.entries
            .binary_search_by(|(k, _)| self.comparator.compare(k, key))
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// Offset of the first entry whose key is greater than or equal to `key`
    /// in comparator order. `None` when every key is smaller.
    pub fn find_nearest(&self, key: &Tuple) -> Option<u64> {
        let idx = self
            .entries
            .partition_point(|(k, _)| self.comparator.compare(k, key) == Ordering::Less);
        self.entries.get(idx).map(|(_, offset)| *offset)
    }
}

fn parse(bytes: &[u8]) -> Result<SortedIndexReader> {
    let mut cur = ByteCursor::new(bytes);
    if cur.take(4)? != MAGIC {
        return Err(Error::CorruptIndex("bad magic".to_string()));
    }
    let version = cur.u8()?;
    if version != VERSION {
        return Err(Error::CorruptIndex(format!(
            "unsupported index version {}",
            version
        )));
    }

    let key_count = cur.u16()? as usize;
    let mut keys = Vec::with_capacity(key_count);
    for _ in 0..key_count {
        let tag = cur.u8()?;
        let data_type = DataType::from_tag(tag)
            .ok_or_else(|| Error::CorruptIndex(format!("unknown type tag {}", tag)))?;
        let ascending = cur.u8()? != 0;
        let nulls_first = cur.u8()? != 0;
        let name_len = cur.u16()? as usize;
        let name = String::from_utf8(cur.take(name_len)?.to_vec())
            .map_err(|e| Error::CorruptIndex(format!("key name is not UTF-8: {}", e)))?;
        keys.push(SortKey {
            column: name,
            data_type,
            ascending,
            nulls_first,
        });
    }

    let entry_count = cur.u64()? as usize;
    // each entry needs at least 12 bytes, so a bogus count fails fast
    if entry_count > cur.remaining() / 12 {
        return Err(Error::CorruptIndex(format!(
            "entry count {} exceeds file size",
            entry_count
        )));
    }
    let mut entries = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        let key_len = cur.u32()? as usize;
        let raw = cur.take(key_len)?;
        let mut key_cur = ByteCursor::new(raw);
        let key = read_tuple(&keys, &mut key_cur)?;
        let offset = cur.u64()?;
        entries.push((key, offset));
    }
    if !cur.is_empty() {
        return Err(Error::CorruptIndex(format!(
            "{} trailing bytes",
            cur.remaining()
        )));
    }

    Ok(SortedIndexReader {
        comparator: TupleComparator::new(keys),
        entries,
    })
}
