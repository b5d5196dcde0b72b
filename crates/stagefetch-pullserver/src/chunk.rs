//! Resolution of a fetch request into byte ranges of local files.
//!
//! Runs on the blocking pool. Index readers are loaded, consulted and
//! dropped within a single call.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use stagefetch_core::key_codec::decode_tuple;
use stagefetch_core::{FetchKind, FetchRequest, SortedIndexReader, Tuple, TupleRange};

use crate::app::AppIdentity;
use crate::error::PullError;
use crate::layout::{OutputLayout, RANGE_DATA_FILE, RANGE_INDEX_FILE};

/// `length` bytes of `path` starting at `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    pub path: PathBuf,
    pub offset: u64,
    pub length: u64,
}

/// All non-empty chunks answering `request`, in `ta` order.
pub fn resolve_chunks(
    layout: &OutputLayout,
    app: &AppIdentity,
    request: &FetchRequest,
) -> Result<Vec<FileChunk>, PullError> {
    let mut chunks = Vec::with_capacity(request.attempts.len());
    for &attempt in &request.attempts {
        let chunk = match &request.kind {
            FetchKind::Hash => {
                let path =
                    layout.hash_file(app, request.stage_id, attempt, request.partition_id)?;
                debug!("Fetch of {}", path.display());
                whole_file(&path)?
            }
            FetchKind::Range {
                start,
                end,
                is_final,
            } => {
                let dir = layout.range_dir(app, request.stage_id, attempt)?;
                range_chunk(&dir, start, end, *is_final)?
            }
        };
        chunks.extend(chunk);
    }
    Ok(chunks)
}

pub fn whole_file(path: &Path) -> Result<Option<FileChunk>, PullError> {
    let length = std::fs::metadata(path)
        .map_err(|e| not_found_or_io(path, e))?
        .len();
    Ok((length > 0).then(|| FileChunk {
        path: path.to_path_buf(),
        offset: 0,
        length,
    }))
}

/// Chunk of `<dir>/output` holding the rows between the encoded keys, or
/// `None` when the range holds no rows.
pub fn range_chunk(
    dir: &Path,
    start: &[u8],
    end: &[u8],
    is_final: bool,
) -> Result<Option<FileChunk>, PullError> {
    let data = dir.join(RANGE_DATA_FILE);
    let index_path = dir.join(RANGE_INDEX_FILE);
    let file_len = std::fs::metadata(&data)
        .map_err(|e| not_found_or_io(&data, e))?
        .len();
    let index = SortedIndexReader::open(&index_path).map_err(|e| match e {
        stagefetch_core::Error::Io(io) => not_found_or_io(&index_path, io),
        other => PullError::from(other),
    })?;

    let keys = index.key_schema();
    let comparator = index.comparator();
    let mut start = decode_tuple(keys, start)?;
    let mut end = decode_tuple(keys, end)?;
    if !comparator.is_ascending_first_key() {
        std::mem::swap(&mut start, &mut end);
    }
    debug!(
        "Range fetch of {} (start={}, end={}{})",
        data.display(),
        start,
        end,
        if is_final { ", final" } else { "" }
    );

    let (first, last) = match (index.first_key(), index.last_key()) {
        (Some(first), Some(last)) => (first, last),
        _ => {
            info!("Index {} is empty, no content", index_path.display());
            return Ok(None);
        }
    };
    if comparator.compare(&start, &end) == Ordering::Greater {
        return Err(PullError::BadRequest(format!(
            "range start {} sorts after end {}",
            start, end
        )));
    }
    if comparator.compare(&end, first) == Ordering::Less
        || comparator.compare(last, &start) == Ordering::Less
    {
        info!(
            "Out of scope: indexed [{}, {}], requested start {} end {}",
            first, last, start, end
        );
        return Ok(None);
    }

    let dump = |reason: &str| {
        let requested = TupleRange::new(
            start.clone(),
            end.clone(),
            comparator.is_ascending_first_key(),
        );
        error!(
            "State dump ({}): requested range {}, index min {}, index max {}, data {}",
            reason,
            requested,
            first,
            last,
            data.display()
        );
        PullError::Index(format!("{} for {}", reason, data.display()))
    };

    let start_offset = lookup(&index, &start).ok_or_else(|| dump("no offset for start key"))?;
    let end_offset = if is_final {
        file_len
    } else {
        lookup(&index, &end).unwrap_or(file_len)
    };
    if start_offset > file_len || end_offset > file_len || start_offset > end_offset {
        return Err(dump(&format!(
            "offsets [{}, {}) outside data file of {} bytes",
            start_offset, end_offset, file_len
        )));
    }

    let length = end_offset - start_offset;
    Ok((length > 0).then(|| FileChunk {
        path: data,
        offset: start_offset,
        length,
    }))
}

/// Exact match first, then the first indexed key sorting at or after `key`.
fn lookup(index: &SortedIndexReader, key: &Tuple) -> Option<u64> {
    index.find(key).or_else(|| index.find_nearest(key))
}

fn not_found_or_io(path: &Path, err: std::io::Error) -> PullError {
    if err.kind() == std::io::ErrorKind::NotFound {
        PullError::NotFound(path.display().to_string())
    } else {
        PullError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagefetch_core::key_codec::encode_tuple;
    use stagefetch_core::{DataType, Datum, SortKey, SortedIndexWriter, TaskAttempt};
    use tempfile::TempDir;

    fn keys(ascending: bool) -> Vec<SortKey> {
        vec![SortKey::new("k", DataType::Int8, ascending)]
    }

    fn key(v: i64) -> Tuple {
        Tuple::new(vec![Datum::Int8(v)])
    }

    fn enc(ascending: bool, v: i64) -> Vec<u8> {
        encode_tuple(&keys(ascending), &key(v)).unwrap()
    }

    /// Sorted output of 3000 bytes indexed at {20 -> 0, 50 -> 1000, 80 -> 2000}
    /// (reversed key order when descending).
    fn sorted_output(ascending: bool) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(RANGE_DATA_FILE), vec![7u8; 3000]).unwrap();
        let mut writer = SortedIndexWriter::new(dir.path().join(RANGE_INDEX_FILE), keys(ascending));
        let order: Vec<i64> = if ascending {
            vec![20, 50, 80]
        } else {
            vec![80, 50, 20]
        };
        for (i, k) in order.into_iter().enumerate() {
            writer.write(key(k), i as u64 * 1000).unwrap();
        }
        writer.close().unwrap();
        dir
    }

    fn span(chunk: Option<FileChunk>) -> Option<(u64, u64)> {
        chunk.map(|c| (c.offset, c.offset + c.length))
    }

    #[test]
    fn exact_bounds() {
        let dir = sorted_output(true);
        let chunk = range_chunk(dir.path(), &enc(true, 20), &enc(true, 80), false).unwrap();
        assert_eq!(span(chunk), Some((0, 2000)));
    }

    #[test]
    fn final_clamps_to_end_of_file() {
        let dir = sorted_output(true);
        let chunk = range_chunk(dir.path(), &enc(true, 20), &enc(true, 80), true).unwrap();
        assert_eq!(span(chunk), Some((0, 3000)));
    }

    #[test]
    fn inexact_bounds_use_next_key() {
        let dir = sorted_output(true);
        let chunk = range_chunk(dir.path(), &enc(true, 30), &enc(true, 60), false).unwrap();
        assert_eq!(span(chunk), Some((1000, 2000)));
    }

    #[test]
    fn end_past_last_key_reads_to_end_of_file() {
        let dir = sorted_output(true);
        let chunk = range_chunk(dir.path(), &enc(true, 60), &enc(true, 95), false).unwrap();
        assert_eq!(span(chunk), Some((2000, 3000)));
    }

    #[test]
    fn out_of_scope_is_empty() {
        let dir = sorted_output(true);
        assert_eq!(
            range_chunk(dir.path(), &enc(true, 200), &enc(true, 300), false).unwrap(),
            None
        );
        assert_eq!(
            range_chunk(dir.path(), &enc(true, 1), &enc(true, 10), false).unwrap(),
            None
        );
    }

    #[test]
    fn descending_output_swaps_bounds() {
        let dir = sorted_output(false);
        // value-ordered [20, 50] is the tail of a descending file
        let chunk = range_chunk(dir.path(), &enc(false, 20), &enc(false, 50), false).unwrap();
        assert_eq!(span(chunk), Some((1000, 2000)));
        let chunk = range_chunk(dir.path(), &enc(false, 10), &enc(false, 50), true).unwrap();
        assert_eq!(span(chunk), Some((1000, 3000)));
    }

    #[test]
    fn inverted_request_is_rejected() {
        let dir = sorted_output(true);
        assert!(matches!(
            range_chunk(dir.path(), &enc(true, 80), &enc(true, 20), false),
            Err(PullError::BadRequest(_))
        ));
    }

    #[test]
    fn offsets_past_end_of_data_are_an_index_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(RANGE_DATA_FILE), vec![7u8; 3000]).unwrap();
        let mut writer = SortedIndexWriter::new(dir.path().join(RANGE_INDEX_FILE), keys(true));
        writer.write(key(20), 0).unwrap();
        writer.write(key(50), 5000).unwrap();
        writer.close().unwrap();

        let err = range_chunk(dir.path(), &enc(true, 20), &enc(true, 50), false).unwrap_err();
        assert!(matches!(err, PullError::Index(_)));
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn corrupt_index_is_an_index_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(RANGE_DATA_FILE), b"rows").unwrap();
        std::fs::write(dir.path().join(RANGE_INDEX_FILE), b"not an index").unwrap();
        assert!(matches!(
            range_chunk(dir.path(), &enc(true, 0), &enc(true, 1), false),
            Err(PullError::Index(_))
        ));
    }

    #[test]
    fn empty_index_has_no_content() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(RANGE_DATA_FILE), b"").unwrap();
        SortedIndexWriter::new(dir.path().join(RANGE_INDEX_FILE), keys(true))
            .close()
            .unwrap();
        assert_eq!(
            range_chunk(dir.path(), &enc(true, 0), &enc(true, 1), true).unwrap(),
            None
        );
    }

    #[test]
    fn missing_index_is_not_found() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(RANGE_DATA_FILE), b"rows").unwrap();
        assert!(matches!(
            range_chunk(dir.path(), &enc(true, 0), &enc(true, 1), false),
            Err(PullError::NotFound(_))
        ));
    }

    #[test]
    fn undecodable_key_is_a_bad_request() {
        let dir = sorted_output(true);
        assert!(matches!(
            range_chunk(dir.path(), &[1, 2], &enc(true, 1), false),
            Err(PullError::BadRequest(_))
        ));
    }

    #[test]
    fn hash_request_concatenates_attempts() {
        let root = TempDir::new().unwrap();
        let layout = OutputLayout::new([root.path()]);
        let app = AppIdentity {
            user: "u".into(),
            app_id: "a".into(),
        };
        for (task, body) in [(1u32, &b"aaa"[..]), (2, &b""[..]), (3, &b"cccc"[..])] {
            let dir = layout
                .allocate_output_dir(&app, 5, TaskAttempt::new(task, 0))
                .unwrap();
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("9"), body).unwrap();
        }

        let request = FetchRequest::hash(
            5,
            9,
            vec![
                TaskAttempt::new(1, 0),
                TaskAttempt::new(2, 0),
                TaskAttempt::new(3, 0),
            ],
        );
        let chunks = resolve_chunks(&layout, &app, &request).unwrap();
        assert_eq!(
            chunks.iter().map(|c| c.length).collect::<Vec<_>>(),
            vec![3, 4]
        );

        let missing = FetchRequest::hash(5, 9, vec![TaskAttempt::new(4, 0)]);
        assert!(matches!(
            resolve_chunks(&layout, &app, &missing),
            Err(PullError::NotFound(_))
        ));
    }
}
