//! Streaming of resolved chunks into a response body.

use axum::body::{Body, Bytes};
use futures::{Stream, StreamExt, TryStreamExt};
use std::io::{self, SeekFrom};
use std::pin::Pin;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::chunk::FileChunk;

/// Concatenation of `chunks`, read `buffer_size` bytes at a time. Each
/// file is opened when its turn comes and closed once its bytes are sent
/// or the body is dropped.
pub fn chunk_stream(
    chunks: Vec<FileChunk>,
    buffer_size: usize,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    futures::stream::iter(chunks)
        .then(move |chunk| open_chunk(chunk, buffer_size))
        .try_flatten()
}

/// Response body over `chunks`. `on_finish` runs once, with the byte count
/// as soon as the last expected byte has been read, or with the error that
/// cut the transfer short. A body dropped by a departing peer reports
/// neither.
pub fn chunk_body<F>(chunks: Vec<FileChunk>, buffer_size: usize, on_finish: F) -> Body
where
    F: FnOnce(Result<u64, &io::Error>) + Send + 'static,
{
    let tracked = Tracked {
        expected: chunks.iter().map(|c| c.length).sum(),
        stream: Box::pin(chunk_stream(chunks, buffer_size)),
        sent: 0,
        on_finish: Some(on_finish),
    };
    Body::from_stream(futures::stream::unfold(tracked, |mut t| async move {
        match t.stream.next().await {
            Some(Ok(bytes)) => {
                t.sent += bytes.len() as u64;
                if t.sent >= t.expected {
                    let sent = t.sent;
                    t.finish(Ok(sent));
                }
                Some((Ok(bytes), t))
            }
            Some(Err(e)) => {
                t.finish(Err(&e));
                Some((Err(e), t))
            }
            None if t.on_finish.is_some() => {
                let e = io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("chunks ended after {} of {} bytes", t.sent, t.expected),
                );
                t.finish(Err(&e));
                Some((Err(e), t))
            }
            None => None,
        }
    }))
}

struct Tracked<F> {
    stream: Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>,
    sent: u64,
    expected: u64,
    on_finish: Option<F>,
}

impl<F: FnOnce(Result<u64, &io::Error>)> Tracked<F> {
    fn finish(&mut self, outcome: Result<u64, &io::Error>) {
        if let Some(on_finish) = self.on_finish.take() {
            on_finish(outcome);
        }
    }
}

async fn open_chunk(
    chunk: FileChunk,
    buffer_size: usize,
) -> io::Result<ReaderStream<tokio::io::Take<tokio::fs::File>>> {
    let mut file = tokio::fs::File::open(&chunk.path).await?;
    file.seek(SeekFrom::Start(chunk.offset)).await?;
    Ok(ReaderStream::with_capacity(
        file.take(chunk.length),
        buffer_size,
    ))
}
