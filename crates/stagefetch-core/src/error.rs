//! Typed errors for the core crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A fetch URL or query string could not be parsed.
    #[error("malformed fetch request: {0}")]
    MalformedRequest(String),

    /// A binary key tuple could not be decoded against its schema.
    #[error("invalid key encoding: {0}")]
    KeyEncoding(String),

    /// The on-disk index is truncated or otherwise unreadable.
    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    /// Keys appended to an index writer were not in comparator order.
    #[error("index keys out of order: {0}")]
    OutOfOrder(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
