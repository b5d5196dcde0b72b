//! Pull service errors and their HTTP status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum PullError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("invalid service metadata: {0}")]
    Metadata(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PullError {
    pub fn status(&self) -> StatusCode {
        match self {
            PullError::BadRequest(_) => StatusCode::BAD_REQUEST,
            PullError::NotFound(_) => StatusCode::NOT_FOUND,
            PullError::Internal(_)
            | PullError::Index(_)
            | PullError::Metadata(_)
            | PullError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<stagefetch_core::Error> for PullError {
    fn from(err: stagefetch_core::Error) -> Self {
        use stagefetch_core::Error as E;
        match err {
            E::MalformedRequest(msg) | E::KeyEncoding(msg) => PullError::BadRequest(msg),
            E::CorruptIndex(msg) | E::OutOfOrder(msg) => PullError::Index(msg),
            E::Io(e) => PullError::Io(e),
        }
    }
}

impl IntoResponse for PullError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            PullError::BadRequest(_) => warn!("Rejected fetch: {}", self),
            PullError::NotFound(_) => error!("Fetch target missing: {}", self),
            _ => error!("Fetch failed: {}", self),
        }
        (status, self.to_string()).into_response()
    }
}

/// Failure of a client-side fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid fetch descriptor: {0}")]
    Descriptor(#[from] stagefetch_core::Error),

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
}

impl FetchError {
    /// HTTP status returned by the pull service, if it answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
