//! Client side of the fetch protocol.

use axum::body::Bytes;
use reqwest::StatusCode;
use tracing::debug;

use stagefetch_core::FetchDescriptor;

use crate::error::FetchError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Data(Bytes),
    /// The range or partition holds no rows.
    NoContent,
}

impl FetchOutcome {
    pub fn len(&self) -> usize {
        match self {
            FetchOutcome::Data(bytes) => bytes.len(),
            FetchOutcome::NoContent => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Issues fetch URLs against pull services. Retrying is up to the caller;
/// results are stable for finished output.
#[derive(Debug, Clone, Default)]
pub struct Fetcher {
    http: reqwest::Client,
}

impl Fetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fetch(&self, descriptor: &FetchDescriptor) -> Result<FetchOutcome, FetchError> {
        let url = descriptor.to_url()?;
        self.fetch_url(url.as_str()).await
    }

    pub async fn fetch_url(&self, url: &str) -> Result<FetchOutcome, FetchError> {
        let http_err = |source| FetchError::Http {
            url: url.to_string(),
            source,
        };
        let resp = self.http.get(url).send().await.map_err(http_err)?;
        let status = resp.status();
        debug!("GET {} -> {}", url, status);

        if status == StatusCode::NO_CONTENT {
            return Ok(FetchOutcome::NoContent);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        let bytes = resp.bytes().await.map_err(http_err)?;
        Ok(FetchOutcome::Data(bytes))
    }
}
