//! Bounded-time HTTP fetching

use crate::error::{Error, FetchError, Result};
use std::time::Duration;
use tracing::debug;

/// One-shot HTTP fetcher with a fixed per-request timeout
///
/// Wraps a shared `reqwest::Client`. A fetch either returns the complete
/// response body or a classified [`FetchError`]; there is no retry at this
/// layer. Callers decide whether a failure is fatal for their unit.
#[derive(Clone, Debug)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl Fetcher {
    /// Build a fetcher with the given per-request timeout
    ///
    /// The timeout covers the whole request, connection through body read.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Client {
                reason: e.to_string(),
            })?;
        Ok(Self { client, timeout })
    }

    /// Fetch a URL and return the response body
    ///
    /// Issues a single GET. Non-2xx statuses, timeouts, connection failures,
    /// and body-read failures each map to their own [`FetchError`] variant so
    /// callers can report what actually went wrong.
    pub async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        debug!(url, "fetching");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.classify(url, e))?;

        debug!(url, bytes = body.len(), "fetched");
        Ok(body.to_vec())
    }

    /// Map a reqwest error onto the transport taxonomy
    fn classify(&self, url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else if e.is_connect() {
            FetchError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            }
        } else {
            FetchError::Body {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}
