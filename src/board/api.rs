//! HTTP side of the board: snapshot fetch and paint writes.
//!
//! ERROR HANDLING
//! ==============
//! Network failures, timeouts, 408 and 5xx responses are transient and
//! retried with the configured [`RetryPolicy`]. A malformed snapshot is
//! retried as well, since the next fetch may land on a consistent copy.
//! Every other status of 300 or above is a rejection and is returned
//! immediately. The paint endpoint reports its verdict twice, as the HTTP
//! status and as `status` inside the JSON body; the first non-success wins.

use reqwest::header::{COOKIE, HeaderValue};
use serde::Deserialize;
use serde_json::Value;

use super::grid::{Board, Pixel, SnapshotError, parse_snapshot};
use crate::config::EngineConfig;
use crate::retry::{RetryFailure, RetryPolicy, Transient, with_retry};
use crate::session::Session;

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
}

impl Transient for RequestError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Http(error) => !error.is_builder(),
            Self::Status { status, .. } => is_transient_status(*status),
            Self::Snapshot(_) => true,
        }
    }
}

/// 408 and every 5xx may succeed when repeated.
#[must_use]
pub fn is_transient_status(status: u16) -> bool {
    status == 408 || (500..600).contains(&status)
}

/// Failure of one paint write, attributed to the session that made it.
#[derive(Debug, thiserror::Error)]
pub enum PaintError {
    #[error("session {actor}: paint rejected with status {status}: {message}")]
    Rejected { actor: u64, status: u16, message: String },
    #[error("session {actor}: paint failed after {attempts} attempts: {source}")]
    Exhausted { actor: u64, attempts: u32, source: RequestError },
    #[error("session {actor}: credential is not a valid header value")]
    InvalidCredential { actor: u64 },
}

impl PaintError {
    #[must_use]
    pub fn actor(&self) -> u64 {
        match self {
            Self::Rejected { actor, .. }
            | Self::Exhausted { actor, .. }
            | Self::InvalidCredential { actor } => *actor,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PaintReply {
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    data: Option<Value>,
}

pub struct BoardApi {
    client: reqwest::Client,
    board_url: String,
    paint_url: String,
    snapshot_retry: RetryPolicy,
    paint_retry: RetryPolicy,
}

impl BoardApi {
    /// # Errors
    ///
    /// Returns the underlying error if the HTTP client cannot be built.
    pub fn new(config: &EngineConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            board_url: config.board_url.clone(),
            paint_url: config.paint_url.clone(),
            snapshot_retry: config.snapshot_retry,
            paint_retry: config.paint_retry,
        })
    }

    /// Fetch and parse the full board, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the last [`RequestError`] once retries are spent or on a
    /// non-transient status.
    pub async fn fetch_snapshot(&self, palette_len: usize) -> Result<Board, RetryFailure<RequestError>> {
        with_retry(self.snapshot_retry, "snapshot", || self.fetch_snapshot_once(palette_len)).await
    }

    async fn fetch_snapshot_once(&self, palette_len: usize) -> Result<Board, RequestError> {
        let response = self.client.get(&self.board_url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RequestError::Status { status: status.as_u16(), message: excerpt(&body) });
        }
        Ok(parse_snapshot(&body, palette_len)?)
    }

    /// Submit one pixel on behalf of `session`.
    ///
    /// # Errors
    ///
    /// Returns [`PaintError::Rejected`] for a permanent refusal and
    /// [`PaintError::Exhausted`] when transient failures outlast the retry budget.
    pub async fn paint(&self, pixel: Pixel, session: &Session) -> Result<(), PaintError> {
        let actor = session.id();
        let cookie = session
            .cookie()
            .map_err(|_| PaintError::InvalidCredential { actor })?;

        match with_retry(self.paint_retry, "paint", || self.paint_once(pixel, &cookie)).await {
            Ok(()) => Ok(()),
            Err(RetryFailure { error: RequestError::Status { status, message }, .. })
                if !is_transient_status(status) =>
            {
                Err(PaintError::Rejected { actor, status, message })
            }
            Err(RetryFailure { attempts, error }) => Err(PaintError::Exhausted { actor, attempts, source: error }),
        }
    }

    async fn paint_once(&self, pixel: Pixel, cookie: &HeaderValue) -> Result<(), RequestError> {
        let form = [
            ("x", pixel.x.to_string()),
            ("y", pixel.y.to_string()),
            ("color", pixel.color.to_string()),
        ];
        let response = self
            .client
            .post(&self.paint_url)
            .header(COOKIE, cookie.clone())
            .form(&form)
            .send()
            .await?;
        let http_status = response.status();
        let body = response.text().await?;
        let reply = serde_json::from_str::<PaintReply>(&body).ok();

        let status = if http_status.is_success() {
            reply.as_ref().and_then(|r| r.status).unwrap_or(http_status.as_u16())
        } else {
            http_status.as_u16()
        };
        if (200..300).contains(&status) {
            return Ok(());
        }

        let message = match reply.and_then(|r| r.data) {
            Some(Value::String(text)) => text,
            Some(other) => other.to_string(),
            None => excerpt(&body),
        };
        Err(RequestError::Status { status, message })
    }
}

fn excerpt(body: &str) -> String {
    body.trim().chars().take(200).collect()
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
