//! Error types for the refresh pipeline.
//!
//! Scrape errors are per-course and never end a cycle. Store and notify errors
//! end the cycle and surface as [`CycleError`].

use thiserror::Error;

/// Errors from a single request to the enrollment API.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Request could not be built or sent
    #[error("Request error: {message}")]
    Request { message: String },

    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Body was not the JSON shape we expect
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// URL construction failed
    #[error("URL error: {message}")]
    Url { message: String },
}

impl ScrapeError {
    /// Returns true for network/protocol failures (as opposed to a malformed body).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ScrapeError::Request { .. } | ScrapeError::Status { .. } | ScrapeError::Url { .. }
        )
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        ScrapeError::Request {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(err: serde_json::Error) -> Self {
        ScrapeError::Parse {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for ScrapeError {
    fn from(err: url::ParseError) -> Self {
        ScrapeError::Url {
            message: err.to_string(),
        }
    }
}

/// Errors from the relational store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database connection lock poisoned")]
    Poisoned,
}

/// Errors from the outbound notification channel.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification transport error: {message}")]
    Transport { message: String },

    #[error("Notification rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Transport {
            message: err.to_string(),
        }
    }
}

/// Terminal error of one refresh (or initial load) cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Sending notification failed: {0}")]
    Notify(#[from] NotifyError),

    /// The bulk course search used by the initial load failed
    #[error("Course search failed: {0}")]
    Search(#[from] ScrapeError),

    #[error("Cycle cancelled")]
    Cancelled,
}
