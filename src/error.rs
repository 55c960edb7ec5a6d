use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Review API error: {0}")]
    ReviewApi(String),

    #[error("Rate limit exceeded, retry after {0} seconds")]
    RateLimited(u64),

    #[error("Model API error: {0}")]
    ModelApi(String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Model response misaligned: expected {expected} results, got {got}")]
    Misaligned { expected: usize, got: usize },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No reviews could be fetched for app {0}")]
    NoReviews(String),

    #[error("None of the reviews for app {0} could be classified")]
    NothingClassified(String),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Transient failures: worth retrying the same call after a backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RateLimited(_) | Error::Network(_) | Error::Timeout(_) => true,
            Error::ReviewApi(msg) | Error::ModelApi(msg) => msg.starts_with("5"),
            _ => false,
        }
    }

    pub(crate) fn server_error(status: reqwest::StatusCode, body: &str) -> String {
        format!("{} - {}", status.as_u16(), body)
    }
}
