use std::time::Duration;
use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a single bounded network operation.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled by caller")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned HTTP {0}")]
    Status(StatusCode),

    #[error("upstream reported success: false")]
    Rejected,

    #[error("malformed JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("configuration defect: {0}")]
    Config(String),
}

impl FetchError {
    /// Upstream status to pass through to our own caller, if any.
    pub fn upstream_status(&self) -> Option<StatusCode> {
        match self {
            Self::Status(code) => Some(*code),
            _ => None,
        }
    }
}
