use thiserror::Error;

/// Errors from the REST backend.
///
/// `NotFound` is its own variant because reconciliation treats a 404 on a
/// targeted re-fetch as a delete rather than a failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("entity not found")]
    NotFound,

    #[error("request failed with status {status}")]
    Status { status: u16 },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound)
    }
}
