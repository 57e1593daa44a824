use rookery_api::ApiError;
use thiserror::Error;

/// Failure of a caller-initiated request.
///
/// Feed-driven reconciliation absorbs its own transport and fetch
/// errors internally; an explicit refresh is the only path that reports
/// a failure back to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Request(#[from] ApiError),
}
