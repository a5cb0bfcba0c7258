//! Error types for the scheduler.

use thiserror::Error;

/// Errors that end an invocation before any account is processed.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The account registry or content store could not be queried.
    #[error("store unavailable: {0}")]
    StoreUnavailable(StoreError),

    /// A record needed to start the invocation could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// A forced invocation named an account that does not exist.
    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// Invocation parameters were out of range.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corrupt(detail) => SchedulerError::Corrupt(detail),
            other => SchedulerError::StoreUnavailable(other),
        }
    }
}

/// Errors raised by account registry and content store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or the query failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// A stored row could not be decoded into a domain value.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// A write targeted a row that does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Failure of a single publish attempt.
///
/// The split decides the publisher's failure branch: content errors are
/// skipped-and-marked and the next item is tried, sink errors fail the
/// account for this invocation and leave its content untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The payload could not be loaded or will never be accepted.
    #[error("content error: {0}")]
    Content(String),

    /// The publish destination rejected the request or was unreachable.
    #[error("sink error: {0}")]
    Sink(String),
}

/// Failure to fetch a live item for a category with no stored content.
#[derive(Debug, Error)]
#[error("live fetch failed: {0}")]
pub struct LiveFetchError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_converts_to_unavailable() {
        let err: SchedulerError = StoreError::Backend("disk I/O error".to_string()).into();
        assert!(matches!(err, SchedulerError::StoreUnavailable(_)));
        assert_eq!(
            err.to_string(),
            "store unavailable: backend error: disk I/O error"
        );
    }

    #[test]
    fn test_corrupt_row_is_not_reported_as_unavailable() {
        let err: SchedulerError = StoreError::Corrupt("account tag-9: bad kind".to_string()).into();
        assert!(matches!(err, SchedulerError::Corrupt(_)));
        assert_eq!(err.to_string(), "corrupt record: account tag-9: bad kind");
    }
}
