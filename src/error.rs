//! Library error types.

use thiserror::Error;

/// Failure of one upstream feed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// Subscription infrastructure failed: connect, status, body, or early end.
    #[error("transport error: {0}")]
    Transport(String),

    /// The one-shot fallback request failed.
    #[error("fallback request failed: {0}")]
    Fallback(String),

    /// A frame or response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Rejected scan submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("query must not be empty")]
    EmptyQuery,
}
