//! Error types for the Bluesky client.

use thiserror::Error;

/// Errors that can occur when publishing to a PDS.
#[derive(Debug, Error)]
pub enum BlueskyError {
    /// Session creation or refresh failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// XRPC error from server.
    #[error("XRPC error: {error} - {message}")]
    Xrpc { error: String, message: String },

    /// Blob MIME type is not an accepted image type.
    #[error("unsupported MIME type: {0}")]
    InvalidMimeType(String),

    /// Blob exceeds the PDS upload limit.
    #[error("blob too large: {size} bytes (max {max})")]
    BlobTooLarge { size: usize, max: usize },

    /// Post text exceeds the character limit.
    #[error("post text too long: {length} characters (max {max})")]
    TextTooLong { length: usize, max: usize },

    /// Post has neither text nor an embed.
    #[error("post is empty")]
    EmptyPost,
}

impl BlueskyError {
    /// Returns true if the PDS would reject this content no matter how often
    /// it is retried, as opposed to a transport or account problem.
    pub fn is_content_rejection(&self) -> bool {
        match self {
            Self::InvalidMimeType(_)
            | Self::BlobTooLarge { .. }
            | Self::TextTooLong { .. }
            | Self::EmptyPost => true,
            Self::Xrpc { error, .. } => error == "InvalidRequest" || error == "BlobTooLarge",
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_rejection_classification() {
        assert!(BlueskyError::InvalidMimeType("text/html".into()).is_content_rejection());
        assert!(BlueskyError::BlobTooLarge { size: 2, max: 1 }.is_content_rejection());
        assert!(BlueskyError::EmptyPost.is_content_rejection());
        assert!(
            BlueskyError::Xrpc {
                error: "InvalidRequest".into(),
                message: "Invalid app.bsky.feed.post record".into(),
            }
            .is_content_rejection()
        );

        assert!(!BlueskyError::Auth("bad password".into()).is_content_rejection());
        assert!(
            !BlueskyError::RateLimited {
                retry_after_secs: Some(30)
            }
            .is_content_rejection()
        );
        assert!(
            !BlueskyError::Xrpc {
                error: "UpstreamFailure".into(),
                message: "".into(),
            }
            .is_content_rejection()
        );
    }

    #[test]
    fn test_rate_limited_display() {
        let err = BlueskyError::RateLimited {
            retry_after_secs: Some(12),
        };
        assert_eq!(err.to_string(), "rate limited (retry after 12s)");
        let err = BlueskyError::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(err.to_string(), "rate limited");
    }
}
