//! External collaborators that deliver and produce content.

use async_trait::async_trait;

use crate::{Account, Credentials, LiveFetchError, Payload, PublishError};

/// Destination that accepts one payload per call.
#[async_trait]
pub trait PublishSink: Send + Sync {
    /// Publish `payload` as the account owning `credentials`.
    ///
    /// Returns the destination's durable identifier for the new post.
    async fn publish(
        &self,
        credentials: &Credentials,
        payload: &Payload,
    ) -> Result<String, PublishError>;
}

/// Third-party source for categories with no stored content set.
#[async_trait]
pub trait LiveSource: Send + Sync {
    /// Fetch one fresh item for `account`.
    async fn fetch_one(&self, account: &Account) -> Result<Payload, LiveFetchError>;
}
