//! XRPC client for publishing to a PDS.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{
    ALLOWED_MIME_TYPES, BlobRef, BlueskyError, CreateRecordResponse, MAX_BLOB_SIZE,
    MAX_POST_CHARS, POST_COLLECTION, PostRecord, Session,
};

/// PDS used when an account does not name its own.
pub const DEFAULT_PDS_URL: &str = "https://bsky.social";

/// Retries after the initial attempt for transient failures.
const MAX_TRANSIENT_RETRIES: u32 = 3;

/// Client for one account's session on a PDS.
pub struct BlueskyClient {
    http: Client,
    pds_url: String,
    session: Arc<RwLock<Option<Session>>>,
}

impl BlueskyClient {
    /// Create a new client for the given PDS URL.
    pub fn new(pds_url: impl Into<String>) -> Result<Self, BlueskyError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_http_client(http, pds_url))
    }

    /// Create a client sharing an existing connection pool.
    pub fn with_http_client(http: Client, pds_url: impl Into<String>) -> Self {
        Self {
            http,
            pds_url: pds_url.into().trim_end_matches('/').to_string(),
            session: Arc::new(RwLock::new(None)),
        }
    }

    pub fn pds_url(&self) -> &str {
        &self.pds_url
    }

    /// Authenticate with the PDS using identifier and app password.
    #[tracing::instrument(skip(self, password), fields(pds = %self.pds_url))]
    pub async fn login(&self, identifier: &str, password: &str) -> Result<(), BlueskyError> {
        #[derive(Serialize)]
        struct LoginRequest<'a> {
            identifier: &'a str,
            password: &'a str,
        }

        let url = format!("{}/xrpc/com.atproto.server.createSession", self.pds_url);

        let response = self
            .http
            .post(&url)
            .json(&LoginRequest {
                identifier,
                password,
            })
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(BlueskyError::RateLimited {
                retry_after_secs: retry_after(&response),
            });
        }
        if !status.is_success() {
            let text = response.text().await.map_err(|e| {
                BlueskyError::Auth(format!(
                    "login failed ({}): failed to read response: {}",
                    status, e
                ))
            })?;
            return Err(BlueskyError::Auth(format!(
                "login failed ({}): {}",
                status, text
            )));
        }

        let session: Session = response.json().await?;
        debug!(did = %session.did, handle = %session.handle, "authenticated with PDS");

        *self.session.write().await = Some(session);
        Ok(())
    }

    /// Refresh the current session tokens.
    pub async fn refresh_session(&self) -> Result<(), BlueskyError> {
        let refresh_jwt = {
            let session = self.session.read().await;
            session
                .as_ref()
                .map(|s| s.refresh_jwt.clone())
                .ok_or_else(|| BlueskyError::Auth("no session to refresh".to_string()))?
        };

        let url = format!("{}/xrpc/com.atproto.server.refreshSession", self.pds_url);

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", refresh_jwt))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.map_err(|e| {
                BlueskyError::Auth(format!(
                    "refresh failed ({}): failed to read response: {}",
                    status, e
                ))
            })?;
            return Err(BlueskyError::Auth(format!(
                "refresh failed ({}): {}",
                status, text
            )));
        }

        let session: Session = response.json().await?;
        debug!(did = %session.did, "refreshed session");

        *self.session.write().await = Some(session);
        Ok(())
    }

    /// Get the current session DID.
    pub async fn did(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.did.clone())
    }

    async fn access_token(&self) -> Result<String, BlueskyError> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_jwt.clone())
            .ok_or_else(|| BlueskyError::Auth("not authenticated".to_string()))
    }

    fn is_expired_token_error(err: &BlueskyError) -> bool {
        matches!(
            err,
            BlueskyError::Xrpc { error, .. } if error == "ExpiredToken"
        )
    }

    /// Check if an error is transient and worth retrying.
    fn is_transient_error(err: &BlueskyError) -> bool {
        match err {
            BlueskyError::Xrpc { error, .. } => {
                error == "UpstreamFailure"
                    || error == "UpstreamTimeout"
                    || error == "InternalServerError"
                    || error == "ServiceUnavailable"
            }
            BlueskyError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    async fn try_refresh(&self) -> bool {
        match self.refresh_session().await {
            Ok(()) => {
                debug!("automatically refreshed expired session");
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to auto-refresh session");
                false
            }
        }
    }

    /// Send an authenticated request, refreshing an expired session once and
    /// retrying transient failures with 500ms, 1s, 2s backoff.
    ///
    /// `build` is called once per attempt with the current access token.
    async fn send_authed<T, F>(&self, operation: &str, build: F) -> Result<T, BlueskyError>
    where
        T: DeserializeOwned,
        F: Fn(&str) -> RequestBuilder,
    {
        let mut refreshed = false;
        let mut attempt = 0;
        loop {
            let token = self.access_token().await?;

            let result = match build(&token).send().await {
                Ok(response) => self.handle_response::<T>(response).await,
                Err(e) => Err(BlueskyError::Http(e)),
            };

            match result {
                Ok(v) => return Ok(v),
                Err(ref e) if Self::is_expired_token_error(e) && !refreshed => {
                    refreshed = true;
                    if !self.try_refresh().await {
                        return result;
                    }
                }
                Err(ref e) if Self::is_transient_error(e) && attempt < MAX_TRANSIENT_RETRIES => {
                    let backoff_ms = 500 * (1 << attempt); // 500ms, 1s, 2s
                    warn!(
                        attempt = attempt + 1,
                        backoff_ms,
                        error = %e,
                        operation,
                        "transient error, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
                Err(_) => return result,
            }
        }
    }

    /// Upload an image blob.
    ///
    /// The MIME type and size are checked locally before anything is sent.
    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    pub async fn upload_blob(&self, data: &[u8], mime_type: &str) -> Result<BlobRef, BlueskyError> {
        if !ALLOWED_MIME_TYPES.contains(&mime_type) {
            return Err(BlueskyError::InvalidMimeType(mime_type.to_string()));
        }
        if data.len() > MAX_BLOB_SIZE {
            return Err(BlueskyError::BlobTooLarge {
                size: data.len(),
                max: MAX_BLOB_SIZE,
            });
        }

        let url = format!("{}/xrpc/com.atproto.repo.uploadBlob", self.pds_url);

        let response: UploadBlobResponse = self
            .send_authed("upload_blob", |token| {
                self.http
                    .post(&url)
                    .header("Authorization", format!("Bearer {}", token))
                    .header("Content-Type", mime_type)
                    .body(data.to_vec())
            })
            .await?;

        debug!(mime_type = %mime_type, cid = %response.blob.reference.link, "uploaded blob");
        Ok(response.blob)
    }

    /// Create a record in the session's repo, letting the PDS assign the key.
    pub async fn create_record<T: Serialize>(
        &self,
        collection: &str,
        record: &T,
    ) -> Result<CreateRecordResponse, BlueskyError> {
        let did = self
            .did()
            .await
            .ok_or_else(|| BlueskyError::Auth("not authenticated".to_string()))?;

        // Records must carry $type to pass lexicon validation
        let mut record_value = serde_json::to_value(record)?;
        if let serde_json::Value::Object(ref mut map) = record_value {
            map.insert(
                "$type".to_string(),
                serde_json::Value::String(collection.to_string()),
            );
        }

        #[derive(Serialize)]
        struct CreateRequest<'a> {
            repo: &'a str,
            collection: &'a str,
            record: serde_json::Value,
        }

        let url = format!("{}/xrpc/com.atproto.repo.createRecord", self.pds_url);
        let request_body = CreateRequest {
            repo: &did,
            collection,
            record: record_value,
        };

        self.send_authed("create_record", |token| {
            self.http
                .post(&url)
                .header("Authorization", format!("Bearer {}", token))
                .json(&request_body)
        })
        .await
    }

    /// Create an `app.bsky.feed.post` record.
    ///
    /// Rejects empty posts and text over the character limit without
    /// contacting the PDS.
    #[tracing::instrument(skip(self, post), fields(has_embed = post.embed.is_some()))]
    pub async fn create_post(
        &self,
        post: &PostRecord,
    ) -> Result<CreateRecordResponse, BlueskyError> {
        let length = post.text.chars().count();
        if length > MAX_POST_CHARS {
            return Err(BlueskyError::TextTooLong {
                length,
                max: MAX_POST_CHARS,
            });
        }
        if post.text.trim().is_empty() && post.embed.is_none() {
            return Err(BlueskyError::EmptyPost);
        }

        let created = self.create_record(POST_COLLECTION, post).await?;
        debug!(uri = %created.uri, "created post");
        Ok(created)
    }

    /// Handle HTTP response and parse JSON.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, BlueskyError> {
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(BlueskyError::RateLimited {
                retry_after_secs: retry_after(&response),
            });
        }

        if !status.is_success() {
            let text = response.text().await.map_err(|e| {
                BlueskyError::InvalidResponse(format!(
                    "request failed ({}): failed to read response: {}",
                    status, e
                ))
            })?;

            if let Ok(xrpc_error) = serde_json::from_str::<XrpcError>(&text) {
                return Err(BlueskyError::Xrpc {
                    error: xrpc_error.error,
                    message: xrpc_error.message,
                });
            }

            return Err(BlueskyError::InvalidResponse(format!(
                "request failed ({}): {}",
                status, text
            )));
        }

        let body = response.json().await?;
        Ok(body)
    }
}

fn retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

/// XRPC error response format.
#[derive(Debug, Deserialize)]
struct XrpcError {
    error: String,
    #[serde(default)]
    message: String,
}

/// Response from `com.atproto.repo.uploadBlob`.
#[derive(Debug, Deserialize)]
struct UploadBlobResponse {
    blob: BlobRef,
}
