//! Publish sink that posts to Bluesky.
//!
//! Each publish logs in with the account's own credentials, so accounts may
//! live on different PDSes. Image bytes are read from disk or fetched over
//! HTTP before any session is created; a payload that can never be posted
//! is reported as [`PublishError::Content`] so the scheduler can skip it.

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use cadence_bluesky::{
    BlueskyClient, BlueskyError, ImagesEmbed, MAX_BLOB_SIZE, MAX_POST_CHARS, PostRecord,
    sniff_image_mime,
};
use cadence_scheduler::{Credentials, Payload, PublishError, PublishSink};
use chrono::Utc;
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

/// Default delay between uploading an image and creating its post.
pub const DEFAULT_MEDIA_SETTLE_SECS: u64 = 5;

pub struct BlueskySink {
    http: Client,
    default_pds_url: String,
    media_settle: Duration,
}

impl BlueskySink {
    pub fn new(http: Client, default_pds_url: impl Into<String>, media_settle: Duration) -> Self {
        Self {
            http,
            default_pds_url: default_pds_url.into(),
            media_settle,
        }
    }

    /// Read image bytes from a path or an `http(s)://` URL.
    async fn load_image(&self, location: &str) -> Result<Vec<u8>, PublishError> {
        let data = if location.starts_with("http://") || location.starts_with("https://") {
            self.fetch_image(location).await?
        } else {
            tokio::fs::read(location).await.map_err(|e| match e.kind() {
                ErrorKind::NotFound => PublishError::Content(format!("missing file {}", location)),
                _ => PublishError::Content(format!("unreadable file {}: {}", location, e)),
            })?
        };

        if data.len() > MAX_BLOB_SIZE {
            return Err(oversized(location, data.len()));
        }
        Ok(data)
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, PublishError> {
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| PublishError::Sink(format!("failed to fetch {}: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(PublishError::Content(format!("{} returned {}", url, status)));
        }
        if !status.is_success() {
            return Err(PublishError::Sink(format!("{} returned {}", url, status)));
        }

        if let Some(length) = response.content_length() {
            if length > MAX_BLOB_SIZE as u64 {
                return Err(oversized(url, length as usize));
            }
        }

        // Content-Length may be absent or wrong, so the cap is enforced while reading
        let mut data = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| PublishError::Sink(format!("failed to read body from {}: {}", url, e)))?
        {
            if data.len() + chunk.len() > MAX_BLOB_SIZE {
                return Err(oversized(url, data.len() + chunk.len()));
            }
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    /// Turn a prepared payload into a post, uploading its image if it has one.
    async fn build_post(
        &self,
        client: &BlueskyClient,
        prepared: Prepared,
    ) -> Result<PostRecord, PublishError> {
        match prepared {
            Prepared::Text(body) => Ok(PostRecord::text(body, Utc::now())),
            Prepared::Image {
                data,
                mime_type,
                caption,
                alt,
            } => {
                let blob = client
                    .upload_blob(&data, mime_type)
                    .await
                    .map_err(classify)?;

                if !self.media_settle.is_zero() {
                    debug!(
                        settle_ms = self.media_settle.as_millis() as u64,
                        "waiting for media to settle"
                    );
                    tokio::time::sleep(self.media_settle).await;
                }

                Ok(PostRecord::text(caption, Utc::now()).with_embed(ImagesEmbed::single(blob, alt)))
            }
        }
    }
}

/// A payload whose content has been loaded and checked locally.
enum Prepared {
    Text(String),
    Image {
        data: Vec<u8>,
        mime_type: &'static str,
        caption: String,
        alt: String,
    },
}

#[async_trait]
impl PublishSink for BlueskySink {
    #[tracing::instrument(skip(self, credentials, payload), fields(identifier = %credentials.identifier))]
    async fn publish(
        &self,
        credentials: &Credentials,
        payload: &Payload,
    ) -> Result<String, PublishError> {
        // Everything that can be rejected locally is checked before logging in
        let prepared = match payload {
            Payload::Text { body } => {
                check_text(body, false)?;
                Prepared::Text(body.clone())
            }
            Payload::Image {
                location,
                caption,
                alt_text,
            } => {
                let caption = caption.clone().unwrap_or_default();
                check_text(&caption, true)?;
                let data = self.load_image(location).await?;
                let mime_type = sniff_image_mime(&data).ok_or_else(|| {
                    PublishError::Content(format!("{} is not a supported image type", location))
                })?;
                let alt = alt_text.clone().unwrap_or_else(|| caption.clone());
                Prepared::Image {
                    data,
                    mime_type,
                    caption,
                    alt,
                }
            }
        };

        let pds_url = credentials
            .pds_url
            .as_deref()
            .unwrap_or(&self.default_pds_url);
        let client = BlueskyClient::with_http_client(self.http.clone(), pds_url);
        client
            .login(&credentials.identifier, &credentials.app_password)
            .await
            .map_err(|e| PublishError::Sink(e.to_string()))?;

        let post = self.build_post(&client, prepared).await?;
        let created = client.create_post(&post).await.map_err(classify)?;

        info!(uri = %created.uri, "posted");
        Ok(created.uri)
    }
}

fn oversized(location: &str, size: usize) -> PublishError {
    PublishError::Content(format!(
        "{} is at least {} bytes (max {})",
        location, size, MAX_BLOB_SIZE
    ))
}

fn check_text(text: &str, allow_empty: bool) -> Result<(), PublishError> {
    let length = text.chars().count();
    if length > MAX_POST_CHARS {
        return Err(PublishError::Content(format!(
            "text is {} characters (max {})",
            length, MAX_POST_CHARS
        )));
    }
    if !allow_empty && text.trim().is_empty() {
        return Err(PublishError::Content("text is empty".to_string()));
    }
    Ok(())
}

fn classify(e: BlueskyError) -> PublishError {
    if e.is_content_rejection() {
        PublishError::Content(e.to_string())
    } else {
        PublishError::Sink(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_text() {
        assert!(check_text("hello", false).is_ok());
        assert!(check_text("", true).is_ok());
        assert!(matches!(check_text("  ", false), Err(PublishError::Content(_))));
        assert!(matches!(
            check_text(&"x".repeat(301), true),
            Err(PublishError::Content(_))
        ));
        assert!(check_text(&"ü".repeat(300), false).is_ok());
    }

    #[test]
    fn test_classify() {
        assert!(matches!(
            classify(BlueskyError::EmptyPost),
            PublishError::Content(_)
        ));
        assert!(matches!(
            classify(BlueskyError::RateLimited {
                retry_after_secs: None
            }),
            PublishError::Sink(_)
        ));
        assert!(matches!(
            classify(BlueskyError::Auth("nope".into())),
            PublishError::Sink(_)
        ));
    }
}
