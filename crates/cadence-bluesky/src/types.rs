//! Record and response types for posting to Bluesky.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Collection NSID for posts.
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Embed type for image attachments.
pub const IMAGES_EMBED_TYPE: &str = "app.bsky.embed.images";

/// Maximum post length, in characters.
pub const MAX_POST_CHARS: usize = 300;

/// Maximum accepted blob size, in bytes.
pub const MAX_BLOB_SIZE: usize = 1_000_000;

/// Image MIME types the PDS accepts for post embeds.
pub const ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/gif"];

/// Session information from authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

/// Response from creating a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRecordResponse {
    pub uri: String,
    pub cid: String,
}

/// The CID link inside a blob reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobLink {
    #[serde(rename = "$link")]
    pub link: String,
}

/// Reference to an uploaded blob, as returned by `uploadBlob`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    #[serde(rename = "$type")]
    pub blob_type: String,
    #[serde(rename = "ref")]
    pub reference: BlobLink,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub size: u64,
}

/// One image attached to a post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedImage {
    pub image: BlobRef,
    pub alt: String,
}

/// The `app.bsky.embed.images` embed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesEmbed {
    #[serde(rename = "$type")]
    pub embed_type: String,
    pub images: Vec<EmbedImage>,
}

impl ImagesEmbed {
    /// Embed a single uploaded image.
    pub fn single(image: BlobRef, alt: impl Into<String>) -> Self {
        Self {
            embed_type: IMAGES_EMBED_TYPE.to_string(),
            images: vec![EmbedImage {
                image,
                alt: alt.into(),
            }],
        }
    }
}

/// An `app.bsky.feed.post` record.
///
/// The `$type` field is added by the client when the record is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub text: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<ImagesEmbed>,
}

impl PostRecord {
    /// A text-only post.
    pub fn text(text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            created_at: created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            embed: None,
        }
    }

    /// Attach an images embed.
    pub fn with_embed(mut self, embed: ImagesEmbed) -> Self {
        self.embed = Some(embed);
        self
    }
}

/// Guess an image MIME type from its leading bytes.
pub fn sniff_image_mime(data: &[u8]) -> Option<&'static str> {
    match data {
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, b'P', b'N', b'G', ..] => Some("image/png"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_session_deserializes_camel_case() {
        let session: Session = serde_json::from_value(serde_json::json!({
            "did": "did:plc:abc",
            "handle": "feed.example.com",
            "accessJwt": "a",
            "refreshJwt": "r"
        }))
        .unwrap();
        assert_eq!(session.access_jwt, "a");
        assert_eq!(session.refresh_jwt, "r");
    }

    #[test]
    fn test_post_record_serialization() {
        let blob = BlobRef {
            blob_type: "blob".to_string(),
            reference: BlobLink {
                link: "bafkrei123".to_string(),
            },
            mime_type: "image/png".to_string(),
            size: 42,
        };
        let created_at = DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let post = PostRecord::text("Sunset (Album)", created_at)
            .with_embed(ImagesEmbed::single(blob, "a red sky"));

        let json = serde_json::to_value(&post).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "text": "Sunset (Album)",
                "createdAt": "2024-03-01T12:00:00.000Z",
                "embed": {
                    "$type": "app.bsky.embed.images",
                    "images": [{
                        "image": {
                            "$type": "blob",
                            "ref": { "$link": "bafkrei123" },
                            "mimeType": "image/png",
                            "size": 42
                        },
                        "alt": "a red sky"
                    }]
                }
            })
        );
    }

    #[test]
    fn test_text_post_omits_embed() {
        let json = serde_json::to_value(PostRecord::text("hello", Utc::now())).unwrap();
        assert!(json.get("embed").is_none());
    }

    #[test]
    fn test_sniff_image_mime() {
        assert_eq!(sniff_image_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_image_mime(b"\x89PNG\r\n\x1a\n"), Some("image/png"));
        assert_eq!(sniff_image_mime(b"GIF89a"), Some("image/gif"));
        assert_eq!(sniff_image_mime(b"RIFF\x00\x00\x00\x00WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_image_mime(b"<html>"), None);
        assert_eq!(sniff_image_mime(&[]), None);
    }
}
