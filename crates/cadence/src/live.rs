//! Live-fetch content: random trading cards from a Scryfall-compatible API.

use async_trait::async_trait;
use cadence_scheduler::{Account, LiveFetchError, LiveSource, Payload};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_SCRYFALL_URL: &str = "https://api.scryfall.com";

pub struct CardSource {
    http: Client,
    base_url: String,
}

impl CardSource {
    pub fn with_http_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImageUris {
    normal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CardFace {
    image_uris: Option<ImageUris>,
}

#[derive(Debug, Deserialize)]
struct Card {
    name: String,
    set_name: String,
    image_uris: Option<ImageUris>,
    #[serde(default)]
    card_faces: Vec<CardFace>,
}

impl Card {
    /// The card's image, or its first face's for double-faced cards.
    fn image_url(&self) -> Option<&str> {
        self.image_uris
            .as_ref()
            .or_else(|| self.card_faces.first().and_then(|f| f.image_uris.as_ref()))
            .and_then(|uris| uris.normal.as_deref())
    }

    fn into_payload(self) -> Result<Payload, LiveFetchError> {
        let location = self
            .image_url()
            .ok_or_else(|| LiveFetchError(format!("card {:?} has no image", self.name)))?
            .to_string();
        Ok(Payload::Image {
            location,
            caption: Some(format!("{} ({})", self.name, self.set_name)),
            alt_text: Some(self.name),
        })
    }
}

#[async_trait]
impl LiveSource for CardSource {
    #[tracing::instrument(skip(self, account), fields(account = %account.id))]
    async fn fetch_one(&self, account: &Account) -> Result<Payload, LiveFetchError> {
        let url = format!("{}/cards/random", self.base_url);

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| LiveFetchError(format!("card request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LiveFetchError(format!("card API returned {}", status)));
        }

        let card: Card = response
            .json()
            .await
            .map_err(|e| LiveFetchError(format!("bad card response: {}", e)))?;

        debug!(name = %card.name, set = %card.set_name, "fetched card");
        card.into_payload()
    }
}
