//! Scheduler types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::publisher::{DEFAULT_INTERVAL_HOURS, DEFAULT_MAX_ACCOUNTS};

/// The content kind an account publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Images by a single creator.
    Artist,
    /// Images sharing a label.
    Tag,
    /// Text quotes about a subject.
    Quote,
    /// Trading cards fetched live from a third party.
    Card,
}

impl Category {
    /// Stable identifier used in storage and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Artist => "artist",
            Self::Tag => "tag",
            Self::Quote => "quote",
            Self::Card => "card",
        }
    }

    /// Returns true if content is fetched live instead of from the content store.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Card)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "artist" => Ok(Self::Artist),
            "tag" => Ok(Self::Tag),
            "quote" => Ok(Self::Quote),
            "card" => Ok(Self::Card),
            other => Err(format!("unknown category: {}", other)),
        }
    }
}

/// What a content-source key groups items by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Artist,
    Tag,
    Subject,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Artist => "artist",
            Self::Tag => "tag",
            Self::Subject => "subject",
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "artist" => Ok(Self::Artist),
            "tag" => Ok(Self::Tag),
            "subject" => Ok(Self::Subject),
            other => Err(format!("unknown source kind: {}", other)),
        }
    }
}

/// Grouping key selecting which content items belong to an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceKey {
    pub kind: SourceKind,
    pub id: i64,
}

impl SourceKey {
    pub fn new(kind: SourceKind, id: i64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Account variant, carrying only the fields its category needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccountKind {
    Artist { artist_id: i64 },
    Tag { tag_id: i64 },
    Quote { subject_id: i64 },
    Card,
}

impl AccountKind {
    /// Build a variant from a stored category and optional source id.
    ///
    /// Fails if the category needs a source id and none is given, or if a
    /// live-fetch category is given one.
    pub fn from_parts(category: Category, source_id: Option<i64>) -> Result<Self, String> {
        match (category, source_id) {
            (Category::Artist, Some(artist_id)) => Ok(Self::Artist { artist_id }),
            (Category::Tag, Some(tag_id)) => Ok(Self::Tag { tag_id }),
            (Category::Quote, Some(subject_id)) => Ok(Self::Quote { subject_id }),
            (Category::Card, None) => Ok(Self::Card),
            (Category::Card, Some(id)) => {
                Err(format!("category card takes no source id, got {}", id))
            }
            (category, None) => Err(format!("category {} requires a source id", category)),
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Self::Artist { .. } => Category::Artist,
            Self::Tag { .. } => Category::Tag,
            Self::Quote { .. } => Category::Quote,
            Self::Card => Category::Card,
        }
    }

    /// The content-source key, or `None` for live-fetch categories.
    pub fn source_key(&self) -> Option<SourceKey> {
        match self {
            Self::Artist { artist_id } => Some(SourceKey::new(SourceKind::Artist, *artist_id)),
            Self::Tag { tag_id } => Some(SourceKey::new(SourceKind::Tag, *tag_id)),
            Self::Quote { subject_id } => Some(SourceKey::new(SourceKind::Subject, *subject_id)),
            Self::Card => None,
        }
    }

    /// The raw source id, as stored alongside the category.
    pub fn source_id(&self) -> Option<i64> {
        self.source_key().map(|k| k.id)
    }
}

/// Login material for an account's publish destination.
///
/// Opaque to the scheduler; only the publish sink reads it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub identifier: String,
    #[serde(default, skip_serializing)]
    pub app_password: String,
    /// PDS to log in against; the sink's default is used when unset.
    pub pds_url: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("app_password", &"<redacted>")
            .field("pds_url", &self.pds_url)
            .finish()
    }
}

/// A publishing identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub kind: AccountKind,
    pub active: bool,
    pub credentials: Credentials,
    /// When this account last published successfully.
    pub last_published: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(id: impl Into<String>, kind: AccountKind, credentials: Credentials) -> Self {
        Self {
            id: id.into(),
            kind,
            active: true,
            credentials,
            last_published: None,
        }
    }
}

/// What gets published for one content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// An image at a filesystem path or `http(s)://` URL.
    Image {
        location: String,
        caption: Option<String>,
        alt_text: Option<String>,
    },
    /// A plain text post.
    Text { body: String },
}

impl Payload {
    /// Short description for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Image { location, .. } => format!("image {}", location),
            Self::Text { body } => {
                let preview: String = body.chars().take(40).collect();
                format!("text \"{}\"", preview)
            }
        }
    }
}

/// One unit of publishable content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i64,
    pub source: SourceKey,
    pub payload: Payload,
    /// Set on publish or skip-and-mark, cleared by a cycle reset.
    pub last_published: Option<DateTime<Utc>>,
}

/// Record of one successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub account_id: String,
    /// `None` for live-fetch categories, whose content has no stored identity.
    pub item_id: Option<i64>,
    /// Identifier returned by the publish sink.
    pub external_id: String,
    pub published_at: DateTime<Utc>,
}

/// A per-account failure reported back to the invoker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFailure {
    pub account: String,
    pub error: String,
}

/// Parameters for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub now: DateTime<Utc>,
    /// Minimum spacing between an account's publishes.
    pub interval_hours: u32,
    /// Cap on due accounts considered in this invocation.
    pub max_accounts: usize,
    /// Bypass due selection and process exactly this account.
    pub account: Option<String>,
}

impl InvocationRequest {
    /// A request with default interval and account cap.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            interval_hours: DEFAULT_INTERVAL_HOURS,
            max_accounts: DEFAULT_MAX_ACCOUNTS,
            account: None,
        }
    }

    pub fn with_interval_hours(mut self, hours: u32) -> Self {
        self.interval_hours = hours;
        self
    }

    pub fn with_max_accounts(mut self, max: usize) -> Self {
        self.max_accounts = max;
        self
    }

    pub fn for_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }
}

/// Result of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationReport {
    /// Accounts that published successfully.
    pub processed: usize,
    /// Accounts skipped by the debounce window.
    pub skipped: usize,
    pub published: Vec<PublishOutcome>,
    pub failures: Vec<AccountFailure>,
    /// True if the budget guard stopped before all selected accounts were handled.
    pub stopped_early: bool,
}
