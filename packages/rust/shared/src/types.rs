//! Core domain types for published feed documents.

use std::str::FromStr;

use cid::Cid;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{FeedGraphError, FetchError};
use crate::source::{FeedMeta, ParsedEntry};

/// Current schema version for the published feed document shape.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one ingestion run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ContentId
// ---------------------------------------------------------------------------

/// Address of a blob or node in the content-addressed store.
///
/// Serialized as an IPLD link (`{"/": "<cid>"}`) so that a JSON document
/// stored as a DAG node references its blobs as real graph edges.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContentId(Cid);

/// Wire form of a [`ContentId`].
#[derive(Serialize, Deserialize, JsonSchema)]
struct IpldLink {
    #[serde(rename = "/")]
    target: String,
}

impl ContentId {
    pub fn new(cid: Cid) -> Self {
        Self(cid)
    }

    /// Get the underlying CID.
    pub fn as_cid(&self) -> &Cid {
        &self.0
    }

    /// Multicodec of the addressed data (raw, dag-pb, dag-cbor, ...).
    pub fn codec(&self) -> u64 {
        self.0.codec()
    }
}

impl FromStr for ContentId {
    type Err = FeedGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cid::from_str(s.trim())
            .map(Self)
            .map_err(|e| FeedGraphError::validation(format!("invalid content id '{s}': {e}")))
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ContentId").field(&self.0.to_string()).finish()
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        IpldLink {
            target: self.0.to_string(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Link(IpldLink),
            Plain(String),
        }

        let raw = match Repr::deserialize(deserializer)? {
            Repr::Link(link) => link.target,
            Repr::Plain(s) => s,
        };
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl JsonSchema for ContentId {
    fn schema_name() -> String {
        "ContentId".into()
    }

    fn json_schema(generator: &mut schemars::r#gen::SchemaGenerator) -> schemars::schema::Schema {
        IpldLink::json_schema(generator)
    }
}

// ---------------------------------------------------------------------------
// FeedIdentity
// ---------------------------------------------------------------------------

/// Stable identity of a feed, derived from its canonical URL.
///
/// Holds the URL-safe, unpadded base64 form of a SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct FeedIdentity(String);

impl FeedIdentity {
    /// Wrap an already-encoded identity.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FeedIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Enclosure
// ---------------------------------------------------------------------------

/// A binary attachment: media file, image, or the raw feed payload.
///
/// Light enclosures carry metadata only; heavy ones also carry the
/// [`ContentId`] of the stored bytes. The only transition is light to heavy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Enclosure {
    url: String,
    file_type: String,
    #[serde(rename = "file", default, skip_serializing_if = "Option::is_none")]
    content_id: Option<ContentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
}

impl Enclosure {
    /// Metadata-only enclosure.
    pub fn light(url: impl Into<String>, file_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_type: file_type.into(),
            content_id: None,
            title: None,
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    /// Attach the content id of the stored bytes.
    pub fn into_heavy(mut self, content_id: ContentId) -> Self {
        self.content_id = Some(content_id);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn file_type(&self) -> &str {
        &self.file_type
    }

    pub fn content_id(&self) -> Option<&ContentId> {
        self.content_id.as_ref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// True once the bytes have been fetched and stored.
    pub fn is_resolved(&self) -> bool {
        self.content_id.is_some()
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Which attachment slot a downgraded enclosure occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentRole {
    /// `position` within the item's enclosure list.
    Enclosure { position: usize },
    ItemImage,
    FeedImage,
    OriginalFeed,
}

impl std::fmt::Display for AttachmentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enclosure { position } => write!(f, "enclosure #{position}"),
            Self::ItemImage => f.write_str("item image"),
            Self::FeedImage => f.write_str("feed image"),
            Self::OriginalFeed => f.write_str("original feed"),
        }
    }
}

/// A non-fatal resolution failure: the affected enclosure was kept light
/// (or, for images, dropped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub role: AttachmentRole,
    /// Source index of the owning item, `None` for feed-level attachments.
    pub item_index: Option<usize>,
    pub error: FetchError,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.item_index {
            Some(index) => write!(f, "item {index}, {}: {}", self.role, self.error),
            None => write!(f, "{}: {}", self.role, self.error),
        }
    }
}

// ---------------------------------------------------------------------------
// Item / FeedDocument
// ---------------------------------------------------------------------------

/// One assembled feed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Item {
    /// The entry as parsed from the source feed.
    #[serde(rename = "item")]
    pub entry: ParsedEntry,
    /// Resolved attachments, in source order.
    #[serde(default)]
    pub enclosures: Vec<Enclosure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Enclosure>,
    /// Resolution failures recorded while assembling this item. Not published.
    #[serde(skip)]
    pub diagnostics: Vec<Diagnostic>,
}

/// Root of a published feed snapshot: feed → items → enclosures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeedDocument {
    pub schema_version: u32,
    pub feed_id: FeedIdentity,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Enclosure>,
    /// The raw feed payload, stored as a blob.
    pub original: Enclosure,
    /// Feed metadata exactly as parsed.
    pub source: FeedMeta,
    pub items: Vec<Item>,
    /// Feed-level resolution failures. Not published.
    #[serde(skip)]
    pub diagnostics: Vec<Diagnostic>,
}

impl FeedDocument {
    /// All diagnostics: feed-level first, then per item in source order.
    pub fn all_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .iter()
            .chain(self.items.iter().flat_map(|item| item.diagnostics.iter()))
            .cloned()
            .collect()
    }
}
