//! Shared record model: canonical DCAT dataset shape, target catalog shape
//! and the harvest work item threading the two together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Canonical normalized representation of one dataset, independent of the
/// serialization it was harvested from. Every field is independently
/// optional; parsers populate what the source offers and leave the rest
/// `None`/empty so the converter can treat absence uniformly.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DcatDataset {
    pub title: Option<String>,
    pub description: Option<String>,
    pub uri: Option<String>,
    pub landing_page: Option<String>,
    pub contact_email: Option<String>,
    pub issued: Option<String>,
    pub modified: Option<String>,
    /// License reference: a URI for most DCAT sources, but some feeds carry
    /// a textual title instead. Resolution happens at conversion time.
    pub license: Option<String>,
    pub publisher: Option<Publisher>,
    /// Subject/theme URIs, deduplicated, first-seen order.
    pub subject: Vec<String>,
    pub keyword: Vec<String>,
    pub language: Vec<String>,
    pub identifier: Option<String>,
    pub references: Vec<String>,
    pub spatial: Option<String>,
    pub distribution: Vec<Distribution>,
    pub data_dump: Option<String>,
    pub sparql_endpoint: Option<String>,
    pub zipped_shapefile: Option<String>,
}

impl DcatDataset {
    /// A record without an identifier or a URI has no stable reconciliation
    /// key and cannot be tracked across harvest runs.
    pub fn has_stable_key(&self) -> bool {
        self.identifier.is_some() || self.uri.is_some()
    }
}

/// `dct:publisher` as found in the wild: either a bare name or a structured
/// agent with independently optional sub-fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Publisher {
    Name(String),
    Details(PublisherDetails),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherDetails {
    pub name: Option<String>,
    pub uri: Option<String>,
    pub mbox: Option<String>,
}

impl Publisher {
    pub fn name(&self) -> Option<&str> {
        match self {
            Publisher::Name(name) => Some(name),
            Publisher::Details(details) => details.name.as_deref(),
        }
    }
}

/// One concrete access form of a dataset: a file, an API endpoint, etc.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Distribution {
    pub title: Option<String>,
    pub description: Option<String>,
    pub format: Option<String>,
    /// An access URL may be an information page; a download URL is a direct
    /// file. They are kept distinct.
    #[serde(rename = "accessURL")]
    pub access_url: Option<String>,
    #[serde(rename = "downloadURL")]
    pub download_url: Option<String>,
    /// Kept as the raw lexical value; parsed into an integer defensively at
    /// conversion time so junk sizes are dropped rather than fatal.
    #[serde(deserialize_with = "string_or_number")]
    pub byte_size: Option<String>,
    pub identifier: Option<String>,
    pub conforms_to: Option<String>,
    pub temporal: Option<String>,
    pub spatial: Option<String>,
}

/// Some JSON feeds publish `byteSize` as a number, others as a string.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// Target catalog record: the external schema the converter writes into and
/// reads back from. Everything the target has no first-class field for rides
/// in `extras`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogRecord {
    pub id: Option<String>,
    pub name: Option<String>,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub url: Option<String>,
    pub tags: Vec<Tag>,
    pub extras: Vec<Extra>,
    pub license_id: Option<String>,
    pub resources: Vec<Resource>,
    pub maintainer: Option<String>,
    pub maintainer_email: Option<String>,
}

impl CatalogRecord {
    /// Value of the first extra with the given key, if any.
    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extras
            .iter()
            .find(|extra| extra.key == key)
            .and_then(|extra| extra.value.as_deref())
    }

    pub fn push_extra(&mut self, key: impl Into<String>, value: Option<String>) {
        self.extras.push(Extra {
            key: key.into(),
            value,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extra {
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Resource {
    pub name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub format: Option<String>,
    pub size: Option<u64>,
    pub resource_type: Option<String>,
}

/// Classification assigned to a work item during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStatus {
    New,
    Changed,
    Delete,
}

/// Persisted intent for one (source, identifier) pair in one harvest run:
/// the raw fragment for the current attempt, its classification, and the
/// back-reference to the catalog record once committed. At most one object
/// per identifier carries `current = true` within a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestObject {
    pub id: Uuid,
    pub source_id: String,
    pub guid: String,
    pub content: Option<String>,
    pub status: ObjectStatus,
    pub record_id: Option<String>,
    pub current: bool,
    pub created_at: DateTime<Utc>,
}

impl HarvestObject {
    pub fn new(source_id: &str, guid: &str, status: ObjectStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: source_id.to_string(),
            guid: guid.to_string(),
            content: None,
            status,
            record_id: None,
            current: false,
            created_at: Utc::now(),
        }
    }
}
