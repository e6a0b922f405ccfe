//! Format parsers: each implementation turns a raw harvested document into a
//! stream of `(identifier, fragment)` pairs, and turns one fragment back
//! into a canonical record.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod graph;
pub mod ns;

mod json;
mod rdf;
mod rdfxml;
mod turtle;
mod xml;

pub use json::JsonFormat;
pub use rdf::{RdfFormat, RdfSyntax};
pub use xml::XmlFormat;

use dch_core::DcatDataset;
use graph::ResourceRef;

/// Structural/syntax failure for one document. Recoverable at the
/// reconciliation level (the run aborts and the error is reported), fatal
/// for the attempt itself.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(String),
    #[error("invalid XML: {0}")]
    Xml(String),
    #[error("unexpected document structure: {0}")]
    Structure(String),
    #[error("RDF syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("unsupported RDF serialization '{0}'")]
    UnsupportedSyntax(String),
}

/// One dataset as carved out of a source document: the reconciliation key
/// plus a self-contained fragment that can be extracted later on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRecord {
    pub guid: String,
    pub fragment: String,
}

/// Outcome of extracting one fragment. A deliberately skipped record is a
/// value, not an error, so callers can treat it as "no change".
#[derive(Debug)]
pub enum Extracted {
    Record(Box<DcatDataset>),
    Ignored(String),
}

pub trait DatasetFormat: Send + Sync {
    /// Carve a raw document into per-dataset fragments.
    fn split(&self, raw: &[u8]) -> Result<Vec<SplitRecord>, ParseError>;

    /// Reduce one fragment to a canonical record, or signal a deliberate
    /// skip.
    fn extract(&self, fragment: &str) -> Result<Extracted, ParseError>;
}

/// Source serialization families, as named in source configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Json,
    Xml,
    Rdf,
}

impl SourceFormat {
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.to_ascii_lowercase().as_str() {
            "json" => Some(SourceFormat::Json),
            "xml" => Some(SourceFormat::Xml),
            "rdf" => Some(SourceFormat::Rdf),
            _ => None,
        }
    }
}

/// Select a parser implementation from source configuration.
pub fn format_for(
    format: SourceFormat,
    syntax: RdfSyntax,
    filter: DiscardFilter,
) -> Box<dyn DatasetFormat> {
    match format {
        SourceFormat::Json => Box::new(JsonFormat::default()),
        SourceFormat::Xml => Box::new(XmlFormat),
        SourceFormat::Rdf => Box::new(RdfFormat::new(syntax).with_filter(filter)),
    }
}

/// Filter for editorial/taxonomic branches that should never be imported.
/// When any of the configured predicates carries a value from the block
/// list, extraction reports the record as ignored instead of producing it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiscardFilter {
    /// Predicates to inspect; empty means the built-in subject, theme and
    /// folder predicates.
    pub predicates: Vec<String>,
    pub blocked: Vec<String>,
}

impl DiscardFilter {
    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }

    fn effective_predicates(&self) -> Vec<&str> {
        if self.predicates.is_empty() {
            vec![ns::dct::SUBJECT, ns::dcat::THEME, ns::folder::IN_FOLDER]
        } else {
            self.predicates.iter().map(String::as_str).collect()
        }
    }

    /// First blocked value found on the resource, if any.
    pub fn blocked_value(&self, resource: &ResourceRef) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        for predicate in self.effective_predicates() {
            for term in resource.all(predicate) {
                if let Some(iri) = term.as_iri() {
                    if self.blocked.iter().any(|blocked| blocked == iri) {
                        return Some(iri.to_string());
                    }
                }
            }
        }
        None
    }
}

/// Stable content-hash identifier for records offering no key of their own.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
