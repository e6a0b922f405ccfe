//! Generic RDF parser: any supported serialization goes through the triple
//! store, datasets are split into self-contained Turtle fragments, and
//! extraction applies the shared predicate table plus the discard filter.

use dch_core::{DcatDataset, Distribution, Publisher, PublisherDetails};
use serde::Deserialize;

use crate::graph::{Graph, ResourceRef, Term};
use crate::{ns, rdfxml, turtle, DatasetFormat, DiscardFilter, Extracted, ParseError, SplitRecord};

/// Serialization hint supplied by the source configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RdfSyntax {
    #[default]
    Xml,
    Turtle,
    N3,
    Nt,
    Trix,
    Rdfa,
}

impl RdfSyntax {
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.to_ascii_lowercase().as_str() {
            "xml" | "rdf" | "rdfxml" => Some(RdfSyntax::Xml),
            "turtle" | "ttl" => Some(RdfSyntax::Turtle),
            "n3" => Some(RdfSyntax::N3),
            "nt" | "ntriples" => Some(RdfSyntax::Nt),
            "trix" => Some(RdfSyntax::Trix),
            "rdfa" => Some(RdfSyntax::Rdfa),
            _ => None,
        }
    }
}

/// The dataset class is recognized across three equivalent vocabularies.
const DATASET_CLASSES: [&str; 3] = [ns::dcat::DATASET, ns::void::DATASET, ns::pmd::DATASET];

#[derive(Debug, Clone, Default)]
pub struct RdfFormat {
    pub syntax: RdfSyntax,
    pub filter: DiscardFilter,
}

impl RdfFormat {
    pub fn new(syntax: RdfSyntax) -> Self {
        Self {
            syntax,
            filter: DiscardFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: DiscardFilter) -> Self {
        self.filter = filter;
        self
    }

    fn parse_graph(&self, text: &str) -> Result<Graph, ParseError> {
        match self.syntax {
            RdfSyntax::Xml => rdfxml::parse_rdf_xml(text),
            RdfSyntax::Turtle | RdfSyntax::N3 | RdfSyntax::Nt => turtle::parse_turtle(text),
            RdfSyntax::Trix => rdfxml::parse_trix(text),
            RdfSyntax::Rdfa => Err(ParseError::UnsupportedSyntax("rdfa".to_string())),
        }
    }
}

impl DatasetFormat for RdfFormat {
    fn split(&self, raw: &[u8]) -> Result<Vec<SplitRecord>, ParseError> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| ParseError::Structure(format!("document is not UTF-8: {e}")))?;
        let graph = self.parse_graph(text)?;

        let mut out = Vec::new();
        for subject in dataset_subjects(&graph) {
            let Some(iri) = subject.as_iri() else {
                return Err(ParseError::Structure(
                    "dataset resource has no URI, only a blank node".to_string(),
                ));
            };
            let subgraph = graph.dataset_subgraph(&subject, ns::dcat::DISTRIBUTION);
            out.push(SplitRecord {
                guid: iri.to_string(),
                fragment: subgraph.to_turtle(),
            });
        }
        Ok(out)
    }

    fn extract(&self, fragment: &str) -> Result<Extracted, ParseError> {
        // fragments produced by split are always Turtle; fall back to the
        // configured syntax so whole single-dataset documents also extract
        let graph = match turtle::parse_turtle(fragment) {
            Ok(graph) if !graph.is_empty() => graph,
            first_attempt => match self.syntax {
                RdfSyntax::Turtle | RdfSyntax::N3 | RdfSyntax::Nt => first_attempt?,
                _ => self.parse_graph(fragment)?,
            },
        };

        let subjects = dataset_subjects(&graph);
        let subject = match subjects.len() {
            0 => return Err(ParseError::Structure("no dataset found".to_string())),
            1 => &subjects[0],
            n => {
                return Err(ParseError::Structure(format!(
                    "multiple datasets found ({n}) - expected one"
                )))
            }
        };
        let resource = graph.resource(subject);

        if let Some(blocked) = self.filter.blocked_value(&resource) {
            return Ok(Extracted::Ignored(format!(
                "dataset is filed under blocked branch {blocked}"
            )));
        }

        Ok(Extracted::Record(Box::new(read_dataset(&graph, &resource))))
    }
}

fn dataset_subjects(graph: &Graph) -> Vec<Term> {
    let mut out: Vec<Term> = Vec::new();
    for class in DATASET_CLASSES {
        for subject in graph.subjects_of_type(class) {
            if !out.contains(&subject) {
                out.push(subject);
            }
        }
    }
    out
}

fn read_dataset(graph: &Graph, resource: &ResourceRef) -> DcatDataset {
    let mut dataset = DcatDataset::default();

    dataset.title = text_of(resource.first(ns::rdfs::LABEL))
        .or_else(|| text_of(resource.first(ns::dct::TITLE)));

    let mut description: Vec<String> = Vec::new();
    description.extend(resource.all(ns::rdfs::COMMENT).into_iter().filter_map(|t| text_of(Some(t))));
    description.extend(resource.all(ns::dct::DESCRIPTION).into_iter().filter_map(|t| text_of(Some(t))));
    dataset.description = if description.is_empty() {
        None
    } else {
        Some(description.join("\n\n"))
    };

    dataset.uri = resource.subject().as_iri().map(str::to_string);
    dataset.contact_email =
        uri_or_text(resource.first(ns::pmd::CONTACT_EMAIL)).map(strip_mailto);
    dataset.issued = text_of(resource.first(ns::dct::ISSUED));
    dataset.modified = text_of(resource.first(ns::dct::MODIFIED));
    dataset.license = uri_of(resource.first(ns::dct::LICENSE));
    dataset.publisher = resource
        .first(ns::dct::PUBLISHER)
        .map(|term| read_publisher(graph, term));

    let mut subjects: Vec<String> = Vec::new();
    for term in resource
        .all(ns::dct::SUBJECT)
        .into_iter()
        .chain(resource.all(ns::dcat::THEME))
    {
        if let Some(iri) = term.as_iri() {
            if !subjects.iter().any(|s| s == iri) {
                subjects.push(iri.to_string());
            }
        }
    }
    dataset.subject = subjects;

    dataset.language = literals_of(resource.all(ns::dc::LANGUAGE));
    dataset.keyword = literals_of(resource.all(ns::dcat::KEYWORD));
    dataset.identifier = text_of(resource.first(ns::dct::IDENTIFIER));
    dataset.references = resource
        .all(ns::dct::REFERENCES)
        .into_iter()
        .filter_map(|t| t.as_iri().map(str::to_string))
        .collect();
    dataset.spatial = uri_or_text(resource.first(ns::dct::SPATIAL));

    dataset.data_dump = uri_of(resource.first(ns::void::DATA_DUMP));
    dataset.sparql_endpoint = uri_of(resource.first(ns::void::SPARQL_ENDPOINT));
    dataset.zipped_shapefile = uri_of(resource.first(ns::geo::ZIPPED_SHAPEFILE));

    dataset.distribution = resource
        .all(ns::dcat::DISTRIBUTION)
        .into_iter()
        .map(|term| read_distribution(&graph.resource(term)))
        .collect();

    dataset
}

fn read_publisher(graph: &Graph, term: &Term) -> Publisher {
    match term {
        Term::Literal { value, .. } => Publisher::Name(value.clone()),
        _ => {
            let publisher = graph.resource(term);
            Publisher::Details(PublisherDetails {
                name: text_of(publisher.first(ns::foaf::NAME)),
                // blank publisher nodes have no publishable reference
                uri: term.as_iri().map(str::to_string),
                mbox: uri_or_text(publisher.first(ns::foaf::MBOX)).map(strip_mailto),
            })
        }
    }
}

fn read_distribution(resource: &ResourceRef) -> Distribution {
    Distribution {
        title: text_of(resource.first(ns::dct::TITLE)),
        description: text_of(resource.first(ns::dct::DESCRIPTION)),
        format: uri_or_text(resource.first(ns::dcat::MEDIA_TYPE)),
        access_url: uri_or_text(resource.first(ns::dcat::ACCESS_URL)),
        download_url: uri_or_text(resource.first(ns::dcat::DOWNLOAD_URL)),
        byte_size: text_of(resource.first(ns::dcat::BYTE_SIZE)),
        identifier: text_of(resource.first(ns::dct::IDENTIFIER)),
        conforms_to: uri_of(resource.first(ns::dct::CONFORMS_TO)),
        temporal: uri_or_text(resource.first(ns::dct::TEMPORAL)),
        spatial: uri_or_text(resource.first(ns::dct::SPATIAL)),
    }
}

/// Literal value; IRIs pass through as their string form, blank nodes are
/// dropped.
fn text_of(term: Option<&Term>) -> Option<String> {
    match term? {
        Term::Literal { value, .. } => Some(value.clone()),
        Term::Iri(iri) => Some(iri.clone()),
        Term::Blank(_) => None,
    }
}

/// Strict URI value: literals and blank nodes are dropped.
fn uri_of(term: Option<&Term>) -> Option<String> {
    term?.as_iri().map(str::to_string)
}

fn uri_or_text(term: Option<&Term>) -> Option<String> {
    match term? {
        Term::Iri(iri) => Some(iri.clone()),
        Term::Literal { value, .. } => Some(value.clone()),
        Term::Blank(_) => None,
    }
}

fn literals_of(terms: Vec<&Term>) -> Vec<String> {
    terms
        .into_iter()
        .filter_map(|t| match t {
            Term::Literal { value, .. } => Some(value.clone()),
            _ => None,
        })
        .collect()
}

fn strip_mailto(value: String) -> String {
    value
        .strip_prefix("mailto:")
        .map(str::to_string)
        .unwrap_or(value)
}
