//! XML-RDF parser: locates `dcat:Dataset` elements in a document and walks
//! fixed predicate paths on the element tree directly, without building a
//! graph.

use dch_core::{DcatDataset, Distribution, Publisher, PublisherDetails};
use roxmltree::{Document, Node};

use crate::{content_hash, ns, DatasetFormat, Extracted, ParseError, SplitRecord};

#[derive(Debug, Clone, Copy, Default)]
pub struct XmlFormat;

impl DatasetFormat for XmlFormat {
    fn split(&self, raw: &[u8]) -> Result<Vec<SplitRecord>, ParseError> {
        let text =
            std::str::from_utf8(raw).map_err(|e| ParseError::Xml(format!("not UTF-8: {e}")))?;
        let doc = Document::parse(text).map_err(|e| ParseError::Xml(e.to_string()))?;

        let mut out = Vec::new();
        for node in doc
            .descendants()
            .filter(|n| is_element(*n, ns::dcat::NS, "Dataset"))
        {
            let fragment = serialize_subtree(node);
            let guid = node
                .attribute((ns::rdf::NS, "about"))
                .map(str::to_string)
                .or_else(|| child_text(node, ns::dct::NS, "identifier"))
                .unwrap_or_else(|| content_hash(fragment.as_bytes()));
            out.push(SplitRecord { guid, fragment });
        }
        Ok(out)
    }

    fn extract(&self, fragment: &str) -> Result<Extracted, ParseError> {
        let doc = Document::parse(fragment).map_err(|e| ParseError::Xml(e.to_string()))?;
        let dataset_el = if is_element(doc.root_element(), ns::dcat::NS, "Dataset") {
            doc.root_element()
        } else {
            doc.descendants()
                .find(|n| is_element(*n, ns::dcat::NS, "Dataset"))
                .ok_or_else(|| ParseError::Structure("no dataset element found".to_string()))?
        };
        Ok(Extracted::Record(Box::new(read_dataset(dataset_el))))
    }
}

fn read_dataset(el: Node) -> DcatDataset {
    let mut dataset = DcatDataset::default();

    dataset.title = child_text(el, ns::rdfs::NS, "label")
        .or_else(|| child_text(el, ns::dct::NS, "title"));

    let mut description = child_texts(el, ns::rdfs::NS, "comment");
    description.extend(child_texts(el, ns::dct::NS, "description"));
    dataset.description = if description.is_empty() {
        None
    } else {
        Some(description.join("\n\n"))
    };

    dataset.uri = el.attribute((ns::rdf::NS, "about")).map(str::to_string);
    dataset.contact_email = child_resource(el, ns::pmd::NS, "contactEmail")
        .or_else(|| child_text(el, ns::pmd::NS, "contactEmail"))
        .map(strip_mailto);
    dataset.issued = child_text(el, ns::dct::NS, "issued");
    dataset.modified = child_text(el, ns::dct::NS, "modified");
    dataset.license = child_resource(el, ns::dct::NS, "license");
    dataset.publisher = child(el, ns::dct::NS, "publisher").and_then(read_publisher);

    let mut subjects = child_resources(el, ns::dct::NS, "subject");
    subjects.extend(child_resources(el, ns::dcat::NS, "theme"));
    dataset.subject = dedup(subjects);

    dataset.language = child_texts(el, ns::dc::NS, "language");
    dataset.keyword = child_texts(el, ns::dcat::NS, "keyword");
    dataset.identifier = child_text(el, ns::dct::NS, "identifier");
    dataset.references = child_resources(el, ns::dct::NS, "references");
    dataset.spatial = child_resource(el, ns::dct::NS, "spatial")
        .or_else(|| child_text(el, ns::dct::NS, "spatial"));

    dataset.distribution = children(el, ns::dcat::NS, "distribution")
        .into_iter()
        .map(read_distribution)
        .collect();

    dataset
}

fn read_publisher(el: Node) -> Option<Publisher> {
    if let Some(uri) = el.attribute((ns::rdf::NS, "resource")) {
        return Some(Publisher::Details(PublisherDetails {
            uri: Some(uri.to_string()),
            ..PublisherDetails::default()
        }));
    }
    if let Some(agent) = el.children().find(|n| n.is_element()) {
        return Some(Publisher::Details(PublisherDetails {
            name: child_text(agent, ns::foaf::NS, "name"),
            uri: agent.attribute((ns::rdf::NS, "about")).map(str::to_string),
            mbox: child_resource(agent, ns::foaf::NS, "mbox")
                .or_else(|| child_text(agent, ns::foaf::NS, "mbox"))
                .map(strip_mailto),
        }));
    }
    element_text(el).map(Publisher::Name)
}

fn read_distribution(el: Node) -> Distribution {
    // the distribution element either nests a dcat:Distribution node or
    // carries the properties itself (parseType="Resource" style)
    let target = el
        .children()
        .find(|n| n.is_element())
        .filter(|n| is_element(*n, ns::dcat::NS, "Distribution"))
        .unwrap_or(el);
    Distribution {
        title: child_text(target, ns::dct::NS, "title"),
        description: child_text(target, ns::dct::NS, "description"),
        format: child_resource(target, ns::dcat::NS, "mediaType")
            .or_else(|| child_text(target, ns::dcat::NS, "mediaType")),
        access_url: child_resource(target, ns::dcat::NS, "accessURL")
            .or_else(|| child_text(target, ns::dcat::NS, "accessURL")),
        download_url: child_resource(target, ns::dcat::NS, "downloadURL")
            .or_else(|| child_text(target, ns::dcat::NS, "downloadURL")),
        byte_size: child_text(target, ns::dcat::NS, "byteSize"),
        identifier: child_text(target, ns::dct::NS, "identifier"),
        conforms_to: child_resource(target, ns::dct::NS, "conformsTo"),
        temporal: child_text(target, ns::dct::NS, "temporal"),
        spatial: child_resource(target, ns::dct::NS, "spatial")
            .or_else(|| child_text(target, ns::dct::NS, "spatial")),
    }
}

fn is_element(node: Node, namespace: &str, local: &str) -> bool {
    node.is_element()
        && node.tag_name().namespace() == Some(namespace)
        && node.tag_name().name() == local
}

fn child<'a>(node: Node<'a, 'a>, namespace: &str, local: &str) -> Option<Node<'a, 'a>> {
    node.children().find(|n| is_element(*n, namespace, local))
}

fn children<'a>(node: Node<'a, 'a>, namespace: &str, local: &str) -> Vec<Node<'a, 'a>> {
    node.children()
        .filter(|n| is_element(*n, namespace, local))
        .collect()
}

fn element_text(node: Node) -> Option<String> {
    let text = node.text().unwrap_or_default().trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn child_text(node: Node, namespace: &str, local: &str) -> Option<String> {
    child(node, namespace, local).and_then(element_text)
}

fn child_texts(node: Node, namespace: &str, local: &str) -> Vec<String> {
    children(node, namespace, local)
        .into_iter()
        .filter_map(element_text)
        .collect()
}

fn child_resource(node: Node, namespace: &str, local: &str) -> Option<String> {
    child(node, namespace, local)
        .and_then(|n| n.attribute((ns::rdf::NS, "resource")))
        .map(str::to_string)
}

fn child_resources(node: Node, namespace: &str, local: &str) -> Vec<String> {
    children(node, namespace, local)
        .into_iter()
        .filter_map(|n| n.attribute((ns::rdf::NS, "resource")).map(str::to_string))
        .collect()
}

fn strip_mailto(value: String) -> String {
    value
        .strip_prefix("mailto:")
        .map(str::to_string)
        .unwrap_or(value)
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Re-serialize one element subtree as a standalone document. Namespace
/// declarations are re-emitted on the fragment root (with generated
/// prefixes) so the fragment parses on its own later, whatever the original
/// document declared on its ancestors.
fn serialize_subtree(root: Node) -> String {
    let mut uris: Vec<&str> = Vec::new();
    for node in root.descendants().filter(|n| n.is_element()) {
        if let Some(uri) = node.tag_name().namespace() {
            if uri != XML_NS && !uris.contains(&uri) {
                uris.push(uri);
            }
        }
        for attr in node.attributes() {
            if let Some(uri) = attr.namespace() {
                if uri != XML_NS && !uris.contains(&uri) {
                    uris.push(uri);
                }
            }
        }
    }
    let writer = SubtreeWriter { uris };
    let mut out = String::new();
    writer.write(root, &mut out, true);
    out
}

struct SubtreeWriter<'a> {
    uris: Vec<&'a str>,
}

impl SubtreeWriter<'_> {
    fn prefix(&self, uri: &str) -> String {
        let index = self
            .uris
            .iter()
            .position(|candidate| *candidate == uri)
            .unwrap_or_default();
        format!("n{index}")
    }

    fn qname(&self, namespace: Option<&str>, local: &str) -> String {
        match namespace {
            // the xml prefix is reserved and always in scope
            Some(XML_NS) => format!("xml:{local}"),
            Some(uri) => format!("{}:{}", self.prefix(uri), local),
            None => local.to_string(),
        }
    }

    fn write(&self, node: Node, out: &mut String, is_root: bool) {
        let name = self.qname(node.tag_name().namespace(), node.tag_name().name());
        out.push('<');
        out.push_str(&name);
        if is_root {
            for uri in &self.uris {
                out.push_str(&format!(" xmlns:{}=\"{}\"", self.prefix(uri), escape(uri)));
            }
        }
        for attr in node.attributes() {
            out.push(' ');
            out.push_str(&self.qname(attr.namespace(), attr.name()));
            out.push_str("=\"");
            out.push_str(&escape(attr.value()));
            out.push('"');
        }

        let mut has_content = false;
        for child in node.children() {
            if child.is_element() || child.is_text() {
                if !has_content {
                    out.push('>');
                    has_content = true;
                }
                if child.is_element() {
                    self.write(child, out, false);
                } else if let Some(text) = child.text() {
                    out.push_str(&escape(text));
                }
            }
        }
        if has_content {
            out.push_str("</");
            out.push_str(&name);
            out.push('>');
        } else {
            out.push_str("/>");
        }
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
         xmlns:rdfs="http://www.w3.org/2000/01/rdf-schema#"
         xmlns:dcat="http://www.w3.org/ns/dcat#"
         xmlns:dct="http://purl.org/dc/terms/"
         xmlns:dc="http://purl.org/dc/elements/1.1/"
         xmlns:foaf="http://xmlns.com/foaf/0.1/">
  <dcat:Dataset rdf:about="https://data.example.org/datasets/greenbelt">
    <rdfs:label>Greenbelt boundaries</rdfs:label>
    <rdfs:comment>Local authority greenbelt boundaries.</rdfs:comment>
    <dct:description>Updated annually.</dct:description>
    <dct:identifier>greenbelt-2014</dct:identifier>
    <dct:issued>2014-02-01</dct:issued>
    <dct:modified>2014-07-31</dct:modified>
    <dct:license rdf:resource="http://reference.data.gov.uk/id/open-government-licence"/>
    <dct:publisher>
      <foaf:Agent rdf:about="https://data.example.org/org/dclg">
        <foaf:name>Department for Communities</foaf:name>
        <foaf:mbox rdf:resource="mailto:contact@example.org"/>
      </foaf:Agent>
    </dct:publisher>
    <dct:subject rdf:resource="http://example.org/def/concept/planning"/>
    <dcat:theme rdf:resource="http://example.org/def/concept/planning"/>
    <dcat:theme rdf:resource="http://example.org/def/concept/environment"/>
    <dc:language>en</dc:language>
    <dcat:keyword>planning</dcat:keyword>
    <dcat:keyword>greenbelt</dcat:keyword>
    <dcat:distribution>
      <dcat:Distribution>
        <dct:title>CSV download</dct:title>
        <dcat:accessURL rdf:resource="https://data.example.org/greenbelt.csv"/>
        <dcat:mediaType>text/csv</dcat:mediaType>
        <dcat:byteSize>501</dcat:byteSize>
      </dcat:Distribution>
    </dcat:distribution>
  </dcat:Dataset>
  <dcat:Dataset rdf:about="https://data.example.org/datasets/brownfield">
    <dct:title>Brownfield sites</dct:title>
  </dcat:Dataset>
</rdf:RDF>"#;

    #[test]
    fn split_keys_datasets_by_about_uri() {
        let records = XmlFormat.split(CATALOG.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].guid, "https://data.example.org/datasets/greenbelt");
        assert_eq!(records[1].guid, "https://data.example.org/datasets/brownfield");
    }

    #[test]
    fn fragments_parse_standalone() {
        let records = XmlFormat.split(CATALOG.as_bytes()).unwrap();
        for record in &records {
            let Extracted::Record(dataset) = XmlFormat.extract(&record.fragment).unwrap()
            else {
                panic!("expected a record");
            };
            assert_eq!(dataset.uri.as_deref(), Some(record.guid.as_str()));
        }
    }

    #[test]
    fn extract_walks_the_predicate_table() {
        let records = XmlFormat.split(CATALOG.as_bytes()).unwrap();
        let Extracted::Record(dataset) = XmlFormat.extract(&records[0].fragment).unwrap()
        else {
            panic!("expected a record");
        };

        assert_eq!(dataset.title.as_deref(), Some("Greenbelt boundaries"));
        assert_eq!(
            dataset.description.as_deref(),
            Some("Local authority greenbelt boundaries.\n\nUpdated annually.")
        );
        assert_eq!(dataset.identifier.as_deref(), Some("greenbelt-2014"));
        assert_eq!(dataset.issued.as_deref(), Some("2014-02-01"));
        assert_eq!(
            dataset.license.as_deref(),
            Some("http://reference.data.gov.uk/id/open-government-licence")
        );
        match dataset.publisher.as_ref().unwrap() {
            Publisher::Details(details) => {
                assert_eq!(details.name.as_deref(), Some("Department for Communities"));
                assert_eq!(details.mbox.as_deref(), Some("contact@example.org"));
            }
            other => panic!("unexpected publisher: {other:?}"),
        }
        // subject and theme collapse into one deduplicated list
        assert_eq!(
            dataset.subject,
            vec![
                "http://example.org/def/concept/planning".to_string(),
                "http://example.org/def/concept/environment".to_string(),
            ]
        );
        assert_eq!(dataset.keyword, vec!["planning", "greenbelt"]);
        assert_eq!(dataset.language, vec!["en"]);

        assert_eq!(dataset.distribution.len(), 1);
        let dist = &dataset.distribution[0];
        assert_eq!(dist.title.as_deref(), Some("CSV download"));
        assert_eq!(
            dist.access_url.as_deref(),
            Some("https://data.example.org/greenbelt.csv")
        );
        assert_eq!(dist.format.as_deref(), Some("text/csv"));
        assert_eq!(dist.byte_size.as_deref(), Some("501"));
    }

    #[test]
    fn dataset_without_about_falls_back_to_identifier_then_hash() {
        let doc = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
                              xmlns:dcat="http://www.w3.org/ns/dcat#"
                              xmlns:dct="http://purl.org/dc/terms/">
            <dcat:Dataset><dct:identifier>abc-1</dct:identifier></dcat:Dataset>
            <dcat:Dataset><dct:title>No key at all</dct:title></dcat:Dataset>
        </rdf:RDF>"#;
        let records = XmlFormat.split(doc.as_bytes()).unwrap();
        assert_eq!(records[0].guid, "abc-1");
        assert_eq!(records[1].guid.len(), 64);
    }
}
