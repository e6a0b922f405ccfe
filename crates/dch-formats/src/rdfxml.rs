//! RDF/XML and TriX readers on top of roxmltree.
//!
//! The RDF/XML reader covers the striped syntax catalog feeds actually use:
//! typed node elements, `rdf:about`/`rdf:nodeID`/anonymous subjects,
//! `rdf:resource` object references, nested node elements,
//! `rdf:parseType="Resource"`, property attributes, language tags and
//! datatyped literals. Reification, containers and `rdf:li` are out.

use roxmltree::{Document, Node};

use crate::graph::{Graph, Term};
use crate::{ns, ParseError};

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";
const TRIX_NS: &str = "http://www.w3.org/2004/03/trix/trix-1/";

pub fn parse_rdf_xml(input: &str) -> Result<Graph, ParseError> {
    let doc = Document::parse(input).map_err(|e| ParseError::Xml(e.to_string()))?;
    let mut reader = XmlReader {
        graph: Graph::new(),
        blank_counter: 0,
    };
    let root = doc.root_element();
    if root.tag_name().namespace() == Some(ns::rdf::NS) && root.tag_name().name() == "RDF" {
        for child in root.children().filter(Node::is_element) {
            reader.node_element(child)?;
        }
    } else {
        reader.node_element(root)?;
    }
    Ok(reader.graph)
}

struct XmlReader {
    graph: Graph,
    blank_counter: usize,
}

impl XmlReader {
    fn fresh_blank(&mut self) -> Term {
        self.blank_counter += 1;
        Term::blank(format!("x{}", self.blank_counter))
    }

    fn subject_for(&mut self, node: Node) -> Term {
        if let Some(about) = node.attribute((ns::rdf::NS, "about")) {
            Term::iri(about)
        } else if let Some(id) = node.attribute((ns::rdf::NS, "nodeID")) {
            Term::blank(id)
        } else {
            self.fresh_blank()
        }
    }

    /// A node element describes one resource; returns its subject term.
    fn node_element(&mut self, node: Node) -> Result<Term, ParseError> {
        let subject = self.subject_for(node);
        let tag = node.tag_name();
        let is_description =
            tag.namespace() == Some(ns::rdf::NS) && tag.name() == "Description";
        if !is_description {
            let class = expanded_iri(node)?;
            self.graph
                .insert(subject.clone(), ns::rdf::TYPE, Term::iri(class));
        }

        // property attributes: any non-syntax attribute is a literal triple
        for attr in node.attributes() {
            let attr_ns = attr.namespace();
            if attr_ns == Some(ns::rdf::NS) || attr_ns == Some(XML_NS) || attr_ns.is_none() {
                continue;
            }
            let predicate = format!("{}{}", attr_ns.unwrap_or_default(), attr.name());
            self.graph.insert(
                subject.clone(),
                predicate,
                Term::literal(attr.value()),
            );
        }

        for child in node.children().filter(Node::is_element) {
            self.property_element(&subject, child)?;
        }
        Ok(subject)
    }

    fn property_element(&mut self, subject: &Term, node: Node) -> Result<(), ParseError> {
        let predicate = expanded_iri(node)?;

        if let Some(resource) = node.attribute((ns::rdf::NS, "resource")) {
            self.graph
                .insert(subject.clone(), predicate, Term::iri(resource));
            return Ok(());
        }
        if let Some(id) = node.attribute((ns::rdf::NS, "nodeID")) {
            self.graph
                .insert(subject.clone(), predicate, Term::blank(id));
            return Ok(());
        }
        if node.attribute((ns::rdf::NS, "parseType")) == Some("Resource") {
            let object = self.fresh_blank();
            self.graph
                .insert(subject.clone(), predicate, object.clone());
            for child in node.children().filter(Node::is_element) {
                self.property_element(&object, child)?;
            }
            return Ok(());
        }

        let element_children: Vec<Node> = node.children().filter(Node::is_element).collect();
        if !element_children.is_empty() {
            for child in element_children {
                let object = self.node_element(child)?;
                self.graph
                    .insert(subject.clone(), predicate.clone(), object);
            }
            return Ok(());
        }

        let value = node.text().unwrap_or_default().to_string();
        let lang = inherited_lang(node);
        let datatype = node
            .attribute((ns::rdf::NS, "datatype"))
            .map(str::to_string);
        self.graph.insert(
            subject.clone(),
            predicate,
            Term::Literal {
                value,
                lang,
                datatype,
            },
        );
        Ok(())
    }
}

fn expanded_iri(node: Node) -> Result<String, ParseError> {
    let tag = node.tag_name();
    let namespace = tag.namespace().ok_or_else(|| {
        ParseError::Xml(format!(
            "element <{}> has no namespace and cannot name an RDF term",
            tag.name()
        ))
    })?;
    Ok(format!("{}{}", namespace, tag.name()))
}

fn inherited_lang(node: Node) -> Option<String> {
    node.ancestors()
        .find_map(|n| n.attribute((XML_NS, "lang")))
        .map(str::to_string)
}

/// TriX: one `<triple>` element per statement, each holding exactly three
/// term elements (`uri`, `id`, `plainLiteral`, `typedLiteral`).
pub fn parse_trix(input: &str) -> Result<Graph, ParseError> {
    let doc = Document::parse(input).map_err(|e| ParseError::Xml(e.to_string()))?;
    let mut graph = Graph::new();
    for triple in doc
        .descendants()
        .filter(|n| {
            n.is_element()
                && n.tag_name().name() == "triple"
                && n.tag_name().namespace() == Some(TRIX_NS)
        })
    {
        let terms: Vec<Node> = triple.children().filter(Node::is_element).collect();
        if terms.len() != 3 {
            return Err(ParseError::Xml(format!(
                "TriX triple holds {} terms, expected 3",
                terms.len()
            )));
        }
        let subject = trix_term(terms[0])?;
        let predicate = match trix_term(terms[1])? {
            Term::Iri(iri) => iri,
            other => {
                return Err(ParseError::Xml(format!(
                    "TriX predicate must be a uri, got {other:?}"
                )))
            }
        };
        let object = trix_term(terms[2])?;
        graph.insert(subject, predicate, object);
    }
    Ok(graph)
}

fn trix_term(node: Node) -> Result<Term, ParseError> {
    let text = node.text().unwrap_or_default().trim().to_string();
    match node.tag_name().name() {
        "uri" => Ok(Term::iri(text)),
        "id" => Ok(Term::blank(text)),
        "plainLiteral" => Ok(Term::Literal {
            value: node.text().unwrap_or_default().to_string(),
            lang: node.attribute((XML_NS, "lang")).map(str::to_string),
            datatype: None,
        }),
        "typedLiteral" => Ok(Term::Literal {
            value: node.text().unwrap_or_default().to_string(),
            lang: None,
            datatype: node.attribute("datatype").map(str::to_string),
        }),
        other => Err(ParseError::Xml(format!("unknown TriX term <{other}>"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
         xmlns:dcat="http://www.w3.org/ns/dcat#"
         xmlns:dct="http://purl.org/dc/terms/"
         xmlns:foaf="http://xmlns.com/foaf/0.1/">
  <dcat:Dataset rdf:about="http://example.org/ds">
    <dct:title xml:lang="en">Greenbelt boundaries</dct:title>
    <dct:publisher>
      <foaf:Agent rdf:about="http://example.org/org">
        <foaf:name>Example Org</foaf:name>
      </foaf:Agent>
    </dct:publisher>
    <dcat:distribution rdf:parseType="Resource">
      <dcat:accessURL rdf:resource="http://example.org/data.csv"/>
      <dcat:byteSize rdf:datatype="http://www.w3.org/2001/XMLSchema#integer">501</dcat:byteSize>
    </dcat:distribution>
  </dcat:Dataset>
</rdf:RDF>"#;

    #[test]
    fn reads_striped_rdf_xml() {
        let graph = parse_rdf_xml(SAMPLE).unwrap();
        let ds = Term::iri("http://example.org/ds");
        let resource = graph.resource(&ds);
        assert_eq!(
            resource.first(ns::rdf::TYPE).and_then(Term::as_iri),
            Some(ns::dcat::DATASET)
        );
        match resource.first(ns::dct::TITLE).unwrap() {
            Term::Literal { value, lang, .. } => {
                assert_eq!(value, "Greenbelt boundaries");
                assert_eq!(lang.as_deref(), Some("en"));
            }
            other => panic!("unexpected title term: {other:?}"),
        }

        let publisher = resource.first(ns::dct::PUBLISHER).unwrap();
        assert_eq!(publisher.as_iri(), Some("http://example.org/org"));
        assert_eq!(
            graph.resource(publisher).first(ns::foaf::NAME).map(Term::lexical),
            Some("Example Org")
        );

        let dist = resource.first(ns::dcat::DISTRIBUTION).unwrap();
        assert!(dist.is_blank());
        assert_eq!(
            graph
                .resource(dist)
                .first(ns::dcat::ACCESS_URL)
                .and_then(Term::as_iri),
            Some("http://example.org/data.csv")
        );
    }

    #[test]
    fn reads_trix_document() {
        let input = r#"<?xml version="1.0"?>
<TriX xmlns="http://www.w3.org/2004/03/trix/trix-1/">
  <graph>
    <triple>
      <uri>http://example.org/ds</uri>
      <uri>http://purl.org/dc/terms/title</uri>
      <plainLiteral>Greenbelt</plainLiteral>
    </triple>
  </graph>
</TriX>"#;
        let graph = parse_trix(input).unwrap();
        assert_eq!(graph.len(), 1);
        let ds = Term::iri("http://example.org/ds");
        assert_eq!(
            graph.resource(&ds).first(ns::dct::TITLE).map(Term::lexical),
            Some("Greenbelt")
        );
    }
}
