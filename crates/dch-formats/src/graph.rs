//! Minimal in-memory triple store backing the generic RDF path.
//!
//! Resources are queried through [`ResourceRef`], a borrow-only adapter
//! constructed per subject that exposes `first`/`all` accessors; graph nodes
//! themselves are never mutated or decorated.

use std::collections::HashSet;

use crate::ns;

/// One RDF term: an IRI, a blank node label, or a literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Iri(String),
    Blank(String),
    Literal {
        value: String,
        lang: Option<String>,
        datatype: Option<String>,
    },
}

impl Term {
    pub fn iri(value: impl Into<String>) -> Self {
        Term::Iri(value.into())
    }

    pub fn blank(label: impl Into<String>) -> Self {
        Term::Blank(label.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            lang: None,
            datatype: None,
        }
    }

    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Term::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Term::Blank(_))
    }

    /// Lexical form: the IRI, the blank label, or the literal value.
    pub fn lexical(&self) -> &str {
        match self {
            Term::Iri(iri) => iri,
            Term::Blank(label) => label,
            Term::Literal { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Triple {
    pub subject: Term,
    pub predicate: String,
    pub object: Term,
}

/// Insertion-ordered triple collection with the handful of lookups the
/// extraction table needs.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    triples: Vec<Triple>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn insert(&mut self, subject: Term, predicate: impl Into<String>, object: Term) {
        self.triples.push(Triple {
            subject,
            predicate: predicate.into(),
            object,
        });
    }

    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    /// Subjects carrying an `rdf:type` triple for the given class, in
    /// first-seen document order, deduplicated.
    pub fn subjects_of_type(&self, class_iri: &str) -> Vec<Term> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for triple in &self.triples {
            if triple.predicate == ns::rdf::TYPE
                && triple.object.as_iri() == Some(class_iri)
                && seen.insert(triple.subject.clone())
            {
                out.push(triple.subject.clone());
            }
        }
        out
    }

    pub fn resource<'g>(&'g self, subject: &Term) -> ResourceRef<'g> {
        ResourceRef {
            graph: self,
            subject: subject.clone(),
        }
    }

    /// Sub-graph for one dataset: its own triples plus, transitively, the
    /// triples of every distribution it references through `follow`.
    pub fn dataset_subgraph(&self, dataset: &Term, follow: &str) -> Graph {
        let mut out = Graph::new();
        let mut visited = HashSet::new();
        let mut queue = vec![dataset.clone()];
        visited.insert(dataset.clone());

        while let Some(subject) = queue.pop() {
            let expand_all = subject != *dataset;
            for triple in self.triples.iter().filter(|t| t.subject == subject) {
                out.insert(
                    triple.subject.clone(),
                    triple.predicate.clone(),
                    triple.object.clone(),
                );
                // From the dataset itself only distributions travel; from a
                // distribution every referenced node travels with it.
                let follow_object = triple.predicate == follow
                    || (expand_all && self.has_subject(&triple.object));
                if follow_object && visited.insert(triple.object.clone()) {
                    queue.push(triple.object.clone());
                }
            }
        }
        out
    }

    fn has_subject(&self, term: &Term) -> bool {
        if matches!(term, Term::Literal { .. }) {
            return false;
        }
        self.triples.iter().any(|t| t.subject == *term)
    }

    /// Serialize as one triple per line. The output is plain N-Triples,
    /// which any Turtle reader accepts, so fragments can be re-parsed on
    /// their own.
    pub fn to_turtle(&self) -> String {
        let mut out = String::new();
        for triple in &self.triples {
            write_term(&mut out, &triple.subject);
            out.push(' ');
            out.push('<');
            out.push_str(&triple.predicate);
            out.push('>');
            out.push(' ');
            write_term(&mut out, &triple.object);
            out.push_str(" .\n");
        }
        out
    }
}

fn write_term(out: &mut String, term: &Term) {
    match term {
        Term::Iri(iri) => {
            out.push('<');
            out.push_str(iri);
            out.push('>');
        }
        Term::Blank(label) => {
            out.push_str("_:");
            out.push_str(label);
        }
        Term::Literal {
            value,
            lang,
            datatype,
        } => {
            out.push('"');
            for ch in value.chars() {
                match ch {
                    '\\' => out.push_str("\\\\"),
                    '"' => out.push_str("\\\""),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push_str("\\t"),
                    other => out.push(other),
                }
            }
            out.push('"');
            if let Some(lang) = lang {
                out.push('@');
                out.push_str(lang);
            } else if let Some(datatype) = datatype {
                out.push_str("^^<");
                out.push_str(datatype);
                out.push('>');
            }
        }
    }
}

/// Borrow-only accessor for one subject's triples.
pub struct ResourceRef<'g> {
    graph: &'g Graph,
    subject: Term,
}

impl<'g> ResourceRef<'g> {
    pub fn subject(&self) -> &Term {
        &self.subject
    }

    pub fn first(&self, predicate: &str) -> Option<&'g Term> {
        self.graph
            .triples
            .iter()
            .find(|t| t.subject == self.subject && t.predicate == predicate)
            .map(|t| &t.object)
    }

    pub fn all(&self, predicate: &str) -> Vec<&'g Term> {
        self.graph
            .triples
            .iter()
            .filter(|t| t.subject == self.subject && t.predicate == predicate)
            .map(|t| &t.object)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Graph {
        let mut g = Graph::new();
        let ds = Term::iri("http://example.org/ds");
        let dist = Term::blank("d0");
        let publisher = Term::iri("http://example.org/org");
        g.insert(ds.clone(), ns::rdf::TYPE, Term::iri(ns::dcat::DATASET));
        g.insert(ds.clone(), ns::dct::TITLE, Term::literal("Sample"));
        g.insert(ds.clone(), ns::dct::PUBLISHER, publisher.clone());
        g.insert(ds.clone(), ns::dcat::DISTRIBUTION, dist.clone());
        g.insert(
            dist.clone(),
            ns::dcat::ACCESS_URL,
            Term::iri("http://example.org/data.csv"),
        );
        g.insert(publisher, ns::foaf::NAME, Term::literal("Example Org"));
        g
    }

    #[test]
    fn first_and_all_read_one_subject_only() {
        let g = sample();
        let ds = Term::iri("http://example.org/ds");
        let resource = g.resource(&ds);
        assert_eq!(
            resource.first(ns::dct::TITLE).map(Term::lexical),
            Some("Sample")
        );
        assert!(resource.first(ns::foaf::NAME).is_none());
        assert_eq!(resource.all(ns::dcat::DISTRIBUTION).len(), 1);
    }

    #[test]
    fn subgraph_carries_distributions_but_not_publisher_details() {
        let g = sample();
        let ds = Term::iri("http://example.org/ds");
        let sub = g.dataset_subgraph(&ds, ns::dcat::DISTRIBUTION);

        let dist = Term::blank("d0");
        assert!(sub
            .resource(&dist)
            .first(ns::dcat::ACCESS_URL)
            .is_some());
        let publisher = Term::iri("http://example.org/org");
        assert!(sub.resource(&publisher).first(ns::foaf::NAME).is_none());
    }

    #[test]
    fn turtle_output_escapes_literals() {
        let mut g = Graph::new();
        g.insert(
            Term::iri("http://example.org/s"),
            ns::dct::TITLE,
            Term::literal("line one\nwith \"quotes\""),
        );
        let text = g.to_turtle();
        assert!(text.contains("\\n"));
        assert!(text.contains("\\\"quotes\\\""));
    }
}
