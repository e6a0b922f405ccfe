//! Hand-written Turtle reader covering the subset of the grammar catalog
//! feeds use: prefix declarations, IRIs and prefixed names, blank node
//! labels and property lists, string literals with language tags or
//! datatypes, numeric and boolean shorthand, `a`, and `;`/`,` lists.
//! N-Triples documents are a strict subset and parse with the same reader.

use std::collections::HashMap;

use crate::graph::{Graph, Term};
use crate::{ns, ParseError};

pub fn parse_turtle(input: &str) -> Result<Graph, ParseError> {
    Reader::new(input).parse()
}

struct Reader {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    prefixes: HashMap<String, String>,
    base: Option<String>,
    blank_counter: usize,
    graph: Graph,
}

impl Reader {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
            prefixes: HashMap::new(),
            base: None,
            blank_counter: 0,
            graph: Graph::new(),
        }
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
        }
        Some(ch)
    }

    fn skip_ws(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.bump();
            } else if ch == '#' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, wanted: char) -> Result<(), ParseError> {
        self.skip_ws();
        match self.bump() {
            Some(ch) if ch == wanted => Ok(()),
            Some(ch) => Err(self.err(format!("expected '{wanted}', found '{ch}'"))),
            None => Err(self.err(format!("expected '{wanted}', found end of input"))),
        }
    }

    fn matches_keyword(&self, keyword: &str) -> bool {
        keyword
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn fresh_blank(&mut self) -> Term {
        self.blank_counter += 1;
        Term::blank(format!("g{}", self.blank_counter))
    }

    fn parse(mut self) -> Result<Graph, ParseError> {
        loop {
            self.skip_ws();
            if self.peek().is_none() {
                break;
            }
            if self.matches_keyword("@prefix") {
                self.pos += "@prefix".len();
                self.parse_prefix_directive()?;
            } else if self.matches_keyword("@base") {
                self.pos += "@base".len();
                self.skip_ws();
                let iri = self.parse_iri_ref()?;
                self.base = Some(iri);
                self.expect('.')?;
            } else {
                let subject = self.parse_subject()?;
                self.parse_predicate_object_list(&subject, false)?;
                self.expect('.')?;
            }
        }
        Ok(self.graph)
    }

    fn parse_prefix_directive(&mut self) -> Result<(), ParseError> {
        self.skip_ws();
        let mut name = String::new();
        while let Some(ch) = self.peek() {
            if ch == ':' {
                break;
            }
            if ch.is_whitespace() {
                return Err(self.err("malformed prefix name"));
            }
            name.push(ch);
            self.bump();
        }
        self.expect(':')?;
        self.skip_ws();
        let iri = self.parse_iri_ref()?;
        self.prefixes.insert(name, iri);
        self.expect('.')?;
        Ok(())
    }

    fn parse_subject(&mut self) -> Result<Term, ParseError> {
        self.skip_ws();
        match self.peek() {
            Some('<') => Ok(Term::iri(self.parse_iri_ref()?)),
            Some('_') => self.parse_blank_label(),
            Some('[') => self.parse_blank_node_property_list(),
            Some(_) => {
                let iri = self.parse_prefixed_name()?;
                Ok(Term::iri(iri))
            }
            None => Err(self.err("expected subject, found end of input")),
        }
    }

    fn parse_predicate_object_list(
        &mut self,
        subject: &Term,
        in_blank: bool,
    ) -> Result<(), ParseError> {
        loop {
            self.skip_ws();
            let predicate = self.parse_predicate()?;
            loop {
                let object = self.parse_object()?;
                self.graph.insert(subject.clone(), predicate.clone(), object);
                self.skip_ws();
                if self.peek() == Some(',') {
                    self.bump();
                } else {
                    break;
                }
            }
            self.skip_ws();
            if self.peek() == Some(';') {
                self.bump();
                self.skip_ws();
                // a trailing ';' before the statement terminator is legal
                match self.peek() {
                    Some('.') => break,
                    Some(']') if in_blank => break,
                    None => break,
                    _ => continue,
                }
            }
            break;
        }
        Ok(())
    }

    fn parse_predicate(&mut self) -> Result<String, ParseError> {
        self.skip_ws();
        match self.peek() {
            Some('<') => self.parse_iri_ref(),
            Some('a') if self.peek_at(1).map_or(true, |c| c.is_whitespace() || c == '<') => {
                self.bump();
                Ok(ns::rdf::TYPE.to_string())
            }
            Some(_) => self.parse_prefixed_name(),
            None => Err(self.err("expected predicate, found end of input")),
        }
    }

    fn parse_object(&mut self) -> Result<Term, ParseError> {
        self.skip_ws();
        match self.peek() {
            Some('<') => Ok(Term::iri(self.parse_iri_ref()?)),
            Some('_') => self.parse_blank_label(),
            Some('[') => self.parse_blank_node_property_list(),
            Some('"') | Some('\'') => self.parse_string_literal(),
            Some(ch) if ch.is_ascii_digit() || ch == '+' || ch == '-' => self.parse_number(),
            Some('t') if self.matches_keyword("true") => {
                self.pos += 4;
                Ok(boolean_literal("true"))
            }
            Some('f') if self.matches_keyword("false") => {
                self.pos += 5;
                Ok(boolean_literal("false"))
            }
            Some('(') => Err(self.err("RDF collections are not supported")),
            Some(_) => Ok(Term::iri(self.parse_prefixed_name()?)),
            None => Err(self.err("expected object, found end of input")),
        }
    }

    fn parse_blank_label(&mut self) -> Result<Term, ParseError> {
        // "_:" label
        self.bump();
        if self.bump() != Some(':') {
            return Err(self.err("malformed blank node label"));
        }
        let mut label = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' || ch == '-' {
                label.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        if label.is_empty() {
            return Err(self.err("empty blank node label"));
        }
        Ok(Term::blank(label))
    }

    fn parse_blank_node_property_list(&mut self) -> Result<Term, ParseError> {
        self.bump(); // '['
        let node = self.fresh_blank();
        self.skip_ws();
        if self.peek() == Some(']') {
            self.bump();
            return Ok(node);
        }
        self.parse_predicate_object_list(&node, true)?;
        self.expect(']')?;
        Ok(node)
    }

    fn parse_iri_ref(&mut self) -> Result<String, ParseError> {
        self.expect('<')?;
        let mut iri = String::new();
        loop {
            match self.bump() {
                Some('>') => break,
                Some(ch) if ch.is_whitespace() => {
                    return Err(self.err("whitespace inside IRI reference"));
                }
                Some(ch) => iri.push(ch),
                None => return Err(self.err("unterminated IRI reference")),
            }
        }
        if !iri.contains(':') {
            if let Some(base) = &self.base {
                return Ok(format!("{base}{iri}"));
            }
        }
        Ok(iri)
    }

    fn parse_prefixed_name(&mut self) -> Result<String, ParseError> {
        let mut prefix = String::new();
        while let Some(ch) = self.peek() {
            if ch == ':' {
                break;
            }
            if ch.is_alphanumeric() || ch == '_' || ch == '-' || ch == '.' {
                prefix.push(ch);
                self.bump();
            } else {
                return Err(self.err(format!("unexpected character '{ch}'")));
            }
        }
        if self.bump() != Some(':') {
            return Err(self.err("expected ':' in prefixed name"));
        }
        let mut local = String::new();
        while let Some(ch) = self.peek() {
            if ch == '.' {
                // a dot belongs to the local name only when more name
                // characters follow; otherwise it terminates the statement
                match self.peek_at(1) {
                    Some(next) if next.is_alphanumeric() || next == '_' || next == '-' => {
                        local.push(ch);
                        self.bump();
                    }
                    _ => break,
                }
            } else if ch.is_alphanumeric() || ch == '_' || ch == '-' || ch == '%' {
                local.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        let namespace = self
            .prefixes
            .get(&prefix)
            .ok_or_else(|| self.err(format!("unknown prefix '{prefix}:'")))?;
        Ok(format!("{namespace}{local}"))
    }

    fn parse_string_literal(&mut self) -> Result<Term, ParseError> {
        let quote = self.bump().unwrap_or('"');
        let long = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if long {
            self.bump();
            self.bump();
        }
        let mut value = String::new();
        loop {
            let Some(ch) = self.bump() else {
                return Err(self.err("unterminated string literal"));
            };
            if ch == quote {
                if !long {
                    break;
                }
                if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                    self.bump();
                    self.bump();
                    break;
                }
                value.push(ch);
                continue;
            }
            if ch == '\\' {
                let Some(escaped) = self.bump() else {
                    return Err(self.err("unterminated escape sequence"));
                };
                match escaped {
                    't' => value.push('\t'),
                    'n' => value.push('\n'),
                    'r' => value.push('\r'),
                    '"' => value.push('"'),
                    '\'' => value.push('\''),
                    '\\' => value.push('\\'),
                    'u' => value.push(self.parse_unicode_escape(4)?),
                    'U' => value.push(self.parse_unicode_escape(8)?),
                    other => return Err(self.err(format!("unknown escape '\\{other}'"))),
                }
                continue;
            }
            value.push(ch);
        }

        let mut lang = None;
        let mut datatype = None;
        if self.peek() == Some('@') {
            self.bump();
            let mut tag = String::new();
            while let Some(ch) = self.peek() {
                if ch.is_ascii_alphanumeric() || ch == '-' {
                    tag.push(ch);
                    self.bump();
                } else {
                    break;
                }
            }
            lang = Some(tag);
        } else if self.peek() == Some('^') && self.peek_at(1) == Some('^') {
            self.bump();
            self.bump();
            let iri = if self.peek() == Some('<') {
                self.parse_iri_ref()?
            } else {
                self.parse_prefixed_name()?
            };
            datatype = Some(iri);
        }
        Ok(Term::Literal {
            value,
            lang,
            datatype,
        })
    }

    fn parse_unicode_escape(&mut self, digits: usize) -> Result<char, ParseError> {
        let mut code = 0u32;
        for _ in 0..digits {
            let Some(ch) = self.bump() else {
                return Err(self.err("unterminated unicode escape"));
            };
            let digit = ch
                .to_digit(16)
                .ok_or_else(|| self.err(format!("invalid unicode escape digit '{ch}'")))?;
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or_else(|| self.err("invalid unicode code point"))
    }

    fn parse_number(&mut self) -> Result<Term, ParseError> {
        let mut text = String::new();
        let mut is_decimal = false;
        let mut is_double = false;
        while let Some(ch) = self.peek() {
            match ch {
                '0'..='9' | '+' | '-' => {
                    text.push(ch);
                    self.bump();
                }
                '.' => {
                    // trailing dot is the statement terminator
                    match self.peek_at(1) {
                        Some(next) if next.is_ascii_digit() => {
                            is_decimal = true;
                            text.push(ch);
                            self.bump();
                        }
                        _ => break,
                    }
                }
                'e' | 'E' => {
                    is_double = true;
                    text.push(ch);
                    self.bump();
                }
                _ => break,
            }
        }
        let datatype = if is_double {
            "http://www.w3.org/2001/XMLSchema#double"
        } else if is_decimal {
            "http://www.w3.org/2001/XMLSchema#decimal"
        } else {
            "http://www.w3.org/2001/XMLSchema#integer"
        };
        Ok(Term::Literal {
            value: text,
            lang: None,
            datatype: Some(datatype.to_string()),
        })
    }
}

fn boolean_literal(value: &str) -> Term {
    Term::Literal {
        value: value.to_string(),
        lang: None,
        datatype: Some("http://www.w3.org/2001/XMLSchema#boolean".to_string()),
    }
}
