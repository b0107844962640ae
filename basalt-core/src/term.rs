//! RDF terms - IRIs, literals, and blank nodes
//!
//! Terms are the materialized form of RDF nodes, detached from any storage.
//! Inside the engine they are interned to [`NodeId`](crate::NodeId)s via a
//! [`NodeTable`](crate::NodeTable); terms only reappear at query boundaries.
//!
//! Ordering is a fixed total order (IRI < literal < blank node, then
//! lexical) used for deterministic output and for sorting where the data
//! model itself defines no order.

use std::fmt;
use std::sync::Arc;

/// An IRI, stored as the full absolute form
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Iri(pub Arc<str>);

impl Iri {
    pub fn new(iri: impl AsRef<str>) -> Self {
        Iri(Arc::from(iri.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Iri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

/// A literal with optional language tag or datatype IRI
///
/// A literal never carries both a language tag and an explicit datatype;
/// language-tagged strings are implicitly `rdf:langString`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Literal {
    /// The lexical form
    pub lexical: Arc<str>,
    /// Language tag (lowercased by convention, not enforced here)
    pub language: Option<Arc<str>>,
    /// Datatype IRI, `None` for plain/simple literals
    pub datatype: Option<Iri>,
}

impl Literal {
    /// Plain string literal
    pub fn string(lexical: impl AsRef<str>) -> Self {
        Literal {
            lexical: Arc::from(lexical.as_ref()),
            language: None,
            datatype: None,
        }
    }

    /// Typed literal
    pub fn typed(lexical: impl AsRef<str>, datatype: Iri) -> Self {
        Literal {
            lexical: Arc::from(lexical.as_ref()),
            language: None,
            datatype: Some(datatype),
        }
    }

    /// Language-tagged string
    pub fn lang(lexical: impl AsRef<str>, language: impl AsRef<str>) -> Self {
        Literal {
            lexical: Arc::from(lexical.as_ref()),
            language: Some(Arc::from(language.as_ref())),
            datatype: None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.lexical)?;
        if let Some(lang) = &self.language {
            write!(f, "@{}", lang)?;
        } else if let Some(dt) = &self.datatype {
            write!(f, "^^{}", dt)?;
        }
        Ok(())
    }
}

/// An RDF term: IRI, literal, or blank node
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    Iri(Iri),
    Literal(Literal),
    BlankNode(Arc<str>),
}

impl Term {
    pub fn iri(iri: impl AsRef<str>) -> Self {
        Term::Iri(Iri::new(iri))
    }

    pub fn literal(lexical: impl AsRef<str>) -> Self {
        Term::Literal(Literal::string(lexical))
    }

    pub fn blank(label: impl AsRef<str>) -> Self {
        Term::BlankNode(Arc::from(label.as_ref()))
    }

    /// Integer literal with the xsd:integer datatype
    pub fn integer(value: i64) -> Self {
        Term::Literal(Literal::typed(
            value.to_string(),
            Iri::new("http://www.w3.org/2001/XMLSchema#integer"),
        ))
    }

    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal(_))
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Term::BlankNode(_))
    }

    /// Lexical form without term syntax (IRI string, literal lexical,
    /// blank node label)
    pub fn lexical_str(&self) -> &str {
        match self {
            Term::Iri(iri) => iri.as_str(),
            Term::Literal(lit) => &lit.lexical,
            Term::BlankNode(label) => label,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "{}", iri),
            Term::Literal(lit) => write!(f, "{}", lit),
            Term::BlankNode(label) => write!(f, "_:{}", label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(Term::iri("http://ex/a").to_string(), "<http://ex/a>");
        assert_eq!(Term::literal("hi").to_string(), "\"hi\"");
        assert_eq!(
            Term::Literal(Literal::lang("hi", "en")).to_string(),
            "\"hi\"@en"
        );
        assert_eq!(Term::blank("b0").to_string(), "_:b0");
    }

    #[test]
    fn ordering_is_total() {
        let mut terms = vec![
            Term::blank("b"),
            Term::literal("x"),
            Term::iri("http://ex/a"),
        ];
        terms.sort();
        assert!(terms[0].is_iri());
        assert!(terms[1].is_literal());
        assert!(terms[2].is_blank());
    }
}
