//! The parser collaborator.
//!
//! Lexing and parsing the surface syntax is the job of an external parser;
//! the translator only needs something that turns document text into a
//! [`Document`]. [`JsonParseTree`] accepts parse trees serialized as JSON,
//! which is the hand-off format external parsers produce.

use crate::dsl::ast::Document;
use crate::dsl::span::{Location, Position, Span};
use crate::dsl::{Diagnostic, DiagnosticKind};

/// Error raised when a serialized parse tree cannot be read.
#[derive(Debug, thiserror::Error)]
pub enum ParseTreeError {
    #[error("malformed parse tree at line {line}, column {column}: {message}")]
    Malformed {
        line: usize,
        column: usize,
        message: String,
    },
}

impl ParseTreeError {
    fn span(&self) -> Span {
        match self {
            ParseTreeError::Malformed { line, column, .. } => {
                let line = line.saturating_sub(1) as u32;
                let column = column.saturating_sub(1) as u32;
                Span::new(Position::new(line, column), Position::new(line, column + 1))
            }
        }
    }
}

impl From<serde_json::Error> for ParseTreeError {
    fn from(err: serde_json::Error) -> Self {
        ParseTreeError::Malformed {
            line: err.line(),
            column: err.column(),
            message: err.to_string(),
        }
    }
}

/// Turns document text into a parse tree.
///
/// Failures come back as syntax diagnostics located in `url`.
pub trait DocumentParser: std::fmt::Debug {
    fn parse(&self, url: &str, text: &str) -> Result<Document, Vec<Diagnostic>>;
}

/// Reads parse trees serialized as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParseTree;

impl JsonParseTree {
    /// Deserialize without wrapping errors in diagnostics.
    pub fn read(text: &str) -> Result<Document, ParseTreeError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl DocumentParser for JsonParseTree {
    fn parse(&self, url: &str, text: &str) -> Result<Document, Vec<Diagnostic>> {
        JsonParseTree::read(text).map_err(|err| {
            vec![Diagnostic::error(
                DiagnosticKind::Syntax,
                err.to_string(),
                Location::new(url, err.span()),
            )]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_tree_reports_syntax_diagnostic() {
        let err = JsonParseTree
            .parse("file:///bad.model", "{\"statements\": [ {\"type\": \"nope\"} ]}")
            .unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err[0].kind, DiagnosticKind::Syntax);
        assert_eq!(err[0].location.url, "file:///bad.model");
    }

    #[test]
    fn empty_document_parses() {
        let doc = JsonParseTree.parse("file:///a", "{\"statements\": []}").unwrap();
        assert!(doc.statements.is_empty());
    }
}
