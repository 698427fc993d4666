//! Parse-tree surface of the modeling language.
//!
//! The grammar itself lives outside this crate. An external parser hands the
//! compiler a [`ast::Document`]: a tagged union with one variant per grammar
//! alternative, consumed by exhaustive pattern matching in the model builder.
//!
//! The language covers:
//!
//! - **Sources**: tables, SQL blocks, query outputs, and refinements with
//!   dimensions, measures, joins, filters and `accept`/`except`/`rename`
//! - **Queries**: pipelines of `group_by`/`aggregate`/`nest`, `project` and
//!   `index` stages chained with `->`
//! - **SQL blocks** and **imports**
//!
//! # Example
//!
//! ```ignore
//! use quarry::dsl::{DocumentParser, JsonParseTree};
//!
//! let parser = JsonParseTree::default();
//! match parser.parse("file:///flights.model", text) {
//!     Ok(document) => println!("{} statements", document.statements.len()),
//!     Err(diagnostics) => {
//!         for diag in &diagnostics {
//!             eprintln!("{}", diag);
//!         }
//!     }
//! }
//! ```

pub mod ast;
pub mod parser;
pub mod span;

pub use ast::*;
pub use parser::{DocumentParser, JsonParseTree, ParseTreeError};
pub use span::{Location, Position, Span, Spanned};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Diagnostic category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Reported by the external parser.
    Syntax,
    /// A name that does not resolve, or resolves twice.
    NameResolution,
    /// Operand or field kinds that do not fit.
    Type,
    /// Illegal aggregate context, join cycles, ambiguous paths.
    Structural,
    /// The target dialect cannot express an operation.
    DialectUnsupported,
    /// A table schema the model depends on is unavailable.
    SchemaDependency,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::Syntax => "syntax error",
            DiagnosticKind::NameResolution => "name resolution error",
            DiagnosticKind::Type => "type error",
            DiagnosticKind::Structural => "structural error",
            DiagnosticKind::DialectUnsupported => "dialect unsupported",
            DiagnosticKind::SchemaDependency => "schema dependency error",
        };
        f.write_str(name)
    }
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// A diagnostic message with source location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Diagnostic category.
    pub kind: DiagnosticKind,
    /// The severity level.
    pub severity: Severity,
    /// The diagnostic message.
    pub message: String,
    /// Document and range the diagnostic applies to.
    pub location: Location,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(kind: DiagnosticKind, message: impl Into<String>, location: Location) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            message: message.into(),
            location,
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(kind: DiagnosticKind, message: impl Into<String>, location: Location) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            message: message.into(),
            location,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(
            f,
            "{}: {} ({}): {}",
            self.location, level, self.kind, self.message
        )
    }
}

/// True when any diagnostic in the slice is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}
