//! Unified error type for model building and query compilation.
//!
//! Every error maps onto one diagnostic kind so that callers can surface it
//! with a source location instead of aborting.

use crate::dsl::{Diagnostic, DiagnosticKind, Location};
use crate::sql::dialect::DialectError;

/// Result type for semantic operations.
pub type SemanticResult<T> = Result<T, SemanticError>;

/// Errors raised while building a model or compiling a query.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SemanticError {
    /// Malformed input passed through from the parser.
    #[error("{0}")]
    Syntax(String),

    /// A field path that does not resolve in the current scope.
    #[error("'{path}' is not defined")]
    UndefinedField { path: String },

    /// A named source, query or SQL block that does not exist.
    #[error("{entity} '{name}' is not defined")]
    UndefinedEntity { entity: &'static str, name: String },

    /// A name defined twice in one namespace.
    #[error("cannot redefine '{name}'")]
    DuplicateName { name: String },

    /// A name imported from two documents.
    #[error("'{name}' imported from {url} collides with an existing definition")]
    ImportCollision { name: String, url: String },

    /// A reference that resolves to the wrong kind of field.
    #[error("'{path}' is a {found}, expected {expected}")]
    WrongFieldKind {
        path: String,
        found: &'static str,
        expected: &'static str,
    },

    /// Operand types do not fit the operator.
    #[error("{0}")]
    TypeMismatch(String),

    /// Aggregate used where only scalar values are allowed, or vice versa.
    #[error("{0}")]
    IllegalAggregate(String),

    /// A many-side join field referenced outside an aggregate.
    #[error("'{path}' is reached through a one-to-many join and must be aggregated")]
    FanOut { path: String },

    /// A source whose join chain returns to itself.
    #[error("join cycle: source '{name}' joins itself")]
    JoinCycle { name: String },

    /// Two joins reachable under the same name.
    #[error("ambiguous join path '{name}'")]
    AmbiguousJoin { name: String },

    /// Fields whose definitions depend on each other.
    #[error("circular definition of '{name}'")]
    CircularDefinition { name: String },

    /// Imports that form a cycle.
    #[error("import cycle through {url}")]
    ImportCycle { url: String },

    /// Imports nested deeper than the configured bound.
    #[error("import of {url} exceeds the maximum import depth of {depth}")]
    ImportTooDeep { url: String, depth: usize },

    /// An imported document could not be read.
    #[error("could not read {url}: {message}")]
    ImportFailed { url: String, message: String },

    /// A stage shape the compiler cannot accept.
    #[error("{0}")]
    InvalidStage(String),

    /// The dialect has no rendering for the requested operation.
    #[error("{dialect} does not support {operation}")]
    DialectUnsupported {
        dialect: &'static str,
        operation: String,
    },

    /// A table schema was never supplied.
    #[error("schema for '{table}' was not supplied")]
    MissingSchema { table: String },

    /// A table schema lookup failed.
    #[error("schema for '{table}' failed: {message}")]
    SchemaFailed { table: String, message: String },

    /// Reference to an entity that failed to build.
    ///
    /// Callers suppress this one rather than reporting it, so a single root
    /// error does not cascade through every dependent definition.
    #[error("'{name}' is invalid")]
    InvalidReference { name: String },
}

impl SemanticError {
    /// Diagnostic category for this error.
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            SemanticError::Syntax(_) => DiagnosticKind::Syntax,
            SemanticError::UndefinedField { .. }
            | SemanticError::UndefinedEntity { .. }
            | SemanticError::DuplicateName { .. }
            | SemanticError::ImportCollision { .. }
            | SemanticError::InvalidReference { .. } => DiagnosticKind::NameResolution,
            SemanticError::WrongFieldKind { .. } | SemanticError::TypeMismatch(_) => {
                DiagnosticKind::Type
            }
            SemanticError::IllegalAggregate(_)
            | SemanticError::FanOut { .. }
            | SemanticError::JoinCycle { .. }
            | SemanticError::AmbiguousJoin { .. }
            | SemanticError::CircularDefinition { .. }
            | SemanticError::ImportCycle { .. }
            | SemanticError::ImportTooDeep { .. }
            | SemanticError::InvalidStage(_) => DiagnosticKind::Structural,
            SemanticError::DialectUnsupported { .. } => DiagnosticKind::DialectUnsupported,
            SemanticError::MissingSchema { .. }
            | SemanticError::SchemaFailed { .. }
            | SemanticError::ImportFailed { .. } => DiagnosticKind::SchemaDependency,
        }
    }

    /// True for errors that only echo an earlier, already reported failure.
    pub fn is_cascade(&self) -> bool {
        matches!(self, SemanticError::InvalidReference { .. })
    }

    /// Attach a location, producing a reportable diagnostic.
    pub fn at(&self, location: &Location) -> Diagnostic {
        Diagnostic::error(self.kind(), self.to_string(), location.clone())
    }
}

impl From<DialectError> for SemanticError {
    fn from(err: DialectError) -> Self {
        match err {
            DialectError::Unsupported { dialect, operation } => {
                SemanticError::DialectUnsupported { dialect, operation }
            }
        }
    }
}

/// An error paired with the location it should be reported at.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedError {
    pub error: SemanticError,
    pub location: Location,
}

impl LocatedError {
    pub fn new(error: SemanticError, location: Location) -> Self {
        Self { error, location }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        self.error.at(&self.location)
    }
}
