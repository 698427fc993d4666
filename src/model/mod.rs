//! Typed semantic model.
//!
//! A [`ModelDef`] is built per translation session by the model builder and
//! is immutable once translation reports it final. Everything in it is
//! reference counted so that imports, refinements and views share
//! definitions instead of copying them.

pub mod expr;
pub mod pipeline;
pub mod schema;
pub mod source;
pub mod types;

pub use expr::{BinaryOp, CaseArm, Expr, Literal, ScalarFunction, UnaryOp};
pub use pipeline::{
    IndexField, IndexStage, NestDef, OrderBy, OutputField, Pipeline, ProjectStage, QueryDef,
    ReduceStage, Sampling, Stage,
};
pub use schema::{ColumnSchema, ResultField, ResultSchema, ResultType, TableSchema};
pub use source::{
    Correlation, ExprField, FieldDef, FieldNamespace, Filter, JoinDef, ResolvedField, SourceDef,
    SourceOrigin, ViewDef,
};
pub use types::{
    AggregateFunction, AtomicType, ExprLevel, ExtractUnit, JoinKind, Relationship, SortDirection,
    TimeUnit, TypeDesc, UngroupKind,
};

use std::sync::Arc;

use indexmap::IndexMap;

use crate::dsl::{Diagnostic, Location};

/// `sql: name is { connection: c; select: """...""" }`
#[derive(Debug, Clone, PartialEq)]
pub struct SqlBlockDef {
    pub name: String,
    pub connection: Option<String>,
    pub select: String,
    pub schema: TableSchema,
    pub location: Location,
}

impl SqlBlockDef {
    /// Schema lookup key: `connection:name` or `name`.
    pub fn key(&self) -> String {
        match &self.connection {
            Some(conn) => format!("{}:{}", conn, self.name),
            None => self.name.clone(),
        }
    }
}

/// A top-level named definition.
#[derive(Debug, Clone)]
pub enum NamedEntity {
    Source(Arc<SourceDef>),
    Query(Arc<QueryDef>),
    Sql(Arc<SqlBlockDef>),
}

impl NamedEntity {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NamedEntity::Source(_) => "source",
            NamedEntity::Query(_) => "query",
            NamedEntity::Sql(_) => "sql block",
        }
    }

    pub fn location(&self) -> &Location {
        match self {
            NamedEntity::Source(s) => &s.location,
            NamedEntity::Query(q) => &q.location,
            NamedEntity::Sql(b) => &b.location,
        }
    }
}

/// Result of building an unnamed `run:` query.
pub type BuiltQuery = Result<Arc<QueryDef>, Diagnostic>;

/// The compiled set of named sources, queries and SQL blocks.
#[derive(Debug, Clone, Default)]
pub struct ModelDef {
    /// Every visible entity, imported ones included, in definition order.
    pub entities: IndexMap<String, NamedEntity>,
    /// Unnamed queries of the root document, in order.
    pub queries: Vec<BuiltQuery>,
    /// Names defined by the root document itself.
    pub exports: Vec<String>,
    /// Entities that failed to build, with the diagnostic that sank them.
    pub invalid: IndexMap<String, Diagnostic>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ModelDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&self, name: &str) -> Option<&Arc<SourceDef>> {
        match self.entities.get(name) {
            Some(NamedEntity::Source(s)) => Some(s),
            _ => None,
        }
    }

    pub fn query(&self, name: &str) -> Option<&Arc<QueryDef>> {
        match self.entities.get(name) {
            Some(NamedEntity::Query(q)) => Some(q),
            _ => None,
        }
    }

    pub fn sql_block(&self, name: &str) -> Option<&Arc<SqlBlockDef>> {
        match self.entities.get(name) {
            Some(NamedEntity::Sql(b)) => Some(b),
            _ => None,
        }
    }

    pub fn is_invalid(&self, name: &str) -> bool {
        self.invalid.contains_key(name)
    }

    pub fn has_errors(&self) -> bool {
        crate::dsl::has_errors(&self.diagnostics)
    }
}
