//! End-to-end compilation of a query in a built model to SQL.
//!
//! ```text
//! ModelDef + QueryRef → QueryDef → Planner → SQL + ResultSchema
//! ```
//!
//! Compilation reads an immutable [`ModelDef`] and keeps nothing between
//! calls; compiling the same query twice yields byte-identical SQL.
//!
//! # Example
//!
//! ```ignore
//! use quarry::compile::{compile_query, CompileOptions, QueryRef};
//! use quarry::sql::Dialect;
//!
//! let options = CompileOptions::default().with_dialect(Dialect::Postgres);
//! let compiled = compile_query(&model, &QueryRef::named("by_carrier"), &options)?;
//! println!("{}", compiled.sql);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::config::Settings;
use crate::dsl::{Diagnostic, Location};
use crate::model::{ModelDef, NamedEntity, QueryDef, ResultSchema};
use crate::semantic::planner::Planner;
use crate::sql::Dialect;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during compilation.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Query not found: {0}")]
    QueryNotFound(QueryRef),

    #[error("'{name}' is a {kind}, not a query")]
    NotAQuery { name: String, kind: &'static str },

    /// The query, or something it depends on, failed to build or plan.
    #[error("{0}")]
    Failed(Diagnostic),
}

impl CompileError {
    /// The blocking diagnostic, when there is one.
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            CompileError::Failed(diag) => Some(diag),
            _ => None,
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

// ============================================================================
// Options
// ============================================================================

/// Options for compilation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileOptions {
    /// SQL dialect to generate.
    pub dialect: Dialect,

    /// Row limit for the final stage when the query sets none.
    pub default_row_limit: Option<u64>,
}

impl CompileOptions {
    /// Options taken from `quarry.toml` for sources on `connection`.
    pub fn from_settings(settings: &Settings, connection: Option<&str>) -> Self {
        Self {
            dialect: settings.dialect_for_connection(connection),
            default_row_limit: settings.compile.default_row_limit,
        }
    }

    /// Set the SQL dialect.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set the default row limit.
    pub fn with_default_row_limit(mut self, limit: u64) -> Self {
        self.default_row_limit = Some(limit);
        self
    }
}

// ============================================================================
// Query References
// ============================================================================

/// Which query of a model to compile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryRef {
    /// `query: name is ...`
    Named(String),
    /// The n-th unnamed `run:` query of the document, from zero.
    Anonymous(usize),
}

impl QueryRef {
    pub fn named(name: impl Into<String>) -> Self {
        QueryRef::Named(name.into())
    }
}

impl fmt::Display for QueryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryRef::Named(name) => f.write_str(name),
            QueryRef::Anonymous(index) => write!(f, "run #{}", index + 1),
        }
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Result of compiling a query to SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// The generated SQL statement.
    pub sql: String,

    /// Output columns in order, nested results flagged as repeated.
    pub result_schema: ResultSchema,

    /// Non-blocking diagnostics reported inside the query's definition.
    pub diagnostics: Vec<Diagnostic>,

    /// The dialect used for generation.
    pub dialect: Dialect,
}

// ============================================================================
// Compilation Functions
// ============================================================================

/// Look up a query in `model`.
///
/// An invalid query fails with the diagnostic that sank it.
pub fn resolve_query<'m>(model: &'m ModelDef, query: &QueryRef) -> CompileResult<&'m Arc<QueryDef>> {
    match query {
        QueryRef::Named(name) => {
            if let Some(diag) = model.invalid.get(name) {
                return Err(CompileError::Failed(diag.clone()));
            }
            match model.entities.get(name) {
                Some(NamedEntity::Query(def)) => Ok(def),
                Some(other) => Err(CompileError::NotAQuery {
                    name: name.clone(),
                    kind: other.kind_name(),
                }),
                None => Err(CompileError::QueryNotFound(query.clone())),
            }
        }
        QueryRef::Anonymous(index) => match model.queries.get(*index) {
            Some(Ok(def)) => Ok(def),
            Some(Err(diag)) => Err(CompileError::Failed(diag.clone())),
            None => Err(CompileError::QueryNotFound(query.clone())),
        },
    }
}

/// Compile one query of `model` to SQL.
pub fn compile_query(
    model: &ModelDef,
    query: &QueryRef,
    options: &CompileOptions,
) -> CompileResult<CompiledQuery> {
    let def = resolve_query(model, query)?;
    compile_query_def(model, def, options)
}

/// Compile every valid query of `model`: named queries in definition order,
/// then the unnamed ones. Invalid queries are skipped; their diagnostics are
/// already on the model.
pub fn compile_all(
    model: &ModelDef,
    options: &CompileOptions,
) -> Vec<(QueryRef, CompileResult<CompiledQuery>)> {
    let named = model
        .exports
        .iter()
        .filter(|name| matches!(model.entities.get(*name), Some(NamedEntity::Query(_))))
        .map(|name| QueryRef::Named(name.clone()));
    let anonymous = model
        .queries
        .iter()
        .enumerate()
        .filter(|(_, built)| built.is_ok())
        .map(|(index, _)| QueryRef::Anonymous(index));

    named
        .chain(anonymous)
        .map(|query| {
            let result = compile_query(model, &query, options);
            (query, result)
        })
        .collect()
}

fn compile_query_def(
    model: &ModelDef,
    def: &QueryDef,
    options: &CompileOptions,
) -> CompileResult<CompiledQuery> {
    let _span = tracing::debug_span!(
        "compile_query",
        query = def.name.as_deref().unwrap_or("<anonymous>"),
        dialect = %options.dialect
    )
    .entered();

    let statement = Planner::new(options.dialect)
        .with_default_limit(options.default_row_limit)
        .plan(def)
        .map_err(|err| {
            tracing::debug!(error = %err, "query failed to plan");
            CompileError::Failed(err.at(&def.location))
        })?;

    let sql = statement.to_sql(options.dialect);
    tracing::trace!(%sql, "query compiled");

    Ok(CompiledQuery {
        sql,
        result_schema: ResultSchema::new(def.output_schema()),
        diagnostics: diagnostics_within(model, &def.location),
        dialect: options.dialect,
    })
}

fn diagnostics_within(model: &ModelDef, location: &Location) -> Vec<Diagnostic> {
    model
        .diagnostics
        .iter()
        .filter(|diag| !diag.is_error() && location.contains(&diag.location))
        .cloned()
        .collect()
}
