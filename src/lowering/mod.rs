//! Model Builder: lowering parse trees to a [`ModelDef`].
//!
//! Statements are processed in document order. Each named entity is built
//! independently; when one fails it is recorded in [`ModelDef::invalid`] with
//! its first diagnostic and anything referring to it fails silently instead
//! of reporting the same problem again.
//!
//! Source bodies are lowered in two passes: names are collected first and
//! expressions are resolved lazily afterwards, so a field can reference a
//! field or join declared later in the same body.
//!
//! # Example
//!
//! ```ignore
//! use quarry::lowering::{ModelBuilder, SchemaCatalog};
//!
//! let model = ModelBuilder::new("file:///flights.model", &schemas, &settings)
//!     .build(&document);
//! for diag in &model.diagnostics {
//!     eprintln!("{}", diag);
//! }
//! ```

mod expr;
mod query;
mod scope;
mod source;

pub use expr::{lower_expr, parse_time_literal, Typed};
pub use scope::{FieldLookup, Scope, ScopeField};

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Settings;
use crate::dsl::ast::{self, Statement};
use crate::dsl::{Diagnostic, DiagnosticKind, Location, Span, Spanned};
use crate::model::{ModelDef, NamedEntity, SqlBlockDef, TableSchema};
use crate::semantic::error::{LocatedError, SemanticError, SemanticResult};
use crate::sql::validate_select;

/// Result type of the lowering passes.
pub type LowerResult<T> = Result<T, LocatedError>;

/// Schema lookup key: `connection:path`, or `path` without a connection.
pub fn table_key(connection: Option<&str>, path: &str) -> String {
    match connection {
        Some(conn) => format!("{}:{}", conn, path),
        None => path.to_string(),
    }
}

// =============================================================================
// Inputs
// =============================================================================

/// Table and SQL block schemas available to the builder.
///
/// A missing entry and a failed entry are different: the first means the
/// schema was never supplied, the second that the provider reported an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaCatalog {
    tables: HashMap<String, Result<TableSchema, String>>,
    sql: HashMap<String, Result<TableSchema, String>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, key: impl Into<String>, schema: TableSchema) {
        self.tables.insert(key.into(), Ok(schema));
    }

    pub fn fail_table(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.tables.insert(key.into(), Err(message.into()));
    }

    pub fn add_sql(&mut self, key: impl Into<String>, schema: TableSchema) {
        self.sql.insert(key.into(), Ok(schema));
    }

    pub fn fail_sql(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.sql.insert(key.into(), Err(message.into()));
    }

    pub fn has_table(&self, key: &str) -> bool {
        self.tables.contains_key(key)
    }

    pub fn has_sql(&self, key: &str) -> bool {
        self.sql.contains_key(key)
    }

    pub fn table(&self, key: &str) -> SemanticResult<&TableSchema> {
        Self::lookup(&self.tables, key)
    }

    pub fn sql_block(&self, key: &str) -> SemanticResult<&TableSchema> {
        Self::lookup(&self.sql, key)
    }

    fn lookup<'a>(
        map: &'a HashMap<String, Result<TableSchema, String>>,
        key: &str,
    ) -> SemanticResult<&'a TableSchema> {
        match map.get(key) {
            Some(Ok(schema)) => Ok(schema),
            Some(Err(message)) => Err(SemanticError::SchemaFailed {
                table: key.to_string(),
                message: message.clone(),
            }),
            None => Err(SemanticError::MissingSchema {
                table: key.to_string(),
            }),
        }
    }
}

/// Document URL carried through lowering for locations.
#[derive(Debug, Clone, Copy)]
pub struct Ctx<'a> {
    url: &'a str,
}

impl<'a> Ctx<'a> {
    pub fn new(url: &'a str) -> Self {
        Self { url }
    }

    pub fn location(&self, span: Span) -> Location {
        Location::new(self.url, span)
    }

    pub fn error(&self, error: SemanticError, span: Span) -> LocatedError {
        LocatedError::new(error, self.location(span))
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builds the model of one document.
pub struct ModelBuilder<'a> {
    url: &'a str,
    schemas: &'a SchemaCatalog,
    settings: &'a Settings,
    /// Models of imported documents, keyed by the URL as written.
    imports: HashMap<String, Arc<ModelDef>>,
    model: ModelDef,
    /// Sources under construction; meeting one again is a join cycle.
    building: Vec<String>,
}

impl<'a> ModelBuilder<'a> {
    pub fn new(url: &'a str, schemas: &'a SchemaCatalog, settings: &'a Settings) -> Self {
        Self {
            url,
            schemas,
            settings,
            imports: HashMap::new(),
            model: ModelDef::new(),
            building: Vec::new(),
        }
    }

    /// Supply the model an `import` statement refers to.
    pub fn with_import(mut self, url: impl Into<String>, model: Arc<ModelDef>) -> Self {
        self.imports.insert(url.into(), model);
        self
    }

    pub fn build(mut self, document: &ast::Document) -> ModelDef {
        let _span = tracing::debug_span!("build_model", url = %self.url).entered();
        for statement in &document.statements {
            match statement {
                Statement::Import(import) => self.merge_import(import),
                Statement::Source(stmt) => self.define_source(stmt),
                Statement::Query(stmt) => self.define_query(stmt),
                Statement::Sql(stmt) => self.define_sql(stmt),
            }
        }
        tracing::debug!(
            entities = self.model.entities.len(),
            invalid = self.model.invalid.len(),
            diagnostics = self.model.diagnostics.len(),
            "model built"
        );
        self.model
    }

    fn ctx(&self) -> Ctx<'a> {
        Ctx::new(self.url)
    }

    /// Report an error unless it only echoes an earlier one.
    fn report(&mut self, err: &LocatedError) {
        if !err.error.is_cascade() {
            self.model.diagnostics.push(err.to_diagnostic());
        }
    }

    /// Report every error after the first and hand the first back.
    fn first_of(&mut self, mut errors: Vec<LocatedError>) -> LocatedError {
        let rest = errors.split_off(1);
        for err in &rest {
            self.report(err);
        }
        errors.remove(0)
    }

    fn invalidate(&mut self, name: &str, err: LocatedError) {
        tracing::debug!(entity = %name, error = %err.error, "entity invalid");
        self.report(&err);
        self.model.invalid.insert(name.to_string(), err.to_diagnostic());
    }

    /// Check that `name` is free in the document namespace.
    fn claim(&mut self, name: &Spanned<String>) -> bool {
        if self.model.entities.contains_key(&name.node) || self.model.invalid.contains_key(&name.node)
        {
            let err = self.ctx().error(
                SemanticError::DuplicateName {
                    name: name.node.clone(),
                },
                name.span,
            );
            self.report(&err);
            return false;
        }
        true
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn merge_import(&mut self, import: &ast::ImportStatement) {
        let Some(imported) = self.imports.get(&import.url).cloned() else {
            // The translator reports unreadable imports.
            return;
        };
        for name in &imported.exports {
            if self.model.entities.contains_key(name) || self.model.invalid.contains_key(name) {
                let err = self.ctx().error(
                    SemanticError::ImportCollision {
                        name: name.clone(),
                        url: import.url.clone(),
                    },
                    import.span,
                );
                self.report(&err);
                continue;
            }
            if let Some(entity) = imported.entities.get(name) {
                self.model.entities.insert(name.clone(), entity.clone());
            } else if let Some(diag) = imported.invalid.get(name) {
                self.model.invalid.insert(name.clone(), diag.clone());
            }
        }
    }

    fn define_source(&mut self, stmt: &ast::SourceStatement) {
        if !self.claim(&stmt.name) {
            return;
        }
        let name = stmt.name.node.clone();
        tracing::debug!(source = %name, "building source");
        self.building.push(name.clone());
        let built = self.build_source(&stmt.source);
        self.building.pop();
        match built {
            Ok(source) => {
                let mut def = (*source).clone();
                def.name = name.clone();
                def.location = self.ctx().location(stmt.span);
                self.model
                    .entities
                    .insert(name.clone(), NamedEntity::Source(Arc::new(def)));
            }
            Err(err) => self.invalidate(&name, err),
        }
        self.model.exports.push(name);
    }

    fn define_query(&mut self, stmt: &ast::QueryStatement) {
        let Some(name) = &stmt.name else {
            let built = self.build_query(&stmt.query, None).map_err(|err| {
                self.report(&err);
                err.to_diagnostic()
            });
            self.model.queries.push(built);
            return;
        };
        if !self.claim(name) {
            return;
        }
        tracing::debug!(query = %name.node, "building query");
        match self.build_query(&stmt.query, Some(&name.node)) {
            Ok(query) => {
                self.model
                    .entities
                    .insert(name.node.clone(), NamedEntity::Query(query));
            }
            Err(err) => self.invalidate(&name.node, err),
        }
        self.model.exports.push(name.node.clone());
    }

    fn define_sql(&mut self, stmt: &ast::SqlStatement) {
        if !self.claim(&stmt.name) {
            return;
        }
        let name = stmt.name.node.clone();
        let location = self.ctx().location(stmt.span);
        let key = table_key(stmt.connection.as_deref(), &name);

        let dialect = self.settings.dialect_for_connection(stmt.connection.as_deref());
        if let Err(message) = validate_select(&stmt.select, dialect) {
            self.model.diagnostics.push(Diagnostic::warning(
                DiagnosticKind::Syntax,
                message,
                location.clone(),
            ));
        }

        match self.schemas.sql_block(&key) {
            Ok(schema) => {
                let block = SqlBlockDef {
                    name: name.clone(),
                    connection: stmt.connection.clone(),
                    select: stmt.select.clone(),
                    schema: schema.clone(),
                    location,
                };
                self.model
                    .entities
                    .insert(name.clone(), NamedEntity::Sql(Arc::new(block)));
            }
            Err(error) => {
                let err = LocatedError::new(error, location);
                self.invalidate(&name, err);
            }
        }
        self.model.exports.push(name);
    }
}

/// Build the model of `document` without imports.
pub fn build_model(
    url: &str,
    document: &ast::Document,
    schemas: &SchemaCatalog,
    settings: &Settings,
) -> ModelDef {
    ModelBuilder::new(url, schemas, settings).build(document)
}
