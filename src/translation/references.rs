//! External resources a parsed document refers to.
//!
//! Walks a [`Document`] for the imports, tables and SQL blocks the model
//! builder will ask for, so the translator can request them up front.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::dsl::ast::{
    Document, ImportStatement, QueryExpr, QueryHead, SourceExpr, SourceProperty, Statement,
};
use crate::lowering::table_key;

/// A table whose schema is needed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableRequest {
    pub connection: Option<String>,
    pub path: String,
}

impl TableRequest {
    /// Key under which the schema is supplied.
    pub fn key(&self) -> String {
        table_key(self.connection.as_deref(), &self.path)
    }
}

/// A SQL block whose output schema is needed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SqlRequest {
    pub connection: Option<String>,
    pub name: String,
    pub select: String,
}

impl SqlRequest {
    pub fn key(&self) -> String {
        table_key(self.connection.as_deref(), &self.name)
    }
}

/// Everything one document depends on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct References<'d> {
    pub imports: Vec<&'d ImportStatement>,
    pub tables: BTreeSet<TableRequest>,
    pub sql: BTreeSet<SqlRequest>,
}

impl<'d> References<'d> {
    pub fn of(document: &'d Document) -> Self {
        let mut refs = References::default();
        for statement in &document.statements {
            match statement {
                Statement::Import(import) => refs.imports.push(import),
                Statement::Source(stmt) => refs.source(&stmt.source),
                Statement::Query(stmt) => refs.query(&stmt.query),
                Statement::Sql(stmt) => {
                    refs.sql.insert(SqlRequest {
                        connection: stmt.connection.clone(),
                        name: stmt.name.node.clone(),
                        select: stmt.select.clone(),
                    });
                }
            }
        }
        refs
    }

    fn source(&mut self, source: &SourceExpr) {
        match source {
            SourceExpr::Named { .. } | SourceExpr::FromSql { .. } => {}
            SourceExpr::Table {
                connection, path, ..
            } => {
                self.tables.insert(TableRequest {
                    connection: connection.clone(),
                    path: path.clone(),
                });
            }
            SourceExpr::FromQuery { query, .. } => self.query(query),
            SourceExpr::Refine { base, body, .. } => {
                self.source(base);
                for property in body {
                    if let SourceProperty::Join { joins } = property {
                        for join in joins {
                            if let Some(source) = &join.source {
                                self.source(source);
                            }
                        }
                    }
                }
            }
        }
    }

    fn query(&mut self, query: &QueryExpr) {
        if let QueryHead::Source { source } = &query.head {
            self.source(source);
        }
    }
}
