//! # Quarry
//!
//! A semantic modeling language compiler that emits multi-dialect SQL.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        Parse tree (external parser, JSON or in-memory)   │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [translation: imports + schemas]
//! ┌─────────────────────────────────────────────────────────┐
//! │                  Translator (translate/update)           │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [lowering]
//! ┌─────────────────────────────────────────────────────────┐
//! │        ModelDef (sources, joins, fields, queries)        │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [semantic::planner]
//! ┌─────────────────────────────────────────────────────────┐
//! │          SQL AST → SQL text via a Dialect backend        │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The compiler performs no I/O: document text and table schemas are
//! supplied by the caller through [`translation::Translator::update`].

pub mod compile;
pub mod config;
pub mod dsl;
pub mod lowering;
pub mod model;
pub mod semantic;
pub mod sql;
pub mod translation;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::compile::{compile_query, CompileError, CompileOptions, CompiledQuery, QueryRef};
    pub use crate::config::Settings;
    pub use crate::dsl::{Diagnostic, DiagnosticKind, DocumentParser, JsonParseTree, Location};
    pub use crate::lowering::{build_model, ModelBuilder, SchemaCatalog};
    pub use crate::model::{ModelDef, ResultSchema, TableSchema};
    pub use crate::semantic::{SemanticError, SemanticResult};
    pub use crate::sql::{Dialect, SqlDialect};
    pub use crate::translation::{
        Translation, TranslationState, TranslationStatus, Translator, UpdateData,
    };
}

pub use compile::{compile_query, CompileOptions, CompiledQuery, QueryRef};
pub use sql::Dialect;
pub use translation::{Translator, UpdateData};
