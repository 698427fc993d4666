//! Resumable translation of a document and its imports into a model.
//!
//! Translation is a request/resume loop driven by the caller:
//!
//! ```text
//! state = translator.start(url)
//! loop {
//!     match translator.translate(&state).status {
//!         AwaitingImports(urls)             => supply document text
//!         AwaitingSchemas { tables, sql }   => supply schemas
//!         Done(model)                       => break
//!     }
//!     state = translator.update(state, data)
//! }
//! ```
//!
//! [`Translator::translate`] reads the state and never changes it, so
//! calling it twice without an update gives the same answer. Document text
//! is parsed once, when [`Translator::update`] receives it.

mod imports;
mod references;

pub use references::{References, SqlRequest, TableRequest};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::Settings;
use crate::dsl::ast::Document;
use crate::dsl::{Diagnostic, DocumentParser, Location, Span};
use crate::lowering::{ModelBuilder, SchemaCatalog};
use crate::model::{ModelDef, TableSchema};
use crate::semantic::error::SemanticError;

use self::imports::ImportGraph;

// =============================================================================
// Errors
// =============================================================================

/// Misuse of the translation protocol.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TranslationError {
    #[error("translation is not finished: still waiting for {0}")]
    NotFinished(String),
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum DocumentEntry {
    Parsed(Arc<Document>),
    /// The parser rejected the text.
    Rejected(Vec<Diagnostic>),
    /// The reader could not supply the text.
    Unreadable(String),
}

/// Everything supplied so far for one root document.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationState {
    root: String,
    documents: BTreeMap<String, DocumentEntry>,
    schemas: SchemaCatalog,
    schemas_final: bool,
}

impl TranslationState {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            documents: BTreeMap::new(),
            schemas: SchemaCatalog::new(),
            schemas_final: false,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn has_document(&self, url: &str) -> bool {
        self.documents.contains_key(url)
    }

    fn parsed(&self, url: &str) -> Option<&Arc<Document>> {
        match self.documents.get(url) {
            Some(DocumentEntry::Parsed(doc)) => Some(doc),
            _ => None,
        }
    }
}

/// Data supplied in answer to a translation request.
#[derive(Debug, Clone, Default)]
pub struct UpdateData {
    /// Document text by URL.
    pub urls: BTreeMap<String, String>,
    /// Documents that could not be read, with the reason.
    pub url_errors: BTreeMap<String, String>,
    /// Table schemas by [`TableRequest::key`].
    pub tables: BTreeMap<String, TableSchema>,
    /// Tables whose schema lookup failed.
    pub table_errors: BTreeMap<String, String>,
    /// SQL block output schemas by [`SqlRequest::key`].
    pub sql_schemas: BTreeMap<String, TableSchema>,
    /// SQL blocks whose schema lookup failed.
    pub sql_errors: BTreeMap<String, String>,
    /// No more schemas will be supplied; anything still missing is an error.
    pub schemas_final: bool,
}

impl UpdateData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: impl Into<String>, text: impl Into<String>) -> Self {
        self.urls.insert(url.into(), text.into());
        self
    }

    pub fn with_url_error(mut self, url: impl Into<String>, message: impl Into<String>) -> Self {
        self.url_errors.insert(url.into(), message.into());
        self
    }

    pub fn with_table(mut self, key: impl Into<String>, schema: TableSchema) -> Self {
        self.tables.insert(key.into(), schema);
        self
    }

    pub fn with_table_error(mut self, key: impl Into<String>, message: impl Into<String>) -> Self {
        self.table_errors.insert(key.into(), message.into());
        self
    }

    pub fn with_sql_schema(mut self, key: impl Into<String>, schema: TableSchema) -> Self {
        self.sql_schemas.insert(key.into(), schema);
        self
    }

    pub fn with_sql_error(mut self, key: impl Into<String>, message: impl Into<String>) -> Self {
        self.sql_errors.insert(key.into(), message.into());
        self
    }

    pub fn schemas_final(mut self) -> Self {
        self.schemas_final = true;
        self
    }
}

// =============================================================================
// Results
// =============================================================================

/// Where translation stands.
#[derive(Debug, Clone)]
pub enum TranslationStatus {
    /// Document text is needed for these URLs.
    AwaitingImports(Vec<String>),
    /// Schemas are needed before the model can be built.
    AwaitingSchemas {
        tables: Vec<TableRequest>,
        sql: Vec<SqlRequest>,
    },
    /// Nothing more is needed. The model may still carry diagnostics.
    Done(Arc<ModelDef>),
}

/// Answer of one [`Translator::translate`] call.
#[derive(Debug, Clone)]
pub struct Translation {
    pub status: TranslationStatus,
    /// Diagnostics of every document reached so far.
    pub diagnostics: Vec<Diagnostic>,
}

impl Translation {
    pub fn is_final(&self) -> bool {
        matches!(self.status, TranslationStatus::Done(_))
    }

    pub fn model(&self) -> Option<&Arc<ModelDef>> {
        match &self.status {
            TranslationStatus::Done(model) => Some(model),
            _ => None,
        }
    }

    pub fn needed_urls(&self) -> &[String] {
        match &self.status {
            TranslationStatus::AwaitingImports(urls) => urls,
            _ => &[],
        }
    }

    pub fn needed_tables(&self) -> &[TableRequest] {
        match &self.status {
            TranslationStatus::AwaitingSchemas { tables, .. } => tables,
            _ => &[],
        }
    }

    pub fn needed_sql(&self) -> &[SqlRequest] {
        match &self.status {
            TranslationStatus::AwaitingSchemas { sql, .. } => sql,
            _ => &[],
        }
    }

    /// The finished model, or an error naming what is still missing.
    pub fn into_model(self) -> Result<Arc<ModelDef>, TranslationError> {
        match self.status {
            TranslationStatus::Done(model) => Ok(model),
            TranslationStatus::AwaitingImports(urls) => {
                Err(TranslationError::NotFinished(urls.join(", ")))
            }
            TranslationStatus::AwaitingSchemas { tables, sql } => {
                let keys: Vec<String> = tables
                    .iter()
                    .map(TableRequest::key)
                    .chain(sql.iter().map(SqlRequest::key))
                    .collect();
                Err(TranslationError::NotFinished(keys.join(", ")))
            }
        }
    }
}

// =============================================================================
// Translator
// =============================================================================

/// Drives parsing, import resolution and model building for documents.
#[derive(Debug)]
pub struct Translator {
    parser: Box<dyn DocumentParser>,
    settings: Settings,
}

impl Translator {
    pub fn new(parser: impl DocumentParser + 'static, settings: Settings) -> Self {
        Self {
            parser: Box::new(parser),
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Fresh state for translating the document at `url`.
    pub fn start(&self, url: impl Into<String>) -> TranslationState {
        TranslationState::new(url)
    }

    /// Record supplied data. Documents already held are not parsed again.
    pub fn update(&self, mut state: TranslationState, data: UpdateData) -> TranslationState {
        let _span = tracing::debug_span!("translation_update", root = %state.root).entered();

        for (url, text) in data.urls {
            if state.documents.contains_key(&url) {
                tracing::trace!(%url, "document already held");
                continue;
            }
            let entry = match self.parser.parse(&url, &text) {
                Ok(document) => {
                    tracing::debug!(%url, statements = document.statements.len(), "document parsed");
                    DocumentEntry::Parsed(Arc::new(document))
                }
                Err(diagnostics) => {
                    tracing::debug!(%url, errors = diagnostics.len(), "document rejected");
                    DocumentEntry::Rejected(diagnostics)
                }
            };
            state.documents.insert(url, entry);
        }
        for (url, message) in data.url_errors {
            state
                .documents
                .entry(url)
                .or_insert(DocumentEntry::Unreadable(message));
        }

        for (key, schema) in data.tables {
            state.schemas.add_table(key, schema);
        }
        for (key, message) in data.table_errors {
            state.schemas.fail_table(key, message);
        }
        for (key, schema) in data.sql_schemas {
            state.schemas.add_sql(key, schema);
        }
        for (key, message) in data.sql_errors {
            state.schemas.fail_sql(key, message);
        }
        state.schemas_final |= data.schemas_final;
        state
    }

    /// Advance as far as the supplied data allows.
    pub fn translate(&self, state: &TranslationState) -> Translation {
        let _span = tracing::debug_span!("translate", root = %state.root).entered();
        let mut diagnostics = Vec::new();

        let graph = ImportGraph::walk(state, self.settings.translator.max_import_depth);
        diagnostics.extend(graph.diagnostics().iter().cloned());
        if !graph.missing().is_empty() {
            let urls: Vec<String> = graph.missing().iter().cloned().collect();
            tracing::debug!(count = urls.len(), "awaiting documents");
            return Translation {
                status: TranslationStatus::AwaitingImports(urls),
                diagnostics,
            };
        }

        if !state.schemas_final {
            let (tables, sql) = missing_schemas(state, graph.documents());
            if !tables.is_empty() || !sql.is_empty() {
                tracing::debug!(tables = tables.len(), sql = sql.len(), "awaiting schemas");
                return Translation {
                    status: TranslationStatus::AwaitingSchemas { tables, sql },
                    diagnostics,
                };
            }
        }

        let mut models: BTreeMap<&str, Arc<ModelDef>> = BTreeMap::new();
        for url in graph.build_order() {
            let Some(document) = state.parsed(url) else {
                continue;
            };
            let mut builder = ModelBuilder::new(url, &state.schemas, &self.settings);
            for (written, target) in graph.imports_of(url) {
                if let Some(model) = models.get(target.as_str()) {
                    builder = builder.with_import(written.clone(), Arc::clone(model));
                }
            }
            let model = builder.build(document);
            diagnostics.extend(model.diagnostics.iter().cloned());
            models.insert(url, Arc::new(model));
        }

        let model = models
            .remove(state.root.as_str())
            .unwrap_or_else(|| Arc::new(ModelDef::new()));
        tracing::debug!(
            entities = model.entities.len(),
            diagnostics = diagnostics.len(),
            "translation done"
        );
        Translation {
            status: TranslationStatus::Done(model),
            diagnostics,
        }
    }
}

/// Schemas referenced by reachable documents and not yet supplied.
fn missing_schemas(
    state: &TranslationState,
    documents: &BTreeSet<String>,
) -> (Vec<TableRequest>, Vec<SqlRequest>) {
    let mut tables = BTreeSet::new();
    let mut sql = BTreeSet::new();
    for url in documents {
        let Some(document) = state.parsed(url) else {
            continue;
        };
        let refs = References::of(document);
        tables.extend(
            refs.tables
                .into_iter()
                .filter(|t| !state.schemas.has_table(&t.key())),
        );
        sql.extend(refs.sql.into_iter().filter(|s| !state.schemas.has_sql(&s.key())));
    }
    (tables.into_iter().collect(), sql.into_iter().collect())
}

fn document_location(url: &str) -> Location {
    Location::new(url, Span::default())
}

fn import_failed(url: &str, message: &str) -> SemanticError {
    SemanticError::ImportFailed {
        url: url.to_string(),
        message: message.to_string(),
    }
}
