// tests/translation/translator_test.rs
use quarry::compile::{compile_query, CompileOptions, QueryRef};
use quarry::config::Settings;
use quarry::dsl::ast::{
    Document, Expr, FieldDecl, ImportStatement, PipeElement, QueryExpr, QueryItem,
    QueryStatement, SourceExpr, SourceProperty, SourceStatement, SqlStatement, StageProperty,
    Statement,
};
use quarry::dsl::{DiagnosticKind, JsonParseTree, Span, Spanned};
use quarry::model::{AtomicType, TableSchema};
use quarry::translation::{TranslationState, Translator, UpdateData};

const ROOT: &str = "file:///models/root.model";
const BASE: &str = "file:///models/base.model";

fn translator() -> Translator {
    Translator::new(JsonParseTree, Settings::default())
}

fn text(statements: Vec<Statement>) -> String {
    serde_json::to_string(&Document { statements }).unwrap()
}

fn name(value: &str) -> Spanned<String> {
    Spanned::new(value.to_string(), Span::default())
}

fn import(url: &str) -> Statement {
    Statement::Import(ImportStatement {
        url: url.into(),
        span: Span::default(),
    })
}

fn flights_source() -> Statement {
    Statement::Source(SourceStatement {
        name: name("flights"),
        source: SourceExpr::table(Some("duckdb"), "flights").refine(vec![
            SourceProperty::Measure {
                fields: vec![FieldDecl::new("flight_count", Expr::count())],
            },
        ]),
        span: Span::default(),
    })
}

fn by_carrier() -> Statement {
    Statement::Query(QueryStatement {
        name: Some(name("by_carrier")),
        query: QueryExpr::from_source(
            SourceExpr::named("flights"),
            vec![PipeElement::stage(vec![
                StageProperty::GroupBy {
                    fields: vec![QueryItem::reference("carrier")],
                },
                StageProperty::Aggregate {
                    fields: vec![QueryItem::reference("flight_count")],
                },
            ])],
        ),
        span: Span::default(),
    })
}

fn flights_schema() -> TableSchema {
    TableSchema::new([
        ("carrier", AtomicType::String),
        ("distance", AtomicType::Number),
    ])
}

fn supply_documents(translator: &Translator) -> TranslationState {
    let state = translator.start(ROOT);
    let state = translator.update(
        state,
        UpdateData::new().with_url(ROOT, text(vec![import("base.model"), by_carrier()])),
    );
    translator.update(
        state,
        UpdateData::new().with_url(BASE, text(vec![flights_source()])),
    )
}

// ============================================================================
// Request / resume
// ============================================================================

#[test]
fn test_imports_are_requested_after_the_root() {
    let translator = translator();
    let state = translator.start(ROOT);
    assert_eq!(translator.translate(&state).needed_urls(), &[ROOT.to_string()]);

    let state = translator.update(
        state,
        UpdateData::new().with_url(ROOT, text(vec![import("base.model"), by_carrier()])),
    );
    let result = translator.translate(&state);
    assert_eq!(result.needed_urls(), &[BASE.to_string()]);
    assert!(result.needed_tables().is_empty());
}

#[test]
fn test_schemas_of_imported_documents_are_requested() {
    let translator = translator();
    let state = supply_documents(&translator);
    let result = translator.translate(&state);
    assert!(!result.is_final());
    let keys: Vec<String> = result.needed_tables().iter().map(|t| t.key()).collect();
    assert_eq!(keys, vec!["duckdb:flights"]);
}

#[test]
fn test_finished_model_compiles() {
    let translator = translator();
    let state = translator.update(
        supply_documents(&translator),
        UpdateData::new().with_table("duckdb:flights", flights_schema()),
    );
    let result = translator.translate(&state);
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    let model = result.into_model().unwrap();
    assert!(model.source("flights").is_some());

    let compiled = compile_query(
        &model,
        &QueryRef::named("by_carrier"),
        &CompileOptions::default(),
    )
    .unwrap();
    assert!(compiled.sql.contains("GROUP BY"), "{}", compiled.sql);
    assert_eq!(compiled.result_schema.fields.len(), 2);
}

#[test]
fn test_supplied_documents_are_not_requested_again() {
    let translator = translator();
    let state = supply_documents(&translator);
    let first = translator.translate(&state);

    // Supplying the root a second time changes nothing.
    let state = translator.update(state, UpdateData::new().with_url(ROOT, "not json"));
    let second = translator.translate(&state);
    assert_eq!(first.needed_tables(), second.needed_tables());
    assert!(second.diagnostics.is_empty());
}

// ============================================================================
// SQL blocks
// ============================================================================

#[test]
fn test_sql_block_schema_is_requested_with_its_select() {
    let translator = translator();
    let sql = Statement::Sql(SqlStatement {
        name: name("recent"),
        connection: Some("duckdb".into()),
        select: "SELECT carrier FROM flights".into(),
        span: Span::default(),
    });
    let state = translator.update(
        translator.start(ROOT),
        UpdateData::new().with_url(ROOT, text(vec![sql])),
    );
    let result = translator.translate(&state);
    assert_eq!(result.needed_sql().len(), 1);
    assert_eq!(result.needed_sql()[0].key(), "duckdb:recent");
    assert_eq!(result.needed_sql()[0].select, "SELECT carrier FROM flights");

    let state = translator.update(
        state,
        UpdateData::new().with_sql_schema(
            "duckdb:recent",
            TableSchema::new([("carrier", AtomicType::String)]),
        ),
    );
    let model = translator.translate(&state).into_model().unwrap();
    assert!(model.sql_block("recent").is_some());
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_unreadable_import_fails_only_its_dependents() {
    let translator = translator();
    let local = Statement::Source(SourceStatement {
        name: name("local"),
        source: SourceExpr::table(Some("duckdb"), "flights"),
        span: Span::default(),
    });
    let state = translator.update(
        translator.start(ROOT),
        UpdateData::new()
            .with_url(ROOT, text(vec![import("base.model"), local, by_carrier()]))
            .with_url_error(BASE, "permission denied")
            .with_table("duckdb:flights", flights_schema()),
    );
    let result = translator.translate(&state);
    assert!(result.is_final());
    assert_eq!(result.diagnostics[0].kind, DiagnosticKind::SchemaDependency);
    assert_eq!(result.diagnostics[0].location.url, ROOT);

    let model = result.into_model().unwrap();
    assert!(model.source("local").is_some());
    assert!(model.is_invalid("by_carrier"));
}

#[test]
fn test_failed_table_lookup_is_reported() {
    let translator = translator();
    let state = translator.update(
        supply_documents(&translator),
        UpdateData::new().with_table_error("duckdb:flights", "no such table"),
    );
    let result = translator.translate(&state);
    assert!(result.is_final());
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::SchemaDependency && d.location.url == BASE));
}

#[test]
fn test_import_cycle_still_finishes() {
    let translator = translator();
    let state = translator.update(
        translator.start(ROOT),
        UpdateData::new()
            .with_url(ROOT, text(vec![import("base.model")]))
            .with_url(BASE, text(vec![import("root.model")])),
    );
    let result = translator.translate(&state);
    assert!(result.is_final());
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::Structural));
}
