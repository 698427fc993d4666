// tests/lowering/model_builder_test.rs
use std::sync::Arc;

use quarry::config::Settings;
use quarry::dsl::ast::{
    Document, Expr, FieldDecl, ImportStatement, PipeElement, QueryExpr, QueryItem,
    QueryStatement, SourceExpr, SourceProperty, SourceStatement, SqlStatement, StageProperty,
    Statement,
};
use quarry::dsl::{DiagnosticKind, Span, Spanned};
use quarry::lowering::{build_model, ModelBuilder, SchemaCatalog};
use quarry::model::{AtomicType, ModelDef, NamedEntity, SourceOrigin, Stage, TableSchema};

const URL: &str = "file:///models/flights.model";

fn catalog() -> SchemaCatalog {
    let mut catalog = SchemaCatalog::new();
    catalog.add_table(
        "duckdb:flights",
        TableSchema::new([
            ("carrier", AtomicType::String),
            ("origin", AtomicType::String),
            ("distance", AtomicType::Number),
            ("dep_time", AtomicType::Timestamp),
        ]),
    );
    catalog.add_sql(
        "duckdb:recent",
        TableSchema::new([("carrier", AtomicType::String), ("n", AtomicType::Number)]),
    );
    catalog
}

fn name(value: &str) -> Spanned<String> {
    Spanned::new(value.to_string(), Span::default())
}

fn source(source_name: &str, expr: SourceExpr) -> Statement {
    Statement::Source(SourceStatement {
        name: name(source_name),
        source: expr,
        span: Span::default(),
    })
}

fn query(query_name: Option<&str>, expr: QueryExpr) -> Statement {
    Statement::Query(QueryStatement {
        name: query_name.map(name),
        query: expr,
        span: Span::default(),
    })
}

fn flights() -> Statement {
    source(
        "flights",
        SourceExpr::table(Some("duckdb"), "flights").refine(vec![SourceProperty::Measure {
            fields: vec![FieldDecl::new("flight_count", Expr::count())],
        }]),
    )
}

fn by_carrier() -> Vec<PipeElement> {
    vec![PipeElement::stage(vec![
        StageProperty::GroupBy {
            fields: vec![QueryItem::reference("carrier")],
        },
        StageProperty::Aggregate {
            fields: vec![QueryItem::reference("flight_count")],
        },
    ])]
}

fn build(statements: Vec<Statement>) -> ModelDef {
    build_model(URL, &Document { statements }, &catalog(), &Settings::default())
}

// ============================================================================
// Entities
// ============================================================================

#[test]
fn test_entities_are_recorded_in_document_order() {
    let model = build(vec![
        flights(),
        query(
            Some("by_carrier"),
            QueryExpr::from_source(SourceExpr::named("flights"), by_carrier()),
        ),
    ]);
    assert!(model.diagnostics.is_empty(), "{:?}", model.diagnostics);
    assert_eq!(model.exports, vec!["flights", "by_carrier"]);
    assert_eq!(model.entities["flights"].kind_name(), "source");
    assert_eq!(model.entities["by_carrier"].kind_name(), "query");
    assert_eq!(model.source("flights").unwrap().connection(), Some("duckdb"));
}

#[test]
fn test_redefinition_keeps_the_first_definition() {
    let model = build(vec![
        flights(),
        source("flights", SourceExpr::table(Some("duckdb"), "flights")),
    ]);
    assert_eq!(model.diagnostics.len(), 1);
    assert_eq!(model.diagnostics[0].kind, DiagnosticKind::NameResolution);
    assert_eq!(model.diagnostics[0].message, "cannot redefine 'flights'");
    assert!(model.source("flights").unwrap().field("flight_count").is_some());
}

#[test]
fn test_undefined_source_is_a_name_error() {
    let model = build(vec![query(
        Some("q"),
        QueryExpr::from_source(SourceExpr::named("nowhere"), by_carrier()),
    )]);
    assert!(model.is_invalid("q"));
    assert_eq!(model.diagnostics[0].kind, DiagnosticKind::NameResolution);
    assert_eq!(model.diagnostics[0].message, "source 'nowhere' is not defined");
}

#[test]
fn test_failure_stays_local_to_its_entity() {
    let model = build(vec![
        source("broken", SourceExpr::table(Some("duckdb"), "missing_table")),
        flights(),
        query(
            Some("by_carrier"),
            QueryExpr::from_source(SourceExpr::named("flights"), by_carrier()),
        ),
        query(
            Some("uses_broken"),
            QueryExpr::from_source(SourceExpr::named("broken"), by_carrier()),
        ),
    ]);
    assert!(model.has_errors());
    assert!(model.is_invalid("broken"));
    assert!(model.is_invalid("uses_broken"));
    assert!(model.query("by_carrier").is_some());
    // The dependent query fails quietly behind the missing schema.
    assert_eq!(model.diagnostics.len(), 1);
    assert_eq!(model.diagnostics[0].kind, DiagnosticKind::SchemaDependency);
}

#[test]
fn test_anonymous_queries_are_kept_in_order() {
    let model = build(vec![
        flights(),
        query(
            None,
            QueryExpr::from_source(SourceExpr::named("flights"), by_carrier()),
        ),
        query(
            None,
            QueryExpr::from_source(SourceExpr::named("nowhere"), by_carrier()),
        ),
    ]);
    assert_eq!(model.queries.len(), 2);
    assert!(model.queries[0].is_ok());
    assert!(model.queries[1].is_err());
    assert!(model.exports.iter().all(|name| name == "flights"));
}

// ============================================================================
// Queries built on queries
// ============================================================================

#[test]
fn test_query_refinement_appends_stages() {
    let refined = QueryExpr::from_query(
        "by_carrier",
        vec![PipeElement::stage(vec![StageProperty::Project {
            fields: vec![QueryItem::reference("carrier")],
        }])],
    );
    let model = build(vec![
        flights(),
        query(
            Some("by_carrier"),
            QueryExpr::from_source(SourceExpr::named("flights"), by_carrier()),
        ),
        query(Some("carriers_only"), refined),
    ]);
    assert!(model.diagnostics.is_empty(), "{:?}", model.diagnostics);
    let stages = &model.query("carriers_only").unwrap().pipeline.stages;
    assert_eq!(stages.len(), 2);
    assert!(matches!(stages[0], Stage::Reduce(_)));
    assert!(matches!(stages[1], Stage::Project(_)));
}

#[test]
fn test_source_from_query_exposes_output_columns() {
    let model = build(vec![
        flights(),
        query(
            Some("by_carrier"),
            QueryExpr::from_source(SourceExpr::named("flights"), by_carrier()),
        ),
        source("carrier_stats", SourceExpr::named("by_carrier")),
    ]);
    let stats = model.source("carrier_stats").unwrap();
    assert!(matches!(stats.origin, SourceOrigin::Query(_)));
    let names: Vec<_> = stats.fields.names().collect();
    assert_eq!(names, vec!["carrier", "flight_count"]);
}

// ============================================================================
// SQL blocks
// ============================================================================

fn sql_block(block_name: &str, select: &str) -> Statement {
    Statement::Sql(SqlStatement {
        name: name(block_name),
        connection: Some("duckdb".into()),
        select: select.into(),
        span: Span::default(),
    })
}

#[test]
fn test_sql_block_becomes_a_source() {
    let model = build(vec![
        sql_block("recent", "SELECT carrier, COUNT(*) AS n FROM flights GROUP BY 1"),
        source(
            "recent_flights",
            SourceExpr::FromSql { name: name("recent") },
        ),
    ]);
    assert!(model.diagnostics.is_empty(), "{:?}", model.diagnostics);
    assert!(matches!(model.entities["recent"], NamedEntity::Sql(_)));
    let recent = model.source("recent_flights").unwrap();
    assert!(matches!(recent.origin, SourceOrigin::Sql(_)));
    assert_eq!(recent.fields.names().collect::<Vec<_>>(), vec!["carrier", "n"]);
}

#[test]
fn test_sql_block_without_schema_is_invalid() {
    let model = build(vec![sql_block("unknown", "SELECT 1 AS x")]);
    assert!(model.is_invalid("unknown"));
    assert_eq!(model.diagnostics[0].kind, DiagnosticKind::SchemaDependency);
}

#[test]
fn test_unparseable_sql_block_is_only_a_warning() {
    let model = build(vec![sql_block("recent", "SELEC carrier FORM flights")]);
    assert!(!model.has_errors());
    assert_eq!(model.diagnostics.len(), 1);
    assert!(!model.diagnostics[0].is_error());
    assert!(model.sql_block("recent").is_some());
}

// ============================================================================
// Imports
// ============================================================================

#[test]
fn test_imported_entities_are_visible() {
    let schemas = catalog();
    let settings = Settings::default();
    let base = build_model(
        "file:///models/base.model",
        &Document {
            statements: vec![flights()],
        },
        &schemas,
        &settings,
    );
    let document = Document {
        statements: vec![
            Statement::Import(ImportStatement {
                url: "base.model".into(),
                span: Span::default(),
            }),
            query(
                Some("by_carrier"),
                QueryExpr::from_source(SourceExpr::named("flights"), by_carrier()),
            ),
        ],
    };
    let model = ModelBuilder::new(URL, &schemas, &settings)
        .with_import("base.model", Arc::new(base))
        .build(&document);
    assert!(model.diagnostics.is_empty(), "{:?}", model.diagnostics);
    assert!(model.source("flights").is_some());
    assert!(model.query("by_carrier").is_some());
}

#[test]
fn test_import_collision_is_reported() {
    let schemas = catalog();
    let settings = Settings::default();
    let base = build_model(
        "file:///models/base.model",
        &Document {
            statements: vec![flights()],
        },
        &schemas,
        &settings,
    );
    let document = Document {
        statements: vec![
            flights(),
            Statement::Import(ImportStatement {
                url: "base.model".into(),
                span: Span::default(),
            }),
        ],
    };
    let model = ModelBuilder::new(URL, &schemas, &settings)
        .with_import("base.model", Arc::new(base))
        .build(&document);
    assert_eq!(model.diagnostics.len(), 1);
    assert!(model.diagnostics[0].message.contains("collides"));
    assert_eq!(model.diagnostics[0].location.url, URL);
}
