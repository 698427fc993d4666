// tests/planner/index_sample_test.rs
use quarry::compile::{compile_query, CompileError, CompileOptions, CompiledQuery, QueryRef};
use quarry::config::Settings;
use quarry::dsl::ast::{
    Document, Expr, FieldDecl, PipeElement, QueryExpr, QueryItem, QueryStatement, SampleSpec,
    SourceExpr, SourceProperty, SourceStatement, StageProperty, Statement,
};
use quarry::dsl::{DiagnosticKind, Span, Spanned};
use quarry::lowering::{build_model, SchemaCatalog};
use quarry::model::{AtomicType, ModelDef, TableSchema};
use quarry::sql::Dialect;

fn catalog() -> SchemaCatalog {
    let mut catalog = SchemaCatalog::new();
    catalog.add_table(
        "flights",
        TableSchema::new([
            ("carrier", AtomicType::String),
            ("distance", AtomicType::Number),
            ("cancelled", AtomicType::Boolean),
        ]),
    );
    catalog
}

fn name(value: &str) -> Spanned<String> {
    Spanned::new(value.to_string(), Span::default())
}

fn build(pipeline: Vec<PipeElement>) -> ModelDef {
    let source = Statement::Source(SourceStatement {
        name: name("flights"),
        source: SourceExpr::table(None, "flights").refine(vec![SourceProperty::Measure {
            fields: vec![
                FieldDecl::new("flight_count", Expr::count()),
                FieldDecl::new("total_distance", Expr::sum(Expr::field("distance"))),
            ],
        }]),
        span: Span::default(),
    });
    let query = Statement::Query(QueryStatement {
        name: Some(name("q")),
        query: QueryExpr::from_source(SourceExpr::named("flights"), pipeline),
        span: Span::default(),
    });
    build_model(
        "file:///index.model",
        &Document {
            statements: vec![source, query],
        },
        &catalog(),
        &Settings::default(),
    )
}

fn compile(pipeline: Vec<PipeElement>, dialect: Dialect) -> Result<CompiledQuery, CompileError> {
    let model = build(pipeline);
    assert!(model.diagnostics.is_empty(), "{:?}", model.diagnostics);
    compile_query(
        &model,
        &QueryRef::named("q"),
        &CompileOptions::default().with_dialect(dialect),
    )
}

fn index(fields: &[&str], by: Option<&str>) -> StageProperty {
    StageProperty::Index {
        fields: fields.iter().map(|f| QueryItem::reference(f)).collect(),
        by: by.map(name),
    }
}

fn sample(spec: SampleSpec) -> StageProperty {
    StageProperty::Sample {
        sample: spec,
        span: Span::default(),
    }
}

fn carriers() -> StageProperty {
    StageProperty::Project {
        fields: vec![QueryItem::reference("carrier")],
    }
}

// ============================================================================
// index:
// ============================================================================

#[test]
fn test_index_unions_one_select_per_field() {
    let compiled = compile(
        vec![PipeElement::stage(vec![index(&["carrier", "distance"], None)])],
        Dialect::DuckDb,
    )
    .unwrap();
    let sql = &compiled.sql;
    assert!(sql.starts_with("WITH \"__index0\" AS ("), "{sql}");
    assert_eq!(sql.matches("UNION ALL").count(), 1, "{sql}");
    assert!(sql.contains(r#"'carrier' AS "fieldPath""#), "{sql}");
    assert!(sql.contains(r#"'distance' AS "fieldPath""#), "{sql}");
    assert!(sql.contains(r#"COUNT(1) AS "weight""#), "{sql}");
    assert!(sql.ends_with(r#"ORDER BY "weight" DESC NULLS LAST"#), "{sql}");
    assert_eq!(
        compiled.result_schema.names(),
        vec!["fieldPath", "fieldValue", "weight"]
    );
}

#[test]
fn test_index_groups_strings_and_ranges_numbers() {
    let sql = compile(
        vec![PipeElement::stage(vec![index(&["carrier", "distance"], None)])],
        Dialect::Postgres,
    )
    .unwrap()
    .sql;
    assert!(sql.contains(r#""base"."carrier" IS NOT NULL"#), "{sql}");
    assert!(sql.contains(r#"GROUP BY "base"."carrier""#), "{sql}");
    assert!(sql.contains(r#"MIN("base"."distance")"#), "{sql}");
    assert!(sql.contains("' to '"), "{sql}");
    assert!(!sql.contains(r#"GROUP BY "base"."distance""#), "{sql}");
}

#[test]
fn test_index_weight_measure_and_limit() {
    let sql = compile(
        vec![PipeElement::stage(vec![
            index(&["carrier"], Some("total_distance")),
            StageProperty::Limit {
                count: 10,
                span: Span::default(),
            },
        ])],
        Dialect::DuckDb,
    )
    .unwrap()
    .sql;
    assert!(
        sql.contains(r#"COALESCE(SUM("base"."distance"), 0) AS "weight""#),
        "{sql}"
    );
    assert!(sql.ends_with("LIMIT 10"), "{sql}");
}

#[test]
fn test_index_wildcard_expands_dimensions() {
    let compiled = compile(
        vec![PipeElement::stage(vec![StageProperty::Index {
            fields: vec![QueryItem::wildcard()],
            by: None,
        }])],
        Dialect::DuckDb,
    )
    .unwrap();
    assert_eq!(compiled.sql.matches("UNION ALL").count(), 2, "{}", compiled.sql);
}

#[test]
fn test_index_weight_must_be_a_measure() {
    let model = build(vec![PipeElement::stage(vec![index(&["carrier"], Some("distance"))])]);
    assert!(model.is_invalid("q"));
    assert_eq!(model.diagnostics[0].kind, DiagnosticKind::Type);
}

// ============================================================================
// sample:
// ============================================================================

#[test]
fn test_row_sample_wraps_the_table() {
    let sql = compile(
        vec![PipeElement::stage(vec![
            carriers(),
            sample(SampleSpec::Rows { rows: 500 }),
        ])],
        Dialect::DuckDb,
    )
    .unwrap()
    .sql;
    assert!(
        sql.contains(r#"FROM (SELECT * FROM "flights" USING SAMPLE 500 ROWS) AS "base""#),
        "{sql}"
    );
}

#[test]
fn test_default_sample_uses_dialect_default() {
    let sql = compile(
        vec![PipeElement::stage(vec![
            carriers(),
            sample(SampleSpec::Enabled { enabled: true }),
        ])],
        Dialect::BigQuery,
    )
    .unwrap()
    .sql;
    assert!(sql.contains("TABLESAMPLE SYSTEM (10 PERCENT)"), "{sql}");
}

#[test]
fn test_disabled_sample_reads_the_table() {
    let sql = compile(
        vec![PipeElement::stage(vec![
            carriers(),
            sample(SampleSpec::Enabled { enabled: false }),
        ])],
        Dialect::DuckDb,
    )
    .unwrap()
    .sql;
    assert!(sql.contains(r#"FROM "flights" AS "base""#), "{sql}");
}

#[test]
fn test_percent_sample_on_postgres() {
    let sql = compile(
        vec![PipeElement::stage(vec![
            carriers(),
            sample(SampleSpec::Percent { percent: 10.0 }),
        ])],
        Dialect::Postgres,
    )
    .unwrap()
    .sql;
    assert!(sql.contains("WHERE RANDOM() < 0.1"), "{sql}");
}

#[test]
fn test_row_sample_unsupported_on_bigquery() {
    let err = compile(
        vec![PipeElement::stage(vec![
            carriers(),
            sample(SampleSpec::Rows { rows: 100 }),
        ])],
        Dialect::BigQuery,
    )
    .unwrap_err();
    assert_eq!(err.diagnostic().unwrap().kind, DiagnosticKind::DialectUnsupported);
}

#[test]
fn test_sample_percent_out_of_range() {
    let model = build(vec![PipeElement::stage(vec![
        carriers(),
        sample(SampleSpec::Percent { percent: 150.0 }),
    ])]);
    assert!(model.is_invalid("q"));
    assert_eq!(model.diagnostics[0].kind, DiagnosticKind::Structural);
}

#[test]
fn test_sample_only_in_first_stage() {
    let model = build(vec![
        PipeElement::stage(vec![carriers()]),
        PipeElement::stage(vec![carriers(), sample(SampleSpec::Rows { rows: 10 })]),
    ]);
    assert!(model.is_invalid("q"));
    assert_eq!(model.diagnostics[0].kind, DiagnosticKind::Structural);
}
