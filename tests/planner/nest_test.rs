// tests/planner/nest_test.rs
use quarry::compile::{compile_query, CompileError, CompileOptions, CompiledQuery, QueryRef};
use quarry::config::Settings;
use quarry::dsl::ast::{
    Document, Expr, FieldDecl, NestItem, PipeElement, QueryExpr, QueryItem, QueryStatement,
    SourceExpr, SourceProperty, SourceStatement, StageProperty, Statement, ViewDecl,
};
use quarry::dsl::{DiagnosticKind, Span, Spanned};
use quarry::lowering::{build_model, SchemaCatalog};
use quarry::model::{AtomicType, ModelDef, ResultType, TableSchema};
use quarry::sql::Dialect;

fn catalog() -> SchemaCatalog {
    let mut catalog = SchemaCatalog::new();
    catalog.add_table(
        "flights",
        TableSchema::new([
            ("carrier", AtomicType::String),
            ("origin", AtomicType::String),
            ("destination", AtomicType::String),
            ("distance", AtomicType::Number),
        ]),
    );
    catalog
}

fn name(value: &str) -> Spanned<String> {
    Spanned::new(value.to_string(), Span::default())
}

fn group(dimension: &str) -> Vec<StageProperty> {
    vec![
        StageProperty::GroupBy {
            fields: vec![QueryItem::reference(dimension)],
        },
        StageProperty::Aggregate {
            fields: vec![QueryItem::reference("flight_count")],
        },
    ]
}

fn flights() -> Statement {
    Statement::Source(SourceStatement {
        name: name("flights"),
        source: SourceExpr::table(None, "flights").refine(vec![
            SourceProperty::Measure {
                fields: vec![FieldDecl::new("flight_count", Expr::count())],
            },
            SourceProperty::View {
                views: vec![ViewDecl {
                    name: name("by_destination"),
                    pipeline: vec![PipeElement::stage(group("destination"))],
                    span: Span::default(),
                }],
            },
        ]),
        span: Span::default(),
    })
}

fn build(stage: Vec<StageProperty>) -> ModelDef {
    let query = Statement::Query(QueryStatement {
        name: Some(name("q")),
        query: QueryExpr::from_source(SourceExpr::named("flights"), vec![PipeElement::stage(stage)]),
        span: Span::default(),
    });
    build_model(
        "file:///nest.model",
        &Document {
            statements: vec![flights(), query],
        },
        &catalog(),
        &Settings::default(),
    )
}

fn compile(stage: Vec<StageProperty>, dialect: Dialect) -> Result<CompiledQuery, CompileError> {
    let model = build(stage);
    assert!(model.diagnostics.is_empty(), "{:?}", model.diagnostics);
    compile_query(
        &model,
        &QueryRef::named("q"),
        &CompileOptions::default().with_dialect(dialect),
    )
}

fn by_carrier_with(nest: NestItem) -> Vec<StageProperty> {
    let mut stage = group("carrier");
    stage.push(StageProperty::Nest {
        entries: vec![nest],
    });
    stage
}

fn by_origin() -> NestItem {
    NestItem::define("by_origin", vec![PipeElement::stage(group("origin"))])
}

// ============================================================================
// Shape
// ============================================================================

#[test]
fn test_nest_is_collected_from_its_own_cte() {
    let sql = compile(by_carrier_with(by_origin()), Dialect::DuckDb)
        .unwrap()
        .sql;
    assert!(sql.starts_with("WITH \"__rows0\" AS ("), "{sql}");
    assert!(sql.contains("\"__nest"), "{sql}");
    assert!(sql.contains("LIST(STRUCT_PACK("), "{sql}");
    assert!(sql.contains("AS \"__row_number\""), "{sql}");
    assert!(sql.contains(r#"FROM "__rows0" AS "__r""#), "{sql}");
    assert!(sql.contains(r#"IS NOT DISTINCT FROM "__r"."carrier""#), "{sql}");
}

#[test]
fn test_nested_measures_aggregate_input_rows() {
    let sql = compile(by_carrier_with(by_origin()), Dialect::DuckDb)
        .unwrap()
        .sql;
    // Both levels count flights straight from the table.
    assert_eq!(sql.matches(r#"FROM "flights" AS "base""#).count(), 2, "{sql}");
    assert!(sql.contains(r#"GROUP BY "base"."carrier", "base"."origin""#), "{sql}");
}

#[test]
fn test_result_schema_marks_nested_fields() {
    let compiled = compile(by_carrier_with(by_origin()), Dialect::Postgres).unwrap();
    assert_eq!(
        compiled.result_schema.names(),
        vec!["carrier", "flight_count", "by_origin"]
    );
    let nested = compiled.result_schema.field("by_origin").unwrap();
    assert!(nested.is_nested());
    let ResultType::Repeated(inner) = &nested.ty else {
        panic!("expected a repeated field");
    };
    let inner: Vec<_> = inner.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(inner, vec!["origin", "flight_count"]);
}

#[test]
fn test_nest_limit_filters_row_numbers() {
    let mut inner = group("origin");
    inner.push(StageProperty::Limit {
        count: 3,
        span: Span::default(),
    });
    let sql = compile(
        by_carrier_with(NestItem::define("top_origins", vec![PipeElement::stage(inner)])),
        Dialect::Postgres,
    )
    .unwrap()
    .sql;
    assert!(sql.contains(r#""__row_number" <= 3"#), "{sql}");
    assert!(sql.contains("JSONB_AGG("), "{sql}");
}

#[test]
fn test_nest_can_reference_a_view() {
    let compiled = compile(
        by_carrier_with(NestItem::reference("by_destination")),
        Dialect::Snowflake,
    )
    .unwrap();
    assert!(compiled.sql.contains("OBJECT_CONSTRUCT_KEEP_NULL("), "{}", compiled.sql);
    assert!(compiled.result_schema.field("by_destination").unwrap().is_nested());
}

#[test]
fn test_outer_filters_reach_the_nest() {
    let mut stage = by_carrier_with(by_origin());
    stage.push(StageProperty::Where {
        filters: vec![Expr::field("distance").gt(Expr::number(500))],
    });
    let sql = compile(stage, Dialect::DuckDb).unwrap().sql;
    assert_eq!(sql.matches(r#""base"."distance" > 500"#).count(), 2, "{sql}");
}

// ============================================================================
// Dialect support
// ============================================================================

#[test]
fn test_mysql_cannot_nest() {
    let err = compile(by_carrier_with(by_origin()), Dialect::MySql).unwrap_err();
    let diag = err.diagnostic().unwrap();
    assert_eq!(diag.kind, DiagnosticKind::DialectUnsupported);
}

#[test]
fn test_bigquery_nest_is_an_array_subquery() {
    let sql = compile(by_carrier_with(by_origin()), Dialect::BigQuery)
        .unwrap()
        .sql;
    assert!(sql.contains("ARRAY(SELECT AS STRUCT "), "{sql}");
    assert!(sql.contains("`__r`"), "{sql}");
}

// ============================================================================
// Nested pipelines
// ============================================================================

fn origins_by_count(first_limit: u64) -> NestItem {
    let mut first = group("origin");
    first.push(StageProperty::Limit {
        count: first_limit,
        span: Span::default(),
    });
    let second = vec![
        StageProperty::GroupBy {
            fields: vec![QueryItem::reference("flight_count")],
        },
        StageProperty::Aggregate {
            fields: vec![QueryItem::define("origins", Expr::count())],
        },
    ];
    NestItem::define(
        "origins_by_count",
        vec![PipeElement::stage(first), PipeElement::stage(second)],
    )
}

#[test]
fn test_later_nest_stages_read_the_stage_before() {
    let compiled = compile(by_carrier_with(origins_by_count(5)), Dialect::DuckDb).unwrap();
    let sql = &compiled.sql;
    // The second stage regroups the first stage's rows per carrier.
    assert!(sql.contains(r#"FROM "__nest2" AS "base""#), "{sql}");
    assert!(sql.contains(r#""base"."__p0" AS "__p0""#), "{sql}");
    assert!(sql.contains(r#""base"."__row_number" <= 5"#), "{sql}");
    assert!(sql.contains(r#"FROM "__nest4" AS "__n2""#), "{sql}");

    let nested = compiled.result_schema.field("origins_by_count").unwrap();
    let ResultType::Repeated(inner) = &nested.ty else {
        panic!("expected a repeated field");
    };
    let inner: Vec<_> = inner.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(inner, vec!["flight_count", "origins"]);
}

#[test]
fn test_nest_limit_beyond_i64_is_rejected() {
    let mut inner = group("origin");
    inner.push(StageProperty::Limit {
        count: u64::MAX,
        span: Span::default(),
    });
    let err = compile(
        by_carrier_with(NestItem::define("top_origins", vec![PipeElement::stage(inner)])),
        Dialect::Postgres,
    )
    .unwrap_err();
    let diag = err.diagnostic().unwrap();
    assert_eq!(diag.kind, DiagnosticKind::Structural);
    assert!(diag.message.contains("out of range"), "{}", diag.message);
}
