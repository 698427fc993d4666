// tests/planner/expression_test.rs
use quarry::compile::{compile_query, CompileError, CompileOptions, QueryRef};
use quarry::config::Settings;
use quarry::dsl::ast::{
    AtomicType as AstType, BinaryOp, Document, Expr, ExprKind, FieldDecl, PickArm, PipeElement,
    QueryExpr, QueryItem, QueryStatement, SourceExpr, SourceProperty, SourceStatement,
    StageProperty, Statement, TimeUnit, UngroupKind,
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
            ("origin", AtomicType::String),
            ("distance", AtomicType::Number),
            ("dep_time", AtomicType::Timestamp),
        ]),
    );
    catalog
}

fn name(value: &str) -> Spanned<String> {
    Spanned::new(value.to_string(), Span::default())
}

fn build(stage: Vec<StageProperty>) -> ModelDef {
    let source = Statement::Source(SourceStatement {
        name: name("flights"),
        source: SourceExpr::table(None, "flights").refine(vec![SourceProperty::Measure {
            fields: vec![
                FieldDecl::new("flight_count", Expr::count()),
                FieldDecl::new(
                    "aa_flights",
                    Expr::count().filtered(vec![Expr::field("carrier").eq(Expr::string("AA"))]),
                ),
            ],
        }]),
        span: Span::default(),
    });
    let query = Statement::Query(QueryStatement {
        name: Some(name("q")),
        query: QueryExpr::from_source(SourceExpr::named("flights"), vec![PipeElement::stage(stage)]),
        span: Span::default(),
    });
    build_model(
        "file:///expressions.model",
        &Document {
            statements: vec![source, query],
        },
        &catalog(),
        &Settings::default(),
    )
}

fn compile(stage: Vec<StageProperty>, dialect: Dialect) -> Result<String, CompileError> {
    let model = build(stage);
    assert!(model.diagnostics.is_empty(), "{:?}", model.diagnostics);
    compile_query(
        &model,
        &QueryRef::named("q"),
        &CompileOptions::default().with_dialect(dialect),
    )
    .map(|compiled| compiled.sql)
}

fn project(name: &str, expr: Expr) -> Vec<StageProperty> {
    vec![StageProperty::Project {
        fields: vec![QueryItem::define(name, expr)],
    }]
}

fn grouped(dimensions: &[&str], aggregates: Vec<QueryItem>) -> Vec<StageProperty> {
    vec![
        StageProperty::GroupBy {
            fields: dimensions.iter().map(|d| QueryItem::reference(d)).collect(),
        },
        StageProperty::Aggregate { fields: aggregates },
    ]
}

// ============================================================================
// Scalars
// ============================================================================

#[test]
fn test_pick_becomes_case() {
    let pick = Expr::new(ExprKind::Pick {
        arms: vec![PickArm {
            value: Expr::string("long"),
            when: Expr::field("distance").gt(Expr::number(1000)),
        }],
        otherwise: Some(Box::new(Expr::string("short"))),
    });
    let sql = compile(project("haul", pick), Dialect::DuckDb).unwrap();
    assert!(
        sql.contains(r#"CASE WHEN "base"."distance" > 1000 THEN 'long' ELSE 'short' END AS "haul""#),
        "{sql}"
    );
}

#[test]
fn test_coalesce_operator() {
    let sql = compile(
        project(
            "origin_or_none",
            Expr::binary(BinaryOp::Coalesce, Expr::field("origin"), Expr::string("none")),
        ),
        Dialect::Postgres,
    )
    .unwrap();
    assert!(sql.contains(r#"COALESCE("base"."origin", 'none')"#), "{sql}");
}

#[test]
fn test_cast_and_safe_cast() {
    let sql = compile(
        project("n", Expr::field("carrier").cast(AstType::Number, false)),
        Dialect::DuckDb,
    )
    .unwrap();
    assert!(sql.contains(r#"CAST("base"."carrier" AS DOUBLE) AS "n""#), "{sql}");

    let sql = compile(
        project("n", Expr::field("carrier").cast(AstType::Number, true)),
        Dialect::BigQuery,
    )
    .unwrap();
    assert!(sql.contains("SAFE_CAST(`base`.`carrier` AS FLOAT64)"), "{sql}");
}

#[test]
fn test_safe_cast_unsupported_on_postgres() {
    let err = compile(
        project("n", Expr::field("carrier").cast(AstType::Number, true)),
        Dialect::Postgres,
    )
    .unwrap_err();
    assert_eq!(err.diagnostic().unwrap().kind, DiagnosticKind::DialectUnsupported);
}

#[test]
fn test_scalar_function_call() {
    let sql = compile(
        project("loud", Expr::call("upper", vec![Expr::field("carrier")])),
        Dialect::DuckDb,
    )
    .unwrap();
    assert!(sql.contains(r#"UPPER("base"."carrier") AS "loud""#), "{sql}");
}

#[test]
fn test_unknown_function_is_a_name_error() {
    let model = build(project("x", Expr::call("frobnicate", vec![])));
    assert!(model.is_invalid("q"));
    assert_eq!(model.diagnostics[0].kind, DiagnosticKind::NameResolution);
}

// ============================================================================
// Time
// ============================================================================

#[test]
fn test_truncated_dimension_groups_and_orders() {
    let sql = compile(
        vec![
            StageProperty::GroupBy {
                fields: vec![QueryItem::define(
                    "dep_month",
                    Expr::field("dep_time").truncate(TimeUnit::Month),
                )],
            },
            StageProperty::Aggregate {
                fields: vec![QueryItem::reference("flight_count")],
            },
        ],
        Dialect::DuckDb,
    )
    .unwrap();
    assert!(
        sql.contains(r#"DATE_TRUNC('month', "base"."dep_time") AS "dep_month""#),
        "{sql}"
    );
    assert!(sql.contains(r#"GROUP BY DATE_TRUNC('month', "base"."dep_time")"#), "{sql}");
    assert!(sql.contains(r#"ORDER BY "dep_month" DESC"#), "{sql}");
}

#[test]
fn test_truncating_a_string_is_a_type_error() {
    let model = build(project("bad", Expr::field("carrier").truncate(TimeUnit::Day)));
    assert!(model.is_invalid("q"));
    assert_eq!(model.diagnostics[0].kind, DiagnosticKind::Type);
}

// ============================================================================
// Aggregates
// ============================================================================

#[test]
fn test_filtered_measure_guards_its_rows() {
    let sql = compile(
        grouped(&["origin"], vec![QueryItem::reference("aa_flights")]),
        Dialect::DuckDb,
    )
    .unwrap();
    assert!(
        sql.contains(r#"COUNT(CASE WHEN "base"."carrier" = 'AA' THEN 1 END) AS "aa_flights""#),
        "{sql}"
    );
}

#[test]
fn test_all_joins_a_grand_total() {
    let sql = compile(
        grouped(
            &["carrier"],
            vec![
                QueryItem::reference("flight_count"),
                QueryItem::define(
                    "all_flights",
                    Expr::ungroup(UngroupKind::All, Expr::field("flight_count"), &[]),
                ),
            ],
        ),
        Dialect::DuckDb,
    )
    .unwrap();
    assert!(sql.starts_with("WITH \"__ungroup0\" AS ("), "{sql}");
    assert!(sql.contains(r#"LEFT JOIN "__ungroup0" AS "__u0""#), "{sql}");
    assert!(sql.contains(r#"MAX("__u0"."__value") AS "all_flights""#), "{sql}");
}

#[test]
fn test_exclude_keeps_the_other_dimensions() {
    let sql = compile(
        grouped(
            &["carrier", "origin"],
            vec![QueryItem::define(
                "origin_flights",
                Expr::ungroup(UngroupKind::Exclude, Expr::field("flight_count"), &["carrier"]),
            )],
        ),
        Dialect::DuckDb,
    )
    .unwrap();
    assert!(sql.contains(r#""base"."origin" AS "__p0""#), "{sql}");
    assert!(
        sql.contains(r#""base"."origin" IS NOT DISTINCT FROM "__u0"."__p0""#),
        "{sql}"
    );
}

#[test]
fn test_all_of_unknown_dimension_fails() {
    let model = build(grouped(
        &["carrier"],
        vec![QueryItem::define(
            "x",
            Expr::ungroup(UngroupKind::All, Expr::field("flight_count"), &["origin"]),
        )],
    ));
    let err = compile_query(&model, &QueryRef::named("q"), &CompileOptions::default()).unwrap_err();
    assert_eq!(err.diagnostic().unwrap().kind, DiagnosticKind::NameResolution);
}

#[test]
fn test_aggregate_in_where_is_rejected() {
    let model = build(vec![
        StageProperty::GroupBy {
            fields: vec![QueryItem::reference("carrier")],
        },
        StageProperty::Where {
            filters: vec![Expr::field("flight_count").gt(Expr::number(1))],
        },
    ]);
    assert!(model.is_invalid("q"));
    assert_eq!(model.diagnostics[0].kind, DiagnosticKind::Structural);
    assert!(model.diagnostics[0].message.contains("having:"));
}
