// tests/planner/pipeline_test.rs
use insta::assert_snapshot;
use quarry::compile::{compile_query, CompileOptions, QueryRef};
use quarry::config::Settings;
use quarry::dsl::ast::{
    Document, Expr, FieldDecl, OrderByItem, PipeElement, QueryExpr, QueryItem, QueryStatement,
    SourceExpr, SourceProperty, SourceStatement, StageProperty, Statement,
};
use quarry::dsl::{Span, Spanned};
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

fn flights() -> Statement {
    Statement::Source(SourceStatement {
        name: name("flights"),
        source: SourceExpr::table(None, "flights").refine(vec![SourceProperty::Measure {
            fields: vec![
                FieldDecl::new("flight_count", Expr::count()),
                FieldDecl::new("total_distance", Expr::sum(Expr::field("distance"))),
            ],
        }]),
        span: Span::default(),
    })
}

fn model(pipeline: Vec<PipeElement>) -> ModelDef {
    let query = Statement::Query(QueryStatement {
        name: Some(name("q")),
        query: QueryExpr::from_source(SourceExpr::named("flights"), pipeline),
        span: Span::default(),
    });
    let document = Document {
        statements: vec![flights(), query],
    };
    let model = build_model(
        "file:///pipeline.model",
        &document,
        &catalog(),
        &Settings::default(),
    );
    assert!(model.diagnostics.is_empty(), "{:?}", model.diagnostics);
    model
}

fn sql(pipeline: Vec<PipeElement>, dialect: Dialect) -> String {
    compile_query(
        &model(pipeline),
        &QueryRef::named("q"),
        &CompileOptions::default().with_dialect(dialect),
    )
    .unwrap()
    .sql
}

fn by_carrier(extra: Vec<StageProperty>) -> PipeElement {
    let mut properties = vec![
        StageProperty::GroupBy {
            fields: vec![QueryItem::reference("carrier")],
        },
        StageProperty::Aggregate {
            fields: vec![QueryItem::reference("flight_count")],
        },
    ];
    properties.extend(extra);
    PipeElement::stage(properties)
}

// ============================================================================
// Single stage
// ============================================================================

#[test]
fn test_reduce_stage_sql() {
    assert_snapshot!(sql(vec![by_carrier(vec![])], Dialect::DuckDb), @r#"
    SELECT
      "base"."carrier" AS "carrier",
      COUNT(1) AS "flight_count"
    FROM "flights" AS "base"
    GROUP BY "base"."carrier"
    ORDER BY "flight_count" DESC NULLS LAST
    "#);
}

#[test]
fn test_mysql_drops_nulls_ordering() {
    let sql = sql(vec![by_carrier(vec![])], Dialect::MySql);
    assert!(sql.contains("ORDER BY `flight_count` DESC"), "{sql}");
    assert!(!sql.contains("NULLS"), "{sql}");
}

#[test]
fn test_time_dimension_orders_first() {
    let sql = sql(
        vec![PipeElement::stage(vec![
            StageProperty::GroupBy {
                fields: vec![QueryItem::reference("dep_time")],
            },
            StageProperty::Aggregate {
                fields: vec![QueryItem::reference("flight_count")],
            },
        ])],
        Dialect::Postgres,
    );
    assert!(sql.contains(r#"ORDER BY "dep_time" DESC NULLS LAST"#), "{sql}");
}

#[test]
fn test_where_and_having() {
    let sql = sql(
        vec![by_carrier(vec![
            StageProperty::Where {
                filters: vec![Expr::field("origin").eq(Expr::string("SFO"))],
            },
            StageProperty::Having {
                filters: vec![Expr::field("flight_count").gt(Expr::number(10))],
            },
        ])],
        Dialect::DuckDb,
    );
    assert!(sql.contains(r#"WHERE "base"."origin" = 'SFO'"#), "{sql}");
    assert!(sql.contains("HAVING COUNT(1) > 10"), "{sql}");
}

#[test]
fn test_scalar_having_becomes_where() {
    let sql = sql(
        vec![by_carrier(vec![StageProperty::Having {
            filters: vec![Expr::field("carrier").eq(Expr::string("AA"))],
        }])],
        Dialect::DuckDb,
    );
    assert!(sql.contains(r#"WHERE "base"."carrier" = 'AA'"#), "{sql}");
    assert!(!sql.contains("HAVING"), "{sql}");
}

#[test]
fn test_explicit_order_and_limit() {
    let sql = sql(
        vec![by_carrier(vec![
            StageProperty::OrderBy {
                items: vec![OrderByItem::asc("carrier")],
            },
            StageProperty::Limit {
                count: 5,
                span: Span::default(),
            },
        ])],
        Dialect::Postgres,
    );
    assert!(sql.ends_with("ORDER BY \"carrier\" ASC\nLIMIT 5"), "{sql}");
}

#[test]
fn test_top_sets_limit() {
    let sql = sql(
        vec![by_carrier(vec![StageProperty::Top {
            count: 3,
            by: None,
            span: Span::default(),
        }])],
        Dialect::DuckDb,
    );
    assert!(sql.ends_with("LIMIT 3"), "{sql}");
}

#[test]
fn test_project_has_no_group_by() {
    let sql = sql(
        vec![PipeElement::stage(vec![StageProperty::Project {
            fields: vec![
                QueryItem::reference("carrier"),
                QueryItem::define(
                    "km",
                    Expr::binary(
                        quarry::dsl::ast::BinaryOp::Mul,
                        Expr::field("distance"),
                        Expr::number(1.609),
                    ),
                ),
            ],
        }])],
        Dialect::DuckDb,
    );
    assert!(sql.contains(r#""base"."distance" * 1.609 AS "km""#), "{sql}");
    assert!(!sql.contains("GROUP BY"), "{sql}");
    assert!(!sql.contains("ORDER BY"), "{sql}");
}

// ============================================================================
// Multiple stages
// ============================================================================

#[test]
fn test_stages_chain_through_ctes() {
    let sql = sql(
        vec![
            by_carrier(vec![]),
            PipeElement::stage(vec![
                StageProperty::Project {
                    fields: vec![QueryItem::reference("carrier")],
                },
                StageProperty::Where {
                    filters: vec![Expr::field("flight_count").gt(Expr::number(100))],
                },
            ]),
        ],
        Dialect::DuckDb,
    );
    assert!(sql.starts_with("WITH \"__stage0\" AS ("), "{sql}");
    assert!(sql.contains(r#"FROM "__stage0" AS "base""#), "{sql}");
    assert!(sql.contains(r#"WHERE "base"."flight_count" > 100"#), "{sql}");
}

#[test]
fn test_later_stage_can_aggregate_earlier_output() {
    let sql = sql(
        vec![
            by_carrier(vec![]),
            PipeElement::stage(vec![StageProperty::Aggregate {
                fields: vec![QueryItem::define(
                    "busiest",
                    Expr::aggregate(
                        quarry::dsl::ast::AggregateFunction::Max,
                        Some(Expr::field("flight_count")),
                    ),
                )],
            }]),
        ],
        Dialect::Postgres,
    );
    assert!(sql.contains(r#"MAX("base"."flight_count") AS "busiest""#), "{sql}");
}

#[test]
fn test_default_row_limit_does_not_override_stage_limit() {
    let model = model(vec![by_carrier(vec![StageProperty::Limit {
        count: 2,
        span: Span::default(),
    }])]);
    let compiled = compile_query(
        &model,
        &QueryRef::named("q"),
        &CompileOptions::default().with_default_row_limit(100),
    )
    .unwrap();
    assert!(compiled.sql.ends_with("LIMIT 2"), "{}", compiled.sql);
}
