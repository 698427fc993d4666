// tests/planner/fanout_test.rs
use quarry::compile::{compile_query, CompileOptions, QueryRef};
use quarry::config::Settings;
use quarry::dsl::ast::{
    AggregateFunction, Document, Expr, FieldDecl, JoinDecl, JoinKind, PipeElement, QueryExpr,
    QueryItem, QueryStatement, SourceExpr, SourceProperty, SourceStatement, StageProperty,
    Statement,
};
use quarry::dsl::{Span, Spanned};
use quarry::lowering::{build_model, SchemaCatalog};
use quarry::model::{AtomicType, TableSchema};
use quarry::sql::Dialect;

fn catalog() -> SchemaCatalog {
    let mut catalog = SchemaCatalog::new();
    catalog.add_table(
        "orders",
        TableSchema::new([
            ("id", AtomicType::Number),
            ("customer_id", AtomicType::Number),
            ("status", AtomicType::String),
            ("amount", AtomicType::Number),
        ]),
    );
    catalog.add_table(
        "items",
        TableSchema::new([
            ("id", AtomicType::Number),
            ("order_id", AtomicType::Number),
            ("price", AtomicType::Number),
        ]),
    );
    catalog.add_table(
        "customers",
        TableSchema::new([("id", AtomicType::Number), ("region", AtomicType::String)]),
    );
    catalog.add_table(
        "events",
        TableSchema::new([("order_id", AtomicType::Number), ("kind", AtomicType::String)]),
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

fn keyed(table: &str) -> SourceExpr {
    SourceExpr::table(None, table).refine(vec![SourceProperty::PrimaryKey { field: name("id") }])
}

fn orders() -> Statement {
    source(
        "orders",
        keyed("orders").refine(vec![
            SourceProperty::Join {
                joins: vec![
                    JoinDecl::new("items", JoinKind::Many, SourceExpr::named("items"))
                        .on(Expr::field("items.order_id").eq(Expr::field("id"))),
                    JoinDecl::new("customers", JoinKind::One, SourceExpr::named("customers"))
                        .with(Expr::field("customer_id")),
                    JoinDecl::new("events", JoinKind::Many, SourceExpr::named("events"))
                        .on(Expr::field("events.order_id").eq(Expr::field("id"))),
                ],
            },
            SourceProperty::Measure {
                fields: vec![
                    FieldDecl::new("order_count", Expr::count()),
                    FieldDecl::new("revenue", Expr::sum(Expr::field("amount"))),
                    FieldDecl::new("avg_amount", Expr::avg(Expr::field("amount"))),
                ],
            },
        ]),
    )
}

fn sql(stage: Vec<StageProperty>, dialect: Dialect) -> String {
    let query = Statement::Query(QueryStatement {
        name: Some(name("q")),
        query: QueryExpr::from_source(SourceExpr::named("orders"), vec![PipeElement::stage(stage)]),
        span: Span::default(),
    });
    let document = Document {
        statements: vec![
            source("items", keyed("items")),
            source("customers", keyed("customers")),
            source("events", SourceExpr::table(None, "events")),
            orders(),
            query,
        ],
    };
    let model = build_model(
        "file:///orders.model",
        &document,
        &catalog(),
        &Settings::default(),
    );
    assert!(model.diagnostics.is_empty(), "{:?}", model.diagnostics);
    compile_query(
        &model,
        &QueryRef::named("q"),
        &CompileOptions::default().with_dialect(dialect),
    )
    .unwrap()
    .sql
}

fn aggregate(items: Vec<QueryItem>) -> StageProperty {
    StageProperty::Aggregate { fields: items }
}

// ============================================================================
// No fan-out
// ============================================================================

#[test]
fn test_unused_joins_are_not_emitted() {
    let sql = sql(
        vec![aggregate(vec![
            QueryItem::reference("order_count"),
            QueryItem::reference("revenue"),
        ])],
        Dialect::DuckDb,
    );
    assert!(sql.contains(r#"COUNT(1) AS "order_count""#), "{sql}");
    assert!(sql.contains(r#"COALESCE(SUM("base"."amount"), 0) AS "revenue""#), "{sql}");
    assert!(!sql.contains("JOIN"), "{sql}");
}

#[test]
fn test_join_one_does_not_fan_out() {
    let sql = sql(
        vec![
            StageProperty::GroupBy {
                fields: vec![QueryItem::reference("customers.region")],
            },
            aggregate(vec![QueryItem::reference("revenue")]),
        ],
        Dialect::DuckDb,
    );
    assert!(
        sql.contains(r#"LEFT JOIN "customers" AS "customers" ON "base"."customer_id" = "customers"."id""#),
        "{sql}"
    );
    assert!(!sql.contains("DISTINCT"), "{sql}");
}

// ============================================================================
// join_many
// ============================================================================

fn by_item_price() -> StageProperty {
    StageProperty::Where {
        filters: vec![Expr::field("items.price").gt(Expr::number(0))],
    }
}

#[test]
fn test_count_over_join_many_is_distinct() {
    let sql = sql(
        vec![
            by_item_price(),
            aggregate(vec![QueryItem::reference("order_count")]),
        ],
        Dialect::Postgres,
    );
    assert!(sql.contains(r#"LEFT JOIN "items" AS "items""#), "{sql}");
    assert!(sql.contains(r#"COUNT(DISTINCT "base"."id") AS "order_count""#), "{sql}");
}

#[test]
fn test_sum_and_avg_over_join_many_are_symmetric() {
    let sql = sql(
        vec![
            by_item_price(),
            aggregate(vec![
                QueryItem::reference("revenue"),
                QueryItem::reference("avg_amount"),
            ]),
        ],
        Dialect::Postgres,
    );
    assert!(sql.matches("SUM(DISTINCT").count() >= 4, "{sql}");
    assert!(sql.contains("NULLIF(COUNT(DISTINCT CASE WHEN"), "{sql}");
}

#[test]
fn test_aggregate_at_the_leaf_is_plain() {
    let sql = sql(
        vec![aggregate(vec![
            QueryItem::define(
                "item_count",
                Expr::aggregate_at(AggregateFunction::Count, "items", None),
            ),
            QueryItem::define(
                "item_total",
                Expr::aggregate_at(
                    AggregateFunction::Sum,
                    "items",
                    Some(Expr::field("items.price")),
                ),
            ),
        ])],
        Dialect::DuckDb,
    );
    assert!(sql.contains(r#"COUNT("items"."id") AS "item_count""#), "{sql}");
    assert!(sql.contains(r#"COALESCE(SUM("items"."price"), 0) AS "item_total""#), "{sql}");
}

#[test]
fn test_sibling_join_many_fans_out_the_other() {
    let sql = sql(
        vec![
            StageProperty::Where {
                filters: vec![Expr::field("events.kind").eq(Expr::string("refund"))],
            },
            aggregate(vec![QueryItem::define(
                "item_count",
                Expr::aggregate_at(AggregateFunction::Count, "items", None),
            )]),
        ],
        Dialect::DuckDb,
    );
    assert!(sql.contains(r#"COUNT(DISTINCT "items"."id") AS "item_count""#), "{sql}");
}

#[test]
fn test_keyless_relation_gets_a_generated_key() {
    let sql = sql(
        vec![
            by_item_price(),
            aggregate(vec![QueryItem::define(
                "event_count",
                Expr::aggregate_at(AggregateFunction::Count, "events", None),
            )]),
        ],
        Dialect::DuckDb,
    );
    assert!(sql.contains("GEN_RANDOM_UUID()"), "{sql}");
    assert!(
        sql.contains(r#"COUNT(DISTINCT "events"."__distinct_key") AS "event_count""#),
        "{sql}"
    );
}

#[test]
fn test_filtered_symmetric_sum_guards_the_key_too() {
    let sql = sql(
        vec![aggregate(vec![QueryItem::define(
            "big_item_revenue",
            Expr::field("revenue")
                .filtered(vec![Expr::field("items.price").gt(Expr::number(15))]),
        )])],
        Dialect::Postgres,
    );
    assert!(sql.contains(r#"LEFT JOIN "items" AS "items""#), "{sql}");
    // An order with only some matching items must not leave its bare key
    // hash in one of the two sums.
    assert_eq!(
        sql.matches(r#"SUM(DISTINCT CASE WHEN "items"."price" > 15 THEN"#).count(),
        2,
        "{sql}"
    );
    assert!(!sql.contains("SUM(DISTINCT (") && !sql.contains("SUM(DISTINCT CAST"), "{sql}");
}

#[test]
fn test_filtered_symmetric_avg_counts_matching_keys() {
    let sql = sql(
        vec![aggregate(vec![QueryItem::define(
            "big_item_avg",
            Expr::field("avg_amount")
                .filtered(vec![Expr::field("items.price").gt(Expr::number(15))]),
        )])],
        Dialect::Postgres,
    );
    assert!(
        sql.contains(r#"COUNT(DISTINCT CASE WHEN "base"."amount" IS NOT NULL AND ("items"."price" > 15) THEN "base"."id" END)"#),
        "{sql}"
    );
}
