// tests/dialect/dialect_test.rs
use insta::assert_snapshot;
use quarry::model::{AggregateFunction, AtomicType, ExtractUnit, Literal, Sampling, TimeUnit};
use quarry::sql::dialect::DEFAULT_SAMPLE_ROWS;
use quarry::sql::{col, lit_int, Dialect, DialectError, NestSpec, SqlDialect};

fn nest_spec() -> NestSpec {
    NestSpec {
        cte: "__nest1".into(),
        alias: "__n1".into(),
        fields: vec!["carrier".into(), "flight_count".into()],
        predicate: None,
        order_column: "__row_number".into(),
    }
}

// ============================================================================
// Quoting and literals
// ============================================================================

#[test]
fn test_identifier_quoting_per_dialect() {
    assert_eq!(Dialect::DuckDb.quote_identifier("carrier"), "\"carrier\"");
    assert_eq!(Dialect::Postgres.quote_identifier("carrier"), "\"carrier\"");
    assert_eq!(Dialect::Snowflake.quote_identifier("carrier"), "\"carrier\"");
    assert_eq!(Dialect::BigQuery.quote_identifier("carrier"), "`carrier`");
    assert_eq!(Dialect::MySql.quote_identifier("carrier"), "`carrier`");
}

#[test]
fn test_string_literals_escape_quotes() {
    assert_eq!(Dialect::Postgres.quote_string("O'Hare"), "'O''Hare'");
    assert_eq!(Dialect::DuckDb.quote_string("O'Hare"), "'O''Hare'");
    assert_eq!(Dialect::MySql.quote_string("O'Hare"), "'O\\'Hare'");
}

#[test]
fn test_timestamp_literal_is_typed() {
    let lit = Literal::Timestamp("2021-03-04 10:30:00".into());
    assert_eq!(
        Dialect::Postgres.literal(&lit).to_sql(Dialect::Postgres),
        "TIMESTAMP '2021-03-04 10:30:00'"
    );
}

// ============================================================================
// Casts
// ============================================================================

#[test]
fn test_cast_uses_dialect_type_names() {
    let render = |d: Dialect| {
        d.render_cast(col("x"), AtomicType::Number, false)
            .unwrap()
            .to_sql(d)
    };
    assert_snapshot!(render(Dialect::DuckDb), @r#"CAST("x" AS DOUBLE)"#);
    assert_snapshot!(render(Dialect::Postgres), @r#"CAST("x" AS DOUBLE PRECISION)"#);
    assert_snapshot!(render(Dialect::BigQuery), @"CAST(`x` AS FLOAT64)");
    assert_snapshot!(render(Dialect::MySql), @"CAST(`x` AS DOUBLE)");
}

#[test]
fn test_safe_cast_forms() {
    let safe = |d: Dialect| d.render_cast(col("x"), AtomicType::Date, true);
    assert_eq!(
        safe(Dialect::DuckDb).unwrap().to_sql(Dialect::DuckDb),
        "TRY_CAST(\"x\" AS DATE)"
    );
    assert_eq!(
        safe(Dialect::Snowflake).unwrap().to_sql(Dialect::Snowflake),
        "TRY_CAST(\"x\" AS DATE)"
    );
    assert_eq!(
        safe(Dialect::BigQuery).unwrap().to_sql(Dialect::BigQuery),
        "SAFE_CAST(`x` AS DATE)"
    );
    assert!(matches!(
        safe(Dialect::Postgres),
        Err(DialectError::Unsupported { .. })
    ));
    assert!(safe(Dialect::MySql).is_err());
}

// ============================================================================
// Aggregates
// ============================================================================

#[test]
fn test_count_and_sum_render_alike_everywhere() {
    for dialect in Dialect::ALL {
        let count = dialect.render_aggregate(AggregateFunction::Count, None);
        assert_eq!(count.to_sql(dialect), "COUNT(1)", "{dialect}");
        let sum = dialect.render_aggregate(AggregateFunction::Sum, Some(col("x")));
        assert!(sum.to_sql(dialect).starts_with("COALESCE(SUM("), "{dialect}");
    }
}

#[test]
fn test_symmetric_sum_subtracts_key_hashes() {
    for dialect in Dialect::ALL {
        let sql = dialect
            .render_sum_distinct(col("id"), col("amount"), None, false)
            .unwrap()
            .to_sql(dialect);
        assert_eq!(sql.matches("SUM(DISTINCT").count(), 2, "{dialect}: {sql}");
    }
}

#[test]
fn test_symmetric_average_divides_by_distinct_count() {
    let sql = Dialect::Postgres
        .render_sum_distinct(col("id"), col("amount"), None, true)
        .unwrap()
        .to_sql(Dialect::Postgres);
    assert!(sql.contains("NULLIF(COUNT(DISTINCT CASE WHEN"), "{sql}");
}

// ============================================================================
// Time
// ============================================================================

#[test]
fn test_month_truncation_per_dialect() {
    let trunc = |d: Dialect, ty: AtomicType| {
        d.render_time_trunc(col("t"), TimeUnit::Month, ty)
            .unwrap()
            .to_sql(d)
    };
    assert_eq!(
        trunc(Dialect::DuckDb, AtomicType::Timestamp),
        "DATE_TRUNC('month', \"t\")"
    );
    assert_eq!(
        trunc(Dialect::DuckDb, AtomicType::Date),
        "CAST(DATE_TRUNC('month', \"t\") AS DATE)"
    );
    assert_eq!(
        trunc(Dialect::BigQuery, AtomicType::Timestamp),
        "TIMESTAMP_TRUNC(`t`, MONTH)"
    );
    assert_eq!(
        trunc(Dialect::MySql, AtomicType::Date),
        "CAST(DATE_FORMAT(`t`, '%Y-%m-01') AS DATE)"
    );
}

#[test]
fn test_day_of_week_starts_at_one() {
    assert_eq!(
        Dialect::Postgres
            .render_time_extract(col("t"), ExtractUnit::DayOfWeek)
            .to_sql(Dialect::Postgres),
        "EXTRACT(DOW FROM \"t\") + 1"
    );
    assert_eq!(
        Dialect::MySql
            .render_time_extract(col("t"), ExtractUnit::DayOfWeek)
            .to_sql(Dialect::MySql),
        "DAYOFWEEK(`t`)"
    );
}

#[test]
fn test_time_offset_per_dialect() {
    let offset = |d: Dialect| {
        d.render_time_offset(col("d"), false, lit_int(3), TimeUnit::Day, AtomicType::Date)
            .to_sql(d)
    };
    assert_eq!(offset(Dialect::MySql), "DATE_ADD(`d`, INTERVAL 3 DAY)");
    assert_eq!(
        offset(Dialect::BigQuery),
        "DATE_ADD(`d`, INTERVAL CAST(3 AS INT64) DAY)"
    );
    assert_eq!(offset(Dialect::Snowflake), "DATEADD(DAY, 3, \"d\")");
}

// ============================================================================
// Nesting and sampling
// ============================================================================

#[test]
fn test_nest_rendering_per_dialect() {
    let spec = nest_spec();
    let nest = |d: Dialect| d.render_nest(&spec).map(|e| e.to_sql(d));

    assert!(nest(Dialect::DuckDb).unwrap().contains("LIST(STRUCT_PACK("));
    assert!(nest(Dialect::Postgres).unwrap().contains("JSONB_AGG("));
    assert!(nest(Dialect::BigQuery)
        .unwrap()
        .starts_with("ARRAY(SELECT AS STRUCT "));
    assert!(nest(Dialect::Snowflake)
        .unwrap()
        .contains("WITHIN GROUP (ORDER BY \"__n1\".\"__row_number\")"));

    let err = nest(Dialect::MySql).unwrap_err();
    assert_eq!(err.to_string(), "mysql does not support nested results");
}

#[test]
fn test_default_sample_sizes() {
    assert_eq!(Dialect::DuckDb.default_sample(), Sampling::Rows(DEFAULT_SAMPLE_ROWS));
    assert_eq!(Dialect::BigQuery.default_sample(), Sampling::Percent(10.0));
}

#[test]
fn test_sampling_support() {
    assert_snapshot!(
        Dialect::DuckDb.render_sample("\"flights\"", Sampling::Rows(500)).unwrap(),
        @r#"SELECT * FROM "flights" USING SAMPLE 500 ROWS"#
    );
    assert_snapshot!(
        Dialect::Postgres.render_sample("\"flights\"", Sampling::Rows(500)).unwrap(),
        @r#"SELECT * FROM "flights" ORDER BY RANDOM() LIMIT 500"#
    );
    assert!(Dialect::BigQuery
        .render_sample("`flights`", Sampling::Rows(500))
        .is_err());
    assert!(Dialect::MySql
        .render_sample("`flights`", Sampling::Percent(5.0))
        .is_err());
}

// ============================================================================
// Ordering capabilities
// ============================================================================

#[test]
fn test_nulls_ordering_and_null_safe_equality() {
    assert!(Dialect::Postgres.supports_nulls_ordering());
    assert!(!Dialect::MySql.supports_nulls_ordering());
    assert_eq!(Dialect::MySql.null_safe_eq_operator(), "<=>");
    assert_eq!(Dialect::DuckDb.null_safe_eq_operator(), "IS NOT DISTINCT FROM");
}
