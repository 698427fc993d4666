//! PostgreSQL SQL dialect.
//!
//! PostgreSQL is the reference for ANSI-ish behaviour:
//! - ANSI identifier quoting (`"`)
//! - `JSONB_AGG(JSONB_BUILD_OBJECT(...))` for nested results
//! - `MAKE_INTERVAL` for time offsets
//! - No safe cast

use super::helpers::{self, SampleSize, SymmetricSum};
use super::{DialectError, NestSpec, SqlDialect};
use crate::model::{AtomicType, Sampling, TimeUnit};
use crate::sql::expr::{
    cast, coalesce, func, lit_int, lit_str, raw_sql, seq, table_col, BinaryOperator, Expr,
};
use crate::sql::query::{Query, TableRef};

/// PostgreSQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Postgres;

impl Postgres {
    /// First 60 bits of the key's MD5 as a number.
    fn key_hash(key: Expr) -> Expr {
        let hex = Expr::BinaryOp {
            left: Box::new(lit_str("x")),
            op: BinaryOperator::Concat,
            right: Box::new(func(
                "SUBSTR",
                vec![
                    func("MD5", vec![cast(key, "TEXT")]),
                    lit_int(1),
                    lit_int(15),
                ],
            )),
        };
        cast(cast(cast(hex, "BIT(60)"), "BIGINT"), "DECIMAL(65, 0)")
    }
}

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn type_name(&self, ty: AtomicType) -> &'static str {
        match ty {
            AtomicType::String | AtomicType::Null => "TEXT",
            AtomicType::Number => "DOUBLE PRECISION",
            AtomicType::Boolean => "BOOLEAN",
            AtomicType::Date => "DATE",
            AtomicType::Timestamp => "TIMESTAMP",
        }
    }

    fn render_sum_distinct(
        &self,
        key: Expr,
        value: Expr,
        filter: Option<Expr>,
        avg: bool,
    ) -> Result<Expr, DialectError> {
        let parts = SymmetricSum {
            hash: Self::key_hash(key.clone()),
            value: cast(coalesce(vec![value.clone(), lit_int(0)]), "DECIMAL(65, 9)"),
            result_type: "DOUBLE PRECISION",
            scale: None,
        };
        Ok(parts.render(key, value, filter, avg))
    }

    fn render_time_trunc(
        &self,
        expr: Expr,
        unit: TimeUnit,
        ty: AtomicType,
    ) -> Result<Expr, DialectError> {
        let truncated = helpers::date_trunc_sunday_weeks(expr, unit, |e, back| {
            seq(vec![
                e,
                raw_sql(if back { " - INTERVAL '1 day'" } else { " + INTERVAL '1 day'" }),
            ])
        });
        Ok(match ty {
            AtomicType::Date => cast(truncated, "DATE"),
            _ => truncated,
        })
    }

    fn render_time_offset(
        &self,
        expr: Expr,
        subtract: bool,
        amount: Expr,
        unit: TimeUnit,
        ty: AtomicType,
    ) -> Expr {
        let (amount, unit_name) = helpers::interval_parts(amount, unit);
        let arg = match unit_name {
            "SECOND" => "secs",
            "MINUTE" => "mins",
            "HOUR" => "hours",
            "DAY" => "days",
            "WEEK" => "weeks",
            "MONTH" => "months",
            _ => "years",
        };
        let interval = func(
            "MAKE_INTERVAL",
            vec![seq(vec![
                raw_sql(&format!("{} => ", arg)),
                cast(amount, "INTEGER"),
            ])],
        );
        let op = if subtract { " - " } else { " + " };
        let shifted = seq(vec![expr.parenthesized(), raw_sql(op), interval]);
        match ty {
            AtomicType::Date if !unit.is_sub_day() => cast(shifted, "DATE"),
            _ => shifted,
        }
    }

    fn render_nest(&self, spec: &NestSpec) -> Result<Expr, DialectError> {
        let object = func(
            "JSONB_BUILD_OBJECT",
            helpers::key_value_args(&spec.alias, &spec.fields),
        );
        let aggregate = seq(vec![
            raw_sql("JSONB_AGG("),
            object,
            raw_sql(" ORDER BY "),
            table_col(&spec.alias, &spec.order_column),
            raw_sql(")"),
        ]);
        let mut query = Query::new()
            .select(vec![aggregate])
            .from(TableRef::cte(&spec.cte).with_alias(&spec.alias));
        if let Some(pred) = &spec.predicate {
            query = query.filter(pred.clone());
        }
        Ok(Expr::Subquery(Box::new(query)))
    }

    fn render_sample(&self, relation: &str, sampling: Sampling) -> Result<String, DialectError> {
        Ok(match helpers::resolve_sample(self.default_sample(), sampling) {
            SampleSize::Rows(n) => {
                format!("SELECT * FROM {} ORDER BY RANDOM() LIMIT {}", relation, n)
            }
            SampleSize::Percent(p) => format!(
                "SELECT * FROM {} WHERE RANDOM() < {}",
                relation,
                helpers::format_percent(p / 100.0)
            ),
        })
    }
}
