//! Snowflake SQL dialect.
//!
//! Snowflake features:
//! - ANSI identifier quoting (`"`)
//! - `ARRAY_AGG(OBJECT_CONSTRUCT_KEEP_NULL(...))` for nested results
//! - `DATEADD(unit, n, x)` for time offsets
//! - `SAMPLE (n ROWS)` / `SAMPLE (p)`

use super::helpers::{self, SampleSize, SymmetricSum};
use super::{DialectError, NestSpec, SqlDialect};
use crate::model::{AtomicType, ExtractUnit, Sampling, TimeUnit};
use crate::sql::expr::{
    cast, coalesce, func, lit_int, lit_str, raw_sql, seq, table_col, CastKind, Expr, ExprExt,
    UnaryOperator,
};
use crate::sql::query::{Query, TableRef};

/// Snowflake SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Snowflake;

impl SqlDialect for Snowflake {
    fn name(&self) -> &'static str {
        "snowflake"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_snowflake(name)
    }

    fn type_name(&self, ty: AtomicType) -> &'static str {
        match ty {
            AtomicType::String | AtomicType::Null => "VARCHAR",
            AtomicType::Number => "DOUBLE",
            AtomicType::Boolean => "BOOLEAN",
            AtomicType::Date => "DATE",
            AtomicType::Timestamp => "TIMESTAMP_NTZ",
        }
    }

    fn render_cast(&self, expr: Expr, to: AtomicType, safe: bool) -> Result<Expr, DialectError> {
        Ok(Expr::Cast {
            expr: Box::new(expr),
            data_type: self.type_name(to).into(),
            kind: if safe { CastKind::TryCast } else { CastKind::Cast },
        })
    }

    fn render_sum_distinct(
        &self,
        key: Expr,
        value: Expr,
        filter: Option<Expr>,
        avg: bool,
    ) -> Result<Expr, DialectError> {
        let hash = func(
            "TO_NUMBER",
            vec![
                func(
                    "SUBSTR",
                    vec![
                        func("MD5_HEX", vec![cast(key.clone(), "VARCHAR")]),
                        lit_int(1),
                        lit_int(15),
                    ],
                ),
                lit_str("XXXXXXXXXXXXXXX"),
            ],
        );
        let parts = SymmetricSum {
            hash: cast(hash, "NUMBER(38, 0)"),
            value: cast(coalesce(vec![value.clone(), lit_int(0)]), "NUMBER(38, 9)"),
            result_type: "DOUBLE",
            scale: None,
        };
        Ok(parts.render(key, value, filter, avg))
    }

    fn render_time_trunc(
        &self,
        expr: Expr,
        unit: TimeUnit,
        _ty: AtomicType,
    ) -> Result<Expr, DialectError> {
        Ok(helpers::date_trunc_sunday_weeks(expr, unit, |e, back| {
            func(
                "DATEADD",
                vec![raw_sql("DAY"), lit_int(if back { -1 } else { 1 }), e],
            )
        }))
    }

    fn render_time_extract(&self, expr: Expr, unit: ExtractUnit) -> Expr {
        match unit {
            // DAYOFWEEK is 0 for Sunday with the default WEEK_START
            ExtractUnit::DayOfWeek => func("DAYOFWEEK", vec![expr]).add(lit_int(1)),
            ExtractUnit::DayOfYear => func("DAYOFYEAR", vec![expr]),
            other => helpers::extract(&other.name().to_uppercase(), expr),
        }
    }

    fn render_time_offset(
        &self,
        expr: Expr,
        subtract: bool,
        amount: Expr,
        unit: TimeUnit,
        _ty: AtomicType,
    ) -> Expr {
        let amount = if subtract {
            Expr::UnaryOp {
                op: UnaryOperator::Minus,
                expr: Box::new(amount.parenthesized()),
            }
        } else {
            amount
        };
        func(
            "DATEADD",
            vec![raw_sql(&unit.name().to_uppercase()), amount, expr],
        )
    }

    fn render_nest(&self, spec: &NestSpec) -> Result<Expr, DialectError> {
        let object = func(
            "OBJECT_CONSTRUCT_KEEP_NULL",
            helpers::key_value_args(&spec.alias, &spec.fields),
        );
        let aggregate = seq(vec![
            raw_sql("ARRAY_AGG("),
            object,
            raw_sql(") WITHIN GROUP (ORDER BY "),
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
            SampleSize::Rows(n) => format!("SELECT * FROM {} SAMPLE ({} ROWS)", relation, n),
            SampleSize::Percent(p) => format!(
                "SELECT * FROM {} SAMPLE ({})",
                relation,
                helpers::format_percent(p)
            ),
        })
    }
}
