//! DuckDB SQL dialect.
//!
//! DuckDB is PostgreSQL-compatible with extensions:
//! - ANSI identifier quoting (`"`)
//! - `LIST(STRUCT_PACK(...))` for nested results
//! - `USING SAMPLE` for row and percent sampling
//! - TRY_CAST for safe casting

use super::helpers::{self, SampleSize, SymmetricSum};
use super::{DialectError, NestSpec, SqlDialect};
use crate::model::{AtomicType, Sampling, TimeUnit};
use crate::sql::expr::{
    cast, coalesce, col, func, lit_int, raw_sql, seq, table_col, CastKind, Expr, ExprExt,
};
use crate::sql::query::{Query, TableRef};

/// Scale applied to values so symmetric sums run in integer arithmetic.
const SUM_SCALE: i64 = 1_000_000_000;

/// DuckDB SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct DuckDb;

impl SqlDialect for DuckDb {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn type_name(&self, ty: AtomicType) -> &'static str {
        match ty {
            AtomicType::String | AtomicType::Null => "VARCHAR",
            AtomicType::Number => "DOUBLE",
            AtomicType::Boolean => "BOOLEAN",
            AtomicType::Date => "DATE",
            AtomicType::Timestamp => "TIMESTAMP",
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
        let scaled = coalesce(vec![value.clone(), lit_int(0)]).mul(lit_int(SUM_SCALE));
        let parts = SymmetricSum {
            hash: cast(func("HASH", vec![key.clone()]), "HUGEINT").mul(lit_int(SUM_SCALE)),
            value: cast(func("ROUND", vec![scaled]), "HUGEINT"),
            result_type: "DOUBLE",
            scale: Some(SUM_SCALE),
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
                raw_sql(if back { " - INTERVAL 1 DAY" } else { " + INTERVAL 1 DAY" }),
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
        let interval = func(
            &format!("TO_{}S", unit_name),
            vec![cast(amount, "INTEGER")],
        );
        let shifted = if subtract {
            expr.parenthesized().sub(interval)
        } else {
            expr.parenthesized().add(interval)
        };
        match ty {
            AtomicType::Date if !unit.is_sub_day() => cast(shifted, "DATE"),
            _ => shifted,
        }
    }

    fn render_nest(&self, spec: &NestSpec) -> Result<Expr, DialectError> {
        let pairs = spec
            .fields
            .iter()
            .map(|f| seq(vec![col(f), raw_sql(" := "), table_col(&spec.alias, f)]))
            .collect();
        let mut parts = vec![raw_sql("LIST(STRUCT_PACK(")];
        parts.extend(helpers::comma_separated(pairs));
        parts.push(raw_sql(") ORDER BY "));
        parts.push(table_col(&spec.alias, &spec.order_column));
        parts.push(raw_sql(")"));

        let mut query = Query::new()
            .select(vec![seq(parts)])
            .from(TableRef::cte(&spec.cte).with_alias(&spec.alias));
        if let Some(pred) = &spec.predicate {
            query = query.filter(pred.clone());
        }
        Ok(Expr::Subquery(Box::new(query)))
    }

    fn render_sample(&self, relation: &str, sampling: Sampling) -> Result<String, DialectError> {
        Ok(match helpers::resolve_sample(self.default_sample(), sampling) {
            SampleSize::Percent(p) => format!(
                "SELECT * FROM {} USING SAMPLE {} PERCENT (bernoulli)",
                relation,
                helpers::format_percent(p)
            ),
            SampleSize::Rows(n) => format!("SELECT * FROM {} USING SAMPLE {} ROWS", relation, n),
        })
    }
}
