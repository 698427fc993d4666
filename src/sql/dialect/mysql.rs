//! MySQL SQL dialect.
//!
//! MySQL differences from ANSI:
//! - Backtick identifier quoting
//! - Backslash string escapes
//! - `CONCAT()` instead of `||`
//! - `<=>` for null-safe equality
//! - No NULLS FIRST/LAST
//! - No DATE_TRUNC; truncation goes through DATE_FORMAT and MAKEDATE
//! - No nested results and no sampling

use super::helpers::{self, SymmetricSum};
use super::{DialectError, NestSpec, SqlDialect};
use crate::model::{AtomicType, ExtractUnit, Sampling, TimeUnit};
use crate::sql::expr::{
    cast, coalesce, func, lit_int, lit_str, raw_sql, seq, Expr, ExprExt,
};

/// MySQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct MySql;

impl MySql {
    fn interval(amount: Expr, unit: TimeUnit) -> Expr {
        seq(vec![
            raw_sql("INTERVAL "),
            amount.parenthesized(),
            raw_sql(&format!(" {}", unit.name().to_uppercase())),
        ])
    }

    /// `CAST(DATE_FORMAT(expr, pattern) AS DATETIME)`
    fn formatted(expr: Expr, pattern: &str, to: &str) -> Expr {
        cast(func("DATE_FORMAT", vec![expr, lit_str(pattern)]), to)
    }
}

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_backslash(s)
    }

    fn supports_nulls_ordering(&self) -> bool {
        false
    }

    fn supports_concat_operator(&self) -> bool {
        false
    }

    fn null_safe_eq_operator(&self) -> &'static str {
        "<=>"
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_mysql(name)
    }

    fn type_name(&self, ty: AtomicType) -> &'static str {
        match ty {
            AtomicType::String | AtomicType::Null => "CHAR",
            AtomicType::Number => "DOUBLE",
            AtomicType::Boolean => "SIGNED",
            AtomicType::Date => "DATE",
            AtomicType::Timestamp => "DATETIME",
        }
    }

    fn render_sum_distinct(
        &self,
        key: Expr,
        value: Expr,
        filter: Option<Expr>,
        avg: bool,
    ) -> Result<Expr, DialectError> {
        let hash = func(
            "CONV",
            vec![
                func(
                    "SUBSTR",
                    vec![func("MD5", vec![key.clone()]), lit_int(1), lit_int(15)],
                ),
                lit_int(16),
                lit_int(10),
            ],
        );
        let parts = SymmetricSum {
            hash: cast(hash, "DECIMAL(38, 0)"),
            value: cast(coalesce(vec![value.clone(), lit_int(0)]), "DECIMAL(38, 9)"),
            result_type: "DOUBLE",
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
        let day_start = match unit {
            TimeUnit::Second => return Ok(Self::formatted(expr, "%Y-%m-%d %H:%i:%s", "DATETIME")),
            TimeUnit::Minute => return Ok(Self::formatted(expr, "%Y-%m-%d %H:%i:00", "DATETIME")),
            TimeUnit::Hour => return Ok(Self::formatted(expr, "%Y-%m-%d %H:00:00", "DATETIME")),
            TimeUnit::Day => func("DATE", vec![expr]),
            // DAYOFWEEK is 1 on Sunday
            TimeUnit::Week => func(
                "DATE_SUB",
                vec![
                    func("DATE", vec![expr.clone()]),
                    seq(vec![
                        raw_sql("INTERVAL "),
                        func("DAYOFWEEK", vec![expr]).sub(lit_int(1)),
                        raw_sql(" DAY"),
                    ]),
                ],
            ),
            TimeUnit::Month => Self::formatted(expr, "%Y-%m-01", "DATE"),
            TimeUnit::Quarter => func(
                "DATE_ADD",
                vec![
                    func("MAKEDATE", vec![func("YEAR", vec![expr.clone()]), lit_int(1)]),
                    seq(vec![
                        raw_sql("INTERVAL "),
                        func("QUARTER", vec![expr]).sub(lit_int(1)),
                        raw_sql(" QUARTER"),
                    ]),
                ],
            ),
            TimeUnit::Year => func("MAKEDATE", vec![func("YEAR", vec![expr]), lit_int(1)]),
        };
        Ok(match ty {
            AtomicType::Timestamp => cast(day_start, "DATETIME"),
            _ => day_start,
        })
    }

    fn render_time_extract(&self, expr: Expr, unit: ExtractUnit) -> Expr {
        match unit {
            ExtractUnit::DayOfWeek => func("DAYOFWEEK", vec![expr]),
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
        let name = if subtract { "DATE_SUB" } else { "DATE_ADD" };
        func(name, vec![expr, Self::interval(amount, unit)])
    }

    fn render_nest(&self, _spec: &NestSpec) -> Result<Expr, DialectError> {
        Err(DialectError::unsupported(self.name(), "nested results"))
    }

    fn render_sample(&self, _relation: &str, _sampling: Sampling) -> Result<String, DialectError> {
        Err(DialectError::unsupported(self.name(), "sampling"))
    }
}
