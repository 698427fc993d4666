//! Shared helper functions for SQL dialect implementations.
//!
//! This module provides reusable building blocks that dialects can compose
//! to implement the `SqlDialect` trait with minimal duplication.

use super::super::expr::{
    case_when, cast, coalesce, count_distinct, func, lit_int, lit_str, raw_sql, seq, sum_distinct,
    table_col, Expr, ExprExt,
};
use crate::model::{AggregateFunction, Sampling, TimeUnit};

// =============================================================================
// Identifier Quoting
// =============================================================================

/// Quote identifier with double quotes (ANSI style).
/// Used by: Postgres, DuckDB, Snowflake
pub fn quote_double(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote identifier with backticks.
/// Used by: MySQL, BigQuery
pub fn quote_backtick(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

// =============================================================================
// String Quoting
// =============================================================================

/// Quote string with single quotes (standard SQL).
pub fn quote_string_single(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Quote string with single quotes and backslash escapes.
/// Used by: BigQuery, MySQL
pub fn quote_string_backslash(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

// =============================================================================
// Boolean Formatting
// =============================================================================

/// Format boolean as literal true/false.
pub fn format_bool_literal(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

// =============================================================================
// Function Remapping
// =============================================================================

/// Remap functions for MySQL dialect.
pub fn remap_function_mysql(name: &str) -> Option<&'static str> {
    match name.to_uppercase().as_str() {
        // LENGTH counts bytes in MySQL
        "LENGTH" => Some("CHAR_LENGTH"),
        "GEN_RANDOM_UUID" => Some("UUID"),
        _ => None,
    }
}

/// Remap functions for Snowflake dialect.
pub fn remap_function_snowflake(name: &str) -> Option<&'static str> {
    match name.to_uppercase().as_str() {
        "GEN_RANDOM_UUID" => Some("UUID_STRING"),
        _ => None,
    }
}

/// Remap functions for BigQuery dialect.
pub fn remap_function_bigquery(name: &str) -> Option<&'static str> {
    match name.to_uppercase().as_str() {
        "GEN_RANDOM_UUID" => Some("GENERATE_UUID"),
        "CEILING" => Some("CEIL"),
        _ => None,
    }
}

// =============================================================================
// Aggregates
// =============================================================================

/// `COUNT`, `COUNT(DISTINCT)`, `SUM`, `AVG`, `MIN`, `MAX`.
///
/// Sums of no rows are 0, not NULL.
pub fn standard_aggregate(function: AggregateFunction, arg: Option<Expr>) -> Expr {
    let arg = arg.unwrap_or_else(|| lit_int(1));
    match function {
        AggregateFunction::Count => func("COUNT", vec![arg]),
        AggregateFunction::CountDistinct => count_distinct(arg),
        AggregateFunction::Sum => coalesce(vec![func("SUM", vec![arg]), lit_int(0)]),
        AggregateFunction::Avg => func("AVG", vec![arg]),
        AggregateFunction::Min => func("MIN", vec![arg]),
        AggregateFunction::Max => func("MAX", vec![arg]),
    }
}

/// Pieces of a symmetric SUM for one dialect.
///
/// Each row contributes `hash + value`, where `hash` is a large number derived
/// from the row's distinct key. `SUM(DISTINCT hash + value) - SUM(DISTINCT
/// hash)` then adds each key's value exactly once no matter how often a join
/// repeated the row.
#[derive(Debug, Clone)]
pub struct SymmetricSum {
    /// Numeric hash of the distinct key.
    pub hash: Expr,
    /// The value, cast to a type in which `hash + value` is exact.
    pub value: Expr,
    /// Type of the final result.
    pub result_type: &'static str,
    /// Divisor undoing any scaling applied to `value`.
    pub scale: Option<i64>,
}

impl SymmetricSum {
    /// Rows failing `filter` drop out of both distinct sums, so a key whose
    /// rows only partly match is still counted exactly once.
    pub fn render(self, key: Expr, raw_value: Expr, filter: Option<Expr>, avg: bool) -> Expr {
        let matching = |term: Expr| match &filter {
            Some(condition) => case_when(condition.clone(), term),
            None => term,
        };
        let with_value = sum_distinct(matching(self.hash.clone().add(self.value)));
        let without_value = sum_distinct(matching(self.hash));
        let mut total = cast(with_value.sub(without_value), self.result_type);
        if let Some(scale) = self.scale {
            total = total.div(lit_int(scale));
        }
        if avg {
            let present = match filter {
                Some(condition) => raw_value.is_not_null().and(condition.parenthesized()),
                None => raw_value.is_not_null(),
            };
            let counted = count_distinct(case_when(present, key));
            let denominator = func("NULLIF", vec![counted, lit_int(0)]);
            total.parenthesized().div(denominator)
        } else {
            coalesce(vec![total, lit_int(0)])
        }
    }
}

// =============================================================================
// Date/Time
// =============================================================================

/// `EXTRACT(<unit> FROM expr)`
pub fn extract(unit: &str, expr: Expr) -> Expr {
    seq(vec![
        raw_sql(&format!("EXTRACT({} FROM ", unit)),
        expr,
        raw_sql(")"),
    ])
}

/// Normalise an offset to units every dialect accepts in an interval.
///
/// Quarters become three months.
pub fn interval_parts(amount: Expr, unit: TimeUnit) -> (Expr, &'static str) {
    match unit {
        TimeUnit::Quarter => (amount.parenthesized().mul(lit_int(3)), "MONTH"),
        TimeUnit::Second => (amount, "SECOND"),
        TimeUnit::Minute => (amount, "MINUTE"),
        TimeUnit::Hour => (amount, "HOUR"),
        TimeUnit::Day => (amount, "DAY"),
        TimeUnit::Week => (amount, "WEEK"),
        TimeUnit::Month => (amount, "MONTH"),
        TimeUnit::Year => (amount, "YEAR"),
    }
}

/// `DATE_TRUNC('unit', expr)` with Sunday-based weeks.
///
/// `shift` adds or removes one day in the dialect's own syntax.
pub fn date_trunc_sunday_weeks(
    expr: Expr,
    unit: TimeUnit,
    shift: impl Fn(Expr, bool) -> Expr,
) -> Expr {
    let trunc = |e: Expr, name: &str| func("DATE_TRUNC", vec![lit_str(name), e]);
    if unit == TimeUnit::Week {
        // Truncate the following day to a Monday-based week, then step back
        shift(trunc(shift(expr, false), "week"), true)
    } else {
        trunc(expr, unit.name())
    }
}

// =============================================================================
// Sampling
// =============================================================================

/// A concrete sample size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleSize {
    Rows(u64),
    Percent(f64),
}

/// Replace `Sampling::Default` with the dialect's choice.
pub fn resolve_sample(default: Sampling, sampling: Sampling) -> SampleSize {
    match sampling {
        Sampling::Rows(n) => SampleSize::Rows(n),
        Sampling::Percent(p) => SampleSize::Percent(p),
        Sampling::Default => match default {
            Sampling::Percent(p) => SampleSize::Percent(p),
            Sampling::Rows(n) => SampleSize::Rows(n),
            Sampling::Default => SampleSize::Rows(super::DEFAULT_SAMPLE_ROWS),
        },
    }
}

/// Percent value as written in SQL: `10`, `12.5`.
pub fn format_percent(p: f64) -> String {
    format!("{}", p)
}

// =============================================================================
// Nesting
// =============================================================================

/// `alias.field` for each nested field.
pub fn nested_columns(alias: &str, fields: &[String]) -> Vec<Expr> {
    fields.iter().map(|f| table_col(alias, f)).collect()
}

/// `'field', alias.field, ...` argument list for object constructors.
pub fn key_value_args(alias: &str, fields: &[String]) -> Vec<Expr> {
    fields
        .iter()
        .flat_map(|f| [lit_str(f), table_col(alias, f)])
        .collect()
}

/// Join expressions with `, ` inside a [`seq`].
pub fn comma_separated(exprs: Vec<Expr>) -> Vec<Expr> {
    let mut out = Vec::with_capacity(exprs.len() * 2);
    for (i, e) in exprs.into_iter().enumerate() {
        if i > 0 {
            out.push(raw_sql(", "));
        }
        out.push(e);
    }
    out
}
