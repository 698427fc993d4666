//! BigQuery SQL dialect.
//!
//! BigQuery features:
//! - Backtick identifier quoting; a table path is quoted as one identifier
//! - Nested and repeated fields (`ARRAY(SELECT AS STRUCT ...)`)
//! - SAFE_CAST
//! - Percent-only table sampling

use super::helpers::{self, SampleSize, SymmetricSum};
use super::{DialectError, NestSpec, SqlDialect};
use crate::model::{AtomicType, ExtractUnit, Sampling, TimeUnit};
use crate::sql::expr::{
    cast, coalesce, col, func, lit_int, lit_str, raw_sql, seq, table_col, CastKind, Expr,
};

/// BigQuery SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct BigQuery;

impl BigQuery {
    fn interval(amount: Expr, unit: TimeUnit) -> Expr {
        seq(vec![
            raw_sql("INTERVAL "),
            cast(amount, "INT64"),
            raw_sql(&format!(" {}", unit.name().to_uppercase())),
        ])
    }
}

impl SqlDialect for BigQuery {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn quote_table_path(&self, path: &str) -> String {
        helpers::quote_backtick(path)
    }

    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_backslash(s)
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_bigquery(name)
    }

    fn type_name(&self, ty: AtomicType) -> &'static str {
        match ty {
            AtomicType::String | AtomicType::Null => "STRING",
            AtomicType::Number => "FLOAT64",
            AtomicType::Boolean => "BOOL",
            AtomicType::Date => "DATE",
            AtomicType::Timestamp => "TIMESTAMP",
        }
    }

    fn render_cast(&self, expr: Expr, to: AtomicType, safe: bool) -> Result<Expr, DialectError> {
        Ok(Expr::Cast {
            expr: Box::new(expr),
            data_type: self.type_name(to).into(),
            kind: if safe { CastKind::SafeCast } else { CastKind::Cast },
        })
    }

    fn render_sum_distinct(
        &self,
        key: Expr,
        value: Expr,
        filter: Option<Expr>,
        avg: bool,
    ) -> Result<Expr, DialectError> {
        let hex = func(
            "CONCAT",
            vec![
                lit_str("0x"),
                func(
                    "SUBSTR",
                    vec![
                        func("TO_HEX", vec![func("MD5", vec![cast(key.clone(), "STRING")])]),
                        lit_int(1),
                        lit_int(15),
                    ],
                ),
            ],
        );
        let parts = SymmetricSum {
            hash: cast(cast(hex, "INT64"), "NUMERIC"),
            value: cast(coalesce(vec![value.clone(), lit_int(0)]), "NUMERIC"),
            result_type: "FLOAT64",
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
        // WEEK is WEEK(SUNDAY) in BigQuery
        let name = match ty {
            AtomicType::Date => "DATE_TRUNC",
            _ => "TIMESTAMP_TRUNC",
        };
        Ok(func(
            name,
            vec![expr, raw_sql(&unit.name().to_uppercase())],
        ))
    }

    fn render_time_extract(&self, expr: Expr, unit: ExtractUnit) -> Expr {
        match unit {
            ExtractUnit::DayOfWeek => helpers::extract("DAYOFWEEK", expr),
            ExtractUnit::DayOfYear => helpers::extract("DAYOFYEAR", expr),
            other => helpers::extract(&other.name().to_uppercase(), expr),
        }
    }

    fn render_time_offset(
        &self,
        expr: Expr,
        subtract: bool,
        amount: Expr,
        unit: TimeUnit,
        ty: AtomicType,
    ) -> Expr {
        let verb = if subtract { "SUB" } else { "ADD" };
        let interval = Self::interval(amount, unit);
        match ty {
            AtomicType::Date => func(&format!("DATE_{}", verb), vec![expr, interval]),
            // TIMESTAMP_ADD stops at days; larger units go through DATETIME
            _ if unit.is_sub_day() || unit == TimeUnit::Day => {
                func(&format!("TIMESTAMP_{}", verb), vec![expr, interval])
            }
            _ => func(
                "TIMESTAMP",
                vec![func(
                    &format!("DATETIME_{}", verb),
                    vec![func("DATETIME", vec![expr]), interval],
                )],
            ),
        }
    }

    fn render_now(&self) -> Expr {
        func("CURRENT_TIMESTAMP", vec![])
    }

    fn render_nest(&self, spec: &NestSpec) -> Result<Expr, DialectError> {
        let mut parts = vec![raw_sql("ARRAY(SELECT AS STRUCT ")];
        parts.extend(helpers::comma_separated(helpers::nested_columns(
            &spec.alias,
            &spec.fields,
        )));
        parts.push(raw_sql(" FROM "));
        parts.push(col(&spec.cte));
        parts.push(raw_sql(" AS "));
        parts.push(col(&spec.alias));
        if let Some(pred) = &spec.predicate {
            parts.push(raw_sql(" WHERE "));
            parts.push(pred.clone());
        }
        parts.push(raw_sql(" ORDER BY "));
        parts.push(table_col(&spec.alias, &spec.order_column));
        parts.push(raw_sql(")"));
        Ok(seq(parts))
    }

    fn default_sample(&self) -> Sampling {
        Sampling::Percent(10.0)
    }

    fn render_sample(&self, relation: &str, sampling: Sampling) -> Result<String, DialectError> {
        match helpers::resolve_sample(self.default_sample(), sampling) {
            SampleSize::Percent(p) => Ok(format!(
                "SELECT * FROM {} TABLESAMPLE SYSTEM ({} PERCENT)",
                relation,
                helpers::format_percent(p)
            )),
            SampleSize::Rows(_) => Err(DialectError::unsupported(self.name(), "row sampling")),
        }
    }
}
