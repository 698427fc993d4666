//! SQL dialect definitions and rendering rules.
//!
//! This module provides a trait-based abstraction over database differences.
//! Each dialect implements `SqlDialect`; the query compiler only ever calls
//! through the trait and never branches on which database it is targeting.
//!
//! - Identifier quoting: `"` (PG/DuckDB/Snowflake), `` ` `` (MySQL/BigQuery)
//! - Casts: plain, `TRY_CAST`, `SAFE_CAST`
//! - Time truncation, extraction and offsets
//! - Nested results: list-of-struct, JSON aggregation, `ARRAY(SELECT AS STRUCT)`
//! - Symmetric aggregates over fanned-out joins
//! - Table sampling
//!
//! # Usage
//!
//! ```ignore
//! use quarry::sql::dialect::{Dialect, SqlDialect};
//!
//! let dialect = Dialect::Postgres;
//! let quoted = dialect.quote_identifier("user");  // "user"
//! ```
//!
//! # Capabilities
//!
//! | Feature | DuckDB | Postgres | BigQuery | Snowflake | MySQL |
//! |---------|--------|----------|----------|-----------|-------|
//! | Nested results | ✓ | ✓ (JSONB) | ✓ | ✓ (OBJECT) | ❌ |
//! | Safe cast | ✓ | ❌ | ✓ | ✓ | ❌ |
//! | Row sampling | ✓ | ✓ | ❌ | ✓ | ❌ |
//! | Percent sampling | ✓ | ✓ | ✓ | ✓ | ❌ |
//! | NULLS FIRST/LAST | ✓ | ✓ | ✓ | ✓ | ❌ |
//!
//! An operation a dialect cannot express fails with
//! [`DialectError::Unsupported`] instead of emitting SQL that would not run.

mod bigquery;
mod duckdb;
pub mod helpers;
mod mysql;
mod postgres;
mod snowflake;

pub use bigquery::BigQuery;
pub use duckdb::DuckDb;
pub use mysql::MySql;
pub use postgres::Postgres;
pub use snowflake::Snowflake;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::expr::{cast, func, lit_bool, lit_int, lit_null, lit_str, raw_sql, seq, Expr, Literal};
use crate::model::{AggregateFunction, AtomicType, ExtractUnit, Sampling, TimeUnit};

/// Rows taken by `sample: true` unless a dialect overrides it.
pub const DEFAULT_SAMPLE_ROWS: u64 = 50_000;

/// Failure to express an operation in a dialect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DialectError {
    #[error("{dialect} does not support {operation}")]
    Unsupported {
        dialect: &'static str,
        operation: String,
    },
}

impl DialectError {
    pub fn unsupported(dialect: &'static str, operation: impl Into<String>) -> Self {
        DialectError::Unsupported {
            dialect,
            operation: operation.into(),
        }
    }
}

/// Input for rendering one nested result column.
///
/// The nested rows live in the CTE `cte`; the rendered expression reads them
/// under `alias`, keeps the rows matching `predicate` and orders them by
/// `order_column`.
#[derive(Debug, Clone, PartialEq)]
pub struct NestSpec {
    pub cte: String,
    pub alias: String,
    pub fields: Vec<String>,
    pub predicate: Option<Expr>,
    pub order_column: String,
}

/// SQL dialect trait - defines how SQL constructs are rendered.
///
/// The default implementations follow ANSI SQL where possible.
pub trait SqlDialect: fmt::Debug {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    // =========================================================================
    // Identifier and Literal Quoting
    // =========================================================================

    /// Quote an identifier (table, column, alias).
    fn quote_identifier(&self, ident: &str) -> String;

    /// Quote a dotted table path as written in a model.
    ///
    /// Each segment is quoted separately by default.
    fn quote_table_path(&self, path: &str) -> String {
        path.split('.')
            .map(|part| self.quote_identifier(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Quote a string literal.
    ///
    /// Single quotes with `''` for escaping.
    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_single(s)
    }

    /// Format a boolean literal.
    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    /// Render a model literal.
    fn literal(&self, lit: &crate::model::Literal) -> Expr {
        use crate::model::Literal as L;
        match lit {
            L::Number(n) => Expr::Literal(Literal::Number(n.clone())),
            L::String(s) => lit_str(s),
            L::Boolean(b) => lit_bool(*b),
            L::Null => lit_null(),
            L::Date(d) => seq(vec![raw_sql("DATE "), lit_str(d)]),
            L::Timestamp(t) => seq(vec![raw_sql("TIMESTAMP "), lit_str(t)]),
        }
    }

    // =========================================================================
    // Ordering
    // =========================================================================

    /// Whether this dialect supports NULLS FIRST/LAST in ORDER BY.
    fn supports_nulls_ordering(&self) -> bool {
        true
    }

    // =========================================================================
    // Operators
    // =========================================================================

    /// String concatenation operator.
    fn concat_operator(&self) -> &'static str {
        "||"
    }

    /// Whether this dialect supports the `||` concat operator.
    ///
    /// MySQL uses `||` as logical OR by default.
    fn supports_concat_operator(&self) -> bool {
        true
    }

    /// Equality operator under which two NULLs are equal.
    fn null_safe_eq_operator(&self) -> &'static str {
        "IS NOT DISTINCT FROM"
    }

    // =========================================================================
    // Function Remapping
    // =========================================================================

    /// Remap a function name for this dialect.
    ///
    /// Returns `Some(new_name)` if the function should be remapped, `None` to
    /// keep the original. The input is matched case-insensitively.
    fn remap_function(&self, name: &str) -> Option<&'static str> {
        let _ = name;
        None
    }

    // =========================================================================
    // Types and Casts
    // =========================================================================

    /// SQL type a model type casts to.
    fn type_name(&self, ty: AtomicType) -> &'static str;

    /// `CAST(expr AS type)`, or the non-failing variant when `safe`.
    ///
    /// Dialects without a safe cast fail rather than fall back to a cast that
    /// raises on bad input.
    fn render_cast(&self, expr: Expr, to: AtomicType, safe: bool) -> Result<Expr, DialectError> {
        if safe {
            return Err(DialectError::unsupported(self.name(), "safe cast"));
        }
        Ok(cast(expr, self.type_name(to)))
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    /// Plain aggregate over the current rows.
    fn render_aggregate(&self, function: AggregateFunction, arg: Option<Expr>) -> Expr {
        helpers::standard_aggregate(function, arg)
    }

    /// Fan-out safe SUM (or AVG) of `value`, counting each distinct `key` once.
    /// Rows failing `filter` contribute neither their value nor their key.
    fn render_sum_distinct(
        &self,
        key: Expr,
        value: Expr,
        filter: Option<Expr>,
        avg: bool,
    ) -> Result<Expr, DialectError>;

    /// Expression producing a fresh unique key per row, for sources without a
    /// primary key.
    fn render_distinct_key(&self) -> Expr {
        func("GEN_RANDOM_UUID", vec![])
    }

    // =========================================================================
    // Date/Time
    // =========================================================================

    /// Truncate `expr` to `unit`; weeks start on Sunday.
    fn render_time_trunc(
        &self,
        expr: Expr,
        unit: TimeUnit,
        ty: AtomicType,
    ) -> Result<Expr, DialectError>;

    /// Extract a numeric part; `day_of_week` is 1 for Sunday.
    fn render_time_extract(&self, expr: Expr, unit: ExtractUnit) -> Expr {
        match unit {
            ExtractUnit::DayOfWeek => seq(vec![helpers::extract("DOW", expr), raw_sql(" + 1")]),
            ExtractUnit::DayOfYear => helpers::extract("DOY", expr),
            other => helpers::extract(&other.name().to_uppercase(), expr),
        }
    }

    /// `expr` plus (or minus) `amount` units.
    fn render_time_offset(
        &self,
        expr: Expr,
        subtract: bool,
        amount: Expr,
        unit: TimeUnit,
        ty: AtomicType,
    ) -> Expr;

    fn render_now(&self) -> Expr {
        raw_sql("CURRENT_TIMESTAMP")
    }

    // =========================================================================
    // Nesting and Sampling
    // =========================================================================

    /// Correlated expression collecting nested rows into one repeated value.
    fn render_nest(&self, spec: &NestSpec) -> Result<Expr, DialectError>;

    /// Sampling used for `sample: true`.
    fn default_sample(&self) -> Sampling {
        Sampling::Rows(DEFAULT_SAMPLE_ROWS)
    }

    /// A SELECT over `relation` (already quoted) keeping a sample of its rows.
    fn render_sample(&self, relation: &str, sampling: Sampling) -> Result<String, DialectError>;
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    DuckDb,
    Postgres,
    BigQuery,
    Snowflake,
    MySql,
}

impl Dialect {
    pub const ALL: [Dialect; 5] = [
        Dialect::DuckDb,
        Dialect::Postgres,
        Dialect::BigQuery,
        Dialect::Snowflake,
        Dialect::MySql,
    ];

    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::DuckDb => &DuckDb,
            Dialect::Postgres => &Postgres,
            Dialect::BigQuery => &BigQuery,
            Dialect::Snowflake => &Snowflake,
            Dialect::MySql => &MySql,
        }
    }
}

// Implement SqlDialect for Dialect enum by delegating to concrete types
impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn quote_table_path(&self, path: &str) -> String {
        self.dialect().quote_table_path(path)
    }

    fn quote_string(&self, s: &str) -> String {
        self.dialect().quote_string(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        self.dialect().format_bool(b)
    }

    fn literal(&self, lit: &crate::model::Literal) -> Expr {
        self.dialect().literal(lit)
    }

    fn supports_nulls_ordering(&self) -> bool {
        self.dialect().supports_nulls_ordering()
    }

    fn concat_operator(&self) -> &'static str {
        self.dialect().concat_operator()
    }

    fn supports_concat_operator(&self) -> bool {
        self.dialect().supports_concat_operator()
    }

    fn null_safe_eq_operator(&self) -> &'static str {
        self.dialect().null_safe_eq_operator()
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        self.dialect().remap_function(name)
    }

    fn type_name(&self, ty: AtomicType) -> &'static str {
        self.dialect().type_name(ty)
    }

    fn render_cast(&self, expr: Expr, to: AtomicType, safe: bool) -> Result<Expr, DialectError> {
        self.dialect().render_cast(expr, to, safe)
    }

    fn render_aggregate(&self, function: AggregateFunction, arg: Option<Expr>) -> Expr {
        self.dialect().render_aggregate(function, arg)
    }

    fn render_sum_distinct(
        &self,
        key: Expr,
        value: Expr,
        filter: Option<Expr>,
        avg: bool,
    ) -> Result<Expr, DialectError> {
        self.dialect().render_sum_distinct(key, value, filter, avg)
    }

    fn render_distinct_key(&self) -> Expr {
        self.dialect().render_distinct_key()
    }

    fn render_time_trunc(
        &self,
        expr: Expr,
        unit: TimeUnit,
        ty: AtomicType,
    ) -> Result<Expr, DialectError> {
        self.dialect().render_time_trunc(expr, unit, ty)
    }

    fn render_time_extract(&self, expr: Expr, unit: ExtractUnit) -> Expr {
        self.dialect().render_time_extract(expr, unit)
    }

    fn render_time_offset(
        &self,
        expr: Expr,
        subtract: bool,
        amount: Expr,
        unit: TimeUnit,
        ty: AtomicType,
    ) -> Expr {
        self.dialect()
            .render_time_offset(expr, subtract, amount, unit, ty)
    }

    fn render_now(&self) -> Expr {
        self.dialect().render_now()
    }

    fn render_nest(&self, spec: &NestSpec) -> Result<Expr, DialectError> {
        self.dialect().render_nest(spec)
    }

    fn default_sample(&self) -> Sampling {
        self.dialect().default_sample()
    }

    fn render_sample(&self, relation: &str, sampling: Sampling) -> Result<String, DialectError> {
        self.dialect().render_sample(relation, sampling)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error for an unrecognised dialect name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown dialect '{0}' (expected duckdb, postgres, bigquery, snowflake or mysql)")]
pub struct UnknownDialect(pub String);

impl FromStr for Dialect {
    type Err = UnknownDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "duckdb" | "duck" => Ok(Dialect::DuckDb),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "bigquery" | "bq" | "standardsql" => Ok(Dialect::BigQuery),
            "snowflake" => Ok(Dialect::Snowflake),
            "mysql" => Ok(Dialect::MySql),
            _ => Err(UnknownDialect(s.to_string())),
        }
    }
}

/// `COUNT(1)` in every dialect; handy for weights and defaults.
pub fn count_rows() -> Expr {
    func("COUNT", vec![lit_int(1)])
}
