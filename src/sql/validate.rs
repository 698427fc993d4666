//! Syntax checks for user-written SQL.
//!
//! `sql:` blocks are passed through to the warehouse verbatim, so the compiler
//! only checks that the text parses as a single SELECT for the target
//! dialect. Failures are reported as warnings: sqlparser lags behind every
//! warehouse's grammar and a parse failure does not prove the SQL is wrong.

use sqlparser::ast::Statement;
use sqlparser::dialect::{
    BigQueryDialect, DuckDbDialect, MySqlDialect, PostgreSqlDialect, SnowflakeDialect,
};
use sqlparser::parser::Parser;

use super::dialect::Dialect;

fn parser_dialect(dialect: Dialect) -> Box<dyn sqlparser::dialect::Dialect> {
    match dialect {
        Dialect::Postgres => Box::new(PostgreSqlDialect {}),
        Dialect::DuckDb => Box::new(DuckDbDialect {}),
        Dialect::MySql => Box::new(MySqlDialect {}),
        Dialect::Snowflake => Box::new(SnowflakeDialect {}),
        Dialect::BigQuery => Box::new(BigQueryDialect {}),
    }
}

/// Check that `sql` is exactly one query statement in `dialect`.
pub fn validate_select(sql: &str, dialect: Dialect) -> Result<(), String> {
    let statements = Parser::parse_sql(&*parser_dialect(dialect), sql)
        .map_err(|e| format!("invalid SQL for {}: {}", dialect, e))?;

    match statements.as_slice() {
        [Statement::Query(_)] => Ok(()),
        [] => Err("SQL block is empty".into()),
        [_] => Err("SQL block must be a SELECT query".into()),
        _ => Err(format!(
            "SQL block must be a single query, found {} statements",
            statements.len()
        )),
    }
}
