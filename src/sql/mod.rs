//! SQL output.
//!
//! - [`expr`] and [`query`] - the SQL tree the planner builds
//! - [`token`] - how that tree is spelled
//! - [`dialect`] - per-database rendering behind [`SqlDialect`]
//! - [`validate`] - syntax checks for user-written SQL blocks

pub mod dialect;
pub mod expr;
pub mod query;
pub mod token;
pub mod validate;

// Re-export commonly used types at the sql module level
pub use dialect::{Dialect, DialectError, NestSpec, SqlDialect, UnknownDialect};
pub use expr::{
    case_when, cast, coalesce, col, count_distinct, func, lit_bool, lit_float, lit_int, lit_null,
    lit_str, raw_sql, row_number, seq, star, table_col, BinaryOperator, CastKind, Expr, ExprExt,
    Literal, UnaryOperator,
};
pub use query::{
    Cte, Join, JoinType, NullsOrder, OrderByExpr, Query, SelectExpr, SortDir,
    TableRef, TableSource,
};
pub use token::{Keyword, Token, TokenStream};
pub use validate::validate_select;
