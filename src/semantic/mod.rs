//! Semantic layer: error taxonomy and query compilation.
//!
//! The query compiler works in two parts:
//!
//! 1. **Expression Compiler** - semantic expressions to SQL expressions,
//!    resolving field paths through the join tree and choosing symmetric
//!    aggregates where joins repeat rows
//! 2. **Pipeline Compiler** - query stages to one SQL statement, with
//!    earlier stages, nests and ungrouped aggregates as CTEs
//!
//! Both call only through [`crate::sql::dialect::SqlDialect`].

pub mod error;
pub mod planner;

pub use error::{LocatedError, SemanticError, SemanticResult};
pub use planner::{compile_pipeline, Planner};
