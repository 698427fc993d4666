//! SQL expression tree.
//!
//! The planner and the dialect backends build these; nothing outside this
//! module and [`super::query`] knows how they are spelled.

use super::dialect::{Dialect, SqlDialect};
use super::query::{OrderByExpr, Query, SelectExpr};
use super::token::{Keyword, Token, TokenStream};

// =============================================================================
// Tree
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `column` or `table.column`.
    Column {
        table: Option<String>,
        column: String,
    },
    Literal(Literal),
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    UnaryOp { op: UnaryOperator, expr: Box<Expr> },
    Function {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
    },
    /// Simple (`operand` set) or searched CASE.
    Case {
        operand: Option<Box<Expr>>,
        when_clauses: Vec<(Expr, Expr)>,
        else_clause: Option<Box<Expr>>,
    },
    Subquery(Box<Query>),
    /// `[NOT] IN (...)`; an empty list folds to a constant.
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },
    IsNull { expr: Box<Expr>, negated: bool },
    /// Equality under which NULL matches NULL.
    NullSafeEq { left: Box<Expr>, right: Box<Expr> },
    Cast {
        expr: Box<Expr>,
        data_type: String,
        kind: CastKind,
    },
    Star { table: Option<String> },
    Paren(Box<Expr>),
    /// `function OVER (PARTITION BY ... ORDER BY ...)`
    WindowFunction {
        function: Box<Expr>,
        partition_by: Vec<Expr>,
        order_by: Vec<OrderByExpr>,
    },
    /// Parts written back to back. Backends use it for syntax that has no
    /// variant of its own, such as `x + INTERVAL (3) DAY`, without
    /// flattening the operands to text.
    Sequence(Vec<Expr>),
    /// Compiler-produced SQL, written unescaped. Model values never end up
    /// here.
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    /// Numeric text already validated by the model builder.
    Number(String),
    String(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    And,
    Or,
    Plus,
    Minus,
    Mul,
    Div,
    Mod,
    /// Rendered as `||` or `CONCAT(...)` depending on the dialect.
    Concat,
    Like,
    NotLike,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Minus,
}

/// Which cast keyword to emit; only some dialects have the non-failing ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    /// `CAST(x AS t)`
    Cast,
    /// `TRY_CAST(x AS t)`
    TryCast,
    /// `SAFE_CAST(x AS t)`
    SafeCast,
}

// =============================================================================
// Rendering
// =============================================================================

impl BinaryOperator {
    fn token(self) -> Token {
        match self {
            BinaryOperator::Eq => Token::Symbol("="),
            BinaryOperator::Ne => Token::Symbol("<>"),
            BinaryOperator::Lt => Token::Symbol("<"),
            BinaryOperator::Gt => Token::Symbol(">"),
            BinaryOperator::Lte => Token::Symbol("<="),
            BinaryOperator::Gte => Token::Symbol(">="),
            BinaryOperator::Plus => Token::Symbol("+"),
            BinaryOperator::Minus => Token::Symbol("-"),
            BinaryOperator::Mul => Token::Symbol("*"),
            BinaryOperator::Div => Token::Symbol("/"),
            BinaryOperator::Mod => Token::Symbol("%"),
            BinaryOperator::And => Token::Keyword(Keyword::And),
            BinaryOperator::Or => Token::Keyword(Keyword::Or),
            BinaryOperator::Like | BinaryOperator::NotLike => Token::Keyword(Keyword::Like),
            BinaryOperator::Concat => Token::Concat,
        }
    }
}

impl Literal {
    fn token(&self) -> Token {
        match self {
            Literal::Int(n) => Token::Int(*n),
            Literal::Float(f) => Token::Float(*f),
            Literal::Number(text) => Token::Number(text.clone()),
            Literal::String(s) => Token::Str(s.clone()),
            Literal::Bool(b) => Token::Bool(*b),
            Literal::Null => Token::Null,
        }
    }
}

impl Expr {
    /// Write this expression into `ts`. Nested expressions and subqueries
    /// are written for the same dialect.
    pub fn render(&self, dialect: Dialect, ts: &mut TokenStream) {
        match self {
            Expr::Column { table, column } => {
                if let Some(table) = table {
                    ts.ident(table).sym(".");
                }
                ts.ident(column);
            }
            Expr::Literal(lit) => {
                ts.push(lit.token());
            }
            // `||` means OR in MySQL, so those dialects get CONCAT(a, b)
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Concat,
                right,
            } if !dialect.supports_concat_operator() => {
                ts.push(Token::Function("CONCAT".into())).sym("(");
                left.render(dialect, ts);
                ts.sym(",").space();
                right.render(dialect, ts);
                ts.sym(")");
            }
            Expr::BinaryOp { left, op, right } => {
                left.render(dialect, ts);
                ts.space();
                if *op == BinaryOperator::NotLike {
                    ts.kw(Keyword::Not).space();
                }
                ts.push(op.token()).space();
                right.render(dialect, ts);
            }
            Expr::UnaryOp { op, expr } => {
                match op {
                    UnaryOperator::Not => ts.kw(Keyword::Not).space(),
                    UnaryOperator::Minus => ts.sym("-"),
                };
                expr.render(dialect, ts);
            }
            Expr::Function {
                name,
                args,
                distinct,
            } => {
                ts.push(Token::Function(name.clone())).sym("(");
                if *distinct {
                    ts.kw(Keyword::Distinct).space();
                }
                ts.list(args, |arg, ts| arg.render(dialect, ts)).sym(")");
            }
            Expr::Case {
                operand,
                when_clauses,
                else_clause,
            } => {
                ts.kw(Keyword::Case);
                if let Some(operand) = operand {
                    ts.space();
                    operand.render(dialect, ts);
                }
                for (when, then) in when_clauses {
                    ts.spaced(Keyword::When);
                    when.render(dialect, ts);
                    ts.spaced(Keyword::Then);
                    then.render(dialect, ts);
                }
                if let Some(otherwise) = else_clause {
                    ts.spaced(Keyword::Else);
                    otherwise.render(dialect, ts);
                }
                ts.space().kw(Keyword::End);
            }
            Expr::Subquery(query) => {
                ts.sym("(");
                query.render(dialect, ts);
                ts.sym(")");
            }
            // `x IN ()` is not valid SQL; an empty list matches nothing
            Expr::In {
                values, negated, ..
            } if values.is_empty() => {
                ts.kw(if *negated { Keyword::True } else { Keyword::False });
            }
            Expr::In {
                expr,
                values,
                negated,
            } => {
                expr.render(dialect, ts);
                if *negated {
                    ts.space().kw(Keyword::Not);
                }
                ts.spaced(Keyword::In).sym("(");
                ts.list(values, |value, ts| value.render(dialect, ts)).sym(")");
            }
            Expr::IsNull { expr, negated } => {
                expr.render(dialect, ts);
                ts.space()
                    .kw(if *negated { Keyword::IsNotNull } else { Keyword::IsNull });
            }
            Expr::NullSafeEq { left, right } => {
                left.render(dialect, ts);
                ts.space().push(Token::NullSafeEq).space();
                right.render(dialect, ts);
            }
            Expr::Cast {
                expr,
                data_type,
                kind,
            } => {
                ts.sym(match kind {
                    CastKind::Cast => "CAST",
                    CastKind::TryCast => "TRY_CAST",
                    CastKind::SafeCast => "SAFE_CAST",
                })
                .sym("(");
                expr.render(dialect, ts);
                ts.spaced(Keyword::As).push(Token::Raw(data_type.clone())).sym(")");
            }
            Expr::Star { table } => {
                if let Some(table) = table {
                    ts.ident(table).sym(".");
                }
                ts.sym("*");
            }
            Expr::Paren(inner) => {
                ts.sym("(");
                inner.render(dialect, ts);
                ts.sym(")");
            }
            Expr::WindowFunction {
                function,
                partition_by,
                order_by,
            } => {
                function.render(dialect, ts);
                ts.spaced(Keyword::Over).sym("(");
                if !partition_by.is_empty() {
                    ts.kw(Keyword::PartitionBy).space();
                    ts.list(partition_by, |e, ts| e.render(dialect, ts));
                    if !order_by.is_empty() {
                        ts.space();
                    }
                }
                if !order_by.is_empty() {
                    ts.kw(Keyword::OrderBy).space();
                    ts.list(order_by, |o, ts| o.render(dialect, ts));
                }
                ts.sym(")");
            }
            Expr::Sequence(parts) => {
                for part in parts {
                    part.render(dialect, ts);
                }
            }
            Expr::Raw(sql) => {
                ts.push(Token::Raw(sql.clone()));
            }
        }
    }

    /// Render to a SQL string for `dialect`.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut ts = TokenStream::new();
        self.render(dialect, &mut ts);
        ts.serialize(dialect)
    }

    /// Wrap in parentheses unless the expression is already atomic.
    pub fn parenthesized(self) -> Expr {
        match self {
            Expr::Column { .. }
            | Expr::Literal(_)
            | Expr::Function { .. }
            | Expr::Paren(_)
            | Expr::Subquery(_)
            | Expr::Star { .. }
            | Expr::Cast { .. }
            | Expr::Case { .. } => self,
            other => Expr::Paren(Box::new(other)),
        }
    }
}

// =============================================================================
// Constructors
// =============================================================================

pub fn col(name: &str) -> Expr {
    Expr::Column {
        table: None,
        column: name.into(),
    }
}

/// `"table"."column"`
pub fn table_col(table: &str, column: &str) -> Expr {
    Expr::Column {
        table: Some(table.into()),
        column: column.into(),
    }
}

pub fn lit_int(n: i64) -> Expr {
    Expr::Literal(Literal::Int(n))
}

pub fn lit_float(f: f64) -> Expr {
    Expr::Literal(Literal::Float(f))
}

pub fn lit_str(s: &str) -> Expr {
    Expr::Literal(Literal::String(s.into()))
}

pub fn lit_bool(b: bool) -> Expr {
    Expr::Literal(Literal::Bool(b))
}

pub fn lit_null() -> Expr {
    Expr::Literal(Literal::Null)
}

pub fn star() -> Expr {
    Expr::Star { table: None }
}

fn call(name: &str, args: Vec<Expr>, distinct: bool) -> Expr {
    Expr::Function {
        name: name.into(),
        args,
        distinct,
    }
}

pub fn func(name: &str, args: Vec<Expr>) -> Expr {
    call(name, args, false)
}

pub fn count_distinct(expr: Expr) -> Expr {
    call("COUNT", vec![expr], true)
}

pub fn sum_distinct(expr: Expr) -> Expr {
    call("SUM", vec![expr], true)
}

pub fn coalesce(args: Vec<Expr>) -> Expr {
    call("COALESCE", args, false)
}

pub fn cast(expr: Expr, data_type: &str) -> Expr {
    Expr::Cast {
        expr: Box::new(expr),
        data_type: data_type.into(),
        kind: CastKind::Cast,
    }
}

/// `CASE WHEN cond THEN value END`; NULL when `cond` does not hold, which
/// is how filtered aggregates skip rows.
pub fn case_when(cond: Expr, value: Expr) -> Expr {
    Expr::Case {
        operand: None,
        when_clauses: vec![(cond, value)],
        else_clause: None,
    }
}

/// Compiler-produced SQL text, emitted as is.
pub fn raw_sql(sql: &str) -> Expr {
    Expr::Raw(sql.into())
}

pub fn seq(parts: Vec<Expr>) -> Expr {
    Expr::Sequence(parts)
}

/// `ROW_NUMBER() OVER (PARTITION BY ... ORDER BY ...)`
pub fn row_number(partition_by: Vec<Expr>, order_by: Vec<OrderByExpr>) -> Expr {
    Expr::WindowFunction {
        function: Box::new(func("ROW_NUMBER", vec![])),
        partition_by,
        order_by,
    }
}

fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Expr {
    Expr::BinaryOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

macro_rules! binary_methods {
    ($($method:ident => $op:ident),* $(,)?) => {
        $(
            fn $method(self, other: impl Into<Expr>) -> Expr {
                binary(self.into_expr(), BinaryOperator::$op, other.into())
            }
        )*
    };
}

/// Operator methods for building SQL expressions inline.
pub trait ExprExt: Sized {
    fn into_expr(self) -> Expr;

    binary_methods! {
        eq => Eq,
        gt => Gt,
        and => And,
        add => Plus,
        sub => Minus,
        mul => Mul,
        div => Div,
    }

    fn is_not_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self.into_expr()),
            negated: true,
        }
    }

    fn null_safe_eq(self, other: impl Into<Expr>) -> Expr {
        Expr::NullSafeEq {
            left: Box::new(self.into_expr()),
            right: Box::new(other.into()),
        }
    }

    fn alias(self, name: &str) -> SelectExpr {
        SelectExpr::new(self.into_expr()).with_alias(name)
    }
}

impl ExprExt for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        lit_int(n)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        lit_str(s)
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        lit_bool(b)
    }
}
