//! Typed semantic expressions.
//!
//! These are the lowered form of parse-tree expressions: names are resolved,
//! time literals are typed, aggregate locality is fixed and sugar such as
//! `pick`, `??`, `?` and ranges is gone. Field references stay relative to
//! the source the expression was defined in; the query compiler prefixes them
//! with the join path it reached that source through.

use super::types::{AggregateFunction, AtomicType, ExtractUnit, TimeUnit, UngroupKind};
pub use crate::dsl::ast::{BinaryOp, UnaryOp};

// =============================================================================
// Literals
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Numeric literal kept in its source spelling.
    Number(String),
    String(String),
    Boolean(bool),
    Null,
    /// `YYYY-MM-DD`
    Date(String),
    /// `YYYY-MM-DD HH:MM:SS`
    Timestamp(String),
}

impl Literal {
    pub fn ty(&self) -> AtomicType {
        match self {
            Literal::Number(_) => AtomicType::Number,
            Literal::String(_) => AtomicType::String,
            Literal::Boolean(_) => AtomicType::Boolean,
            Literal::Null => AtomicType::Null,
            Literal::Date(_) => AtomicType::Date,
            Literal::Timestamp(_) => AtomicType::Timestamp,
        }
    }
}

// =============================================================================
// Scalar functions
// =============================================================================

/// Built-in scalar functions callable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarFunction {
    Concat,
    Lower,
    Upper,
    Length,
    Trim,
    Substr,
    Round,
    Floor,
    Ceil,
    Abs,
    Coalesce,
    Nullif,
}

impl ScalarFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        let function = match name.to_ascii_lowercase().as_str() {
            "concat" => ScalarFunction::Concat,
            "lower" => ScalarFunction::Lower,
            "upper" => ScalarFunction::Upper,
            "length" => ScalarFunction::Length,
            "trim" => ScalarFunction::Trim,
            "substr" | "substring" => ScalarFunction::Substr,
            "round" => ScalarFunction::Round,
            "floor" => ScalarFunction::Floor,
            "ceil" | "ceiling" => ScalarFunction::Ceil,
            "abs" => ScalarFunction::Abs,
            "coalesce" => ScalarFunction::Coalesce,
            "nullif" => ScalarFunction::Nullif,
            _ => return None,
        };
        Some(function)
    }

    /// SQL spelling before dialect remapping.
    pub fn sql_name(&self) -> &'static str {
        match self {
            ScalarFunction::Concat => "CONCAT",
            ScalarFunction::Lower => "LOWER",
            ScalarFunction::Upper => "UPPER",
            ScalarFunction::Length => "LENGTH",
            ScalarFunction::Trim => "TRIM",
            ScalarFunction::Substr => "SUBSTR",
            ScalarFunction::Round => "ROUND",
            ScalarFunction::Floor => "FLOOR",
            ScalarFunction::Ceil => "CEIL",
            ScalarFunction::Abs => "ABS",
            ScalarFunction::Coalesce => "COALESCE",
            ScalarFunction::Nullif => "NULLIF",
        }
    }

    /// Accepted argument counts, inclusive.
    pub fn arity(&self) -> (usize, usize) {
        match self {
            ScalarFunction::Concat | ScalarFunction::Coalesce => (1, usize::MAX),
            ScalarFunction::Lower
            | ScalarFunction::Upper
            | ScalarFunction::Length
            | ScalarFunction::Trim
            | ScalarFunction::Floor
            | ScalarFunction::Ceil
            | ScalarFunction::Abs => (1, 1),
            ScalarFunction::Substr => (2, 3),
            ScalarFunction::Round => (1, 2),
            ScalarFunction::Nullif => (2, 2),
        }
    }

    /// Result type given the type of the first argument.
    pub fn result_type(&self, first: AtomicType) -> AtomicType {
        match self {
            ScalarFunction::Concat
            | ScalarFunction::Lower
            | ScalarFunction::Upper
            | ScalarFunction::Trim
            | ScalarFunction::Substr => AtomicType::String,
            ScalarFunction::Length
            | ScalarFunction::Round
            | ScalarFunction::Floor
            | ScalarFunction::Ceil
            | ScalarFunction::Abs => AtomicType::Number,
            ScalarFunction::Coalesce | ScalarFunction::Nullif => first,
        }
    }
}

// =============================================================================
// Expressions
// =============================================================================

/// A resolved, typed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// Physical column of the relation that owns the expression.
    Column(String),
    /// Another field, addressed by path from the owning source.
    Field(Vec<String>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Aggregate computed at the join path `locality`.
    Aggregate {
        function: AggregateFunction,
        locality: Vec<String>,
        arg: Option<Box<Expr>>,
    },
    /// Aggregate whose input rows are restricted by `filter`.
    Filtered {
        expr: Box<Expr>,
        filter: Box<Expr>,
    },
    Case {
        arms: Vec<CaseArm>,
        otherwise: Option<Box<Expr>>,
    },
    Cast {
        expr: Box<Expr>,
        to: AtomicType,
        safe: bool,
    },
    Truncate {
        expr: Box<Expr>,
        unit: TimeUnit,
        ty: AtomicType,
    },
    Extract {
        expr: Box<Expr>,
        unit: ExtractUnit,
    },
    /// `expr + amount unit`, or minus when `subtract`.
    TimeOffset {
        expr: Box<Expr>,
        amount: Box<Expr>,
        unit: TimeUnit,
        ty: AtomicType,
        subtract: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },
    /// `all(...)` / `exclude(...)`
    Ungroup {
        kind: UngroupKind,
        expr: Box<Expr>,
        fields: Vec<String>,
    },
    Call {
        function: ScalarFunction,
        args: Vec<Expr>,
    },
    Now,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseArm {
    pub when: Expr,
    pub then: Expr,
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    pub fn field(path: &[&str]) -> Self {
        Expr::Field(path.iter().map(|s| s.to_string()).collect())
    }

    pub fn number(value: impl ToString) -> Self {
        Expr::Literal(Literal::Number(value.to_string()))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::Literal(Literal::String(value.into()))
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::And, self, other)
    }

    /// AND together a list of conditions; `None` when empty.
    pub fn conjunction(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        exprs.into_iter().reduce(Expr::and)
    }

    /// Direct children, in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal(_) | Expr::Column(_) | Expr::Field(_) | Expr::Now => vec![],
            Expr::Unary { operand, .. } => vec![operand.as_ref()],
            Expr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::Aggregate { arg, .. } => arg.iter().map(|a| a.as_ref()).collect(),
            Expr::Filtered { expr, filter } => vec![expr.as_ref(), filter.as_ref()],
            Expr::Case { arms, otherwise } => {
                let mut out: Vec<&Expr> = Vec::with_capacity(arms.len() * 2 + 1);
                for arm in arms {
                    out.push(&arm.when);
                    out.push(&arm.then);
                }
                if let Some(e) = otherwise {
                    out.push(e.as_ref());
                }
                out
            }
            Expr::Cast { expr, .. }
            | Expr::Truncate { expr, .. }
            | Expr::Extract { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::Ungroup { expr, .. } => vec![expr.as_ref()],
            Expr::TimeOffset { expr, amount, .. } => vec![expr.as_ref(), amount.as_ref()],
            Expr::In { expr, values, .. } => {
                let mut out = vec![expr.as_ref()];
                out.extend(values.iter());
                out
            }
            Expr::Call { args, .. } => args.iter().collect(),
        }
    }

    /// Pre-order visit of every node.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    pub fn any(&self, pred: &impl Fn(&Expr) -> bool) -> bool {
        pred(self) || self.children().into_iter().any(|c| c.any(pred))
    }

    /// True when an aggregate appears anywhere in the tree.
    ///
    /// Field references are not followed; callers that need measure
    /// references resolved use the lowered type level instead.
    pub fn contains_aggregate(&self) -> bool {
        self.any(&|e| matches!(e, Expr::Aggregate { .. }))
    }

    pub fn contains_ungroup(&self) -> bool {
        self.any(&|e| matches!(e, Expr::Ungroup { .. }))
    }
}
