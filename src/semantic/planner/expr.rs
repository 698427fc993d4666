//! Expression compiler: semantic expressions to SQL expressions.
//!
//! Expressions are compiled against a [`JoinTree`]: a column read through a
//! join path is qualified with that path's alias, and an aggregate decides
//! from the tree whether its rows can be repeated by a joined relation. When
//! they can, COUNT becomes a distinct count of the relation's key and
//! SUM/AVG use the dialect's symmetric form over the same key.

use std::collections::BTreeSet;

use crate::model::{AggregateFunction, BinaryOp, Expr, FieldDef, FieldNamespace, UnaryOp, UngroupKind};
use crate::semantic::error::{SemanticError, SemanticResult};
use crate::sql::dialect::{Dialect, SqlDialect};
use crate::sql::expr::{
    case_when, coalesce, count_distinct, func, lit_bool, table_col, BinaryOperator,
    Expr as SqlExpr, UnaryOperator,
};

use super::joins::{alias, extend, JoinPath, JoinTree};

/// Column holding the generated key of a relation without a primary key.
pub const DISTINCT_KEY: &str = "__distinct_key";

/// Column of an ungrouped aggregate's CTE holding the value.
pub const UNGROUP_VALUE: &str = "__value";

/// `left op right`, parenthesizing compound operands.
pub fn binary(left: SqlExpr, op: BinaryOperator, right: SqlExpr) -> SqlExpr {
    SqlExpr::BinaryOp {
        left: Box::new(left.parenthesized()),
        op,
        right: Box::new(right.parenthesized()),
    }
}

/// AND of `conditions`; `None` when empty.
pub fn conjunction(conditions: impl IntoIterator<Item = SqlExpr>) -> Option<SqlExpr> {
    conditions
        .into_iter()
        .reduce(|left, right| binary(left, BinaryOperator::And, right))
}

/// Grouping the ungrouped aggregates of one SELECT are computed against.
#[derive(Debug, Clone, Default)]
pub struct UngroupFrame {
    /// Output dimensions by name.
    pub dimensions: Vec<(String, SqlExpr)>,
    /// Keys of the enclosing nest rows; never ungrouped.
    pub parents: Vec<SqlExpr>,
}

/// One `all()`/`exclude()` occurrence, computed in its own CTE and joined
/// back on `partition`.
#[derive(Debug, Clone)]
pub struct UngroupPlan {
    /// Alias the CTE is joined under.
    pub alias: String,
    pub partition: Vec<SqlExpr>,
    pub value: SqlExpr,
}

pub struct ExprCompiler<'t> {
    dialect: Dialect,
    tree: &'t JoinTree,
    /// Relations whose rows need a generated distinct key.
    keyed: BTreeSet<JoinPath>,
    /// Conditions of the `{? }` filters enclosing the current aggregate.
    filters: Vec<SqlExpr>,
    frame: Option<UngroupFrame>,
    ungroups: Vec<UngroupPlan>,
}

impl<'t> ExprCompiler<'t> {
    pub fn new(dialect: Dialect, tree: &'t JoinTree) -> Self {
        Self {
            dialect,
            tree,
            keyed: BTreeSet::new(),
            filters: Vec::new(),
            frame: None,
            ungroups: Vec::new(),
        }
    }

    /// Allow `all()`/`exclude()` against `frame`.
    pub fn set_frame(&mut self, frame: UngroupFrame) {
        self.frame = Some(frame);
    }

    pub fn keyed(&self) -> &BTreeSet<JoinPath> {
        &self.keyed
    }

    pub fn take_ungroups(&mut self) -> Vec<UngroupPlan> {
        std::mem::take(&mut self.ungroups)
    }

    /// Compile an expression of the root namespace.
    pub fn compile(&mut self, expr: &Expr) -> SemanticResult<SqlExpr> {
        let tree = self.tree;
        self.compile_at(&[], tree.root(), expr)
    }

    /// Compile `expr`, which belongs to `ns` reached through `prefix`.
    pub fn compile_at(
        &mut self,
        prefix: &[String],
        ns: &FieldNamespace,
        expr: &Expr,
    ) -> SemanticResult<SqlExpr> {
        Ok(match expr {
            Expr::Literal(lit) => self.dialect.literal(lit),
            Expr::Column(name) => table_col(&alias(prefix), name),
            Expr::Field(path) => {
                let resolved = ns.resolve_defined(path)?;
                let full = extend(prefix, &resolved.join_path);
                match resolved.field.as_ref() {
                    FieldDef::Dimension(f) | FieldDef::Measure(f) => {
                        self.compile_at(&full, resolved.owner, &f.expr)?
                    }
                    other => {
                        return Err(SemanticError::WrongFieldKind {
                            path: path.join("."),
                            found: other.kind_name(),
                            expected: "dimension or measure",
                        })
                    }
                }
            }
            Expr::Unary { op, operand } => {
                let operand = self.compile_at(prefix, ns, operand)?.parenthesized();
                let op = match op {
                    UnaryOp::Not => UnaryOperator::Not,
                    UnaryOp::Neg => UnaryOperator::Minus,
                };
                SqlExpr::UnaryOp {
                    op,
                    expr: Box::new(operand),
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.compile_at(prefix, ns, left)?;
                let right = self.compile_at(prefix, ns, right)?;
                let op = match op {
                    BinaryOp::Coalesce => return Ok(coalesce(vec![left, right])),
                    // A NULL operand makes the values differ.
                    BinaryOp::Ne => {
                        let differ = binary(left, BinaryOperator::Ne, right);
                        return Ok(coalesce(vec![differ, lit_bool(true)]));
                    }
                    BinaryOp::Add => BinaryOperator::Plus,
                    BinaryOp::Sub => BinaryOperator::Minus,
                    BinaryOp::Mul => BinaryOperator::Mul,
                    BinaryOp::Div => BinaryOperator::Div,
                    BinaryOp::Mod => BinaryOperator::Mod,
                    BinaryOp::Eq => BinaryOperator::Eq,
                    BinaryOp::Lt => BinaryOperator::Lt,
                    BinaryOp::Lte => BinaryOperator::Lte,
                    BinaryOp::Gt => BinaryOperator::Gt,
                    BinaryOp::Gte => BinaryOperator::Gte,
                    BinaryOp::And => BinaryOperator::And,
                    BinaryOp::Or => BinaryOperator::Or,
                    BinaryOp::Like => BinaryOperator::Like,
                    BinaryOp::NotLike => BinaryOperator::NotLike,
                };
                binary(left, op, right)
            }
            Expr::Aggregate {
                function,
                locality,
                arg,
            } => {
                let arg = match arg {
                    Some(arg) => Some(self.compile_at(prefix, ns, arg)?),
                    None => None,
                };
                self.aggregate(*function, &extend(prefix, locality), arg)?
            }
            Expr::Filtered { expr, filter } => {
                let condition = self.compile_at(prefix, ns, filter)?;
                self.filters.push(condition);
                let compiled = self.compile_at(prefix, ns, expr);
                self.filters.pop();
                compiled?
            }
            Expr::Case { arms, otherwise } => {
                let mut when_clauses = Vec::with_capacity(arms.len());
                for arm in arms {
                    when_clauses.push((
                        self.compile_at(prefix, ns, &arm.when)?,
                        self.compile_at(prefix, ns, &arm.then)?,
                    ));
                }
                let else_clause = match otherwise {
                    Some(e) => Some(Box::new(self.compile_at(prefix, ns, e)?)),
                    None => None,
                };
                SqlExpr::Case {
                    operand: None,
                    when_clauses,
                    else_clause,
                }
            }
            Expr::Cast { expr, to, safe } => {
                let inner = self.compile_at(prefix, ns, expr)?;
                self.dialect.render_cast(inner, *to, *safe)?
            }
            Expr::Truncate { expr, unit, ty } => {
                let inner = self.compile_at(prefix, ns, expr)?;
                self.dialect.render_time_trunc(inner, *unit, *ty)?
            }
            Expr::Extract { expr, unit } => {
                let inner = self.compile_at(prefix, ns, expr)?;
                self.dialect.render_time_extract(inner, *unit)
            }
            Expr::TimeOffset {
                expr,
                amount,
                unit,
                ty,
                subtract,
            } => {
                let inner = self.compile_at(prefix, ns, expr)?;
                let amount = self.compile_at(prefix, ns, amount)?;
                self.dialect
                    .render_time_offset(inner, *subtract, amount, *unit, *ty)
            }
            Expr::IsNull { expr, negated } => SqlExpr::IsNull {
                expr: Box::new(self.compile_at(prefix, ns, expr)?.parenthesized()),
                negated: *negated,
            },
            Expr::In {
                expr,
                values,
                negated,
            } => {
                let target = self.compile_at(prefix, ns, expr)?.parenthesized();
                let values = values
                    .iter()
                    .map(|v| self.compile_at(prefix, ns, v))
                    .collect::<SemanticResult<Vec<_>>>()?;
                SqlExpr::In {
                    expr: Box::new(target),
                    values,
                    negated: *negated,
                }
            }
            Expr::Ungroup { kind, expr, fields } => self.ungroup(prefix, ns, *kind, expr, fields)?,
            Expr::Call { function, args } => {
                let args = args
                    .iter()
                    .map(|a| self.compile_at(prefix, ns, a))
                    .collect::<SemanticResult<Vec<_>>>()?;
                func(function.sql_name(), args)
            }
            Expr::Now => self.dialect.render_now(),
        })
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    fn aggregate(
        &mut self,
        function: AggregateFunction,
        path: &[String],
        arg: Option<SqlExpr>,
    ) -> SemanticResult<SqlExpr> {
        let filter = conjunction(self.filters.iter().cloned());
        let guard = |value: SqlExpr| match &filter {
            Some(condition) => case_when(condition.clone(), value),
            None => value,
        };
        let symmetric = function.is_fanout_sensitive() && self.tree.fans_out(path);

        match function {
            AggregateFunction::Count => {
                if symmetric {
                    let key = self.distinct_key(path)?;
                    return Ok(count_distinct(guard(key)));
                }
                if !path.is_empty() {
                    // Unmatched rows of a left join carry a NULL key.
                    let key = self.distinct_key(path)?;
                    return Ok(func("COUNT", vec![guard(key)]));
                }
                let counted = filter.as_ref().map(|_| guard(crate::sql::expr::lit_int(1)));
                Ok(self.dialect.render_aggregate(function, counted))
            }
            AggregateFunction::Sum | AggregateFunction::Avg if symmetric => {
                let key = self.distinct_key(path)?;
                let value = arg.ok_or_else(|| {
                    SemanticError::IllegalAggregate(format!("{}() needs an argument", function.name()))
                })?;
                Ok(self.dialect.render_sum_distinct(
                    key,
                    value,
                    filter,
                    function == AggregateFunction::Avg,
                )?)
            }
            _ => Ok(self.dialect.render_aggregate(function, arg.map(guard))),
        }
    }

    /// Expression identifying one row of the relation at `path`.
    fn distinct_key(&mut self, path: &[String]) -> SemanticResult<SqlExpr> {
        let tree = self.tree;
        match tree.primary_key(path)? {
            Some(key) => {
                let ns = tree.namespace(path)?;
                self.compile_at(path, ns, &Expr::Field(vec![key.to_string()]))
            }
            None => {
                self.keyed.insert(path.to_vec());
                Ok(table_col(&alias(path), DISTINCT_KEY))
            }
        }
    }

    // =========================================================================
    // all() / exclude()
    // =========================================================================

    fn ungroup(
        &mut self,
        prefix: &[String],
        ns: &FieldNamespace,
        kind: UngroupKind,
        expr: &Expr,
        fields: &[String],
    ) -> SemanticResult<SqlExpr> {
        let Some(frame) = self.frame.clone() else {
            return Err(SemanticError::InvalidStage(
                "all() and exclude() are only allowed in group_by/aggregate stages".into(),
            ));
        };
        for name in fields {
            if !frame.dimensions.iter().any(|(d, _)| d == name) {
                return Err(SemanticError::UndefinedField { path: name.clone() });
            }
        }
        let mut partition = frame.parents.clone();
        partition.extend(
            frame
                .dimensions
                .iter()
                .filter(|(name, _)| {
                    let named = fields.contains(name);
                    match kind {
                        UngroupKind::All => named,
                        UngroupKind::Exclude => !named,
                    }
                })
                .map(|(_, expr)| expr.clone()),
        );

        // The inner aggregate must not see the ungrouped frame again.
        self.frame = None;
        let value = self.compile_at(prefix, ns, expr);
        self.frame = Some(frame);
        let value = value?;

        let alias = format!("__u{}", self.ungroups.len());
        let reference = func("MAX", vec![table_col(&alias, UNGROUP_VALUE)]);
        self.ungroups.push(UngroupPlan {
            alias,
            partition,
            value,
        });
        Ok(reference)
    }
}
