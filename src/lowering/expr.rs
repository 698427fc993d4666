//! Expression lowering: parse-tree expressions to typed model expressions.
//!
//! Besides resolving names this is where the type and grouping level of an
//! expression are fixed, where `?`/ranges/durations/`pick` are desugared and
//! where references through one-to-many joins are checked for fan-out.

use std::sync::LazyLock;

use regex::Regex;

use crate::dsl::ast::{self, ExprKind, FieldPath};
use crate::dsl::{Span, Spanned};
use crate::model::{
    AggregateFunction, AtomicType, BinaryOp, CaseArm, Expr, ExprLevel, Literal, ScalarFunction,
    TimeUnit, UnaryOp,
};
use crate::semantic::error::{LocatedError, SemanticError};

use super::scope::{FieldLookup, Reads, Shape};
use super::{Ctx, LowerResult};

/// A lowered expression with its type and grouping level.
#[derive(Debug, Clone, PartialEq)]
pub struct Typed {
    pub expr: Expr,
    pub ty: AtomicType,
    pub level: ExprLevel,
    /// Join paths read by the scalar parts of the expression.
    pub reads: Reads,
    /// First field reference that crosses a one-to-many join, if any.
    pub fanned: Option<String>,
}

impl Typed {
    pub fn scalar(expr: Expr, ty: AtomicType) -> Self {
        Self {
            expr,
            ty,
            level: ExprLevel::Scalar,
            reads: Reads::new(),
            fanned: None,
        }
    }
}

/// Lower `expr` against `scope`.
pub fn lower_expr(scope: &mut dyn FieldLookup, ctx: Ctx<'_>, expr: &ast::Expr) -> LowerResult<Typed> {
    Lowerer { scope, ctx }.lower(expr)
}

// =============================================================================
// Time literals
// =============================================================================

static TIME_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^@?(\d{4})(?:-(\d{2})(?:-(\d{2})(?:[ T](\d{2}):(\d{2})(?::(\d{2})(?:\.\d+)?)?)?)?)?$",
    )
    .expect("time literal pattern")
});

static QUARTER_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@?(\d{4})-Q([1-4])$").expect("quarter literal pattern"));

/// Parse `@2021`, `@2021-Q2`, `@2021-03`, `@2021-03-04`, `@2021-03-04 10:30`
/// or `@2021-03-04 10:30:00` into a literal and its granularity.
pub fn parse_time_literal(text: &str) -> Option<(Literal, TimeUnit)> {
    let text = text.trim();
    if let Some(caps) = QUARTER_LITERAL.captures(text) {
        let quarter: u32 = caps[2].parse().ok()?;
        let month = (quarter - 1) * 3 + 1;
        return Some((
            Literal::Date(format!("{}-{:02}-01", &caps[1], month)),
            TimeUnit::Quarter,
        ));
    }

    let caps = TIME_LITERAL.captures(text)?;
    let year = &caps[1];
    let number = |i: usize| caps.get(i).map(|m| m.as_str().parse::<u32>().ok());
    let month = number(2);
    let day = number(3);
    let hour = number(4);
    let minute = number(5);
    let second = number(6);

    let in_range = |value: Option<Option<u32>>, low: u32, high: u32| match value {
        Some(Some(v)) => (low..=high).contains(&v),
        Some(None) => false,
        None => true,
    };
    if !(in_range(month, 1, 12)
        && in_range(day, 1, 31)
        && in_range(hour, 0, 23)
        && in_range(minute, 0, 59)
        && in_range(second, 0, 59))
    {
        return None;
    }

    let parsed = match (month.flatten(), day.flatten(), hour.flatten(), minute.flatten()) {
        (None, ..) => (Literal::Date(format!("{}-01-01", year)), TimeUnit::Year),
        (Some(m), None, ..) => (Literal::Date(format!("{}-{:02}-01", year, m)), TimeUnit::Month),
        (Some(m), Some(d), None, _) => {
            (Literal::Date(format!("{}-{:02}-{:02}", year, m, d)), TimeUnit::Day)
        }
        (Some(m), Some(d), Some(h), Some(min)) => {
            let (s, unit) = match second.flatten() {
                Some(s) => (s, TimeUnit::Second),
                None => (0, TimeUnit::Minute),
            };
            (
                Literal::Timestamp(format!(
                    "{}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, m, d, h, min, s
                )),
                unit,
            )
        }
        (Some(_), Some(_), Some(_), None) => return None,
    };
    Some(parsed)
}

// =============================================================================
// Lowerer
// =============================================================================

struct Lowerer<'s, 'c> {
    scope: &'s mut dyn FieldLookup,
    ctx: Ctx<'c>,
}

fn expect(found: AtomicType, want: AtomicType) -> bool {
    found == want || found == AtomicType::Null
}

impl Lowerer<'_, '_> {
    fn err(&self, error: SemanticError, span: Span) -> LocatedError {
        self.ctx.error(error, span)
    }

    fn mismatch(&self, message: String, span: Span) -> LocatedError {
        self.err(SemanticError::TypeMismatch(message), span)
    }

    fn lower(&mut self, expr: &ast::Expr) -> LowerResult<Typed> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Number { value } => Ok(Typed::scalar(
                Expr::Literal(Literal::Number(value.clone())),
                AtomicType::Number,
            )),
            ExprKind::String { value } => Ok(Typed::scalar(
                Expr::Literal(Literal::String(value.clone())),
                AtomicType::String,
            )),
            ExprKind::Boolean { value } => Ok(Typed::scalar(
                Expr::Literal(Literal::Boolean(*value)),
                AtomicType::Boolean,
            )),
            ExprKind::Null => Ok(Typed::scalar(Expr::Literal(Literal::Null), AtomicType::Null)),
            ExprKind::Time { literal } => {
                let (literal, _) = self.time_literal(literal, span)?;
                let ty = literal.ty();
                Ok(Typed::scalar(Expr::Literal(literal), ty))
            }
            ExprKind::Now => Ok(Typed::scalar(Expr::Now, AtomicType::Timestamp)),
            ExprKind::Field { path } => self.field(path),
            ExprKind::Unary { op, operand } => {
                let operand = self.lower(operand)?;
                let want = match op {
                    UnaryOp::Not => AtomicType::Boolean,
                    UnaryOp::Neg => AtomicType::Number,
                };
                if !expect(operand.ty, want) {
                    return Err(self.mismatch(
                        format!(
                            "'{}' requires a {} operand, found {}",
                            if *op == UnaryOp::Not { "not" } else { "-" },
                            want.name(),
                            operand.ty.name()
                        ),
                        span,
                    ));
                }
                Ok(Typed {
                    expr: Expr::Unary {
                        op: *op,
                        operand: Box::new(operand.expr),
                    },
                    ty: want,
                    ..operand
                })
            }
            ExprKind::Binary { op, left, right } => self.binary(*op, left, right, span),
            ExprKind::Aggregate {
                function,
                source,
                arg,
            } => self.aggregate(*function, source.as_ref(), arg.as_deref(), span),
            ExprKind::Filtered { expr, filters } => self.filtered(expr, filters, span),
            ExprKind::Pick { arms, otherwise } => self.pick(arms, otherwise.as_deref(), span),
            ExprKind::Cast { expr, to, safe } => {
                let inner = self.lower(expr)?;
                Ok(Typed {
                    expr: Expr::Cast {
                        expr: Box::new(inner.expr),
                        to: *to,
                        safe: *safe,
                    },
                    ty: *to,
                    ..inner
                })
            }
            ExprKind::Truncate { expr, unit } => {
                let inner = self.lower(expr)?;
                self.require_temporal(&inner, &format!(".{}", unit.name()), span)?;
                if inner.ty == AtomicType::Date && unit.is_sub_day() {
                    return Err(self.mismatch(
                        format!("cannot truncate a date to {}", unit.name()),
                        span,
                    ));
                }
                let ty = inner.ty;
                Ok(Typed {
                    expr: Expr::Truncate {
                        expr: Box::new(inner.expr),
                        unit: *unit,
                        ty,
                    },
                    ..inner
                })
            }
            ExprKind::Extract { unit, expr } => {
                let inner = self.lower(expr)?;
                self.require_temporal(&inner, unit.name(), span)?;
                Ok(Typed {
                    expr: Expr::Extract {
                        expr: Box::new(inner.expr),
                        unit: *unit,
                    },
                    ty: AtomicType::Number,
                    ..inner
                })
            }
            ExprKind::Duration { .. } => Err(self.mismatch(
                "a duration is only meaningful in time arithmetic or a range".into(),
                span,
            )),
            ExprKind::Range { .. } => Err(self.mismatch(
                "a range is only meaningful on the right of '?'".into(),
                span,
            )),
            ExprKind::Apply { value, pattern } => {
                let value = self.lower(value)?;
                self.apply(&value, pattern)
            }
            ExprKind::IsNull { expr, negated } => {
                let inner = self.lower(expr)?;
                Ok(Typed {
                    expr: Expr::IsNull {
                        expr: Box::new(inner.expr),
                        negated: *negated,
                    },
                    ty: AtomicType::Boolean,
                    ..inner
                })
            }
            ExprKind::In {
                expr,
                values,
                negated,
            } => {
                let inner = self.lower(expr)?;
                let mut lowered = Vec::with_capacity(values.len());
                for value in values {
                    let v = self.lower(value)?;
                    if !inner.ty.is_compatible(v.ty) {
                        return Err(self.mismatch(
                            format!(
                                "'in' list mixes {} with {}",
                                inner.ty.name(),
                                v.ty.name()
                            ),
                            value.span,
                        ));
                    }
                    lowered.push(v);
                }
                let mut parts: Vec<&Typed> = vec![&inner];
                parts.extend(lowered.iter());
                let (level, reads, fanned) = self.combine(&parts, span)?;
                Ok(Typed {
                    expr: Expr::In {
                        expr: Box::new(inner.expr.clone()),
                        values: lowered.iter().map(|v| v.expr.clone()).collect(),
                        negated: *negated,
                    },
                    ty: AtomicType::Boolean,
                    level,
                    reads,
                    fanned,
                })
            }
            ExprKind::Ungroup { kind, expr, fields } => {
                let inner = self.lower(expr)?;
                if !inner.level.is_aggregate() {
                    return Err(self.err(
                        SemanticError::IllegalAggregate(
                            "all() and exclude() require an aggregate expression".into(),
                        ),
                        span,
                    ));
                }
                if inner.expr.contains_ungroup() {
                    return Err(self.err(
                        SemanticError::IllegalAggregate(
                            "all() and exclude() cannot be nested".into(),
                        ),
                        span,
                    ));
                }
                Ok(Typed {
                    expr: Expr::Ungroup {
                        kind: *kind,
                        expr: Box::new(inner.expr),
                        fields: fields.iter().map(|f| f.node.clone()).collect(),
                    },
                    ..inner
                })
            }
            ExprKind::Call { function, args } => self.call(function, args, span),
        }
    }

    // =========================================================================
    // Names
    // =========================================================================

    fn field(&mut self, path: &FieldPath) -> LowerResult<Typed> {
        let field = self
            .scope
            .lookup(&path.names)
            .map_err(|e| self.err(e, path.span))?;
        let expr = field
            .inline
            .clone()
            .unwrap_or_else(|| Expr::Field(path.names.clone()));
        match field.shape {
            Shape::Dimension => {
                let mut reads = field.reads.clone();
                if reads.is_empty() {
                    let crosses = field.relationships.iter().any(|r| r.is_many());
                    reads.insert(field.join_path.clone(), crosses);
                }
                let fanned = reads.values().any(|c| *c).then(|| path.to_string());
                Ok(Typed {
                    expr,
                    ty: field.ty,
                    level: ExprLevel::Scalar,
                    reads,
                    fanned,
                })
            }
            Shape::Measure => Ok(Typed {
                expr,
                ty: field.ty,
                level: ExprLevel::Aggregate,
                reads: Reads::new(),
                fanned: None,
            }),
            other => Err(self.err(
                SemanticError::WrongFieldKind {
                    path: path.to_string(),
                    found: other.name(),
                    expected: "dimension or measure",
                },
                path.span,
            )),
        }
    }

    fn time_literal(&self, text: &str, span: Span) -> LowerResult<(Literal, TimeUnit)> {
        parse_time_literal(text).ok_or_else(|| {
            self.err(
                SemanticError::Syntax(format!("invalid time literal '{}'", text)),
                span,
            )
        })
    }

    /// Level, reads and fan-out marker of an expression built from `parts`.
    ///
    /// A scalar part that crosses a one-to-many join cannot meet an
    /// aggregate outside an aggregate function.
    fn combine(
        &self,
        parts: &[&Typed],
        span: Span,
    ) -> LowerResult<(ExprLevel, Reads, Option<String>)> {
        let level = parts
            .iter()
            .map(|p| p.level)
            .max()
            .unwrap_or(ExprLevel::Scalar);
        let mut reads = Reads::new();
        let mut fanned = None;
        for part in parts.iter().filter(|p| !p.level.is_aggregate()) {
            if level.is_aggregate() {
                if let Some(path) = &part.fanned {
                    return Err(self.err(SemanticError::FanOut { path: path.clone() }, span));
                }
            }
            for (path, crosses) in &part.reads {
                *reads.entry(path.clone()).or_insert(false) |= *crosses;
            }
            if fanned.is_none() {
                fanned = part.fanned.clone();
            }
        }
        Ok((level, reads, fanned))
    }

    fn require_temporal(&self, value: &Typed, what: &str, span: Span) -> LowerResult<()> {
        if value.ty.is_temporal() || value.ty == AtomicType::Null {
            Ok(())
        } else {
            Err(self.mismatch(
                format!("'{}' requires a date or timestamp, found {}", what, value.ty.name()),
                span,
            ))
        }
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn binary(
        &mut self,
        op: BinaryOp,
        left: &ast::Expr,
        right: &ast::Expr,
        span: Span,
    ) -> LowerResult<Typed> {
        // `x = null` is a null test
        if matches!(op, BinaryOp::Eq | BinaryOp::Ne) && matches!(right.kind, ExprKind::Null) {
            let inner = self.lower(left)?;
            return Ok(Typed {
                expr: Expr::IsNull {
                    expr: Box::new(inner.expr),
                    negated: op == BinaryOp::Ne,
                },
                ty: AtomicType::Boolean,
                ..inner
            });
        }
        if matches!(op, BinaryOp::Add | BinaryOp::Sub) {
            if let ExprKind::Duration { amount, unit } = &right.kind {
                let base = self.lower(left)?;
                return self.offset(base, amount.as_ref(), *unit, op == BinaryOp::Sub, span);
            }
        }

        let l = self.lower(left)?;
        let r = self.lower(right)?;
        match op {
            BinaryOp::Coalesce => {
                if !l.ty.is_compatible(r.ty) {
                    return Err(self.operand_mismatch(op, &l, &r, span));
                }
                let ty = l.ty.unify(r.ty);
                self.build(
                    Expr::Call {
                        function: ScalarFunction::Coalesce,
                        args: vec![l.expr.clone(), r.expr.clone()],
                    },
                    ty,
                    &[&l, &r],
                    span,
                )
            }
            BinaryOp::And | BinaryOp::Or => {
                if !expect(l.ty, AtomicType::Boolean) || !expect(r.ty, AtomicType::Boolean) {
                    return Err(self.operand_mismatch(op, &l, &r, span));
                }
                self.build(
                    Expr::binary(op, l.expr.clone(), r.expr.clone()),
                    AtomicType::Boolean,
                    &[&l, &r],
                    span,
                )
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                if !expect(l.ty, AtomicType::Number) || !expect(r.ty, AtomicType::Number) {
                    return Err(self.operand_mismatch(op, &l, &r, span));
                }
                self.build(
                    Expr::binary(op, l.expr.clone(), r.expr.clone()),
                    AtomicType::Number,
                    &[&l, &r],
                    span,
                )
            }
            BinaryOp::Like | BinaryOp::NotLike => {
                if !expect(l.ty, AtomicType::String) || !expect(r.ty, AtomicType::String) {
                    return Err(self.operand_mismatch(op, &l, &r, span));
                }
                self.build(
                    Expr::binary(op, l.expr.clone(), r.expr.clone()),
                    AtomicType::Boolean,
                    &[&l, &r],
                    span,
                )
            }
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Lte
            | BinaryOp::Gt
            | BinaryOp::Gte => self.compare(op, &l, &r, span),
        }
    }

    fn operand_mismatch(&self, op: BinaryOp, l: &Typed, r: &Typed, span: Span) -> LocatedError {
        self.mismatch(
            format!(
                "'{}' cannot be applied to {} and {}",
                op.symbol(),
                l.ty.name(),
                r.ty.name()
            ),
            span,
        )
    }

    fn build(&self, expr: Expr, ty: AtomicType, parts: &[&Typed], span: Span) -> LowerResult<Typed> {
        let (level, reads, fanned) = self.combine(parts, span)?;
        Ok(Typed {
            expr,
            ty,
            level,
            reads,
            fanned,
        })
    }

    /// Comparison; a date meeting a timestamp is widened to a timestamp.
    fn compare(&self, op: BinaryOp, l: &Typed, r: &Typed, span: Span) -> LowerResult<Typed> {
        if !l.ty.is_compatible(r.ty) {
            return Err(self.operand_mismatch(op, l, r, span));
        }
        let widen = |side: &Typed, other: &Typed| match (side.ty, other.ty) {
            (AtomicType::Date, AtomicType::Timestamp) => Expr::Cast {
                expr: Box::new(side.expr.clone()),
                to: AtomicType::Timestamp,
                safe: false,
            },
            _ => side.expr.clone(),
        };
        self.build(
            Expr::binary(op, widen(l, r), widen(r, l)),
            AtomicType::Boolean,
            &[l, r],
            span,
        )
    }

    /// `base + amount unit`
    fn offset(
        &mut self,
        base: Typed,
        amount: &ast::Expr,
        unit: TimeUnit,
        subtract: bool,
        span: Span,
    ) -> LowerResult<Typed> {
        self.require_temporal(&base, "time arithmetic", span)?;
        let amount = self.lower(amount)?;
        if !expect(amount.ty, AtomicType::Number) {
            return Err(self.mismatch(
                format!("a duration needs a number, found {}", amount.ty.name()),
                span,
            ));
        }
        let ty = if base.ty == AtomicType::Date && unit.is_sub_day() {
            AtomicType::Timestamp
        } else {
            base.ty
        };
        self.build(
            Expr::TimeOffset {
                expr: Box::new(base.expr.clone()),
                amount: Box::new(amount.expr.clone()),
                unit,
                ty: base.ty,
                subtract,
            },
            ty,
            &[&base, &amount],
            span,
        )
    }

    // =========================================================================
    // `?` patterns
    // =========================================================================

    fn apply(&mut self, value: &Typed, pattern: &ast::Expr) -> LowerResult<Typed> {
        let span = pattern.span;
        match &pattern.kind {
            ExprKind::Range { start, end } => {
                let start = self.lower(start)?;
                self.range(value, start, end, span)
            }
            ExprKind::Time { literal } => {
                let (literal, unit) = self.time_literal(literal, span)?;
                let ty = literal.ty();
                let start = Typed::scalar(Expr::Literal(literal), ty);
                if unit == TimeUnit::Second {
                    return self.compare(BinaryOp::Eq, value, &start, span);
                }
                let end = Typed::scalar(
                    Expr::TimeOffset {
                        expr: Box::new(start.expr.clone()),
                        amount: Box::new(Expr::number(1)),
                        unit,
                        ty,
                        subtract: false,
                    },
                    ty,
                );
                self.half_open(value, &start, &end, span)
            }
            ExprKind::Binary {
                op: op @ (BinaryOp::And | BinaryOp::Or),
                left,
                right,
            } => {
                let l = self.apply(value, left)?;
                let r = self.apply(value, right)?;
                self.build(
                    Expr::binary(*op, l.expr.clone(), r.expr.clone()),
                    AtomicType::Boolean,
                    &[&l, &r],
                    span,
                )
            }
            ExprKind::Null => Ok(Typed {
                expr: Expr::IsNull {
                    expr: Box::new(value.expr.clone()),
                    negated: false,
                },
                ty: AtomicType::Boolean,
                ..value.clone()
            }),
            _ => {
                let p = self.lower(pattern)?;
                self.compare(BinaryOp::Eq, value, &p, span)
            }
        }
    }

    fn range(
        &mut self,
        value: &Typed,
        start: Typed,
        end: &ast::Expr,
        span: Span,
    ) -> LowerResult<Typed> {
        let end = match &end.kind {
            ExprKind::Duration { amount, unit } => {
                self.offset(start.clone(), amount, *unit, false, span)?
            }
            _ => self.lower(end)?,
        };
        self.half_open(value, &start, &end, span)
    }

    /// `start <= value < end`
    fn half_open(&self, value: &Typed, start: &Typed, end: &Typed, span: Span) -> LowerResult<Typed> {
        let lower = self.compare(BinaryOp::Gte, value, start, span)?;
        let upper = self.compare(BinaryOp::Lt, value, end, span)?;
        self.build(
            lower.expr.clone().and(upper.expr.clone()),
            AtomicType::Boolean,
            &[&lower, &upper],
            span,
        )
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    fn aggregate(
        &mut self,
        function: AggregateFunction,
        source: Option<&FieldPath>,
        arg: Option<&ast::Expr>,
        span: Span,
    ) -> LowerResult<Typed> {
        // count(x) counts distinct values
        let function = match (function, arg) {
            (AggregateFunction::Count, Some(_)) => AggregateFunction::CountDistinct,
            (f, _) => f,
        };
        let arg = arg.map(|a| self.lower(a)).transpose()?;
        if let Some(a) = &arg {
            if a.level.is_aggregate() {
                return Err(self.err(
                    SemanticError::IllegalAggregate("aggregate functions cannot be nested".into()),
                    span,
                ));
            }
        }
        let ty = match (function, &arg) {
            (AggregateFunction::Count, _) => AtomicType::Number,
            (_, None) => {
                return Err(self.mismatch(format!("'{}' requires an argument", function.name()), span))
            }
            (AggregateFunction::CountDistinct, Some(_)) => AtomicType::Number,
            (AggregateFunction::Sum | AggregateFunction::Avg, Some(a)) => {
                if !expect(a.ty, AtomicType::Number) {
                    return Err(self.mismatch(
                        format!("'{}' requires a number, found {}", function.name(), a.ty.name()),
                        span,
                    ));
                }
                AtomicType::Number
            }
            (AggregateFunction::Min | AggregateFunction::Max, Some(a)) => a.ty,
        };

        let locality = match source {
            Some(path) => {
                let field = self
                    .scope
                    .lookup(&path.names)
                    .map_err(|e| self.err(e, path.span))?;
                if !matches!(field.shape, Shape::Join(..)) {
                    return Err(self.err(
                        SemanticError::WrongFieldKind {
                            path: path.to_string(),
                            found: field.shape.name(),
                            expected: "join",
                        },
                        path.span,
                    ));
                }
                path.names.clone()
            }
            None => match &arg {
                Some(a) => self.locality(&a.reads, span)?,
                None => Vec::new(),
            },
        };

        Ok(Typed {
            expr: Expr::Aggregate {
                function,
                locality,
                arg: arg.map(|a| Box::new(a.expr)),
            },
            ty,
            level: ExprLevel::Aggregate,
            reads: Reads::new(),
            fanned: None,
        })
    }

    /// The deepest join path read; every other path must lie on it.
    fn locality(&self, reads: &Reads, span: Span) -> LowerResult<Vec<String>> {
        let Some(deepest) = reads.keys().max_by_key(|p| p.len()) else {
            return Ok(Vec::new());
        };
        for path in reads.keys() {
            if !deepest.starts_with(path) {
                return Err(self.mismatch(
                    format!(
                        "aggregate reads from unrelated joins '{}' and '{}'",
                        path.join("."),
                        deepest.join(".")
                    ),
                    span,
                ));
            }
        }
        Ok(deepest.clone())
    }

    fn filtered(&mut self, expr: &ast::Expr, filters: &[ast::Expr], span: Span) -> LowerResult<Typed> {
        let inner = self.lower(expr)?;
        if !inner.level.is_aggregate() {
            return Err(self.err(
                SemanticError::IllegalAggregate("only aggregates can be filtered".into()),
                span,
            ));
        }
        let mut conditions = Vec::with_capacity(filters.len());
        for filter in filters {
            let cond = self.condition(filter)?;
            conditions.push(cond.expr);
        }
        let Some(filter) = Expr::conjunction(conditions) else {
            return Ok(inner);
        };
        Ok(Typed {
            expr: Expr::Filtered {
                expr: Box::new(inner.expr),
                filter: Box::new(filter),
            },
            ..inner
        })
    }

    /// A scalar boolean condition.
    fn condition(&mut self, filter: &ast::Expr) -> LowerResult<Typed> {
        let cond = self.lower(filter)?;
        if cond.level.is_aggregate() {
            return Err(self.err(
                SemanticError::IllegalAggregate("filter conditions cannot contain aggregates".into()),
                filter.span,
            ));
        }
        if !expect(cond.ty, AtomicType::Boolean) {
            return Err(self.mismatch(
                format!("a filter must be boolean, found {}", cond.ty.name()),
                filter.span,
            ));
        }
        Ok(cond)
    }

    // =========================================================================
    // pick and calls
    // =========================================================================

    fn pick(
        &mut self,
        arms: &[ast::PickArm],
        otherwise: Option<&ast::Expr>,
        span: Span,
    ) -> LowerResult<Typed> {
        let mut lowered = Vec::with_capacity(arms.len() * 2 + 1);
        let mut ty = AtomicType::Null;
        let mut case_arms = Vec::with_capacity(arms.len());
        for arm in arms {
            let when = self.lower(&arm.when)?;
            if !expect(when.ty, AtomicType::Boolean) {
                return Err(self.mismatch(
                    format!("'when' needs a boolean, found {}", when.ty.name()),
                    arm.when.span,
                ));
            }
            let value = self.lower(&arm.value)?;
            if !ty.is_compatible(value.ty) {
                return Err(self.mismatch(
                    format!("pick mixes {} with {}", ty.name(), value.ty.name()),
                    arm.value.span,
                ));
            }
            ty = ty.unify(value.ty);
            case_arms.push(CaseArm {
                when: when.expr.clone(),
                then: value.expr.clone(),
            });
            lowered.push(when);
            lowered.push(value);
        }
        let otherwise = match otherwise {
            Some(e) => {
                let value = self.lower(e)?;
                if !ty.is_compatible(value.ty) {
                    return Err(self.mismatch(
                        format!("pick mixes {} with {}", ty.name(), value.ty.name()),
                        e.span,
                    ));
                }
                ty = ty.unify(value.ty);
                let expr = value.expr.clone();
                lowered.push(value);
                Some(Box::new(expr))
            }
            None => None,
        };
        let parts: Vec<&Typed> = lowered.iter().collect();
        self.build(
            Expr::Case {
                arms: case_arms,
                otherwise,
            },
            ty,
            &parts,
            span,
        )
    }

    fn call(
        &mut self,
        function: &Spanned<String>,
        args: &[ast::Expr],
        span: Span,
    ) -> LowerResult<Typed> {
        let Some(scalar) = ScalarFunction::from_name(&function.node) else {
            return Err(self.err(
                SemanticError::UndefinedEntity {
                    entity: "function",
                    name: function.node.clone(),
                },
                function.span,
            ));
        };
        let (min, max) = scalar.arity();
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                min.to_string()
            } else if max == usize::MAX {
                format!("at least {}", min)
            } else {
                format!("{} to {}", min, max)
            };
            return Err(self.mismatch(
                format!(
                    "'{}' takes {} arguments, found {}",
                    function.node,
                    expected,
                    args.len()
                ),
                span,
            ));
        }
        let lowered = args
            .iter()
            .map(|a| self.lower(a))
            .collect::<LowerResult<Vec<_>>>()?;
        let first = lowered.first().map(|a| a.ty).unwrap_or(AtomicType::Null);
        let parts: Vec<&Typed> = lowered.iter().collect();
        self.build(
            Expr::Call {
                function: scalar,
                args: lowered.iter().map(|a| a.expr.clone()).collect(),
            },
            scalar.result_type(first),
            &parts,
            span,
        )
    }
}
