//! AST node types for the modeling language.
//!
//! One enum variant per grammar alternative. Nodes derive `Deserialize` so an
//! external parser can hand over documents as JSON; see
//! [`JsonParseTree`](crate::dsl::JsonParseTree). Spans default to zero when a
//! producer omits them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dsl::span::{Span, Spanned};

// ============================================================================
// Document (Root)
// ============================================================================

/// A parsed document: the ordered list of top-level statements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub statements: Vec<Statement>,
}

/// A top-level statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Statement {
    /// `import "other.model"`
    Import(ImportStatement),
    /// `source: name is <source>`
    Source(SourceStatement),
    /// `query: name is <query>`, or an anonymous `run: <query>` when unnamed.
    Query(QueryStatement),
    /// `sql: name is { connection: c; select: """...""" }`
    Sql(SqlStatement),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportStatement {
    pub url: String,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatement {
    pub name: Spanned<String>,
    pub source: SourceExpr,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryStatement {
    #[serde(default)]
    pub name: Option<Spanned<String>>,
    pub query: QueryExpr,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlStatement {
    pub name: Spanned<String>,
    #[serde(default)]
    pub connection: Option<String>,
    pub select: String,
    #[serde(default)]
    pub span: Span,
}

// ============================================================================
// Sources
// ============================================================================

/// Anything that produces a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceExpr {
    /// Reference to a named source.
    Named { name: Spanned<String> },
    /// `connection.table('schema.table')`
    Table {
        #[serde(default)]
        connection: Option<String>,
        path: String,
        #[serde(default)]
        span: Span,
    },
    /// `from(<query>)`
    FromQuery {
        query: Box<QueryExpr>,
        #[serde(default)]
        span: Span,
    },
    /// `from_sql(name)`
    FromSql { name: Spanned<String> },
    /// `<source> { properties }`
    Refine {
        base: Box<SourceExpr>,
        body: Vec<SourceProperty>,
        #[serde(default)]
        span: Span,
    },
}

impl SourceExpr {
    pub fn span(&self) -> Span {
        match self {
            SourceExpr::Named { name } | SourceExpr::FromSql { name } => name.span,
            SourceExpr::Table { span, .. }
            | SourceExpr::FromQuery { span, .. }
            | SourceExpr::Refine { span, .. } => *span,
        }
    }

    pub fn named(name: &str) -> Self {
        SourceExpr::Named {
            name: Spanned::new(name.to_string(), Span::default()),
        }
    }

    pub fn table(connection: Option<&str>, path: &str) -> Self {
        SourceExpr::Table {
            connection: connection.map(str::to_string),
            path: path.to_string(),
            span: Span::default(),
        }
    }

    pub fn refine(self, body: Vec<SourceProperty>) -> Self {
        SourceExpr::Refine {
            base: Box::new(self),
            body,
            span: Span::default(),
        }
    }
}

/// A property inside a source body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceProperty {
    Dimension { fields: Vec<FieldDecl> },
    Measure { fields: Vec<FieldDecl> },
    /// Fields whose kind is inferred from the expression.
    Declare { fields: Vec<FieldDecl> },
    Join { joins: Vec<JoinDecl> },
    Where { filters: Vec<Expr> },
    PrimaryKey { field: Spanned<String> },
    Accept { fields: Vec<Spanned<String>> },
    Except { fields: Vec<Spanned<String>> },
    Rename { renames: Vec<RenameDecl> },
    /// Named views (`query:`/`view:` inside a source).
    View { views: Vec<ViewDecl> },
}

/// `name is <expr>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: Spanned<String>,
    pub expr: Expr,
    #[serde(default)]
    pub span: Span,
}

impl FieldDecl {
    pub fn new(name: &str, expr: Expr) -> Self {
        Self {
            name: Spanned::new(name.to_string(), Span::default()),
            expr,
            span: Span::default(),
        }
    }
}

/// Relationship written in the join keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// `join_one`
    One,
    /// `join_many`
    Many,
    /// `join_cross`
    Cross,
}

/// `join_one: name is <source> with <expr>` and friends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinDecl {
    pub name: Spanned<String>,
    pub kind: JoinKind,
    /// Joined source; when absent the join name names the source.
    #[serde(default)]
    pub source: Option<SourceExpr>,
    #[serde(default)]
    pub condition: Option<JoinCondition>,
    #[serde(default)]
    pub span: Span,
}

impl JoinDecl {
    pub fn new(name: &str, kind: JoinKind, source: SourceExpr) -> Self {
        Self {
            name: Spanned::new(name.to_string(), Span::default()),
            kind,
            source: Some(source),
            condition: None,
            span: Span::default(),
        }
    }

    pub fn with(mut self, expr: Expr) -> Self {
        self.condition = Some(JoinCondition::With { expr });
        self
    }

    pub fn on(mut self, expr: Expr) -> Self {
        self.condition = Some(JoinCondition::On { expr });
        self
    }
}

/// How a join correlates with its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JoinCondition {
    /// `with parent_key`: matched against the joined source's primary key.
    With { expr: Expr },
    /// `on <boolean expr>`
    On { expr: Expr },
}

/// `rename: new_name is old_name`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameDecl {
    pub new_name: Spanned<String>,
    pub old_name: Spanned<String>,
}

/// A named view inside a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDecl {
    pub name: Spanned<String>,
    pub pipeline: Vec<PipeElement>,
    #[serde(default)]
    pub span: Span,
}

// ============================================================================
// Queries
// ============================================================================

/// `<head> -> stage -> stage ...`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryExpr {
    pub head: QueryHead,
    #[serde(default)]
    pub pipeline: Vec<PipeElement>,
    #[serde(default)]
    pub span: Span,
}

impl QueryExpr {
    pub fn from_source(source: SourceExpr, pipeline: Vec<PipeElement>) -> Self {
        Self {
            head: QueryHead::Source { source },
            pipeline,
            span: Span::default(),
        }
    }

    pub fn from_query(name: &str, pipeline: Vec<PipeElement>) -> Self {
        Self {
            head: QueryHead::Query {
                name: Spanned::new(name.to_string(), Span::default()),
            },
            pipeline,
            span: Span::default(),
        }
    }
}

/// What a query pipeline starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryHead {
    Source { source: SourceExpr },
    /// A named query whose output is refined by further stages.
    Query { name: Spanned<String> },
}

/// One arrow-separated pipeline element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipeElement {
    Stage(StageBlock),
    /// A named view, optionally refined with `+ { ... }`.
    View {
        name: Spanned<String>,
        #[serde(default)]
        refinement: Option<StageBlock>,
    },
}

impl PipeElement {
    pub fn stage(properties: Vec<StageProperty>) -> Self {
        PipeElement::Stage(StageBlock::new(properties))
    }

    pub fn view(name: &str) -> Self {
        PipeElement::View {
            name: Spanned::new(name.to_string(), Span::default()),
            refinement: None,
        }
    }
}

/// `{ group_by: ...; aggregate: ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageBlock {
    pub properties: Vec<StageProperty>,
    #[serde(default)]
    pub span: Span,
}

impl StageBlock {
    pub fn new(properties: Vec<StageProperty>) -> Self {
        Self {
            properties,
            span: Span::default(),
        }
    }
}

/// A property inside a query stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageProperty {
    GroupBy { fields: Vec<QueryItem> },
    Aggregate { fields: Vec<QueryItem> },
    Project { fields: Vec<QueryItem> },
    Index {
        fields: Vec<QueryItem>,
        #[serde(default)]
        by: Option<Spanned<String>>,
    },
    Nest { entries: Vec<NestItem> },
    Where { filters: Vec<Expr> },
    Having { filters: Vec<Expr> },
    OrderBy { items: Vec<OrderByItem> },
    Limit {
        count: u64,
        #[serde(default)]
        span: Span,
    },
    /// `top: n` or `top: n by field`
    Top {
        count: u64,
        #[serde(default)]
        by: Option<OrderByItem>,
        #[serde(default)]
        span: Span,
    },
    Sample {
        sample: SampleSpec,
        #[serde(default)]
        span: Span,
    },
    Declare { fields: Vec<FieldDecl> },
}

/// An entry in a `group_by`/`aggregate`/`project`/`index` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryItem {
    /// `path` or `path {? filter}`
    Reference {
        path: FieldPath,
        #[serde(default)]
        filters: Vec<Expr>,
    },
    /// `name is <expr>`
    Define(FieldDecl),
    /// `*` or `join.*`
    Wildcard {
        #[serde(default)]
        path: Vec<String>,
        #[serde(default)]
        span: Span,
    },
}

impl QueryItem {
    pub fn reference(path: &str) -> Self {
        QueryItem::Reference {
            path: FieldPath::parse(path),
            filters: vec![],
        }
    }

    pub fn define(name: &str, expr: Expr) -> Self {
        QueryItem::Define(FieldDecl::new(name, expr))
    }

    pub fn wildcard() -> Self {
        QueryItem::Wildcard {
            path: vec![],
            span: Span::default(),
        }
    }
}

/// An entry in a `nest:` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NestItem {
    /// A view of the current source, optionally refined.
    Reference {
        name: Spanned<String>,
        #[serde(default)]
        refinement: Option<StageBlock>,
    },
    /// `name is { ... } -> { ... }`
    Define {
        name: Spanned<String>,
        pipeline: Vec<PipeElement>,
        #[serde(default)]
        span: Span,
    },
}

impl NestItem {
    pub fn define(name: &str, pipeline: Vec<PipeElement>) -> Self {
        NestItem::Define {
            name: Spanned::new(name.to_string(), Span::default()),
            pipeline,
            span: Span::default(),
        }
    }

    pub fn reference(name: &str) -> Self {
        NestItem::Reference {
            name: Spanned::new(name.to_string(), Span::default()),
            refinement: None,
        }
    }
}

/// `order_by: field desc` or `order_by: 2`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByItem {
    pub field: OrderTarget,
    #[serde(default)]
    pub direction: Option<SortDirection>,
    #[serde(default)]
    pub span: Span,
}

impl OrderByItem {
    pub fn asc(name: &str) -> Self {
        Self {
            field: OrderTarget::Name(name.to_string()),
            direction: Some(SortDirection::Asc),
            span: Span::default(),
        }
    }

    pub fn desc(name: &str) -> Self {
        Self {
            field: OrderTarget::Name(name.to_string()),
            direction: Some(SortDirection::Desc),
            span: Span::default(),
        }
    }
}

/// An output field named or counted from one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderTarget {
    Ordinal(u64),
    Name(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// `sample: true`, `sample: 5000`, `sample: 10%`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SampleSpec {
    Enabled { enabled: bool },
    Rows { rows: u64 },
    Percent { percent: f64 },
}

// ============================================================================
// Expressions
// ============================================================================

/// A dotted field path such as `carriers.nickname`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath {
    pub names: Vec<String>,
    #[serde(default)]
    pub span: Span,
}

impl FieldPath {
    pub fn parse(dotted: &str) -> Self {
        Self {
            names: dotted.split('.').map(str::to_string).collect(),
            span: Span::default(),
        }
    }

    pub fn last(&self) -> &str {
        self.names.last().map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names.join("."))
    }
}

/// Scalar types of the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomicType {
    String,
    Number,
    Boolean,
    Date,
    Timestamp,
    /// Type of the `null` literal; compatible with every other type.
    Null,
}

/// Truncation and offset units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

/// Extraction units: `year(t)`, `day_of_week(t)` ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractUnit {
    Second,
    Minute,
    Hour,
    Day,
    DayOfWeek,
    DayOfYear,
    Week,
    Month,
    Quarter,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Like,
    NotLike,
    /// `??`
    Coalesce,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Like => "~",
            BinaryOp::NotLike => "!~",
            BinaryOp::Coalesce => "??",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UngroupKind {
    All,
    Exclude,
}

/// `pick <value> when <condition>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickArm {
    pub value: Expr,
    pub when: Expr,
}

/// An expression node with its span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    #[serde(default)]
    pub span: Span,
}

/// Expression alternatives. Operator precedence is already encoded in the
/// shape of the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExprKind {
    Number {
        value: String,
    },
    String {
        value: String,
    },
    Boolean {
        value: bool,
    },
    Null,
    /// `@2021`, `@2021-03`, `@2021-03-04`, `@2021-03-04 10:30:00`
    Time {
        literal: String,
    },
    Now,
    Field {
        path: FieldPath,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `count()`, `sum(x)`, `join.count()`, `join.avg(join.x)`
    Aggregate {
        function: AggregateFunction,
        #[serde(default)]
        source: Option<FieldPath>,
        #[serde(default)]
        arg: Option<Box<Expr>>,
    },
    /// `expr {? filter}` / `expr { where: filter }`
    Filtered {
        expr: Box<Expr>,
        filters: Vec<Expr>,
    },
    Pick {
        arms: Vec<PickArm>,
        #[serde(default)]
        otherwise: Option<Box<Expr>>,
    },
    /// `expr::type`, or `expr:::type` when `safe`
    Cast {
        expr: Box<Expr>,
        to: AtomicType,
        #[serde(default)]
        safe: bool,
    },
    /// `expr.month`
    Truncate {
        expr: Box<Expr>,
        unit: TimeUnit,
    },
    /// `month(expr)`
    Extract {
        unit: ExtractUnit,
        expr: Box<Expr>,
    },
    /// `3 days`: only meaningful as a time offset or range length.
    Duration {
        amount: Box<Expr>,
        unit: TimeUnit,
    },
    /// `start to end`, or `start for 3 days` when `end` is a duration.
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
    },
    /// `value ? pattern`
    Apply {
        value: Box<Expr>,
        pattern: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        #[serde(default)]
        negated: bool,
    },
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        #[serde(default)]
        negated: bool,
    },
    /// `all(expr, fields...)` / `exclude(expr, fields...)`
    Ungroup {
        kind: UngroupKind,
        expr: Box<Expr>,
        #[serde(default)]
        fields: Vec<Spanned<String>>,
    },
    /// Scalar function call.
    Call {
        function: Spanned<String>,
        args: Vec<Expr>,
    },
}

// ============================================================================
// Expression constructors
// ============================================================================

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            span: Span::default(),
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn field(dotted: &str) -> Self {
        Expr::new(ExprKind::Field {
            path: FieldPath::parse(dotted),
        })
    }

    pub fn number(value: impl ToString) -> Self {
        Expr::new(ExprKind::Number {
            value: value.to_string(),
        })
    }

    pub fn string(value: &str) -> Self {
        Expr::new(ExprKind::String {
            value: value.to_string(),
        })
    }

    pub fn boolean(value: bool) -> Self {
        Expr::new(ExprKind::Boolean { value })
    }

    pub fn time(literal: &str) -> Self {
        Expr::new(ExprKind::Time {
            literal: literal.to_string(),
        })
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::new(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn aggregate(function: AggregateFunction, arg: Option<Expr>) -> Self {
        Expr::new(ExprKind::Aggregate {
            function,
            source: None,
            arg: arg.map(Box::new),
        })
    }

    /// `join.count()` style aggregate with an explicit locality.
    pub fn aggregate_at(function: AggregateFunction, source: &str, arg: Option<Expr>) -> Self {
        Expr::new(ExprKind::Aggregate {
            function,
            source: Some(FieldPath::parse(source)),
            arg: arg.map(Box::new),
        })
    }

    pub fn count() -> Self {
        Expr::aggregate(AggregateFunction::Count, None)
    }

    pub fn sum(arg: Expr) -> Self {
        Expr::aggregate(AggregateFunction::Sum, Some(arg))
    }

    pub fn avg(arg: Expr) -> Self {
        Expr::aggregate(AggregateFunction::Avg, Some(arg))
    }

    pub fn filtered(self, filters: Vec<Expr>) -> Self {
        Expr::new(ExprKind::Filtered {
            expr: Box::new(self),
            filters,
        })
    }

    pub fn truncate(self, unit: TimeUnit) -> Self {
        Expr::new(ExprKind::Truncate {
            expr: Box::new(self),
            unit,
        })
    }

    pub fn cast(self, to: AtomicType, safe: bool) -> Self {
        Expr::new(ExprKind::Cast {
            expr: Box::new(self),
            to,
            safe,
        })
    }

    pub fn call(function: &str, args: Vec<Expr>) -> Self {
        Expr::new(ExprKind::Call {
            function: Spanned::new(function.to_string(), Span::default()),
            args,
        })
    }

    pub fn ungroup(kind: UngroupKind, expr: Expr, fields: &[&str]) -> Self {
        Expr::new(ExprKind::Ungroup {
            kind,
            expr: Box::new(expr),
            fields: fields
                .iter()
                .map(|f| Spanned::new(f.to_string(), Span::default()))
                .collect(),
        })
    }

    pub fn eq(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Eq, self, other)
    }

    pub fn gt(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Gt, self, other)
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::And, self, other)
    }
}
