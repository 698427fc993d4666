//! SELECT statements and their clauses.
//!
//! Layout is fixed: one select item per line, one clause per line, CTEs
//! first. Stage SQL stays readable and diffs cleanly in snapshots.

use super::dialect::{Dialect, SqlDialect};
use super::expr::{BinaryOperator, Expr};
use super::token::{Keyword, Token, TokenStream};

// =============================================================================
// Select items and relations
// =============================================================================

/// A SELECT list item.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct SelectExpr {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectExpr {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }

    fn render(&self, dialect: Dialect, ts: &mut TokenStream) {
        self.expr.render(dialect, ts);
        render_alias(self.alias.as_deref(), ts);
    }
}

impl From<Expr> for SelectExpr {
    fn from(expr: Expr) -> Self {
        SelectExpr::new(expr)
    }
}

fn render_alias(alias: Option<&str>, ts: &mut TokenStream) {
    if let Some(alias) = alias {
        ts.spaced(Keyword::As).ident(alias);
    }
}

/// What a FROM or JOIN item reads.
#[derive(Debug, Clone, PartialEq)]
pub enum TableSource {
    /// Dotted table path, quoted per dialect.
    Table(String),
    /// Name of a CTE in scope.
    Cte(String),
    Subquery(Box<Query>),
    /// Parenthesized SQL text: a SQL block, or a dialect sampling clause.
    Raw(String),
}

/// A FROM/JOIN item.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct TableRef {
    pub source: TableSource,
    pub alias: Option<String>,
}

impl TableRef {
    fn of(source: TableSource) -> Self {
        Self {
            source,
            alias: None,
        }
    }

    pub fn table(path: &str) -> Self {
        Self::of(TableSource::Table(path.into()))
    }

    pub fn cte(name: &str) -> Self {
        Self::of(TableSource::Cte(name.into()))
    }

    pub fn subquery(query: Query) -> Self {
        Self::of(TableSource::Subquery(Box::new(query)))
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Self::of(TableSource::Raw(sql.into()))
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }

    fn render(&self, dialect: Dialect, ts: &mut TokenStream) {
        match &self.source {
            TableSource::Table(path) => {
                ts.push(Token::TablePath(path.clone()));
            }
            TableSource::Cte(name) => {
                ts.ident(name);
            }
            TableSource::Subquery(query) => {
                ts.sym("(");
                query.render(dialect, ts);
                ts.sym(")");
            }
            TableSource::Raw(sql) => {
                ts.sym("(").push(Token::Raw(sql.clone())).sym(")");
            }
        }
        render_alias(self.alias.as_deref(), ts);
    }
}

/// Joins the planner emits. Every model join is a LEFT JOIN so that rows
/// without a match keep their base values; `join_cross` has no condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Left,
    Cross,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: TableRef,
    pub on: Option<Expr>,
}

impl Join {
    fn render(&self, dialect: Dialect, ts: &mut TokenStream) {
        ts.kw(match self.join_type {
            JoinType::Left => Keyword::Left,
            JoinType::Cross => Keyword::Cross,
        })
        .space()
        .kw(Keyword::Join)
        .space();
        self.table.render(dialect, ts);
        if let Some(on) = &self.on {
            ts.spaced(Keyword::On);
            on.render(dialect, ts);
        }
    }
}

// =============================================================================
// Ordering
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct OrderByExpr {
    pub expr: Expr,
    pub dir: SortDir,
    pub nulls: Option<NullsOrder>,
}

impl OrderByExpr {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            dir: SortDir::Asc,
            nulls: None,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            dir: SortDir::Desc,
            nulls: None,
        }
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls = Some(NullsOrder::Last);
        self
    }

    /// NULLS FIRST/LAST is dropped for dialects that cannot spell it.
    pub(crate) fn render(&self, dialect: Dialect, ts: &mut TokenStream) {
        self.expr.render(dialect, ts);
        ts.space().kw(match self.dir {
            SortDir::Asc => Keyword::Asc,
            SortDir::Desc => Keyword::Desc,
        });
        match self.nulls {
            Some(nulls) if dialect.supports_nulls_ordering() => {
                ts.space().kw(match nulls {
                    NullsOrder::First => Keyword::NullsFirst,
                    NullsOrder::Last => Keyword::NullsLast,
                });
            }
            _ => {}
        }
    }
}

// =============================================================================
// Query
// =============================================================================

/// A named subquery in the WITH clause.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct Cte {
    pub name: String,
    pub query: Box<Query>,
}

impl Cte {
    pub fn new(name: &str, query: Query) -> Self {
        Self {
            name: name.into(),
            query: Box::new(query),
        }
    }
}

/// A SELECT, or a UNION ALL of several, with its CTEs, ordering and limit.
#[derive(Debug, Clone, Default, PartialEq)]
#[must_use = "Query has no effect until converted to SQL with to_sql()"]
pub struct Query {
    pub with: Vec<Cte>,
    pub select: Vec<SelectExpr>,
    pub from: Option<TableRef>,
    pub joins: Vec<Join>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<u64>,
    /// When non-empty the body is these queries joined by UNION ALL, and
    /// the select list, FROM, joins, filters and grouping are unused.
    pub union_all: Vec<Query>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cte(mut self, cte: Cte) -> Self {
        self.with.push(cte);
        self
    }

    pub fn select(mut self, exprs: Vec<impl Into<SelectExpr>>) -> Self {
        self.select = exprs.into_iter().map(Into::into).collect();
        self
    }

    pub fn from(mut self, table: TableRef) -> Self {
        self.from = Some(table);
        self
    }

    pub fn join(mut self, join_type: JoinType, table: TableRef, on: Option<Expr>) -> Self {
        self.joins.push(Join {
            join_type,
            table,
            on,
        });
        self
    }

    /// AND a condition into WHERE.
    pub fn filter(mut self, condition: Expr) -> Self {
        self.where_clause = Some(conjoin(self.where_clause.take(), condition));
        self
    }

    pub fn group_by(mut self, exprs: Vec<Expr>) -> Self {
        self.group_by = exprs;
        self
    }

    /// AND a condition into HAVING.
    pub fn having(mut self, condition: Expr) -> Self {
        self.having = Some(conjoin(self.having.take(), condition));
        self
    }

    pub fn order_by(mut self, exprs: Vec<OrderByExpr>) -> Self {
        self.order_by = exprs;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn union_all(parts: Vec<Query>) -> Self {
        Self {
            union_all: parts,
            ..Default::default()
        }
    }

    pub(crate) fn render(&self, dialect: Dialect, ts: &mut TokenStream) {
        if !self.with.is_empty() {
            ts.kw(Keyword::With).space();
            for (i, cte) in self.with.iter().enumerate() {
                if i > 0 {
                    ts.sym(",").newline();
                }
                ts.ident(&cte.name).spaced(Keyword::As).sym("(").newline();
                cte.query.render(dialect, ts);
                ts.newline().sym(")");
            }
            ts.newline();
        }

        if self.union_all.is_empty() {
            self.render_select(dialect, ts);
        } else {
            for (i, part) in self.union_all.iter().enumerate() {
                if i > 0 {
                    ts.newline().kw(Keyword::UnionAll).newline();
                }
                part.render(dialect, ts);
            }
        }

        if !self.order_by.is_empty() {
            ts.newline().kw(Keyword::OrderBy).space();
            ts.list(&self.order_by, |o, ts| o.render(dialect, ts));
        }
        if let Some(limit) = self.limit {
            ts.newline()
                .kw(Keyword::Limit)
                .space()
                .push(Token::Number(limit.to_string()));
        }
    }

    fn render_select(&self, dialect: Dialect, ts: &mut TokenStream) {
        ts.kw(Keyword::Select);
        for (i, item) in self.select.iter().enumerate() {
            if i > 0 {
                ts.sym(",");
            }
            ts.newline().indent(1);
            item.render(dialect, ts);
        }
        if let Some(from) = &self.from {
            ts.newline().kw(Keyword::From).space();
            from.render(dialect, ts);
        }
        for join in &self.joins {
            ts.newline();
            join.render(dialect, ts);
        }
        if let Some(condition) = &self.where_clause {
            ts.newline().kw(Keyword::Where).space();
            condition.render(dialect, ts);
        }
        if !self.group_by.is_empty() {
            ts.newline().kw(Keyword::GroupBy).space();
            ts.list(&self.group_by, |e, ts| e.render(dialect, ts));
        }
        if let Some(condition) = &self.having {
            ts.newline().kw(Keyword::Having).space();
            condition.render(dialect, ts);
        }
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut ts = TokenStream::new();
        self.render(dialect, &mut ts);
        ts.serialize(dialect)
    }
}

fn conjoin(existing: Option<Expr>, condition: Expr) -> Expr {
    match existing {
        Some(existing) => Expr::BinaryOp {
            left: Box::new(existing),
            op: BinaryOperator::And,
            right: Box::new(condition),
        },
        None => condition,
    }
}

impl std::fmt::Display for Query {
    /// DuckDB spelling; use [`Query::to_sql`] for other dialects.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_sql(Dialect::default()))
    }
}
