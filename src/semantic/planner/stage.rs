//! SELECTs over a stage input.
//!
//! A [`Level`] is one grouping level: a top-level reduce or project stage, or
//! the stage of a nested query. Its rows are produced by one SELECT over the
//! stage input; nests add a second SELECT on top (see `nest.rs`).

use crate::model::{
    Correlation, Expr, ExprField, Filter, OrderBy, OutputField, ProjectStage, ReduceStage,
    SortDirection,
};
use crate::semantic::error::{SemanticError, SemanticResult};
use crate::sql::dialect::SqlDialect;
use crate::sql::expr::{col, lit_bool, table_col, BinaryOperator, Expr as SqlExpr, ExprExt};
use crate::sql::query::{JoinType, OrderByExpr, Query, SelectExpr, TableRef};

use super::expr::{binary, conjunction, ExprCompiler, UngroupFrame, UngroupPlan, DISTINCT_KEY, UNGROUP_VALUE};
use super::joins::{alias, JoinPath, JoinTree};
use super::{Input, Planner};

/// Column of a nest CTE holding the `i`th key of the enclosing row.
pub fn parent_key(i: usize) -> String {
    format!("__p{}", i)
}

/// One grouping level.
#[derive(Debug, Clone, Copy)]
pub struct Level<'a> {
    pub fields: &'a [OutputField],
    pub filters: &'a [Filter],
    pub having: &'a [Filter],
    pub order_by: &'a [OrderBy],
    pub limit: Option<u64>,
    /// GROUP BY the dimensions; false for `project`.
    pub grouped: bool,
}

impl<'a> From<&'a ReduceStage> for Level<'a> {
    fn from(stage: &'a ReduceStage) -> Self {
        Self {
            fields: &stage.fields,
            filters: &stage.filters,
            having: &stage.having,
            order_by: &stage.order_by,
            limit: stage.limit,
            grouped: true,
        }
    }
}

impl<'a> From<&'a ProjectStage> for Level<'a> {
    fn from(stage: &'a ProjectStage) -> Self {
        Self {
            fields: &stage.fields,
            filters: &stage.filters,
            having: &[],
            order_by: &stage.order_by,
            limit: stage.limit,
            grouped: false,
        }
    }
}

impl<'a> Level<'a> {
    /// Dimension and measure outputs, in declaration order.
    pub fn columns(self) -> impl Iterator<Item = (&'a ExprField, bool)> {
        let fields = self.fields;
        fields.iter().filter_map(|f| match f {
            OutputField::Dimension(field) => Some((field, false)),
            OutputField::Measure(field) => Some((field, true)),
            OutputField::Nest(_) => None,
        })
    }

    pub fn dimensions(self) -> impl Iterator<Item = &'a ExprField> {
        self.columns().filter(|(_, measure)| !measure).map(|(f, _)| f)
    }

    pub fn has_nests(self) -> bool {
        self.fields.iter().any(|f| matches!(f, OutputField::Nest(_)))
    }
}

/// FROM, joins and WHERE shared by the SELECTs of one level.
#[derive(Debug, Clone)]
pub struct Relation {
    from: TableRef,
    joins: Vec<(JoinType, TableRef, Option<SqlExpr>)>,
    filter: Option<SqlExpr>,
}

impl Relation {
    pub fn query(&self) -> Query {
        let mut query = Query::new().from(self.from.clone());
        for (join_type, table, on) in &self.joins {
            query = query.join(*join_type, table.clone(), on.clone());
        }
        if let Some(filter) = &self.filter {
            query = query.filter(filter.clone());
        }
        query
    }
}

impl Planner {
    /// Compile a level. Without nests this is its rows SELECT, ordered and
    /// limited; with nests the rows go to a CTE first.
    pub(super) fn level(
        &mut self,
        input: &Input,
        parents: &[&Expr],
        inherited: &[&Expr],
        level: &Level<'_>,
    ) -> SemanticResult<Query> {
        if level.has_nests() {
            return self.level_with_nests(input, parents, inherited, level);
        }
        let mut query = self.rows(input, parents, inherited, level)?;
        query = query.order_by(self.order_clause(level.order_by, col));
        if let Some(limit) = level.limit {
            query = query.limit(limit);
        }
        Ok(query)
    }

    /// Join tree for a SELECT over `input` reading `exprs`.
    pub(super) fn tree_for<'e>(
        &self,
        input: &'e Input,
        exprs: impl IntoIterator<Item = &'e Expr>,
    ) -> SemanticResult<JoinTree> {
        let mut tree = input.tree();
        for expr in input.filters.iter().chain(exprs) {
            tree.read(expr)?;
        }
        tree.close()?;
        Ok(tree)
    }

    /// One row per group of `parents` and the level's dimensions, or one row
    /// per input row when the level is not grouped. Parent keys come first
    /// as `__p0..`, then the level's columns under their output names.
    pub(super) fn rows(
        &mut self,
        input: &Input,
        parents: &[&Expr],
        inherited: &[&Expr],
        level: &Level<'_>,
    ) -> SemanticResult<Query> {
        let filters: Vec<&Expr> = inherited
            .iter()
            .copied()
            .chain(level.filters.iter().map(|f| &f.expr))
            .collect();
        let tree = self.tree_for(
            input,
            parents
                .iter()
                .copied()
                .chain(level.columns().map(|(f, _)| &f.expr))
                .chain(filters.iter().copied())
                .chain(level.having.iter().map(|f| &f.expr)),
        )?;
        let mut compiler = ExprCompiler::new(self.dialect, &tree);

        let keys = parents
            .iter()
            .map(|e| compiler.compile(e))
            .collect::<SemanticResult<Vec<_>>>()?;
        let mut dimensions = Vec::new();
        for field in level.dimensions() {
            dimensions.push((field.name.clone(), compiler.compile(&field.expr)?));
        }
        if level.grouped {
            compiler.set_frame(UngroupFrame {
                dimensions: dimensions.clone(),
                parents: keys.clone(),
            });
        }

        let mut select: Vec<SelectExpr> = keys
            .iter()
            .enumerate()
            .map(|(i, key)| key.clone().alias(&parent_key(i)))
            .collect();
        for (field, measure) in level.columns() {
            let expr = if measure {
                compiler.compile(&field.expr)?
            } else {
                dimensions
                    .iter()
                    .find(|(name, _)| *name == field.name)
                    .map(|(_, e)| e.clone())
                    .ok_or_else(|| SemanticError::UndefinedField {
                        path: field.name.clone(),
                    })?
            };
            select.push(expr.alias(&field.name));
        }

        let mut having = Vec::new();
        for filter in level.having {
            having.push(compiler.compile(&filter.expr)?);
        }
        let mut conditions = Vec::new();
        for filter in &filters {
            conditions.push(compiler.compile(filter)?);
        }

        let relation = self.relation(input, &tree, &mut compiler, conditions)?;
        let ungroups = compiler.take_ungroups();

        let mut query = relation.query().select(select);
        for plan in &ungroups {
            let (table, on) = self.ungroup(&relation, plan);
            query = query.join(JoinType::Left, table, Some(on));
        }
        if level.grouped {
            let group_by: Vec<SqlExpr> = keys
                .into_iter()
                .chain(dimensions.into_iter().map(|(_, e)| e))
                .collect();
            if !group_by.is_empty() {
                query = query.group_by(group_by);
            }
        }
        if let Some(having) = conjunction(having) {
            query = query.having(having);
        }
        Ok(query)
    }

    /// FROM, joins and WHERE for a SELECT over `input` using `tree`.
    ///
    /// `conditions` are the compiled WHERE conditions of the level; the
    /// input's own filters are added here.
    pub(super) fn relation(
        &mut self,
        input: &Input,
        tree: &JoinTree,
        compiler: &mut ExprCompiler<'_>,
        conditions: Vec<SqlExpr>,
    ) -> SemanticResult<Relation> {
        let mut filters = Vec::new();
        for filter in &input.filters {
            filters.push(compiler.compile(filter)?);
        }
        filters.extend(conditions);

        let mut joins = Vec::new();
        for path in tree.ordered() {
            let join = tree.join(&path)?;
            let parent = &path[..path.len() - 1];
            let parent_ns = tree.namespace(parent)?;

            let mut on = Vec::new();
            match &join.correlation {
                Correlation::With(expr) => {
                    let key = join.source.primary_key.as_deref().ok_or_else(|| {
                        SemanticError::InvalidStage(format!(
                            "join '{}' uses with: but '{}' has no primary key",
                            join.name, join.source.name
                        ))
                    })?;
                    let left = compiler.compile_at(parent, parent_ns, expr)?;
                    let right = compiler.compile_at(
                        &path,
                        &join.source.fields,
                        &Expr::Field(vec![key.to_string()]),
                    )?;
                    on.push(binary(left, BinaryOperator::Eq, right));
                }
                Correlation::On(expr) => on.push(compiler.compile_at(parent, parent_ns, expr)?),
                Correlation::Unconditioned => {}
            }
            for filter in &join.source.filters {
                on.push(compiler.compile_at(&path, &join.source.fields, &filter.expr)?);
            }

            let relation = self.source_relation(&join.source, None)?;
            let table = self
                .keyed(relation, compiler.keyed().contains(&path))
                .with_alias(&alias(&path));
            match conjunction(on) {
                Some(on) => joins.push((JoinType::Left, table, Some(on))),
                None => joins.push((JoinType::Cross, table, None)),
            }
        }

        let from = self
            .keyed(input.relation.clone(), compiler.keyed().contains(&JoinPath::new()))
            .with_alias(&alias(&[]));
        Ok(Relation {
            from,
            joins,
            filter: conjunction(filters),
        })
    }

    /// `relation` with a generated distinct key column when `keyed`.
    fn keyed(&self, relation: TableRef, keyed: bool) -> TableRef {
        if !keyed {
            return relation;
        }
        let inner = "__keyed";
        TableRef::subquery(
            Query::new()
                .select(vec![
                    SelectExpr::new(SqlExpr::Star {
                        table: Some(inner.to_string()),
                    }),
                    self.dialect.render_distinct_key().alias(DISTINCT_KEY),
                ])
                .from(relation.with_alias(inner)),
        )
    }

    /// Push the CTE of an ungrouped aggregate; returns the table to LEFT JOIN
    /// and its join condition.
    fn ungroup(&mut self, relation: &Relation, plan: &UngroupPlan) -> (TableRef, SqlExpr) {
        let mut select: Vec<SelectExpr> = plan
            .partition
            .iter()
            .enumerate()
            .map(|(i, key)| key.clone().alias(&parent_key(i)))
            .collect();
        select.push(plan.value.clone().alias(UNGROUP_VALUE));
        let mut query = relation.query().select(select);
        if !plan.partition.is_empty() {
            query = query.group_by(plan.partition.clone());
        }
        let name = self.fresh("ungroup");
        self.push_cte(&name, query);

        let on = conjunction(plan.partition.iter().enumerate().map(|(i, key)| {
            key.clone()
                .null_safe_eq(table_col(&plan.alias, &parent_key(i)))
        }))
        .unwrap_or_else(|| lit_bool(true));
        (TableRef::cte(&name).with_alias(&plan.alias), on)
    }

    /// ORDER BY for `order`, reading each named output through `column`.
    pub(super) fn order_clause(
        &self,
        order: &[OrderBy],
        column: impl Fn(&str) -> SqlExpr,
    ) -> Vec<OrderByExpr> {
        order
            .iter()
            .map(|item| {
                let expr = column(&item.field);
                match item.direction {
                    SortDirection::Asc => OrderByExpr::asc(expr),
                    SortDirection::Desc if self.dialect.supports_nulls_ordering() => {
                        OrderByExpr::desc(expr).nulls_last()
                    }
                    SortDirection::Desc => OrderByExpr::desc(expr),
                }
            })
            .collect()
    }
}
