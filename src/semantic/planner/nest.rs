//! Nested results.
//!
//! A level with nests is compiled in two steps. Its rows SELECT goes to a
//! CTE; a second SELECT reads the CTE back and adds one column per nest.
//! Each nest is its own level computed straight from the stage input, grouped
//! by the keys of every enclosing level plus its own dimensions, and numbered
//! within each enclosing row by its ordering. The nest column is the
//! dialect's correlated collection of the matching, numbered rows.
//!
//! Measures of a nested level are therefore aggregated from input rows, never
//! from the enclosing level's results.
//!
//! A nest with several stages chains them: every later stage reads the
//! numbered rows of the one before, grouped again by the same parent keys.

use crate::dsl::Location;
use crate::model::{
    AtomicType, BinaryOp, Expr, FieldNamespace, NestDef, OutputField, ResultField, Stage,
};
use crate::semantic::error::{SemanticError, SemanticResult};
use crate::sql::dialect::{NestSpec, SqlDialect};
use crate::sql::expr::{col, lit_int, row_number, table_col, BinaryOperator, Expr as SqlExpr, ExprExt};
use crate::sql::query::{Query, SelectExpr, TableRef};

use super::expr::{binary, conjunction};
use super::result_names;
use super::stage::{parent_key, Level};
use super::{Input, Planner};

/// Column numbering the rows of a nest within their enclosing row.
pub const ROW_NUMBER: &str = "__row_number";

/// Alias the rows CTE of a level is read back under.
const ROWS_ALIAS: &str = "__r";

impl Planner {
    /// Top-level stage with nests.
    pub(super) fn level_with_nests(
        &mut self,
        input: &Input,
        parents: &[&Expr],
        inherited: &[&Expr],
        level: &Level<'_>,
    ) -> SemanticResult<Query> {
        let mut query = self.collect(input, parents, inherited, level)?;
        query = query.order_by(self.order_clause(level.order_by, col));
        if let Some(limit) = level.limit {
            query = query.limit(limit);
        }
        Ok(query)
    }

    /// Compile a nested level into a CTE whose rows carry the enclosing keys
    /// and a per-parent row number. Returns the CTE name.
    fn nested_level(
        &mut self,
        input: &Input,
        parents: &[&Expr],
        inherited: &[&Expr],
        level: &Level<'_>,
    ) -> SemanticResult<String> {
        let mut numbered = self.collect(input, parents, inherited, level)?;
        let partition = (0..parents.len())
            .map(|i| table_col(ROWS_ALIAS, &parent_key(i)))
            .collect();
        let order = self.order_clause(level.order_by, |name| table_col(ROWS_ALIAS, name));
        numbered
            .select
            .push(row_number(partition, order).alias(ROW_NUMBER));
        let name = self.fresh("nest");
        self.push_cte(&name, numbered);
        Ok(name)
    }

    /// Rows of `level` read back from a CTE with the nest columns added.
    /// The parent keys are carried through so an enclosing level can match
    /// them; the result is not yet ordered.
    fn collect(
        &mut self,
        input: &Input,
        parents: &[&Expr],
        inherited: &[&Expr],
        level: &Level<'_>,
    ) -> SemanticResult<Query> {
        let rows = self.rows(input, parents, inherited, level)?;
        let rows_cte = self.fresh("rows");
        self.push_cte(&rows_cte, rows);

        // Keys a nest below this level is grouped by, and the columns of this
        // level's rows holding them.
        let mut child_parents: Vec<&Expr> = parents.to_vec();
        let mut key_columns: Vec<String> = (0..parents.len()).map(parent_key).collect();
        for field in level.dimensions() {
            child_parents.push(&field.expr);
            key_columns.push(field.name.clone());
        }
        let mut child_inherited: Vec<&Expr> = inherited.to_vec();
        child_inherited.extend(level.filters.iter().map(|f| &f.expr));

        let mut select: Vec<SelectExpr> = (0..parents.len())
            .map(|i| table_col(ROWS_ALIAS, &parent_key(i)).alias(&parent_key(i)))
            .collect();
        for (index, field) in level.fields.iter().enumerate() {
            let OutputField::Nest(nest) = field else {
                select.push(table_col(ROWS_ALIAS, field.name()).alias(field.name()));
                continue;
            };
            let fields = result_names(&nest.pipeline.output_schema());
            tracing::trace!(nest = %nest.name, depth = child_parents.len(), "compiling nest");
            let (cte, limit) = self.nest_stages(input, &child_parents, &child_inherited, nest)?;

            let alias = format!("__n{}", index);
            let mut predicate: Vec<SqlExpr> = key_columns
                .iter()
                .enumerate()
                .map(|(i, column)| {
                    table_col(&alias, &parent_key(i)).null_safe_eq(table_col(ROWS_ALIAS, column))
                })
                .collect();
            if let Some(limit) = limit {
                let limit = i64::try_from(limit).map_err(|_| {
                    SemanticError::InvalidStage(format!(
                        "nest '{}' limit {} is out of range",
                        nest.name, limit
                    ))
                })?;
                predicate.push(binary(
                    table_col(&alias, ROW_NUMBER),
                    BinaryOperator::Lte,
                    lit_int(limit),
                ));
            }
            let rendered = self.dialect.render_nest(&NestSpec {
                cte,
                alias,
                fields,
                predicate: conjunction(predicate),
                order_column: ROW_NUMBER.to_string(),
            })?;
            select.push(rendered.alias(&nest.name));
        }

        Ok(Query::new()
            .select(select)
            .from(TableRef::cte(&rows_cte).with_alias(ROWS_ALIAS)))
    }

    /// Compile the stages of `nest` to numbered CTEs. The first stage reads
    /// the stage input; each later one reads the CTE before it, keeping the
    /// parent keys as its own. Returns the last CTE and its row limit.
    fn nest_stages(
        &mut self,
        input: &Input,
        parents: &[&Expr],
        inherited: &[&Expr],
        nest: &NestDef,
    ) -> SemanticResult<(String, Option<u64>)> {
        let Some((first, rest)) = nest.pipeline.stages.split_first() else {
            return Err(SemanticError::InvalidStage(format!(
                "nest '{}' has no stages",
                nest.name
            )));
        };
        let mut level = nest_level(nest, first)?;
        let mut cte = self.nested_level(input, parents, inherited, &level)?;

        let keys: Vec<Expr> = (0..parents.len())
            .map(|i| Expr::Field(vec![parent_key(i)]))
            .collect();
        let keys: Vec<&Expr> = keys.iter().collect();
        let mut previous = first;
        for stage in rest {
            let chained = chained_input(&cte, parents.len(), previous, level.limit, &nest.location);
            level = nest_level(nest, stage)?;
            cte = self.nested_level(&chained, &keys, &[], &level)?;
            previous = stage;
        }
        Ok((cte, level.limit))
    }
}

fn nest_level<'a>(nest: &NestDef, stage: &'a Stage) -> SemanticResult<Level<'a>> {
    match stage {
        Stage::Reduce(reduce) => Ok(Level::from(reduce)),
        Stage::Project(project) => Ok(Level::from(project)),
        Stage::Index(_) => Err(SemanticError::InvalidStage(format!(
            "nest '{}' cannot be an index",
            nest.name
        ))),
    }
}

/// Input of a later nest stage: the numbered rows of the stage before it,
/// cut to that stage's limit within each parent.
fn chained_input(
    cte: &str,
    parents: usize,
    previous: &Stage,
    limit: Option<u64>,
    location: &Location,
) -> Input {
    let mut columns: Vec<ResultField> = (0..parents)
        .map(|i| ResultField::atomic(parent_key(i), AtomicType::Null))
        .collect();
    columns.extend(previous.output_schema());
    columns.push(ResultField::atomic(ROW_NUMBER, AtomicType::Number));
    let filters = limit
        .map(|limit| {
            Expr::binary(
                BinaryOp::Lte,
                Expr::Field(vec![ROW_NUMBER.to_string()]),
                Expr::number(limit),
            )
        })
        .into_iter()
        .collect();
    Input {
        relation: TableRef::cte(cte),
        fields: FieldNamespace::from_result(&columns, location),
        primary_key: None,
        filters,
    }
}
