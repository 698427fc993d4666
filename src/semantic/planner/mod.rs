//! Query Pipeline Compiler.
//!
//! Turns a [`QueryDef`] into one SQL statement for a dialect:
//!
//! 1. The first stage reads the query's source, with the joins its
//!    expressions need LEFT JOINed under their path aliases
//! 2. Every stage but the last becomes a CTE (`__stageN`) that the next stage
//!    reads as its input
//! 3. Nested results are computed per level in their own CTEs and collected
//!    into repeated columns by the dialect's nest rendering
//! 4. `all()`/`exclude()` aggregates are computed in CTEs grouped by the kept
//!    dimensions and joined back
//!
//! Only the [`SqlDialect`] trait is consulted for dialect differences.

mod expr;
mod index;
mod joins;
mod nest;
mod stage;

pub use expr::{ExprCompiler, UngroupFrame, DISTINCT_KEY};
pub use joins::{alias, JoinPath, JoinTree, BASE_ALIAS};

use crate::model::{
    Expr, FieldNamespace, QueryDef, ResultField, Sampling, SourceDef, SourceOrigin, Stage,
};
use crate::semantic::error::{SemanticError, SemanticResult};
use crate::sql::dialect::{Dialect, SqlDialect};
use crate::sql::query::{Cte, Query, TableRef};

use self::stage::Level;

/// Compile `query` for `dialect`.
pub fn compile_pipeline(query: &QueryDef, dialect: Dialect) -> SemanticResult<Query> {
    Planner::new(dialect).plan(query)
}

/// Relation a stage reads.
#[derive(Debug, Clone)]
pub(crate) struct Input {
    /// Unaliased relation.
    relation: TableRef,
    fields: FieldNamespace,
    primary_key: Option<String>,
    /// Source filters, ANDed into every SELECT over the input.
    filters: Vec<Expr>,
}

impl Input {
    fn tree(&self) -> JoinTree {
        JoinTree::new(self.fields.clone(), self.primary_key.clone())
    }
}

/// Plans one statement; CTEs accumulate until [`Planner::plan`] returns.
#[derive(Debug)]
pub struct Planner {
    dialect: Dialect,
    ctes: Vec<Cte>,
    counter: usize,
    default_limit: Option<u64>,
}

impl Planner {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ctes: Vec::new(),
            counter: 0,
            default_limit: None,
        }
    }

    /// Row limit applied to the final stage when it has none of its own.
    pub fn with_default_limit(mut self, limit: Option<u64>) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn plan(mut self, query: &QueryDef) -> SemanticResult<Query> {
        let _span = tracing::debug_span!(
            "plan_query",
            query = query.name.as_deref().unwrap_or("<anonymous>"),
            dialect = %self.dialect
        )
        .entered();
        let limit = self.default_limit;
        let mut statement = self.pipeline(query, limit)?;
        statement.with = std::mem::take(&mut self.ctes);
        tracing::debug!(ctes = statement.with.len(), "query planned");
        Ok(statement)
    }

    fn fresh(&mut self, prefix: &str) -> String {
        let name = format!("__{}{}", prefix, self.counter);
        self.counter += 1;
        name
    }

    fn push_cte(&mut self, name: &str, query: Query) {
        tracing::trace!(cte = %name, "cte added");
        self.ctes.push(Cte::new(name, query));
    }

    /// Compile every stage of `query`. Earlier stages are pushed as CTEs and
    /// the last stage's SELECT is returned.
    fn pipeline(&mut self, query: &QueryDef, limit: Option<u64>) -> SemanticResult<Query> {
        let Some((last, init)) = query.pipeline.stages.split_last() else {
            return Err(SemanticError::InvalidStage(
                "a query needs at least one stage".into(),
            ));
        };
        let first = init.first().unwrap_or(last);
        let mut input = self.source_input(&query.source, first.sample())?;

        for stage in init {
            let select = self.stage(&input, stage)?;
            let name = self.fresh("stage");
            self.push_cte(&name, select);
            input = Input {
                relation: TableRef::cte(&name),
                fields: FieldNamespace::from_result(&stage.output_schema(), &query.location),
                primary_key: None,
                filters: Vec::new(),
            };
        }

        let mut select = self.stage(&input, last)?;
        if select.limit.is_none() {
            if let Some(limit) = limit {
                select = select.limit(limit);
            }
        }
        Ok(select)
    }

    fn stage(&mut self, input: &Input, stage: &Stage) -> SemanticResult<Query> {
        tracing::trace!(stage = stage.kind_name(), "compiling stage");
        match stage {
            Stage::Reduce(reduce) => self.level(input, &[], &[], &Level::from(reduce)),
            Stage::Project(project) => self.level(input, &[], &[], &Level::from(project)),
            Stage::Index(index) => self.index(input, index),
        }
    }

    // =========================================================================
    // Sources
    // =========================================================================

    fn source_input(
        &mut self,
        source: &SourceDef,
        sample: Option<Sampling>,
    ) -> SemanticResult<Input> {
        Ok(Input {
            relation: self.source_relation(source, sample)?,
            fields: source.fields.clone(),
            primary_key: source.primary_key.clone(),
            filters: source.filters.iter().map(|f| f.expr.clone()).collect(),
        })
    }

    /// Relation holding the rows of `source`, sampled when asked.
    fn source_relation(
        &mut self,
        source: &SourceDef,
        sample: Option<Sampling>,
    ) -> SemanticResult<TableRef> {
        match (&source.origin, sample) {
            (SourceOrigin::Table { path, .. }, None) => Ok(TableRef::table(path)),
            (SourceOrigin::Table { path, .. }, Some(sampling)) => {
                let quoted = self.dialect.quote_table_path(path);
                Ok(TableRef::raw(self.dialect.render_sample(&quoted, sampling)?))
            }
            (_, Some(_)) => Err(SemanticError::InvalidStage(format!(
                "sample: needs a table source, '{}' is not one",
                source.name
            ))),
            (SourceOrigin::Query(query), None) => {
                let select = self.pipeline(query, None)?;
                let name = self.fresh("source");
                self.push_cte(&name, select);
                Ok(TableRef::cte(&name))
            }
            (SourceOrigin::Sql(block), None) => Ok(TableRef::raw(block.select.trim())),
        }
    }
}

/// Output columns of `fields`, for reading a CTE back.
pub(crate) fn result_names(fields: &[ResultField]) -> Vec<String> {
    fields.iter().map(|f| f.name.clone()).collect()
}
