//! `index:` stages.
//!
//! One SELECT per indexed field, combined with UNION ALL. String and boolean
//! fields contribute one row per distinct value; numbers and times contribute
//! a single `<min> to <max>` row. Every row is weighted by the stage's
//! weight measure, `count()` unless `by:` names another, and the result is
//! ordered heaviest first.

use crate::model::{AggregateFunction, AtomicType, Expr, IndexStage};
use crate::semantic::error::{SemanticError, SemanticResult};
use crate::sql::dialect::SqlDialect;
use crate::sql::expr::{col, func, lit_str, Expr as SqlExpr, ExprExt};
use crate::sql::query::{OrderByExpr, Query, TableRef};

use super::expr::ExprCompiler;
use super::{Input, Planner};

impl Planner {
    pub(super) fn index(&mut self, input: &Input, stage: &IndexStage) -> SemanticResult<Query> {
        if stage.fields.is_empty() {
            return Err(SemanticError::InvalidStage(
                "index: needs at least one field".into(),
            ));
        }
        let weight = stage.weight.clone().unwrap_or(Expr::Aggregate {
            function: AggregateFunction::Count,
            locality: vec![],
            arg: None,
        });
        let filters: Vec<&Expr> = stage.filters.iter().map(|f| &f.expr).collect();

        let mut parts = Vec::with_capacity(stage.fields.len());
        for field in &stage.fields {
            let value = Expr::Field(field.path.clone());
            let tree = self.tree_for(
                input,
                [&value, &weight].into_iter().chain(filters.iter().copied()),
            )?;
            let mut compiler = ExprCompiler::new(self.dialect, &tree);
            let column = compiler.compile(&value)?;
            let weight_sql = compiler.compile(&weight)?;
            let mut conditions = Vec::new();
            for filter in &filters {
                conditions.push(compiler.compile(filter)?);
            }

            let distinct = matches!(field.ty, AtomicType::String | AtomicType::Boolean);
            let text = if distinct {
                conditions.push(column.clone().is_not_null());
                self.as_text(column.clone())?
            } else {
                func(
                    "CONCAT",
                    vec![
                        self.as_text(func("MIN", vec![column.clone()]))?,
                        lit_str(" to "),
                        self.as_text(func("MAX", vec![column.clone()]))?,
                    ],
                )
            };

            let relation = self.relation(input, &tree, &mut compiler, conditions)?;
            let mut part = relation.query().select(vec![
                lit_str(&field.dotted()).alias(IndexStage::FIELD_PATH),
                text.alias(IndexStage::FIELD_VALUE),
                weight_sql.alias(IndexStage::WEIGHT),
            ]);
            if distinct {
                part = part.group_by(vec![column]);
            }
            parts.push(part);
        }

        let name = self.fresh("index");
        tracing::debug!(cte = %name, fields = parts.len(), "index stage");
        self.push_cte(&name, Query::union_all(parts));

        let weight_order = if self.dialect.supports_nulls_ordering() {
            OrderByExpr::desc(col(IndexStage::WEIGHT)).nulls_last()
        } else {
            OrderByExpr::desc(col(IndexStage::WEIGHT))
        };
        let mut query = Query::new()
            .select(vec![
                col(IndexStage::FIELD_PATH),
                col(IndexStage::FIELD_VALUE),
                col(IndexStage::WEIGHT),
            ])
            .from(TableRef::cte(&name))
            .order_by(vec![weight_order]);
        if let Some(limit) = stage.limit {
            query = query.limit(limit);
        }
        Ok(query)
    }

    fn as_text(&self, expr: SqlExpr) -> SemanticResult<SqlExpr> {
        Ok(self.dialect.render_cast(expr, AtomicType::String, false)?)
    }
}
