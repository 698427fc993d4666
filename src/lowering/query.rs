//! Query lowering: pipelines, stages and view refinement.
//!
//! Each stage is lowered against the namespace of its input: the source for
//! the first stage, the output columns of the previous stage afterwards.
//! Names defined inside a stage are substituted where they are referenced,
//! so the compiled stage never refers to a stage-local name.

use std::collections::HashSet;
use std::sync::Arc;

use crate::dsl::ast::{
    self, ExprKind, NestItem, OrderTarget, PipeElement, QueryHead, QueryItem, SampleSpec,
    StageBlock, StageProperty,
};
use crate::dsl::{Span, Spanned};
use crate::model::{
    Expr, ExprField, ExprLevel, FieldDef, FieldNamespace, Filter, IndexField, IndexStage,
    NamedEntity, NestDef, OrderBy, OutputField, Pipeline, ProjectStage, QueryDef, ReduceStage,
    Sampling, SortDirection, SourceOrigin, Stage, ViewDef,
};
use crate::semantic::error::SemanticError;

use super::expr::{lower_expr, Typed};
use super::scope::{field_reads, lookup_in, DeclRole, Reads, Scope, Shape};
use super::{Ctx, LowerResult, ModelBuilder};

/// Where a stage sits in its query.
#[derive(Debug, Clone, Copy)]
struct Position {
    /// `sample:` is accepted.
    sampling: bool,
    /// Inside `nest:`.
    nested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageKind {
    Reduce,
    Project,
    Index,
}

impl StageKind {
    fn describe(&self) -> &'static str {
        match self {
            StageKind::Reduce => "group_by:/aggregate:/nest:",
            StageKind::Project => "project:",
            StageKind::Index => "index:",
        }
    }
}

/// A stage being assembled from its properties.
#[derive(Debug, Default)]
struct Draft {
    kind: Option<StageKind>,
    fields: Vec<OutputField>,
    index_fields: Vec<IndexField>,
    weight: Option<Expr>,
    filters: Vec<Filter>,
    having: Vec<Filter>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    sample: Option<Sampling>,
}

impl Draft {
    fn from_stage(stage: &Stage) -> Self {
        match stage {
            Stage::Reduce(s) => Draft {
                kind: Some(StageKind::Reduce),
                fields: s.fields.clone(),
                filters: s.filters.clone(),
                having: s.having.clone(),
                order_by: s.order_by.clone(),
                limit: s.limit,
                sample: s.sample,
                ..Default::default()
            },
            Stage::Project(s) => Draft {
                kind: Some(StageKind::Project),
                fields: s.fields.clone(),
                filters: s.filters.clone(),
                order_by: s.order_by.clone(),
                limit: s.limit,
                sample: s.sample,
                ..Default::default()
            },
            Stage::Index(s) => Draft {
                kind: Some(StageKind::Index),
                index_fields: s.fields.clone(),
                weight: s.weight.clone(),
                filters: s.filters.clone(),
                limit: s.limit,
                sample: s.sample,
                ..Default::default()
            },
        }
    }

    fn set_kind(&mut self, ctx: Ctx<'_>, kind: StageKind, span: Span) -> LowerResult<()> {
        match self.kind {
            Some(existing) if existing != kind => Err(ctx.error(
                SemanticError::InvalidStage(format!(
                    "{} cannot be combined with {} in one stage",
                    kind.describe(),
                    existing.describe()
                )),
                span,
            )),
            _ => {
                self.kind = Some(kind);
                Ok(())
            }
        }
    }
}

impl<'a> ModelBuilder<'a> {
    pub(super) fn build_query(
        &mut self,
        query: &ast::QueryExpr,
        name: Option<&str>,
    ) -> LowerResult<Arc<QueryDef>> {
        let ctx = self.ctx();
        let (source, mut stages) = match &query.head {
            QueryHead::Source { source } => (self.build_source(source)?, Vec::new()),
            QueryHead::Query { name } => {
                let base = self.named_query(name)?;
                (base.source.clone(), base.pipeline.stages.clone())
            }
        };

        let (input, sampling) = match stages.last() {
            None => (
                source.fields.clone(),
                matches!(source.origin, SourceOrigin::Table { .. }),
            ),
            Some(last) => (
                FieldNamespace::from_result(&last.output_schema(), &ctx.location(query.span)),
                false,
            ),
        };
        stages.extend(self.build_pipeline(input, &query.pipeline, sampling, false)?);
        if stages.is_empty() {
            return Err(ctx.error(
                SemanticError::InvalidStage("a query needs at least one stage".into()),
                query.span,
            ));
        }
        Ok(Arc::new(QueryDef {
            name: name.map(str::to_string),
            source,
            pipeline: Pipeline::new(stages),
            location: ctx.location(query.span),
        }))
    }

    fn named_query(&self, name: &Spanned<String>) -> LowerResult<Arc<QueryDef>> {
        let ctx = self.ctx();
        if self.model.invalid.contains_key(&name.node) {
            return Err(ctx.error(
                SemanticError::InvalidReference {
                    name: name.node.clone(),
                },
                name.span,
            ));
        }
        match self.model.entities.get(&name.node) {
            Some(NamedEntity::Query(query)) => Ok(query.clone()),
            _ => Err(ctx.error(
                SemanticError::UndefinedEntity {
                    entity: "query",
                    name: name.node.clone(),
                },
                name.span,
            )),
        }
    }

    /// Lower pipeline elements, each reading the output of the one before.
    pub(super) fn build_pipeline(
        &mut self,
        mut input: FieldNamespace,
        elements: &[PipeElement],
        mut sampling: bool,
        nested: bool,
    ) -> LowerResult<Vec<Stage>> {
        let ctx = self.ctx();
        let mut stages = Vec::new();
        for element in elements {
            let position = Position { sampling, nested };
            let (added, span) = match element {
                PipeElement::Stage(block) => {
                    (vec![self.build_stage(&input, block, None, position)?], block.span)
                }
                PipeElement::View { name, refinement } => {
                    let view = view_of(ctx, &input, name)?;
                    let added = match refinement {
                        None => view.pipeline.stages,
                        Some(block) => self.refine_view(&input, &view, block, position)?,
                    };
                    (added, name.span)
                }
            };
            for stage in added {
                input = FieldNamespace::from_result(&stage.output_schema(), &ctx.location(span));
                stages.push(stage);
            }
            sampling = false;
        }
        Ok(stages)
    }

    /// Apply `block` to a view used as a pipeline element or nest.
    fn refine_view(
        &mut self,
        input: &FieldNamespace,
        view: &ViewDef,
        block: &StageBlock,
        position: Position,
    ) -> LowerResult<Vec<Stage>> {
        let ctx = self.ctx();
        let stages = &view.pipeline.stages;
        match stages.len() {
            0 => Err(ctx.error(
                SemanticError::InvalidStage(format!("view '{}' has no stages", view.name)),
                block.span,
            )),
            1 => Ok(vec![self.build_stage(input, block, Some(&stages[0]), position)?]),
            n => {
                let mut head = Vec::new();
                let mut tail = Vec::new();
                for prop in &block.properties {
                    match prop {
                        StageProperty::Where { .. } => head.push(prop.clone()),
                        StageProperty::OrderBy { .. }
                        | StageProperty::Limit { .. }
                        | StageProperty::Top { .. } => tail.push(prop.clone()),
                        _ => {
                            return Err(ctx.error(
                                SemanticError::InvalidStage(
                                    "illegal in refinement of a query with more than one stage"
                                        .into(),
                                ),
                                block.span,
                            ))
                        }
                    }
                }
                let mut out = stages.clone();
                if !head.is_empty() {
                    let head = StageBlock {
                        properties: head,
                        span: block.span,
                    };
                    out[0] = self.build_stage(input, &head, Some(&stages[0]), position)?;
                }
                if !tail.is_empty() {
                    let tail = StageBlock {
                        properties: tail,
                        span: block.span,
                    };
                    let tail_input = FieldNamespace::from_result(
                        &out[n - 2].output_schema(),
                        &ctx.location(block.span),
                    );
                    let position = Position {
                        sampling: false,
                        ..position
                    };
                    out[n - 1] = self.build_stage(&tail_input, &tail, Some(&stages[n - 1]), position)?;
                }
                Ok(out)
            }
        }
    }

    // =========================================================================
    // Stages
    // =========================================================================

    fn build_stage(
        &mut self,
        input: &FieldNamespace,
        block: &StageBlock,
        base: Option<&Stage>,
        position: Position,
    ) -> LowerResult<Stage> {
        let ctx = self.ctx();
        let mut draft = base.map(Draft::from_stage).unwrap_or_default();
        let mut scope = Scope::inlining(ctx, input.clone());

        // Outputs of the refined stage stay addressable by name.
        for field in &draft.fields {
            match field {
                OutputField::Dimension(f) => {
                    scope.define(&f.name, output_typed(input, f, ExprLevel::Scalar), DeclRole::Dimension)
                }
                OutputField::Measure(f) => {
                    scope.define(&f.name, output_typed(input, f, ExprLevel::Aggregate), DeclRole::Measure)
                }
                OutputField::Nest(_) => {}
            }
        }

        // Stage-local names, visible to every property of the stage.
        let mut local: HashSet<&str> = HashSet::new();
        for prop in &block.properties {
            let (decls, role): (Vec<&ast::FieldDecl>, DeclRole) = match prop {
                StageProperty::Declare { fields } => (fields.iter().collect(), DeclRole::Declare),
                StageProperty::GroupBy { fields } | StageProperty::Project { fields } => {
                    (defines(fields), DeclRole::Dimension)
                }
                StageProperty::Aggregate { fields } => (defines(fields), DeclRole::Measure),
                _ => continue,
            };
            for decl in decls {
                if scope.is_defined(&decl.name.node) || local.contains(decl.name.node.as_str()) {
                    return Err(ctx.error(
                        SemanticError::DuplicateName {
                            name: decl.name.node.clone(),
                        },
                        decl.name.span,
                    ));
                }
                local.insert(&decl.name.node);
                scope.declare(decl, role);
            }
        }

        let mut order_items: Vec<&ast::OrderByItem> = Vec::new();
        for prop in &block.properties {
            match prop {
                StageProperty::GroupBy { fields } => {
                    draft.set_kind(ctx, StageKind::Reduce, block.span)?;
                    for item in fields {
                        let field = stage_item(&mut scope, ctx, item, ExprLevel::Scalar)?;
                        draft.fields.push(OutputField::Dimension(field));
                    }
                }
                StageProperty::Aggregate { fields } => {
                    draft.set_kind(ctx, StageKind::Reduce, block.span)?;
                    for item in fields {
                        let field = stage_item(&mut scope, ctx, item, ExprLevel::Aggregate)?;
                        draft.fields.push(OutputField::Measure(field));
                    }
                }
                StageProperty::Project { fields } => {
                    draft.set_kind(ctx, StageKind::Project, block.span)?;
                    for item in fields {
                        if let QueryItem::Wildcard { path, span } = item {
                            let expanded = expand_wildcard(ctx, input, path, *span)?;
                            draft.fields.extend(expanded.into_iter().map(OutputField::Dimension));
                            continue;
                        }
                        let field = stage_item(&mut scope, ctx, item, ExprLevel::Scalar)?;
                        draft.fields.push(OutputField::Dimension(field));
                    }
                }
                StageProperty::Index { fields, by } => {
                    draft.set_kind(ctx, StageKind::Index, block.span)?;
                    if position.nested {
                        return Err(ctx.error(
                            SemanticError::InvalidStage("index: cannot be nested".into()),
                            block.span,
                        ));
                    }
                    for item in fields {
                        draft.index_fields.extend(index_item(ctx, input, item)?);
                    }
                    if let Some(by) = by {
                        draft.weight = Some(weight(&mut scope, ctx, by)?);
                    }
                }
                StageProperty::Nest { entries } => {
                    draft.set_kind(ctx, StageKind::Reduce, block.span)?;
                    for entry in entries {
                        let nest = self.build_nest(input, entry)?;
                        draft.fields.push(OutputField::Nest(nest));
                    }
                }
                StageProperty::Where { filters } => {
                    for filter in filters {
                        let cond = condition(&mut scope, ctx, filter)?;
                        if cond.level.is_aggregate() {
                            return Err(ctx.error(
                                SemanticError::IllegalAggregate(
                                    "where: cannot contain aggregates; use having:".into(),
                                ),
                                filter.span,
                            ));
                        }
                        draft.filters.push(Filter {
                            expr: cond.expr,
                            location: ctx.location(filter.span),
                        });
                    }
                }
                StageProperty::Having { filters } => {
                    for filter in filters {
                        let cond = condition(&mut scope, ctx, filter)?;
                        let filter = Filter {
                            expr: cond.expr,
                            location: ctx.location(filter.span),
                        };
                        // A scalar having: is an ordinary row filter.
                        if cond.level.is_aggregate() {
                            draft.having.push(filter);
                        } else {
                            draft.filters.push(filter);
                        }
                    }
                }
                StageProperty::OrderBy { items } => order_items.extend(items.iter()),
                StageProperty::Limit { count, .. } => draft.limit = Some(*count),
                StageProperty::Top { count, by, .. } => {
                    draft.limit = Some(*count);
                    if let Some(by) = by {
                        order_items.push(by);
                    }
                }
                StageProperty::Sample { sample, span } => {
                    if !position.sampling || position.nested {
                        return Err(ctx.error(
                            SemanticError::InvalidStage(
                                "sample: is only allowed in the first stage of a query against a table"
                                    .into(),
                            ),
                            *span,
                        ));
                    }
                    draft.sample = sampling(ctx, *sample, *span)?;
                }
                StageProperty::Declare { .. } => {}
            }
        }

        let top_default = block
            .properties
            .iter()
            .any(|p| matches!(p, StageProperty::Top { by: Some(_), .. }));
        finish(ctx, draft, &order_items, top_default, block.span)
    }

    fn build_nest(&mut self, input: &FieldNamespace, entry: &NestItem) -> LowerResult<NestDef> {
        let ctx = self.ctx();
        let nested = Position {
            sampling: false,
            nested: true,
        };
        let (name, stages, span) = match entry {
            NestItem::Reference { name, refinement } => {
                let view = view_of(ctx, input, name)?;
                let stages = match refinement {
                    None => view.pipeline.stages,
                    Some(block) => self.refine_view(input, &view, block, nested)?,
                };
                (name, stages, name.span)
            }
            NestItem::Define {
                name,
                pipeline,
                span,
            } => (name, self.build_pipeline(input.clone(), pipeline, false, true)?, *span),
        };
        for stage in &stages {
            match stage {
                Stage::Index(_) => {
                    return Err(ctx.error(
                        SemanticError::InvalidStage("index: cannot be nested".into()),
                        span,
                    ))
                }
                other if other.sample().is_some() => {
                    return Err(ctx.error(
                        SemanticError::InvalidStage("sample: cannot be nested".into()),
                        span,
                    ))
                }
                _ => {}
            }
        }
        if stages.is_empty() {
            return Err(ctx.error(
                SemanticError::InvalidStage(format!("nest '{}' has no stages", name.node)),
                span,
            ));
        }
        Ok(NestDef {
            name: name.node.clone(),
            pipeline: Pipeline::new(stages),
            location: ctx.location(span),
        })
    }
}

// =============================================================================
// Stage items
// =============================================================================

fn defines(items: &[QueryItem]) -> Vec<&ast::FieldDecl> {
    items
        .iter()
        .filter_map(|item| match item {
            QueryItem::Define(decl) => Some(decl),
            _ => None,
        })
        .collect()
}

/// Typed view of an output field kept from a refined stage.
fn output_typed(input: &FieldNamespace, field: &ExprField, level: ExprLevel) -> Typed {
    let mut reads = Reads::new();
    if level == ExprLevel::Scalar {
        field_reads(input, &field.expr, &[], false, &mut reads);
    }
    let fanned = reads.values().any(|c| *c).then(|| field.name.clone());
    Typed {
        expr: field.expr.clone(),
        ty: field.ty,
        level,
        reads,
        fanned,
    }
}

/// Lower one `group_by:`/`aggregate:`/`project:` entry.
fn stage_item(
    scope: &mut Scope<'_>,
    ctx: Ctx<'_>,
    item: &QueryItem,
    want: ExprLevel,
) -> LowerResult<ExprField> {
    match item {
        QueryItem::Reference { path, filters } => {
            let mut expr = ast::Expr::new(ExprKind::Field { path: path.clone() }).at(path.span);
            if !filters.is_empty() {
                expr = ast::Expr::new(ExprKind::Filtered {
                    expr: Box::new(expr),
                    filters: filters.clone(),
                })
                .at(path.span);
            }
            let typed = lower_expr(scope, ctx, &expr)?;
            if typed.level != want {
                let (found, expected) = match want {
                    ExprLevel::Scalar => ("measure", "dimension"),
                    ExprLevel::Aggregate => ("dimension", "measure"),
                };
                return Err(ctx.error(
                    SemanticError::WrongFieldKind {
                        path: path.to_string(),
                        found,
                        expected,
                    },
                    path.span,
                ));
            }
            Ok(ExprField {
                name: path.last().to_string(),
                expr: typed.expr,
                ty: typed.ty,
                location: ctx.location(path.span),
            })
        }
        QueryItem::Define(decl) => {
            let lowered = scope.resolve(&decl.name.node)?;
            let typed = lowered.typed;
            if typed.level != want {
                let message = match want {
                    ExprLevel::Scalar => format!("'{}' cannot contain an aggregate", decl.name.node),
                    ExprLevel::Aggregate => format!("'{}' must be an aggregate", decl.name.node),
                };
                return Err(ctx.error(SemanticError::IllegalAggregate(message), decl.name.span));
            }
            Ok(ExprField {
                name: decl.name.node.clone(),
                expr: typed.expr,
                ty: typed.ty,
                location: ctx.location(decl.span),
            })
        }
        QueryItem::Wildcard { span, .. } => Err(ctx.error(
            SemanticError::InvalidStage("'*' is only allowed in project: and index:".into()),
            *span,
        )),
    }
}

/// Namespace a wildcard path points at.
fn wildcard_namespace(ctx: Ctx<'_>, input: &FieldNamespace, path: &[String], span: Span) -> LowerResult<FieldNamespace> {
    if path.is_empty() {
        return Ok(input.clone());
    }
    let field = lookup_in(input, path).map_err(|e| ctx.error(e, span))?;
    match field.shape {
        Shape::Join(source, _) => Ok(source.fields.clone()),
        other => Err(ctx.error(
            SemanticError::WrongFieldKind {
                path: path.join("."),
                found: other.name(),
                expected: "join",
            },
            span,
        )),
    }
}

/// Dimensions matched by `path.*`, in declaration order.
fn expand_wildcard(ctx: Ctx<'_>, input: &FieldNamespace, path: &[String], span: Span) -> LowerResult<Vec<ExprField>> {
    let ns = wildcard_namespace(ctx, input, path, span)?;
    Ok(ns
        .iter()
        .filter_map(|(name, field)| match field.as_ref() {
            FieldDef::Dimension(f) => {
                let mut full = path.to_vec();
                full.push(name.to_string());
                Some(ExprField {
                    name: name.to_string(),
                    expr: Expr::Field(full),
                    ty: f.ty,
                    location: ctx.location(span),
                })
            }
            _ => None,
        })
        .collect())
}

fn index_item(ctx: Ctx<'_>, input: &FieldNamespace, item: &QueryItem) -> LowerResult<Vec<IndexField>> {
    match item {
        QueryItem::Reference { path, .. } => {
            let field = lookup_in(input, &path.names).map_err(|e| ctx.error(e, path.span))?;
            match field.shape {
                Shape::Dimension => Ok(vec![IndexField {
                    path: path.names.clone(),
                    ty: field.ty,
                }]),
                other => Err(ctx.error(
                    SemanticError::WrongFieldKind {
                        path: path.to_string(),
                        found: other.name(),
                        expected: "dimension",
                    },
                    path.span,
                )),
            }
        }
        QueryItem::Wildcard { path, span } => Ok(expand_wildcard(ctx, input, path, *span)?
            .into_iter()
            .map(|f| {
                let mut full = path.clone();
                full.push(f.name);
                IndexField { path: full, ty: f.ty }
            })
            .collect()),
        QueryItem::Define(decl) => Err(ctx.error(
            SemanticError::InvalidStage("index: only lists existing fields".into()),
            decl.name.span,
        )),
    }
}

/// The `by` measure of `index:`.
fn weight(scope: &mut Scope<'_>, ctx: Ctx<'_>, by: &Spanned<String>) -> LowerResult<Expr> {
    let expr = ast::Expr::field(&by.node).at(by.span);
    let typed = lower_expr(scope, ctx, &expr)?;
    if !typed.level.is_aggregate() {
        return Err(ctx.error(
            SemanticError::WrongFieldKind {
                path: by.node.clone(),
                found: "dimension",
                expected: "measure",
            },
            by.span,
        ));
    }
    Ok(typed.expr)
}

/// A boolean filter expression at any level.
fn condition(scope: &mut Scope<'_>, ctx: Ctx<'_>, filter: &ast::Expr) -> LowerResult<Typed> {
    let cond = lower_expr(scope, ctx, filter)?;
    if !cond.ty.is_compatible(crate::model::AtomicType::Boolean) {
        return Err(ctx.error(
            SemanticError::TypeMismatch(format!(
                "a filter must be boolean, found {}",
                cond.ty.name()
            )),
            filter.span,
        ));
    }
    Ok(cond)
}

fn view_of(ctx: Ctx<'_>, input: &FieldNamespace, name: &Spanned<String>) -> LowerResult<ViewDef> {
    let field = lookup_in(input, std::slice::from_ref(&name.node)).map_err(|e| ctx.error(e, name.span))?;
    match field.shape {
        Shape::View(view) => Ok(view),
        other => Err(ctx.error(
            SemanticError::WrongFieldKind {
                path: name.node.clone(),
                found: other.name(),
                expected: "view",
            },
            name.span,
        )),
    }
}

fn sampling(ctx: Ctx<'_>, sample: SampleSpec, span: Span) -> LowerResult<Option<Sampling>> {
    Ok(match sample {
        SampleSpec::Enabled { enabled } => enabled.then_some(Sampling::Default),
        SampleSpec::Rows { rows } => Some(Sampling::Rows(rows)),
        SampleSpec::Percent { percent } => {
            if !(percent > 0.0 && percent <= 100.0) {
                return Err(ctx.error(
                    SemanticError::InvalidStage(format!(
                        "sample percent must be in (0, 100], found {}",
                        percent
                    )),
                    span,
                ));
            }
            Some(Sampling::Percent(percent))
        }
    })
}

// =============================================================================
// Finishing
// =============================================================================

fn finish(
    ctx: Ctx<'_>,
    mut draft: Draft,
    order_items: &[&ast::OrderByItem],
    top_default: bool,
    span: Span,
) -> LowerResult<Stage> {
    let invalid = |message: &str| ctx.error(SemanticError::InvalidStage(message.to_string()), span);
    let Some(kind) = draft.kind else {
        return Err(invalid(
            "a query stage needs group_by:, aggregate:, nest:, project: or index:",
        ));
    };

    let mut names = HashSet::new();
    for field in &draft.fields {
        if !names.insert(field.name()) {
            return Err(ctx.error(
                SemanticError::DuplicateName {
                    name: field.name().to_string(),
                },
                field.location().span,
            ));
        }
    }

    if !order_items.is_empty() {
        if kind == StageKind::Index {
            return Err(invalid("order_by: is not allowed in index:"));
        }
        let mut order_by = Vec::with_capacity(order_items.len());
        for item in order_items {
            let field = match &item.field {
                OrderTarget::Name(name) => draft
                    .fields
                    .iter()
                    .find(|f| f.name() == name)
                    .ok_or_else(|| {
                        ctx.error(SemanticError::UndefinedField { path: name.clone() }, item.span)
                    })?,
                OrderTarget::Ordinal(n) => {
                    let index = (*n as usize).checked_sub(1);
                    index.and_then(|i| draft.fields.get(i)).ok_or_else(|| {
                        ctx.error(
                            SemanticError::InvalidStage(format!("order_by: {} is out of range", n)),
                            item.span,
                        )
                    })?
                }
            };
            if let OutputField::Nest(_) = field {
                return Err(ctx.error(
                    SemanticError::WrongFieldKind {
                        path: field.name().to_string(),
                        found: "nest",
                        expected: "dimension or measure",
                    },
                    item.span,
                ));
            }
            let fallback = if top_default {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            };
            order_by.push(OrderBy {
                field: field.name().to_string(),
                direction: item.direction.unwrap_or(fallback),
            });
        }
        draft.order_by = order_by;
    }

    Ok(match kind {
        StageKind::Reduce => {
            if draft.fields.is_empty() {
                return Err(invalid("a reduce stage needs at least one output field"));
            }
            if draft.order_by.is_empty() {
                draft.order_by = default_order(&draft.fields);
            }
            Stage::Reduce(ReduceStage {
                fields: draft.fields,
                filters: draft.filters,
                having: draft.having,
                order_by: draft.order_by,
                limit: draft.limit,
                sample: draft.sample,
            })
        }
        StageKind::Project => {
            if !draft.having.is_empty() {
                return Err(invalid("having: requires group_by: or aggregate:"));
            }
            if draft.fields.is_empty() {
                return Err(invalid("project: needs at least one field"));
            }
            Stage::Project(ProjectStage {
                fields: draft.fields,
                filters: draft.filters,
                order_by: draft.order_by,
                limit: draft.limit,
                sample: draft.sample,
            })
        }
        StageKind::Index => {
            if !draft.having.is_empty() {
                return Err(invalid("having: is not allowed in index:"));
            }
            if draft.index_fields.is_empty() {
                return Err(invalid("index: needs at least one field"));
            }
            Stage::Index(IndexStage {
                fields: draft.index_fields,
                weight: draft.weight,
                filters: draft.filters,
                limit: draft.limit,
                sample: draft.sample,
            })
        }
    })
}

/// Ordering of a reduce stage without `order_by:`: the first time dimension
/// newest first, else the first measure largest first, else the first field.
fn default_order(fields: &[OutputField]) -> Vec<OrderBy> {
    let temporal = fields.iter().find(|f| match f {
        OutputField::Dimension(d) => d.ty.is_temporal(),
        _ => false,
    });
    let measure = || fields.iter().find(|f| matches!(f, OutputField::Measure(_)));
    let first = || fields.iter().find(|f| !matches!(f, OutputField::Nest(_)));
    if let Some(field) = temporal.or_else(measure) {
        return vec![OrderBy {
            field: field.name().to_string(),
            direction: SortDirection::Desc,
        }];
    }
    first()
        .map(|field| {
            vec![OrderBy {
                field: field.name().to_string(),
                direction: SortDirection::Asc,
            }]
        })
        .unwrap_or_default()
}
