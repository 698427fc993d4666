//! Source lowering: tables, derived sources and refinements.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::dsl::ast::{self, JoinCondition, SourceExpr, SourceProperty};
use crate::dsl::{Span, Spanned};
use crate::model::{
    AtomicType, Correlation, Expr, ExprField, FieldDef, FieldNamespace, Filter, JoinDef, JoinKind,
    NamedEntity, Pipeline, QueryDef, SourceDef, SourceOrigin, SqlBlockDef, ViewDef,
};
use crate::semantic::error::{LocatedError, SemanticError};

use super::expr::lower_expr;
use super::scope::{lookup_in, DeclRole, Lowered, Scope, Shape};
use super::{table_key, LowerResult, ModelBuilder};

/// A name declared in a source body, in declaration order.
enum Declared<'b> {
    Field(&'b ast::FieldDecl, DeclRole),
    Join(&'b ast::JoinDecl),
}

impl<'a> ModelBuilder<'a> {
    pub(super) fn build_source(&mut self, expr: &SourceExpr) -> LowerResult<Arc<SourceDef>> {
        match expr {
            SourceExpr::Named { name } => self.named_source(name),
            SourceExpr::Table {
                connection,
                path,
                span,
            } => self.table_source(connection.as_deref(), path, *span),
            SourceExpr::FromQuery { query, span } => {
                let query = self.build_query(query, None)?;
                Ok(self.source_from_query(query, *span))
            }
            SourceExpr::FromSql { name } => self.sql_source(name),
            SourceExpr::Refine { base, body, span } => {
                let base = self.build_source(base)?;
                self.refine(base, body, *span)
            }
        }
    }

    fn named_source(&mut self, name: &Spanned<String>) -> LowerResult<Arc<SourceDef>> {
        let ctx = self.ctx();
        if self.building.iter().any(|n| n == &name.node) {
            return Err(ctx.error(
                SemanticError::JoinCycle {
                    name: name.node.clone(),
                },
                name.span,
            ));
        }
        if self.model.invalid.contains_key(&name.node) {
            return Err(ctx.error(
                SemanticError::InvalidReference {
                    name: name.node.clone(),
                },
                name.span,
            ));
        }
        match self.model.entities.get(&name.node).cloned() {
            Some(NamedEntity::Source(source)) => Ok(source),
            Some(NamedEntity::Query(query)) => Ok(self.source_from_query(query, name.span)),
            Some(NamedEntity::Sql(block)) => Ok(self.source_from_sql(block, name.span)),
            None => Err(ctx.error(
                SemanticError::UndefinedEntity {
                    entity: "source",
                    name: name.node.clone(),
                },
                name.span,
            )),
        }
    }

    fn table_source(
        &mut self,
        connection: Option<&str>,
        path: &str,
        span: Span,
    ) -> LowerResult<Arc<SourceDef>> {
        let ctx = self.ctx();
        let key = table_key(connection, path);
        let schema = self.schemas.table(&key).map_err(|e| ctx.error(e, span))?;
        let location = ctx.location(span);
        let mut fields = FieldNamespace::new();
        for column in &schema.fields {
            fields.insert(
                column.name.clone(),
                Arc::new(FieldDef::Dimension(ExprField {
                    name: column.name.clone(),
                    expr: Expr::Column(column.name.clone()),
                    ty: column.ty,
                    location: location.clone(),
                })),
            );
        }
        tracing::trace!(table = %key, columns = fields.len(), "table source");
        Ok(Arc::new(SourceDef {
            name: path.to_string(),
            origin: SourceOrigin::Table {
                key,
                path: path.to_string(),
                connection: connection.map(str::to_string),
            },
            fields,
            primary_key: None,
            filters: Vec::new(),
            location,
        }))
    }

    fn sql_source(&mut self, name: &Spanned<String>) -> LowerResult<Arc<SourceDef>> {
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
            Some(NamedEntity::Sql(block)) => {
                let block = block.clone();
                Ok(self.source_from_sql(block, name.span))
            }
            _ => Err(ctx.error(
                SemanticError::UndefinedEntity {
                    entity: "sql block",
                    name: name.node.clone(),
                },
                name.span,
            )),
        }
    }

    /// Source whose rows are the output of `query`.
    pub(super) fn source_from_query(&self, query: Arc<QueryDef>, span: Span) -> Arc<SourceDef> {
        let location = self.ctx().location(span);
        let fields = FieldNamespace::from_result(&query.output_schema(), &location);
        Arc::new(SourceDef {
            name: query.name.clone().unwrap_or_else(|| "from_query".to_string()),
            origin: SourceOrigin::Query(query),
            fields,
            primary_key: None,
            filters: Vec::new(),
            location,
        })
    }

    fn source_from_sql(&self, block: Arc<SqlBlockDef>, span: Span) -> Arc<SourceDef> {
        let location = self.ctx().location(span);
        let mut fields = FieldNamespace::new();
        for column in &block.schema.fields {
            fields.insert(
                column.name.clone(),
                Arc::new(FieldDef::Dimension(ExprField {
                    name: column.name.clone(),
                    expr: Expr::Column(column.name.clone()),
                    ty: column.ty,
                    location: location.clone(),
                })),
            );
        }
        Arc::new(SourceDef {
            name: block.name.clone(),
            origin: SourceOrigin::Sql(block),
            fields,
            primary_key: None,
            filters: Vec::new(),
            location,
        })
    }

    // =========================================================================
    // Refinement
    // =========================================================================

    fn refine(
        &mut self,
        base: Arc<SourceDef>,
        body: &[SourceProperty],
        span: Span,
    ) -> LowerResult<Arc<SourceDef>> {
        let ctx = self.ctx();
        let mut errors: Vec<LocatedError> = Vec::new();

        // accept / except / rename reshape the inherited fields first
        let mut fields = base.fields.clone();
        for prop in body {
            match prop {
                SourceProperty::Accept { fields: names } | SourceProperty::Except { fields: names } => {
                    let mut listed = HashSet::new();
                    for name in names {
                        if fields.contains(&name.node) {
                            listed.insert(name.node.as_str());
                        } else {
                            errors.push(ctx.error(
                                SemanticError::UndefinedField {
                                    path: name.node.clone(),
                                },
                                name.span,
                            ));
                        }
                    }
                    let accept = matches!(prop, SourceProperty::Accept { .. });
                    fields = fields.filtered(|n| listed.contains(n) == accept);
                }
                SourceProperty::Rename { renames } => {
                    for rename in renames {
                        if !fields.contains(&rename.old_name.node) {
                            errors.push(ctx.error(
                                SemanticError::UndefinedField {
                                    path: rename.old_name.node.clone(),
                                },
                                rename.old_name.span,
                            ));
                        } else if fields.defines(&rename.new_name.node) {
                            errors.push(ctx.error(
                                SemanticError::DuplicateName {
                                    name: rename.new_name.node.clone(),
                                },
                                rename.new_name.span,
                            ));
                        } else {
                            fields = fields.renamed(&rename.old_name.node, &rename.new_name.node);
                        }
                    }
                }
                _ => {}
            }
        }

        // Collect declarations and check their names.
        let mut declared: Vec<Declared<'_>> = Vec::new();
        let mut views: Vec<&ast::ViewDecl> = Vec::new();
        let mut filters: Vec<&ast::Expr> = Vec::new();
        let mut primary_key: Option<&Spanned<String>> = None;
        let mut seen: HashSet<&str> = HashSet::new();
        let mut seen_joins: HashSet<&str> = HashSet::new();

        for prop in body {
            match prop {
                SourceProperty::Dimension { fields: decls }
                | SourceProperty::Measure { fields: decls }
                | SourceProperty::Declare { fields: decls } => {
                    let role = match prop {
                        SourceProperty::Dimension { .. } => DeclRole::Dimension,
                        SourceProperty::Measure { .. } => DeclRole::Measure,
                        _ => DeclRole::Declare,
                    };
                    for decl in decls {
                        if let Some(error) = name_clash(&fields, &seen, &seen_joins, &decl.name, false) {
                            errors.push(ctx.error(error, decl.name.span));
                        } else {
                            seen.insert(&decl.name.node);
                            declared.push(Declared::Field(decl, role));
                        }
                    }
                }
                SourceProperty::Join { joins } => {
                    for join in joins {
                        if let Some(error) = name_clash(&fields, &seen, &seen_joins, &join.name, true) {
                            errors.push(ctx.error(error, join.name.span));
                        } else {
                            seen.insert(&join.name.node);
                            seen_joins.insert(&join.name.node);
                            declared.push(Declared::Join(join));
                        }
                    }
                }
                SourceProperty::View { views: decls } => {
                    for view in decls {
                        if let Some(error) = name_clash(&fields, &seen, &seen_joins, &view.name, false) {
                            errors.push(ctx.error(error, view.name.span));
                        } else {
                            seen.insert(&view.name.node);
                            views.push(view);
                        }
                    }
                }
                SourceProperty::Where { filters: exprs } => filters.extend(exprs.iter()),
                SourceProperty::PrimaryKey { field } => primary_key = Some(field),
                SourceProperty::Accept { .. }
                | SourceProperty::Except { .. }
                | SourceProperty::Rename { .. } => {}
            }
        }

        // Joins are built before any expression so fields may read through them.
        let mut draft = fields.clone();
        let mut joined: HashMap<String, Arc<SourceDef>> = HashMap::new();
        for item in &declared {
            let Declared::Join(join) = item else {
                continue;
            };
            let named;
            let source_expr = match &join.source {
                Some(expr) => expr,
                None => {
                    named = SourceExpr::Named {
                        name: join.name.clone(),
                    };
                    &named
                }
            };
            match self.build_source(source_expr) {
                Ok(source) => {
                    draft.insert(
                        join.name.node.clone(),
                        Arc::new(FieldDef::Join(JoinDef {
                            name: join.name.node.clone(),
                            relationship: join.kind,
                            source: source.clone(),
                            correlation: Correlation::Unconditioned,
                            location: ctx.location(join.span),
                        })),
                    );
                    joined.insert(join.name.node.clone(), source);
                }
                Err(err) => errors.push(err),
            }
        }

        let mut scope = Scope::new(ctx, draft);
        for item in &declared {
            if let Declared::Field(decl, role) = item {
                scope.declare(decl, *role);
            }
        }

        let mut built: HashMap<String, FieldDef> = HashMap::new();
        for item in &declared {
            let Declared::Field(decl, _) = item else {
                continue;
            };
            match scope.resolve(&decl.name.node).and_then(|l| field_def(ctx, decl, l)) {
                Ok(def) => {
                    built.insert(decl.name.node.clone(), def);
                }
                Err(err) => errors.push(err),
            }
        }

        let mut correlations: HashMap<String, Correlation> = HashMap::new();
        for item in &declared {
            let Declared::Join(join) = item else {
                continue;
            };
            let Some(source) = joined.get(&join.name.node) else {
                continue;
            };
            match self.correlate(&mut scope, join, source) {
                Ok(correlation) => {
                    correlations.insert(join.name.node.clone(), correlation);
                }
                Err(err) => errors.push(err),
            }
        }

        let mut all_filters = base.filters.clone();
        for filter in filters {
            match lower_expr(&mut scope, ctx, filter) {
                Ok(cond) if cond.level.is_aggregate() => errors.push(ctx.error(
                    SemanticError::IllegalAggregate(
                        "source filters cannot contain aggregates".into(),
                    ),
                    filter.span,
                )),
                Ok(cond) if !cond.ty.is_compatible(AtomicType::Boolean) => errors.push(ctx.error(
                    SemanticError::TypeMismatch(format!(
                        "a filter must be boolean, found {}",
                        cond.ty.name()
                    )),
                    filter.span,
                )),
                Ok(cond) => all_filters.push(Filter {
                    expr: cond.expr,
                    location: ctx.location(filter.span),
                }),
                Err(err) => errors.push(err),
            }
        }

        let mut namespace = fields;
        for item in &declared {
            match item {
                Declared::Field(decl, _) => {
                    if let Some(def) = built.remove(&decl.name.node) {
                        namespace.insert(decl.name.node.clone(), Arc::new(def));
                    }
                }
                Declared::Join(join) => {
                    let name = &join.name.node;
                    if let (Some(source), Some(correlation)) =
                        (joined.remove(name), correlations.remove(name))
                    {
                        namespace.insert(
                            name.clone(),
                            Arc::new(FieldDef::Join(JoinDef {
                                name: name.clone(),
                                relationship: join.kind,
                                source,
                                correlation,
                                location: ctx.location(join.span),
                            })),
                        );
                    }
                }
            }
        }

        let primary_key = match primary_key {
            Some(pk) => match namespace.get(&pk.node).map(|f| f.as_ref()) {
                Some(FieldDef::Dimension(_)) => Some(pk.node.clone()),
                Some(other) => {
                    errors.push(ctx.error(
                        SemanticError::WrongFieldKind {
                            path: pk.node.clone(),
                            found: other.kind_name(),
                            expected: "dimension",
                        },
                        pk.span,
                    ));
                    None
                }
                None => {
                    errors.push(ctx.error(
                        SemanticError::UndefinedField {
                            path: pk.node.clone(),
                        },
                        pk.span,
                    ));
                    None
                }
            },
            None => base.primary_key.clone(),
        };

        if !errors.is_empty() {
            return Err(self.first_of(errors));
        }

        let mut source = SourceDef {
            name: base.name.clone(),
            origin: base.origin.clone(),
            fields: namespace,
            primary_key,
            filters: all_filters,
            location: ctx.location(span),
        };

        // Views see every field of the refined source, including earlier views.
        let sampling = matches!(source.origin, SourceOrigin::Table { .. });
        for view in views {
            let input = source.fields.clone();
            match self.build_pipeline(input, &view.pipeline, sampling, false) {
                Ok(stages) => source.fields.insert(
                    view.name.node.clone(),
                    Arc::new(FieldDef::View(ViewDef {
                        name: view.name.node.clone(),
                        pipeline: Pipeline::new(stages),
                        location: ctx.location(view.span),
                    })),
                ),
                Err(err) => errors.push(err),
            }
        }
        if !errors.is_empty() {
            return Err(self.first_of(errors));
        }
        Ok(Arc::new(source))
    }

    /// Lower the condition of `join` against the source being refined.
    fn correlate(
        &self,
        scope: &mut Scope<'_>,
        join: &ast::JoinDecl,
        source: &SourceDef,
    ) -> LowerResult<Correlation> {
        let ctx = self.ctx();
        let name = &join.name.node;
        match &join.condition {
            Some(JoinCondition::With { expr }) => {
                let key = lower_expr(scope, ctx, expr)?;
                if key.level.is_aggregate() {
                    return Err(ctx.error(
                        SemanticError::IllegalAggregate(format!(
                            "join '{}' cannot be keyed by an aggregate",
                            name
                        )),
                        expr.span,
                    ));
                }
                let pk_type = primary_key_type(source).ok_or_else(|| {
                    ctx.error(
                        SemanticError::TypeMismatch(format!(
                            "join '{}' uses 'with' but source '{}' has no primary key",
                            name, source.name
                        )),
                        expr.span,
                    )
                })?;
                if !key.ty.is_compatible(pk_type) {
                    return Err(ctx.error(
                        SemanticError::TypeMismatch(format!(
                            "join '{}' key is {} but the primary key of '{}' is {}",
                            name,
                            key.ty.name(),
                            source.name,
                            pk_type.name()
                        )),
                        expr.span,
                    ));
                }
                Ok(Correlation::With(key.expr))
            }
            Some(JoinCondition::On { expr }) => {
                let cond = lower_expr(scope, ctx, expr)?;
                if cond.level.is_aggregate() {
                    return Err(ctx.error(
                        SemanticError::IllegalAggregate(
                            "join conditions cannot contain aggregates".into(),
                        ),
                        expr.span,
                    ));
                }
                if !cond.ty.is_compatible(AtomicType::Boolean) {
                    return Err(ctx.error(
                        SemanticError::TypeMismatch(format!(
                            "join condition must be boolean, found {}",
                            cond.ty.name()
                        )),
                        expr.span,
                    ));
                }
                Ok(Correlation::On(cond.expr))
            }
            None if join.kind == JoinKind::Cross => Ok(Correlation::Unconditioned),
            None => {
                // Implicit: a parent field named like the joined primary key.
                let missing = || {
                    ctx.error(
                        SemanticError::TypeMismatch(format!(
                            "join '{}' needs 'with' or 'on'",
                            name
                        )),
                        join.name.span,
                    )
                };
                let pk = source.primary_key.as_ref().ok_or_else(missing)?;
                let path = vec![pk.clone()];
                match lookup_in(scope.root(), &path) {
                    Ok(field) if matches!(field.shape, Shape::Dimension) => {
                        Ok(Correlation::With(Expr::Field(path)))
                    }
                    _ => Err(missing()),
                }
            }
        }
    }
}

/// Why `name` cannot be declared in a source body, if it cannot.
fn name_clash(
    inherited: &FieldNamespace,
    seen: &HashSet<&str>,
    seen_joins: &HashSet<&str>,
    name: &Spanned<String>,
    join: bool,
) -> Option<SemanticError> {
    let taken = seen.contains(name.node.as_str()) || inherited.defines(&name.node);
    if !taken {
        return None;
    }
    let other_join = seen_joins.contains(name.node.as_str())
        || inherited
            .lookup(&name.node)
            .is_some_and(|f| f.as_join().is_some());
    Some(if join && other_join {
        SemanticError::AmbiguousJoin {
            name: name.node.clone(),
        }
    } else {
        SemanticError::DuplicateName {
            name: name.node.clone(),
        }
    })
}

fn primary_key_type(source: &SourceDef) -> Option<AtomicType> {
    let pk = source.primary_key.as_ref()?;
    match source.fields.lookup(pk).map(|f| f.as_ref()) {
        Some(FieldDef::Dimension(f)) => Some(f.ty),
        _ => None,
    }
}

/// Check the role of a lowered declaration and wrap it as a field.
fn field_def(ctx: super::Ctx<'_>, decl: &ast::FieldDecl, lowered: Lowered) -> LowerResult<FieldDef> {
    let aggregate = lowered.typed.level.is_aggregate();
    let name = &decl.name.node;
    match lowered.role {
        DeclRole::Dimension if aggregate => {
            return Err(ctx.error(
                SemanticError::IllegalAggregate(format!(
                    "dimension '{}' cannot contain an aggregate",
                    name
                )),
                decl.name.span,
            ))
        }
        DeclRole::Measure if !aggregate => {
            return Err(ctx.error(
                SemanticError::IllegalAggregate(format!("measure '{}' must be an aggregate", name)),
                decl.name.span,
            ))
        }
        _ => {}
    }
    let field = ExprField {
        name: name.clone(),
        expr: lowered.typed.expr,
        ty: lowered.typed.ty,
        location: ctx.location(decl.span),
    };
    Ok(if aggregate {
        FieldDef::Measure(field)
    } else {
        FieldDef::Dimension(field)
    })
}
