//! Name scopes used while lowering expressions.
//!
//! A [`Scope`] sits on top of an already built [`FieldNamespace`] and adds the
//! declarations of the block being lowered. Declarations are resolved lazily
//! on first reference, so a field may refer to one declared after it; a
//! declaration that reaches itself again is a circular definition.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;

use crate::dsl::ast;
use crate::model::{Expr, ExprLevel, FieldDef, FieldNamespace, JoinKind, SourceDef, ViewDef};
use crate::model::AtomicType;
use crate::semantic::error::{LocatedError, SemanticError, SemanticResult};

use super::expr::{lower_expr, Typed};
use super::Ctx;

/// Join paths an expression reads, each mapped to whether reaching it
/// crosses a one-to-many join.
pub type Reads = BTreeMap<Vec<String>, bool>;

/// What a name resolves to.
#[derive(Debug, Clone)]
pub enum Shape {
    Dimension,
    Measure,
    Join(std::sync::Arc<SourceDef>, JoinKind),
    View(ViewDef),
    Nested,
}

impl Shape {
    pub fn name(&self) -> &'static str {
        match self {
            Shape::Dimension => "dimension",
            Shape::Measure => "measure",
            Shape::Join(..) => "join",
            Shape::View(_) => "view",
            Shape::Nested => "nested result",
        }
    }
}

/// A resolved reference.
#[derive(Debug, Clone)]
pub struct ScopeField {
    pub shape: Shape,
    pub ty: AtomicType,
    /// Joins walked to reach the field, outermost first.
    pub join_path: Vec<String>,
    pub relationships: Vec<JoinKind>,
    pub reads: Reads,
    /// Replaces the reference when the name is local to a query stage.
    pub inline: Option<Expr>,
}

impl ScopeField {
    pub fn level(&self) -> ExprLevel {
        match self.shape {
            Shape::Measure => ExprLevel::Aggregate,
            _ => ExprLevel::Scalar,
        }
    }
}

/// Anything expressions can look names up in.
pub trait FieldLookup {
    fn lookup(&mut self, path: &[String]) -> SemanticResult<ScopeField>;
}

// =============================================================================
// Namespace walking
// =============================================================================

/// Resolve `path` in a built namespace.
pub fn lookup_in(ns: &FieldNamespace, path: &[String]) -> SemanticResult<ScopeField> {
    let resolved = ns.resolve(path)?;
    let crosses = resolved.crosses_many();
    let mut reads = Reads::new();
    let (shape, ty) = match resolved.field.as_ref() {
        FieldDef::Dimension(f) => {
            field_reads(resolved.owner, &f.expr, &resolved.join_path, crosses, &mut reads);
            (Shape::Dimension, f.ty)
        }
        FieldDef::Measure(f) => (Shape::Measure, f.ty),
        FieldDef::Join(j) => (Shape::Join(j.source.clone(), j.relationship), AtomicType::Null),
        FieldDef::View(v) => (Shape::View(v.clone()), AtomicType::Null),
        FieldDef::Nested(..) => (Shape::Nested, AtomicType::Null),
    };
    Ok(ScopeField {
        shape,
        ty,
        join_path: resolved.join_path,
        relationships: resolved.relationships,
        reads,
        inline: None,
    })
}

/// Join paths read by a built dimension expression owned by `ns`, reached
/// through `prefix`.
pub fn field_reads(ns: &FieldNamespace, expr: &Expr, prefix: &[String], crosses: bool, out: &mut Reads) {
    match expr {
        Expr::Column(_) => {
            let entry = out.entry(prefix.to_vec()).or_insert(crosses);
            *entry |= crosses;
        }
        Expr::Field(path) => {
            let Ok(resolved) = ns.resolve_defined(path) else {
                return;
            };
            let mut nested_prefix = prefix.to_vec();
            nested_prefix.extend(resolved.join_path.iter().cloned());
            let nested_crosses = crosses || resolved.crosses_many();
            if let FieldDef::Dimension(f) = resolved.field.as_ref() {
                field_reads(resolved.owner, &f.expr, &nested_prefix, nested_crosses, out);
            }
        }
        other => {
            for child in other.children() {
                field_reads(ns, child, prefix, crosses, out);
            }
        }
    }
}

// =============================================================================
// Block scope
// =============================================================================

/// How a declaration is used once lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclRole {
    Dimension,
    Measure,
    /// `declare:`; the level is inferred.
    Declare,
}

#[derive(Debug, Clone)]
struct Pending<'a> {
    decl: &'a ast::FieldDecl,
    role: DeclRole,
}

/// A lowered declaration.
#[derive(Debug, Clone)]
pub struct Lowered {
    pub typed: Typed,
    pub role: DeclRole,
}

/// Built namespace plus the declarations of the block being lowered.
pub struct Scope<'a> {
    ctx: Ctx<'a>,
    root: FieldNamespace,
    pending: IndexMap<String, Pending<'a>>,
    done: HashMap<String, Result<Lowered, LocatedError>>,
    in_progress: Vec<String>,
    /// Stage-local names are substituted into referencing expressions.
    inline: bool,
}

impl<'a> Scope<'a> {
    pub fn new(ctx: Ctx<'a>, root: FieldNamespace) -> Self {
        Self {
            ctx,
            root,
            pending: IndexMap::new(),
            done: HashMap::new(),
            in_progress: Vec::new(),
            inline: false,
        }
    }

    /// Scope whose declarations are inlined where referenced.
    pub fn inlining(ctx: Ctx<'a>, root: FieldNamespace) -> Self {
        Self {
            inline: true,
            ..Self::new(ctx, root)
        }
    }

    pub fn root(&self) -> &FieldNamespace {
        &self.root
    }

    pub fn set_root(&mut self, root: FieldNamespace) {
        self.root = root;
    }

    /// True when `name` is declared in this block or visible in the root.
    pub fn is_defined(&self, name: &str) -> bool {
        self.pending.contains_key(name) || self.done.contains_key(name) || self.root.contains(name)
    }

    pub fn declare(&mut self, decl: &'a ast::FieldDecl, role: DeclRole) {
        self.pending.insert(decl.name.node.clone(), Pending { decl, role });
    }

    /// Register an already lowered name.
    pub fn define(&mut self, name: &str, typed: Typed, role: DeclRole) {
        self.done.insert(name.to_string(), Ok(Lowered { typed, role }));
    }

    /// Lower the declaration `name`, reusing an earlier result.
    pub fn resolve(&mut self, name: &str) -> Result<Lowered, LocatedError> {
        if let Some(done) = self.done.get(name) {
            return done.clone();
        }
        let Some(pending) = self.pending.get(name).cloned() else {
            return Err(LocatedError::new(
                SemanticError::UndefinedField { path: name.to_string() },
                self.ctx.location(Default::default()),
            ));
        };
        if self.in_progress.iter().any(|n| n == name) {
            return Err(LocatedError::new(
                SemanticError::CircularDefinition { name: name.to_string() },
                self.ctx.location(pending.decl.name.span),
            ));
        }

        tracing::trace!(field = %name, "lowering declaration");
        self.in_progress.push(name.to_string());
        let ctx = self.ctx;
        let result = lower_expr(self, ctx, &pending.decl.expr).map(|typed| Lowered {
            typed,
            role: pending.role,
        });
        self.in_progress.pop();
        self.done.insert(name.to_string(), result.clone());
        result
    }
}

impl FieldLookup for Scope<'_> {
    fn lookup(&mut self, path: &[String]) -> SemanticResult<ScopeField> {
        let Some(first) = path.first() else {
            return Err(SemanticError::UndefinedField { path: String::new() });
        };
        let declared = self.pending.contains_key(first) || self.done.contains_key(first);
        if !declared {
            return lookup_in(&self.root, path);
        }
        if self.in_progress.iter().any(|n| n == first) {
            return Err(SemanticError::CircularDefinition { name: first.clone() });
        }
        // The failing declaration reports its own error.
        let lowered = self
            .resolve(first)
            .map_err(|_| SemanticError::InvalidReference { name: first.clone() })?;
        if path.len() > 1 {
            return Err(SemanticError::WrongFieldKind {
                path: first.clone(),
                found: if lowered.typed.level.is_aggregate() { "measure" } else { "dimension" },
                expected: "join",
            });
        }
        let shape = if lowered.typed.level.is_aggregate() {
            Shape::Measure
        } else {
            Shape::Dimension
        };
        Ok(ScopeField {
            shape,
            ty: lowered.typed.ty,
            join_path: vec![],
            relationships: vec![],
            reads: lowered.typed.reads.clone(),
            inline: self.inline.then(|| lowered.typed.expr.clone()),
        })
    }
}
