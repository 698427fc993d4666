//! Join trees.
//!
//! Every SELECT the planner emits over a stage input reads some subset of the
//! source's joins. The tree records which join paths are read, closes the set
//! under parents and join conditions, and answers the fan-out question for
//! aggregates: can rows at a given path be repeated by a joined relation?

use std::collections::BTreeSet;

use crate::model::{Correlation, Expr, FieldDef, FieldNamespace, JoinDef};
use crate::semantic::error::{SemanticError, SemanticResult};

/// Joins walked from the query's source, outermost first. Empty for the
/// source itself.
pub type JoinPath = Vec<String>;

/// Alias of the stage input relation.
pub const BASE_ALIAS: &str = "base";

/// Alias a joined relation is read under.
pub fn alias(path: &[String]) -> String {
    if path.is_empty() {
        BASE_ALIAS.to_string()
    } else {
        path.join("__")
    }
}

/// `prefix` followed by `rest`.
pub fn extend(prefix: &[String], rest: &[String]) -> JoinPath {
    let mut path = prefix.to_vec();
    path.extend(rest.iter().cloned());
    path
}

/// Joins read by one SELECT.
#[derive(Debug, Clone)]
pub struct JoinTree {
    root: FieldNamespace,
    root_key: Option<String>,
    used: BTreeSet<JoinPath>,
}

impl JoinTree {
    pub fn new(root: FieldNamespace, root_key: Option<String>) -> Self {
        Self {
            root,
            root_key,
            used: BTreeSet::new(),
        }
    }

    pub fn root(&self) -> &FieldNamespace {
        &self.root
    }

    /// Record the joins `expr` reads; `expr` belongs to the root namespace.
    pub fn read(&mut self, expr: &Expr) -> SemanticResult<()> {
        let root = self.root.clone();
        collect_reads(&mut self.used, &[], &root, expr)
    }

    /// Add the joins needed to evaluate the join conditions and filters of
    /// every join already read.
    pub fn close(&mut self) -> SemanticResult<()> {
        loop {
            let before = self.used.len();
            let paths: Vec<JoinPath> = self.used.iter().cloned().collect();
            for path in &paths {
                let (parent, _) = path.split_at(path.len() - 1);
                let join = self.join(path)?.clone();
                let parent_ns = self.namespace(parent)?.clone();
                match &join.correlation {
                    Correlation::With(expr) | Correlation::On(expr) => {
                        collect_reads(&mut self.used, parent, &parent_ns, expr)?;
                    }
                    Correlation::Unconditioned => {}
                }
                for filter in &join.source.filters {
                    collect_reads(&mut self.used, path, &join.source.fields, &filter.expr)?;
                }
            }
            if self.used.len() == before {
                return Ok(());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    /// The join at `path`.
    pub fn join(&self, path: &[String]) -> SemanticResult<&JoinDef> {
        let mut ns = &self.root;
        let mut found = None;
        for (depth, name) in path.iter().enumerate() {
            let field = ns.lookup(name).ok_or_else(|| SemanticError::UndefinedField {
                path: path[..=depth].join("."),
            })?;
            let join = field.as_join().ok_or_else(|| SemanticError::WrongFieldKind {
                path: path[..=depth].join("."),
                found: field.kind_name(),
                expected: "join",
            })?;
            ns = &join.source.fields;
            found = Some(join);
        }
        found.ok_or_else(|| SemanticError::UndefinedField {
            path: String::new(),
        })
    }

    /// Fields of the relation at `path`.
    pub fn namespace(&self, path: &[String]) -> SemanticResult<&FieldNamespace> {
        if path.is_empty() {
            return Ok(&self.root);
        }
        Ok(&self.join(path)?.source.fields)
    }

    /// Primary key field of the relation at `path`.
    pub fn primary_key(&self, path: &[String]) -> SemanticResult<Option<&str>> {
        if path.is_empty() {
            return Ok(self.root_key.as_deref());
        }
        Ok(self.join(path)?.source.primary_key.as_deref())
    }

    /// Whether rows of the relation at `path` can be repeated by another
    /// joined relation.
    ///
    /// Any one-to-many or cross join that is not on the way to `path` repeats
    /// them; joins on the way only define what a row at `path` is.
    pub fn fans_out(&self, path: &[String]) -> bool {
        self.used.iter().any(|used| {
            !path.starts_with(used)
                && self
                    .join(used)
                    .map(|join| join.relationship.is_many())
                    .unwrap_or(false)
        })
    }

    /// Read join paths, parents before children, in declaration order.
    pub fn ordered(&self) -> Vec<JoinPath> {
        let mut out = Vec::new();
        self.visit(&self.root, &[], &mut out);
        out
    }

    fn visit(&self, ns: &FieldNamespace, prefix: &[String], out: &mut Vec<JoinPath>) {
        for (name, field) in ns.iter_defined() {
            let FieldDef::Join(join) = field.as_ref() else {
                continue;
            };
            let path = extend(prefix, &[name.to_string()]);
            if self.used.contains(&path) {
                out.push(path.clone());
                self.visit(&join.source.fields, &path, out);
            }
        }
    }
}

fn add_path(used: &mut BTreeSet<JoinPath>, path: &[String]) {
    for depth in 1..=path.len() {
        used.insert(path[..depth].to_vec());
    }
}

/// Join paths read by `expr`, which belongs to `ns` reached through `prefix`.
fn collect_reads(
    used: &mut BTreeSet<JoinPath>,
    prefix: &[String],
    ns: &FieldNamespace,
    expr: &Expr,
) -> SemanticResult<()> {
    match expr {
        Expr::Column(_) => add_path(used, prefix),
        Expr::Field(path) => {
            let resolved = ns.resolve_defined(path)?;
            let full = extend(prefix, &resolved.join_path);
            add_path(used, &full);
            match resolved.field.as_ref() {
                FieldDef::Dimension(f) | FieldDef::Measure(f) => {
                    collect_reads(used, &full, resolved.owner, &f.expr)?;
                }
                other => {
                    return Err(SemanticError::WrongFieldKind {
                        path: path.join("."),
                        found: other.kind_name(),
                        expected: "dimension or measure",
                    })
                }
            }
        }
        Expr::Aggregate { locality, arg, .. } => {
            add_path(used, &extend(prefix, locality));
            if let Some(arg) = arg {
                collect_reads(used, prefix, ns, arg)?;
            }
        }
        other => {
            for child in other.children() {
                collect_reads(used, prefix, ns, child)?;
            }
        }
    }
    Ok(())
}
