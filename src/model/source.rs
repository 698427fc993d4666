//! Sources, their field namespaces and joins.
//!
//! A [`FieldNamespace`] is an immutable, structurally shared map. Refining,
//! filtering or renaming a source produces a new namespace whose entries are
//! the same `Arc<FieldDef>` values as the original, so a renamed field is
//! still the one definition and compiles to one SQL expression.
//!
//! `accept`, `except` and `rename` hide entries instead of dropping them.
//! Hidden entries cannot be referenced from new expressions, but the
//! definitions that were written against them still resolve.

use std::sync::Arc;

use indexmap::IndexMap;

use super::expr::Expr;
use super::pipeline::{Pipeline, QueryDef};
use super::schema::{ResultField, ResultType};
use super::types::{AtomicType, Relationship};
use super::SqlBlockDef;
use crate::dsl::Location;
use crate::semantic::error::{SemanticError, SemanticResult};

// =============================================================================
// Field namespace
// =============================================================================

#[derive(Debug, Clone)]
struct Slot {
    field: Arc<FieldDef>,
    hidden: bool,
}

impl Slot {
    fn visible(field: Arc<FieldDef>) -> Self {
        Self {
            field,
            hidden: false,
        }
    }
}

/// Ordered name -> field map shared between sources.
#[derive(Debug, Clone, Default)]
pub struct FieldNamespace(Arc<IndexMap<String, Slot>>);

impl FieldNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visible field named `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<FieldDef>> {
        self.0.get(name).filter(|slot| !slot.hidden).map(|slot| &slot.field)
    }

    /// Field named `name`, hidden or not. Only for resolving definitions that
    /// were already built; user-written names go through [`Self::get`].
    pub fn lookup(&self, name: &str) -> Option<&Arc<FieldDef>> {
        self.0.get(name).map(|slot| &slot.field)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// True when `name` is taken, even by a hidden field.
    pub fn defines(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Visible fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<FieldDef>)> {
        self.0
            .iter()
            .filter(|(_, slot)| !slot.hidden)
            .map(|(k, slot)| (k.as_str(), &slot.field))
    }

    /// Every field, hidden ones included.
    pub fn iter_defined(&self) -> impl Iterator<Item = (&str, &Arc<FieldDef>)> {
        self.0.iter().map(|(k, slot)| (k.as_str(), &slot.field))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(name, _)| name)
    }

    /// Copy-on-write insert of a visible field; other holders of the
    /// namespace are unaffected.
    pub fn insert(&mut self, name: impl Into<String>, field: Arc<FieldDef>) {
        Arc::make_mut(&mut self.0).insert(name.into(), Slot::visible(field));
    }

    /// Hide the visible fields not matching `keep`, preserving order.
    pub fn filtered(&self, keep: impl Fn(&str) -> bool) -> Self {
        let map = self
            .0
            .iter()
            .map(|(k, slot)| {
                let slot = Slot {
                    field: Arc::clone(&slot.field),
                    hidden: slot.hidden || !keep(k),
                };
                (k.clone(), slot)
            })
            .collect();
        Self(Arc::new(map))
    }

    /// Expose `old` as `new` at the same position. `old` stays behind as a
    /// hidden entry; `new` must not be taken.
    pub fn renamed(&self, old: &str, new: &str) -> Self {
        let mut map = IndexMap::with_capacity(self.0.len() + 1);
        let mut moved = None;
        for (k, slot) in self.0.iter() {
            if k == old && !slot.hidden {
                map.insert(new.to_string(), Slot::visible(Arc::clone(&slot.field)));
                moved = Some(Arc::clone(&slot.field));
            } else {
                map.insert(k.clone(), slot.clone());
            }
        }
        if let Some(field) = moved {
            map.insert(old.to_string(), Slot { field, hidden: true });
        }
        Self(Arc::new(map))
    }

    /// True when both namespaces hold the identical definition for `name`.
    pub fn shares(&self, other: &FieldNamespace, name: &str, other_name: &str) -> bool {
        match (self.get(name), other.get(other_name)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Walk a user-written `path` through the join tree.
    ///
    /// Every element but the last must name a join; the last may name any
    /// field. Hidden fields are not found.
    pub fn resolve(&self, path: &[String]) -> SemanticResult<ResolvedField<'_>> {
        self.resolve_with(path, false)
    }

    /// Like [`Self::resolve`], but also finds hidden fields. Used for the
    /// paths inside built definitions.
    pub fn resolve_defined(&self, path: &[String]) -> SemanticResult<ResolvedField<'_>> {
        self.resolve_with(path, true)
    }

    fn slot(&self, name: &str, hidden: bool) -> Option<&Arc<FieldDef>> {
        if hidden {
            self.lookup(name)
        } else {
            self.get(name)
        }
    }

    fn resolve_with(&self, path: &[String], hidden: bool) -> SemanticResult<ResolvedField<'_>> {
        let Some((last, joins)) = path.split_last() else {
            return Err(SemanticError::UndefinedField {
                path: String::new(),
            });
        };
        let mut owner = self;
        let mut relationships = Vec::with_capacity(joins.len());
        for (depth, name) in joins.iter().enumerate() {
            let field = owner
                .slot(name, hidden)
                .ok_or_else(|| SemanticError::UndefinedField {
                    path: path[..=depth].join("."),
                })?;
            let join = field.as_join().ok_or_else(|| SemanticError::WrongFieldKind {
                path: path[..=depth].join("."),
                found: field.kind_name(),
                expected: "join",
            })?;
            relationships.push(join.relationship);
            owner = &join.source.fields;
        }
        let field = owner
            .slot(last, hidden)
            .ok_or_else(|| SemanticError::UndefinedField {
                path: path.join("."),
            })?;
        Ok(ResolvedField {
            join_path: joins.to_vec(),
            relationships,
            owner,
            field,
        })
    }

    /// Namespace of plain columns read from a query result.
    ///
    /// Atomic fields become dimensions over the column of the same name;
    /// repeated fields are recorded but cannot be referenced.
    pub fn from_result(fields: &[ResultField], location: &Location) -> Self {
        let map = fields
            .iter()
            .map(|f| {
                let def = match &f.ty {
                    ResultType::Atomic(ty) => FieldDef::Dimension(ExprField {
                        name: f.name.clone(),
                        expr: Expr::Column(f.name.clone()),
                        ty: *ty,
                        location: location.clone(),
                    }),
                    ResultType::Repeated(_) => FieldDef::Nested(f.clone(), location.clone()),
                };
                (f.name.clone(), Slot::visible(Arc::new(def)))
            })
            .collect();
        Self(Arc::new(map))
    }
}

// =============================================================================
// Fields
// =============================================================================

/// A dimension or measure.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprField {
    pub name: String,
    pub expr: Expr,
    pub ty: AtomicType,
    pub location: Location,
}

/// A named view: a pipeline run against the owning source.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewDef {
    pub name: String,
    pub pipeline: Pipeline,
    pub location: Location,
}

/// How a join's rows are matched to its parent.
#[derive(Debug, Clone, PartialEq)]
pub enum Correlation {
    /// Parent-side expression equal to the joined source's primary key.
    With(Expr),
    /// Boolean condition over parent and joined fields.
    On(Expr),
    /// Every parent row with every joined row.
    Unconditioned,
}

#[derive(Debug, Clone)]
pub struct JoinDef {
    pub name: String,
    pub relationship: Relationship,
    pub source: Arc<SourceDef>,
    pub correlation: Correlation,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub enum FieldDef {
    Dimension(ExprField),
    Measure(ExprField),
    Join(JoinDef),
    View(ViewDef),
    /// Repeated column of a query-derived source; only its presence is known.
    Nested(ResultField, Location),
}

impl FieldDef {
    pub fn name(&self) -> &str {
        match self {
            FieldDef::Dimension(f) | FieldDef::Measure(f) => &f.name,
            FieldDef::Join(j) => &j.name,
            FieldDef::View(v) => &v.name,
            FieldDef::Nested(f, _) => &f.name,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldDef::Dimension(_) => "dimension",
            FieldDef::Measure(_) => "measure",
            FieldDef::Join(_) => "join",
            FieldDef::View(_) => "view",
            FieldDef::Nested(..) => "nested result",
        }
    }

    pub fn location(&self) -> &Location {
        match self {
            FieldDef::Dimension(f) | FieldDef::Measure(f) => &f.location,
            FieldDef::Join(j) => &j.location,
            FieldDef::View(v) => &v.location,
            FieldDef::Nested(_, location) => location,
        }
    }

    pub fn as_join(&self) -> Option<&JoinDef> {
        match self {
            FieldDef::Join(j) => Some(j),
            _ => None,
        }
    }
}

// =============================================================================
// Sources
// =============================================================================

/// Where a source's rows come from.
#[derive(Debug, Clone)]
pub enum SourceOrigin {
    Table {
        /// Schema lookup key: `connection:path` or `path`.
        key: String,
        path: String,
        connection: Option<String>,
    },
    Query(Arc<QueryDef>),
    Sql(Arc<SqlBlockDef>),
}

/// A filter with the location it was written at.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub expr: Expr,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct SourceDef {
    pub name: String,
    pub origin: SourceOrigin,
    pub fields: FieldNamespace,
    pub primary_key: Option<String>,
    /// ANDed into every query against the source.
    pub filters: Vec<Filter>,
    pub location: Location,
}

impl SourceDef {
    pub fn field(&self, name: &str) -> Option<&Arc<FieldDef>> {
        self.fields.get(name)
    }

    pub fn join(&self, name: &str) -> Option<&JoinDef> {
        self.fields.get(name).and_then(|f| f.as_join())
    }

    pub fn connection(&self) -> Option<&str> {
        match &self.origin {
            SourceOrigin::Table { connection, .. } => connection.as_deref(),
            SourceOrigin::Query(q) => q.source.connection(),
            SourceOrigin::Sql(block) => block.connection.as_deref(),
        }
    }

    /// Walk `path` through the join tree.
    pub fn resolve(&self, path: &[String]) -> SemanticResult<ResolvedField<'_>> {
        self.fields.resolve(path)
    }
}

/// Result of [`FieldNamespace::resolve`].
#[derive(Debug, Clone)]
pub struct ResolvedField<'a> {
    /// Joins walked to reach the owner, outermost first.
    pub join_path: Vec<String>,
    pub relationships: Vec<Relationship>,
    /// Namespace of the source that owns the field.
    pub owner: &'a FieldNamespace,
    pub field: &'a Arc<FieldDef>,
}

impl ResolvedField<'_> {
    /// True when any join on the path can repeat parent rows.
    pub fn crosses_many(&self) -> bool {
        self.relationships.iter().any(|r| r.is_many())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::JoinKind;

    fn dimension(name: &str, column: &str) -> Arc<FieldDef> {
        Arc::new(FieldDef::Dimension(ExprField {
            name: name.into(),
            expr: Expr::column(column),
            ty: AtomicType::String,
            location: Location::default(),
        }))
    }

    fn table(name: &str, fields: FieldNamespace) -> SourceDef {
        SourceDef {
            name: name.into(),
            origin: SourceOrigin::Table {
                key: name.into(),
                path: name.into(),
                connection: None,
            },
            fields,
            primary_key: None,
            filters: vec![],
            location: Location::default(),
        }
    }

    #[test]
    fn renamed_namespace_shares_definitions() {
        let mut ns = FieldNamespace::new();
        ns.insert("code", dimension("code", "code"));
        ns.insert("name", dimension("name", "name"));
        let renamed = ns.renamed("code", "carrier_code");
        assert!(ns.shares(&renamed, "code", "carrier_code"));
        assert_eq!(renamed.names().collect::<Vec<_>>(), vec!["carrier_code", "name"]);
        assert!(!renamed.contains("code"));
    }

    #[test]
    fn renamed_field_stays_reachable_for_definitions() {
        let mut ns = FieldNamespace::new();
        ns.insert("amount", dimension("amount", "amount"));
        let renamed = ns.renamed("amount", "amt");
        assert!(renamed.get("amount").is_none());
        assert!(!renamed.contains("amount"));
        assert!(renamed.defines("amount"));
        assert_eq!(renamed.len(), 1);

        let path = vec!["amount".to_string()];
        assert!(renamed.resolve(&path).is_err());
        let resolved = renamed.resolve_defined(&path).unwrap();
        assert!(Arc::ptr_eq(resolved.field, renamed.get("amt").unwrap()));
    }

    #[test]
    fn filtered_hides_instead_of_dropping() {
        let mut ns = FieldNamespace::new();
        ns.insert("a", dimension("a", "a"));
        ns.insert("b", dimension("b", "b"));
        let only_b = ns.filtered(|name| name == "b");
        assert_eq!(only_b.names().collect::<Vec<_>>(), vec!["b"]);
        assert!(only_b.lookup("a").is_some());
        assert_eq!(only_b.iter_defined().count(), 2);

        // Hidden stays hidden through later filters.
        let all = only_b.filtered(|_| true);
        assert!(!all.contains("a"));
    }

    #[test]
    fn insert_does_not_touch_other_holders() {
        let mut ns = FieldNamespace::new();
        ns.insert("a", dimension("a", "a"));
        let snapshot = ns.clone();
        ns.insert("b", dimension("b", "b"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(ns.len(), 2);
    }

    #[test]
    fn result_namespace_reads_columns() {
        let ns = FieldNamespace::from_result(
            &[
                ResultField::atomic("carrier", AtomicType::String),
                ResultField::repeated("by_month", vec![]),
            ],
            &Location::default(),
        );
        match ns.get("carrier").map(|f| f.as_ref()) {
            Some(FieldDef::Dimension(f)) => assert_eq!(f.expr, Expr::column("carrier")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ns.get("by_month").map(|f| f.kind_name()), Some("nested result"));
    }

    #[test]
    fn resolve_walks_joins() {
        let mut inner = FieldNamespace::new();
        inner.insert("nickname", dimension("nickname", "nickname"));
        let carriers = Arc::new(table("carriers", inner));

        let mut outer = FieldNamespace::new();
        outer.insert(
            "carriers",
            Arc::new(FieldDef::Join(JoinDef {
                name: "carriers".into(),
                relationship: JoinKind::Many,
                source: carriers,
                correlation: Correlation::Unconditioned,
                location: Location::default(),
            })),
        );
        let flights = table("flights", outer);

        let path = vec!["carriers".to_string(), "nickname".to_string()];
        let resolved = flights.resolve(&path).unwrap();
        assert_eq!(resolved.join_path, vec!["carriers"]);
        assert!(resolved.crosses_many());
        assert_eq!(resolved.field.name(), "nickname");
        assert!(resolved.owner.contains("nickname"));

        let missing = vec!["carriers".to_string(), "nope".to_string()];
        assert_eq!(
            flights.resolve(&missing).unwrap_err(),
            SemanticError::UndefinedField {
                path: "carriers.nope".into()
            }
        );
    }
}
