//! Queries, pipelines and stages.
//!
//! A stage's output namespace is exactly its output fields in order; the next
//! stage reads those names as plain columns.

use std::sync::Arc;

use super::expr::Expr;
use super::schema::{ResultField, ResultType};
use super::source::{ExprField, Filter, SourceDef};
use super::types::{AtomicType, SortDirection};
use crate::dsl::Location;

/// A query: a source and the pipeline run against it.
#[derive(Debug, Clone)]
pub struct QueryDef {
    pub name: Option<String>,
    pub source: Arc<SourceDef>,
    pub pipeline: Pipeline,
    pub location: Location,
}

impl QueryDef {
    pub fn output_schema(&self) -> Vec<ResultField> {
        self.pipeline.output_schema()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Output of the last stage; empty for an empty pipeline.
    pub fn output_schema(&self) -> Vec<ResultField> {
        self.stages
            .last()
            .map(Stage::output_schema)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Reduce(ReduceStage),
    Project(ProjectStage),
    Index(IndexStage),
}

impl Stage {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Stage::Reduce(_) => "reduce",
            Stage::Project(_) => "project",
            Stage::Index(_) => "index",
        }
    }

    pub fn filters(&self) -> &[Filter] {
        match self {
            Stage::Reduce(s) => &s.filters,
            Stage::Project(s) => &s.filters,
            Stage::Index(s) => &s.filters,
        }
    }

    pub fn sample(&self) -> Option<Sampling> {
        match self {
            Stage::Reduce(s) => s.sample,
            Stage::Project(s) => s.sample,
            Stage::Index(s) => s.sample,
        }
    }

    pub fn output_schema(&self) -> Vec<ResultField> {
        match self {
            Stage::Reduce(s) => s.fields.iter().map(OutputField::result_field).collect(),
            Stage::Project(s) => s.fields.iter().map(OutputField::result_field).collect(),
            Stage::Index(_) => IndexStage::output_schema(),
        }
    }
}

// =============================================================================
// Output fields
// =============================================================================

/// A nested pipeline surfaced as one repeated column.
#[derive(Debug, Clone, PartialEq)]
pub struct NestDef {
    pub name: String,
    pub pipeline: Pipeline,
    pub location: Location,
}

/// One output column of a reduce or project stage.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputField {
    /// `group_by:` / `project:` entry.
    Dimension(ExprField),
    /// `aggregate:` entry.
    Measure(ExprField),
    Nest(NestDef),
}

impl OutputField {
    pub fn name(&self) -> &str {
        match self {
            OutputField::Dimension(f) | OutputField::Measure(f) => &f.name,
            OutputField::Nest(n) => &n.name,
        }
    }

    pub fn location(&self) -> &Location {
        match self {
            OutputField::Dimension(f) | OutputField::Measure(f) => &f.location,
            OutputField::Nest(n) => &n.location,
        }
    }

    pub fn atomic_type(&self) -> Option<AtomicType> {
        match self {
            OutputField::Dimension(f) | OutputField::Measure(f) => Some(f.ty),
            OutputField::Nest(_) => None,
        }
    }

    pub fn result_field(&self) -> ResultField {
        match self {
            OutputField::Dimension(f) | OutputField::Measure(f) => {
                ResultField::atomic(f.name.clone(), f.ty)
            }
            OutputField::Nest(n) => ResultField {
                name: n.name.clone(),
                ty: ResultType::Repeated(n.pipeline.output_schema()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// Output field name.
    pub field: String,
    pub direction: SortDirection,
}

/// Row sampling on the stage input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampling {
    /// Dialect default.
    Default,
    Rows(u64),
    Percent(f64),
}

// =============================================================================
// Stages
// =============================================================================

/// `group_by` / `aggregate` / `nest`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReduceStage {
    pub fields: Vec<OutputField>,
    /// Row-level filters, applied before grouping.
    pub filters: Vec<Filter>,
    /// Group-level filters, applied after grouping.
    pub having: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub sample: Option<Sampling>,
}

impl ReduceStage {
    pub fn dimensions(&self) -> impl Iterator<Item = &ExprField> {
        self.fields.iter().filter_map(|f| match f {
            OutputField::Dimension(d) => Some(d),
            _ => None,
        })
    }

    pub fn measures(&self) -> impl Iterator<Item = &ExprField> {
        self.fields.iter().filter_map(|f| match f {
            OutputField::Measure(m) => Some(m),
            _ => None,
        })
    }

    pub fn nests(&self) -> impl Iterator<Item = &NestDef> {
        self.fields.iter().filter_map(|f| match f {
            OutputField::Nest(n) => Some(n),
            _ => None,
        })
    }

    pub fn has_nests(&self) -> bool {
        self.nests().next().is_some()
    }
}

/// `project:`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectStage {
    pub fields: Vec<OutputField>,
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub sample: Option<Sampling>,
}

/// A field listed in `index:`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexField {
    pub path: Vec<String>,
    pub ty: AtomicType,
}

impl IndexField {
    /// Dotted path reported in the `fieldPath` column.
    pub fn dotted(&self) -> String {
        self.path.join(".")
    }
}

/// `index: fields by weight`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexStage {
    pub fields: Vec<IndexField>,
    /// Aggregate used as the weight; `count()` when absent.
    pub weight: Option<Expr>,
    pub filters: Vec<Filter>,
    pub limit: Option<u64>,
    pub sample: Option<Sampling>,
}

impl IndexStage {
    pub const FIELD_PATH: &'static str = "fieldPath";
    pub const FIELD_VALUE: &'static str = "fieldValue";
    pub const WEIGHT: &'static str = "weight";

    pub fn output_schema() -> Vec<ResultField> {
        vec![
            ResultField::atomic(Self::FIELD_PATH, AtomicType::String),
            ResultField::atomic(Self::FIELD_VALUE, AtomicType::String),
            ResultField::atomic(Self::WEIGHT, AtomicType::Number),
        ]
    }
}
