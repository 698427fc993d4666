//! Model type re-exports and utilities.

// Re-export primitive types from the parse tree
pub use crate::dsl::ast::{
    AggregateFunction, AtomicType, ExtractUnit, JoinKind, SortDirection, TimeUnit, UngroupKind,
};

/// Join relationship as seen by the query compiler.
pub type Relationship = JoinKind;

impl AtomicType {
    pub fn name(&self) -> &'static str {
        match self {
            AtomicType::String => "string",
            AtomicType::Number => "number",
            AtomicType::Boolean => "boolean",
            AtomicType::Date => "date",
            AtomicType::Timestamp => "timestamp",
            AtomicType::Null => "null",
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, AtomicType::Date | AtomicType::Timestamp)
    }

    /// Whether a value of `self` can meet a value of `other` in a comparison.
    ///
    /// `null` matches everything, and dates compare against timestamps.
    pub fn is_compatible(&self, other: AtomicType) -> bool {
        *self == other
            || *self == AtomicType::Null
            || other == AtomicType::Null
            || (self.is_temporal() && other.is_temporal())
    }

    /// The non-null type of two compatible operands.
    pub fn unify(&self, other: AtomicType) -> AtomicType {
        match (self, other) {
            (AtomicType::Null, t) => t,
            (t, AtomicType::Null) => *t,
            (AtomicType::Date, AtomicType::Timestamp) => AtomicType::Timestamp,
            (t, _) => *t,
        }
    }
}

impl TimeUnit {
    pub fn name(&self) -> &'static str {
        match self {
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
            TimeUnit::Week => "week",
            TimeUnit::Month => "month",
            TimeUnit::Quarter => "quarter",
            TimeUnit::Year => "year",
        }
    }

    /// Units below a day only make sense on timestamps.
    pub fn is_sub_day(&self) -> bool {
        matches!(self, TimeUnit::Second | TimeUnit::Minute | TimeUnit::Hour)
    }
}

impl ExtractUnit {
    pub fn name(&self) -> &'static str {
        match self {
            ExtractUnit::Second => "second",
            ExtractUnit::Minute => "minute",
            ExtractUnit::Hour => "hour",
            ExtractUnit::Day => "day",
            ExtractUnit::DayOfWeek => "day_of_week",
            ExtractUnit::DayOfYear => "day_of_year",
            ExtractUnit::Week => "week",
            ExtractUnit::Month => "month",
            ExtractUnit::Quarter => "quarter",
            ExtractUnit::Year => "year",
        }
    }
}

impl AggregateFunction {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::CountDistinct => "count_distinct",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }

    /// Functions whose result changes when input rows are duplicated.
    pub fn is_fanout_sensitive(&self) -> bool {
        matches!(
            self,
            AggregateFunction::Count | AggregateFunction::Sum | AggregateFunction::Avg
        )
    }
}

impl JoinKind {
    /// Joins that can repeat rows of their parent.
    pub fn is_many(&self) -> bool {
        matches!(self, JoinKind::Many | JoinKind::Cross)
    }
}

/// Grouping level of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExprLevel {
    /// Evaluated per input row.
    Scalar,
    /// Evaluated per group.
    Aggregate,
}

impl ExprLevel {
    pub fn is_aggregate(&self) -> bool {
        *self == ExprLevel::Aggregate
    }
}

/// Type and grouping level of a lowered expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDesc {
    pub ty: AtomicType,
    pub level: ExprLevel,
}

impl TypeDesc {
    pub fn scalar(ty: AtomicType) -> Self {
        Self {
            ty,
            level: ExprLevel::Scalar,
        }
    }

    pub fn aggregate(ty: AtomicType) -> Self {
        Self {
            ty,
            level: ExprLevel::Aggregate,
        }
    }
}
