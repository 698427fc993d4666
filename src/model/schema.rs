//! Table schemas supplied by the schema provider, and result schemas
//! returned with compiled queries.

use serde::{Deserialize, Serialize};

use super::types::AtomicType;

/// Column list of a table or SQL block, as reported by the schema provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<ColumnSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: AtomicType,
}

impl TableSchema {
    pub fn new(fields: impl IntoIterator<Item = (impl Into<String>, AtomicType)>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, ty)| ColumnSchema {
                    name: name.into(),
                    ty,
                })
                .collect(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.fields.iter().find(|c| c.name == name)
    }
}

/// Output field type: atomic, or a repeated record produced by `nest:`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "type", rename_all = "snake_case")]
pub enum ResultType {
    Atomic(AtomicType),
    Repeated(Vec<ResultField>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultField {
    pub name: String,
    #[serde(flatten)]
    pub ty: ResultType,
}

impl ResultField {
    pub fn atomic(name: impl Into<String>, ty: AtomicType) -> Self {
        Self {
            name: name.into(),
            ty: ResultType::Atomic(ty),
        }
    }

    pub fn repeated(name: impl Into<String>, fields: Vec<ResultField>) -> Self {
        Self {
            name: name.into(),
            ty: ResultType::Repeated(fields),
        }
    }

    pub fn is_nested(&self) -> bool {
        matches!(self.ty, ResultType::Repeated(_))
    }
}

/// Ordered output columns of a compiled query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSchema {
    pub fields: Vec<ResultField>,
}

impl ResultSchema {
    pub fn new(fields: Vec<ResultField>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&ResultField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}
