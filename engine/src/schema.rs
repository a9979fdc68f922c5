//! Destination columns and their declared kinds.
//!
//! Which column a logical field lands in, and what kind of value that column
//! holds, is host configuration. The engine only sees it through
//! [`ColumnBindings`], supplied by the caller on every call.

use crate::{error::Result, ColumnId, Error, Field, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value kinds a destination column can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnKind {
    Float,
    Int,
    Text,
    /// Multi-line text, rendered as markdown by the host
    LongText,
    Date,
    Bool,
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnKind::Float => write!(f, "Float"),
            ColumnKind::Int => write!(f, "Int"),
            ColumnKind::Text => write!(f, "Text"),
            ColumnKind::LongText => write!(f, "LongText"),
            ColumnKind::Date => write!(f, "Date"),
            ColumnKind::Bool => write!(f, "Bool"),
        }
    }
}

/// A value held by (or written to) a library column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum ColumnValue {
    Float(f64),
    Int(i64),
    Text(String),
    LongText(String),
    Date(Timestamp),
    Bool(bool),
}

impl ColumnValue {
    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnValue::Float(_) => ColumnKind::Float,
            ColumnValue::Int(_) => ColumnKind::Int,
            ColumnValue::Text(_) => ColumnKind::Text,
            ColumnValue::LongText(_) => ColumnKind::LongText,
            ColumnValue::Date(_) => ColumnKind::Date,
            ColumnValue::Bool(_) => ColumnKind::Bool,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ColumnValue::Text(s) | ColumnValue::LongText(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Float(f) => Some(*f),
            ColumnValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ColumnValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<Timestamp> {
        match self {
            ColumnValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ColumnValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Where a logical field is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnBinding {
    /// Host column identifier
    pub column: ColumnId,
    /// Declared kind of the column
    pub kind: ColumnKind,
    /// Decimal places kept when writing floats
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
}

impl ColumnBinding {
    pub fn new(column: impl Into<ColumnId>, kind: ColumnKind) -> Self {
        Self {
            column: column.into(),
            kind,
            precision: None,
        }
    }

    pub fn with_precision(mut self, decimals: u32) -> Self {
        self.precision = Some(decimals);
        self
    }

    /// Coerce a derived value into this column's kind.
    ///
    /// Identical kinds pass, integers widen to floats and the two text kinds
    /// are interchangeable. Anything else is a type mismatch.
    pub fn coerce(&self, field: Field, value: ColumnValue) -> Result<ColumnValue> {
        let coerced = match (self.kind, value) {
            (ColumnKind::Float, ColumnValue::Float(f)) => ColumnValue::Float(self.round(f)),
            (ColumnKind::Float, ColumnValue::Int(i)) => ColumnValue::Float(self.round(i as f64)),
            (ColumnKind::Int, v @ ColumnValue::Int(_)) => v,
            (ColumnKind::Text, ColumnValue::Text(s) | ColumnValue::LongText(s)) => {
                ColumnValue::Text(s)
            }
            (ColumnKind::LongText, ColumnValue::Text(s) | ColumnValue::LongText(s)) => {
                ColumnValue::LongText(s)
            }
            (ColumnKind::Date, v @ ColumnValue::Date(_)) => v,
            (ColumnKind::Bool, v @ ColumnValue::Bool(_)) => v,
            (expected, got) => {
                return Err(Error::FieldTypeMismatch {
                    field: field.name().to_string(),
                    column: self.column.clone(),
                    expected: expected.to_string(),
                    got: got.kind().to_string(),
                })
            }
        };
        Ok(coerced)
    }

    fn round(&self, f: f64) -> f64 {
        match self.precision {
            Some(decimals) => {
                let factor = 10f64.powi(decimals.min(15) as i32);
                (f * factor).round() / factor
            }
            None => f,
        }
    }
}

/// Host configuration as seen by the engine.
pub trait ColumnBindings {
    /// Column configured for a logical field, if any.
    fn column_for(&self, field: Field) -> Option<&str>;

    /// Declared kind of a column.
    fn kind_of(&self, column: &str) -> Option<ColumnKind>;

    /// Decimal places kept for a float column.
    fn precision_of(&self, _column: &str) -> Option<u32> {
        None
    }

    /// Resolve a field to its full binding.
    ///
    /// `Ok(None)` means the field is not configured, which is not an error.
    fn binding(&self, field: Field) -> Result<Option<ColumnBinding>> {
        let Some(column) = self.column_for(field) else {
            return Ok(None);
        };
        let kind = self.kind_of(column).ok_or_else(|| Error::UnknownColumn {
            field: field.name().to_string(),
            column: column.to_string(),
        })?;
        Ok(Some(ColumnBinding {
            column: column.to_string(),
            kind,
            precision: self.precision_of(column),
        }))
    }
}

/// Serializable binding configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingSet {
    /// Logical field to column
    #[serde(default)]
    pub fields: BTreeMap<Field, ColumnId>,
    /// Column to declared kind
    #[serde(default)]
    pub columns: BTreeMap<ColumnId, ColumnKind>,
    /// Column to float precision
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub precision: BTreeMap<ColumnId, u32>,
}

impl BindingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a field to a column of the given kind.
    pub fn bind(&mut self, field: Field, column: impl Into<ColumnId>, kind: ColumnKind) -> &mut Self {
        let column = column.into();
        self.columns.insert(column.clone(), kind);
        self.fields.insert(field, column);
        self
    }

    /// Builder-style method to bind a field.
    pub fn with(mut self, field: Field, column: impl Into<ColumnId>, kind: ColumnKind) -> Self {
        self.bind(field, column, kind);
        self
    }

    /// Builder-style method to set a float column's precision.
    pub fn with_precision(mut self, column: impl Into<ColumnId>, decimals: u32) -> Self {
        self.precision.insert(column.into(), decimals);
        self
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}

impl ColumnBindings for BindingSet {
    fn column_for(&self, field: Field) -> Option<&str> {
        self.fields
            .get(&field)
            .map(String::as_str)
            .filter(|c| !c.is_empty())
    }

    fn kind_of(&self, column: &str) -> Option<ColumnKind> {
        self.columns.get(column).copied()
    }

    fn precision_of(&self, column: &str) -> Option<u32> {
        self.precision.get(column).copied()
    }
}
