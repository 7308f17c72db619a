//! Entity schema contract shared by every persisted type.
//!
//! # Responsibility
//! - Describe entity tables and typed fields for the storage engine.
//! - Carry field values between SQLite rows, scopes and entity structs.
//!
//! # Invariants
//! - `FieldValues` is always aligned with `EntitySchema::fields` order.
//! - `object_id` is assigned by the engine and never reused.

use rusqlite::types::{
    FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value as SqlValue, ValueRef,
};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Store-assigned identity of one persisted object.
pub type ObjectId = Uuid;

/// Field values in schema order.
pub type FieldValues = Vec<Value>;

/// Typed value of one entity field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Orders two non-null values of compatible kinds.
    ///
    /// Returns `None` when either side is null or the kinds differ, which
    /// mirrors SQL comparisons yielding NULL.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Real(a), Self::Real(b)) => a.partial_cmp(b),
            (Self::Integer(a), Self::Real(b)) => (*a as f64).partial_cmp(b),
            (Self::Real(a), Self::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Text(a), Self::Text(b)) => Some(a.as_str().cmp(b.as_str())),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Sort order used for in-memory ordering: nulls first, like SQLite `ASC`.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let output = match self {
            Self::Null => ToSqlOutput::Owned(SqlValue::Null),
            Self::Integer(value) => ToSqlOutput::Owned(SqlValue::Integer(*value)),
            Self::Real(value) => ToSqlOutput::Owned(SqlValue::Real(*value)),
            Self::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
            Self::Bool(value) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*value))),
        };
        Ok(output)
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(Self::Null),
            ValueRef::Integer(value) => Ok(Self::Integer(value)),
            ValueRef::Real(value) => Ok(Self::Real(value)),
            ValueRef::Text(_) => value.as_str().map(|text| Self::Text(text.to_string())),
            ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

/// Storage kind of one entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Real,
    Text,
    Bool,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::Bool => "bool",
        }
    }

    /// Reads one column of this kind from a SQLite row.
    pub(crate) fn read(self, row: &Row<'_>, index: usize) -> rusqlite::Result<Value> {
        let value = match self {
            Self::Integer => row
                .get::<_, Option<i64>>(index)?
                .map_or(Value::Null, Value::Integer),
            Self::Real => row
                .get::<_, Option<f64>>(index)?
                .map_or(Value::Null, Value::Real),
            Self::Text => row
                .get::<_, Option<String>>(index)?
                .map_or(Value::Null, Value::Text),
            Self::Bool => row
                .get::<_, Option<i64>>(index)?
                .map_or(Value::Null, |value| Value::Bool(value != 0)),
        };
        Ok(value)
    }

    /// Coerces a query operand to this field kind.
    ///
    /// Returns `None` when the operand cannot represent a value of this kind.
    pub(crate) fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (Self::Integer, Value::Integer(_)) => Some(value.clone()),
            (Self::Real, Value::Real(_)) => Some(value.clone()),
            (Self::Real, Value::Integer(v)) => Some(Value::Real(*v as f64)),
            (Self::Text, Value::Text(_)) => Some(value.clone()),
            (Self::Bool, Value::Bool(_)) => Some(value.clone()),
            (Self::Bool, Value::Integer(0)) => Some(Value::Bool(false)),
            (Self::Bool, Value::Integer(1)) => Some(Value::Bool(true)),
            _ => None,
        }
    }
}

/// One typed field of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Table layout of one entity type.
#[derive(Debug, PartialEq, Eq)]
pub struct EntitySchema {
    /// Entity name used in logs and save failures.
    pub name: &'static str,
    /// Backing SQLite table.
    pub table: &'static str,
    /// Fields in column order, excluding `object_id`.
    pub fields: &'static [FieldDef],
}

impl EntitySchema {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    pub fn field(&self, name: &str) -> Option<(usize, FieldDef)> {
        self.field_index(name).map(|index| (index, self.fields[index]))
    }

    /// Default values for a freshly inserted object.
    pub fn empty_values(&self) -> FieldValues {
        self.fields
            .iter()
            .map(|field| match field.kind {
                FieldKind::Integer => Value::Integer(0),
                FieldKind::Real => Value::Real(0.0),
                FieldKind::Text => Value::Text(String::new()),
                FieldKind::Bool => Value::Bool(false),
            })
            .collect()
    }
}

/// Error produced when stored values do not fit an entity shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueError {
    pub entity: &'static str,
    pub field: &'static str,
    pub found: Value,
}

impl Display for ValueError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid value {:?} for {}.{}",
            self.found, self.entity, self.field
        )
    }
}

impl Error for ValueError {}

/// Contract between the storage engine and a persisted entity struct.
pub trait Entity: Clone + Send + 'static {
    const SCHEMA: &'static EntitySchema;

    /// Builds an entity carrying schema defaults.
    fn new_empty(object_id: ObjectId) -> Self;

    fn object_id(&self) -> ObjectId;

    /// Current field values in schema order.
    fn values(&self) -> FieldValues;

    /// Rebuilds an entity from values in schema order.
    fn from_values(object_id: ObjectId, values: &[Value]) -> Result<Self, ValueError>;
}

#[cfg(test)]
mod tests {
    use super::{FieldKind, Value};
    use std::cmp::Ordering;

    #[test]
    fn compare_mirrors_sql_null_semantics() {
        assert_eq!(Value::Null.compare(&Value::Integer(1)), None);
        assert_eq!(Value::Integer(1).compare(&Value::Text("1".into())), None);
        assert_eq!(
            Value::Integer(2).compare(&Value::Real(1.5)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn sort_cmp_puts_nulls_first() {
        let mut values = vec![Value::Integer(3), Value::Null, Value::Integer(1)];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(values, vec![Value::Null, Value::Integer(1), Value::Integer(3)]);
    }

    #[test]
    fn coerce_rejects_mismatched_kinds() {
        assert_eq!(FieldKind::Text.coerce(&Value::Integer(1)), None);
        assert_eq!(
            FieldKind::Real.coerce(&Value::Integer(2)),
            Some(Value::Real(2.0))
        );
        assert_eq!(
            FieldKind::Bool.coerce(&Value::Integer(1)),
            Some(Value::Bool(true))
        );
    }
}
