use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("duplicate field name '{0}'")]
    DuplicateField(String),

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("field '{field}' is not nullable")]
    NullNotAllowed { field: String },

    #[error("field '{field}' expects {expected:?}, got incompatible value")]
    KindMismatch { field: String, expected: FieldKind },

    #[error("row has {got} values, schema has {expected} fields")]
    ArityMismatch { expected: usize, got: usize },

    #[error("no ontology registered with tag '{0}'")]
    UnknownTag(String),

    #[error("ontology tag '{0}' is already registered")]
    TagAlreadyRegistered(String),

    #[error("invalid payload for field '{field}': {reason}")]
    InvalidPayload { field: String, reason: String },
}

/// The declared type of one schema field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldKind {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Utf8,
    Binary,
    List(Box<FieldKind>),
    Struct(Vec<Field>),
}

impl FieldKind {
    fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldKind::Bool, Value::Bool(_)) => true,
            (
                FieldKind::Int8 | FieldKind::Int16 | FieldKind::Int32 | FieldKind::Int64,
                Value::Int(_),
            ) => true,
            (
                FieldKind::UInt8 | FieldKind::UInt16 | FieldKind::UInt32 | FieldKind::UInt64,
                Value::UInt(_),
            ) => true,
            (FieldKind::Float32 | FieldKind::Float64, Value::Float(_)) => true,
            (FieldKind::Utf8, Value::Str(_)) => true,
            (FieldKind::Binary, Value::Bytes(_)) => true,
            (FieldKind::List(inner), Value::List(items)) => {
                items.iter().all(|item| inner.accepts(item))
            }
            (FieldKind::Struct(fields), Value::Struct(entries)) => {
                fields.len() == entries.len()
                    && fields.iter().zip(entries.iter()).all(|(field, (name, value))| {
                        field.name == *name
                            && (field.kind.accepts(value) || (field.nullable && value.is_null()))
                    })
            }
            _ => false,
        }
    }
}

/// One named, typed, optionally nullable schema field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind, nullable: bool) -> Self {
        Field {
            name: name.into(),
            kind,
            nullable,
        }
    }
}

/// An ordered, name-unique list of fields describing one record layout.
///
/// Built through [`SchemaBuilder`]; composite types append their fields
/// explicitly and name collisions are rejected at composition time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    fields: Vec<Field>,
}

impl RecordSchema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder { fields: Vec::new() }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Appends `other`'s fields after this schema's fields, rejecting
    /// name collisions between the two.
    pub fn merged_with(&self, other: &RecordSchema) -> Result<RecordSchema, SchemaError> {
        let mut builder = SchemaBuilder {
            fields: self.fields.clone(),
        };
        for field in &other.fields {
            builder = builder.field(&field.name, field.kind.clone(), field.nullable)?;
        }
        Ok(builder.build())
    }

    /// Checks one row of values against the schema: arity, nullability
    /// and value/kind compatibility.
    pub fn validate_row(&self, row: &[Value]) -> Result<(), SchemaError> {
        if row.len() != self.fields.len() {
            return Err(SchemaError::ArityMismatch {
                expected: self.fields.len(),
                got: row.len(),
            });
        }
        for (field, value) in self.fields.iter().zip(row.iter()) {
            if value.is_null() {
                if !field.nullable {
                    return Err(SchemaError::NullNotAllowed {
                        field: field.name.clone(),
                    });
                }
                continue;
            }
            if !field.kind.accepts(value) {
                return Err(SchemaError::KindMismatch {
                    field: field.name.clone(),
                    expected: field.kind.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Explicit, collision-checked schema composition.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: Vec<Field>,
}

impl SchemaBuilder {
    pub fn field(
        mut self,
        name: impl Into<String>,
        kind: FieldKind,
        nullable: bool,
    ) -> Result<Self, SchemaError> {
        let name = name.into();
        if self.fields.iter().any(|f| f.name == name) {
            return Err(SchemaError::DuplicateField(name));
        }
        self.fields.push(Field::new(name, kind, nullable));
        Ok(self)
    }

    pub fn build(self) -> RecordSchema {
        RecordSchema { fields: self.fields }
    }
}
