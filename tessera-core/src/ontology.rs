use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use dashmap::DashMap;

use crate::batch::RowView;
use crate::schema::{RecordSchema, SchemaError};
use crate::value::Value;

/// The typed record schema capability: a payload type that declares a
/// stable field list and a unique ontology tag, and knows how to move
/// itself in and out of row values.
///
/// Field values are appended/read in the order declared by [`Ontology::schema`];
/// envelope fields are handled by the message layer and never appear here.
pub trait Ontology: Debug + Send + Sync + Sized + 'static {
    /// Unique tag identifying this payload type on the wire.
    fn tag() -> &'static str;

    /// Stable field list of the payload, envelope fields excluded.
    fn schema() -> RecordSchema;

    /// Appends this payload's field values to `row`, in schema order.
    fn encode(&self, row: &mut Vec<Value>);

    /// Rebuilds the payload from a decoded row.
    fn decode(row: &RowView<'_>) -> Result<Self, SchemaError>;
}

/// Object-safe carrier for a decoded payload of any registered ontology.
pub trait AnyPayload: Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Ontology> AnyPayload for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

type DecodeFn = fn(&RowView<'_>) -> Result<Box<dyn AnyPayload>, SchemaError>;

#[derive(Clone)]
struct CatalogEntry {
    schema: Arc<RecordSchema>,
    decode: DecodeFn,
}

/// Explicit registry mapping ontology tags to a schema and a decoder.
///
/// Registration is an explicit call, not an import-time side effect; the
/// read side resolves payload constructors through the catalog owned by the
/// client.
#[derive(Clone, Default)]
pub struct OntologyCatalog {
    entries: Arc<DashMap<String, CatalogEntry>>,
}

impl Debug for OntologyCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        tags.sort();
        f.debug_struct("OntologyCatalog").field("tags", &tags).finish()
    }
}

impl OntologyCatalog {
    pub fn new() -> Self {
        OntologyCatalog::default()
    }

    /// A catalog pre-loaded with the built-in sensor ontologies.
    pub fn with_builtins() -> Self {
        let catalog = OntologyCatalog::new();
        crate::sensors::register_builtins(&catalog)
            .expect("built-in ontology tags are unique");
        catalog
    }

    /// Registers `T` under its tag. Registering two different types under
    /// one tag is a caller bug and is rejected.
    pub fn register<T: Ontology>(&self) -> Result<(), SchemaError> {
        let tag = T::tag().to_string();
        let entry = CatalogEntry {
            schema: Arc::new(T::schema()),
            decode: |row| T::decode(row).map(|payload| Box::new(payload) as Box<dyn AnyPayload>),
        };
        match self.entries.entry(tag.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(SchemaError::TagAlreadyRegistered(tag))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(())
            }
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    pub fn schema(&self, tag: &str) -> Option<Arc<RecordSchema>> {
        self.entries.get(tag).map(|entry| entry.schema.clone())
    }

    /// Decodes a payload of the given tag out of a row.
    pub fn decode(&self, tag: &str, row: &RowView<'_>) -> Result<Box<dyn AnyPayload>, SchemaError> {
        let entry = self
            .entries
            .get(tag)
            .ok_or_else(|| SchemaError::UnknownTag(tag.to_string()))?;
        (entry.decode)(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;
    use crate::value::Value;

    #[derive(Debug, PartialEq)]
    struct Counter {
        count: i64,
    }

    impl Ontology for Counter {
        fn tag() -> &'static str {
            "test/counter"
        }

        fn schema() -> RecordSchema {
            RecordSchema::builder()
                .field("count", FieldKind::Int64, false)
                .unwrap()
                .build()
        }

        fn encode(&self, row: &mut Vec<Value>) {
            row.push(Value::Int(self.count));
        }

        fn decode(row: &RowView<'_>) -> Result<Self, SchemaError> {
            let count = row
                .require("count")?
                .as_i64()
                .ok_or_else(|| SchemaError::InvalidPayload {
                    field: "count".into(),
                    reason: "expected int".into(),
                })?;
            Ok(Counter { count })
        }
    }

    #[test]
    fn register_and_decode() {
        let catalog = OntologyCatalog::new();
        catalog.register::<Counter>().unwrap();
        assert!(catalog.contains("test/counter"));

        let schema = catalog.schema("test/counter").unwrap();
        let values = vec![Value::Int(7)];
        let row = RowView::new(&schema, &values);
        let payload = catalog.decode("test/counter", &row).unwrap();
        let counter = payload.as_any().downcast_ref::<Counter>().unwrap();
        assert_eq!(counter, &Counter { count: 7 });
    }

    #[test]
    fn duplicate_tag_rejected() {
        let catalog = OntologyCatalog::new();
        catalog.register::<Counter>().unwrap();
        let err = catalog.register::<Counter>().unwrap_err();
        assert!(matches!(err, SchemaError::TagAlreadyRegistered(_)));
    }

    #[test]
    fn unknown_tag_errors() {
        let catalog = OntologyCatalog::new();
        let schema = Counter::schema();
        let values = vec![Value::Int(1)];
        let row = RowView::new(&schema, &values);
        assert!(matches!(
            catalog.decode("nope", &row),
            Err(SchemaError::UnknownTag(_))
        ));
    }
}
