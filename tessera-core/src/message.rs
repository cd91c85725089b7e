use std::sync::Arc;

use crate::batch::RowView;
use crate::ontology::{AnyPayload, Ontology, OntologyCatalog};
use crate::schema::{FieldKind, RecordSchema, SchemaError};
use crate::value::Value;

/// Envelope field holding the middleware recording timestamp.
pub const TIMESTAMP_FIELD: &str = "timestamp_ns";
/// Envelope field holding the optional middleware header.
pub const HEADER_FIELD: &str = "message_header";

/// Middleware-level metadata attached to a message, distinct from any
/// acquisition header the payload itself may carry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    pub stamp_ns: Option<i64>,
    pub frame_id: Option<String>,
}

impl Header {
    pub fn struct_kind() -> FieldKind {
        FieldKind::Struct(vec![
            crate::schema::Field::new("stamp_ns", FieldKind::Int64, true),
            crate::schema::Field::new("frame_id", FieldKind::Utf8, true),
        ])
    }

    pub fn to_value(&self) -> Value {
        Value::Struct(vec![
            (
                "stamp_ns".to_string(),
                self.stamp_ns.map_or(Value::Null, Value::Int),
            ),
            (
                "frame_id".to_string(),
                self.frame_id
                    .clone()
                    .map_or(Value::Null, Value::Str),
            ),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let entries = value
            .as_struct()
            .ok_or_else(|| SchemaError::InvalidPayload {
                field: HEADER_FIELD.into(),
                reason: "expected struct".into(),
            })?;
        let mut header = Header::default();
        for (name, value) in entries {
            match name.as_str() {
                "stamp_ns" => header.stamp_ns = value.as_i64(),
                "frame_id" => header.frame_id = value.as_str().map(str::to_string),
                _ => {}
            }
        }
        Ok(header)
    }
}

/// The envelope-only schema: ordering timestamp plus optional header.
pub fn envelope_schema() -> RecordSchema {
    RecordSchema::builder()
        .field(TIMESTAMP_FIELD, FieldKind::Int64, false)
        .expect("envelope schema is static")
        .field(HEADER_FIELD, Header::struct_kind(), true)
        .expect("envelope schema is static")
        .build()
}

/// The universal transport envelope for one typed record.
///
/// `timestamp_ns` is the ordering key for every chronological operation in
/// the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Message<T> {
    pub timestamp_ns: i64,
    pub header: Option<Header>,
    pub payload: T,
}

impl<T: Ontology> Message<T> {
    pub fn new(timestamp_ns: i64, payload: T) -> Self {
        Message {
            timestamp_ns,
            header: None,
            payload,
        }
    }

    pub fn with_header(timestamp_ns: i64, header: Header, payload: T) -> Self {
        Message {
            timestamp_ns,
            header: Some(header),
            payload,
        }
    }

    /// The combined envelope + payload schema for this ontology type.
    ///
    /// Rejects payload field names colliding with the envelope fields.
    pub fn combined_schema() -> Result<RecordSchema, SchemaError> {
        envelope_schema().merged_with(&T::schema())
    }

    /// Flattens the message into one row matching [`Message::combined_schema`].
    pub fn to_row(&self) -> Vec<Value> {
        let mut row = Vec::with_capacity(2 + T::schema().len());
        row.push(Value::Int(self.timestamp_ns));
        row.push(self.header.as_ref().map_or(Value::Null, Header::to_value));
        self.payload.encode(&mut row);
        row
    }
}

/// A message reconstructed from the wire, payload typed only by its
/// ontology tag. Use [`AnyMessage::payload`] to recover the concrete type.
#[derive(Debug)]
pub struct AnyMessage {
    pub timestamp_ns: i64,
    pub header: Option<Header>,
    tag: String,
    payload: Box<dyn AnyPayload>,
}

impl AnyMessage {
    /// Decodes a full row (combined envelope + payload schema) into a
    /// message, resolving the payload constructor through the catalog.
    pub fn decode(
        catalog: &OntologyCatalog,
        tag: &str,
        schema: &Arc<RecordSchema>,
        values: &[Value],
    ) -> Result<Self, SchemaError> {
        let view = RowView::new(schema, values);
        let timestamp_ns = view
            .require(TIMESTAMP_FIELD)?
            .as_i64()
            .ok_or_else(|| SchemaError::InvalidPayload {
                field: TIMESTAMP_FIELD.into(),
                reason: "expected int64 timestamp".into(),
            })?;
        let header = match view.non_null(HEADER_FIELD) {
            Some(value) => Some(Header::from_value(value)?),
            None => None,
        };
        let payload = catalog.decode(tag, &view)?;
        Ok(AnyMessage {
            timestamp_ns,
            header,
            tag: tag.to_string(),
            payload,
        })
    }

    pub fn ontology_tag(&self) -> &str {
        &self.tag
    }

    /// Borrowed downcast to the concrete payload type.
    pub fn payload<T: Ontology>(&self) -> Option<&T> {
        self.payload.as_any().downcast_ref::<T>()
    }

    /// Owned downcast; fails back to `None` when the tag does not match `T`.
    pub fn into_payload<T: Ontology>(self) -> Option<T> {
        self.payload.into_any().downcast::<T>().ok().map(|boxed| *boxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::Temperature;

    #[test]
    fn envelope_schema_shape() {
        let schema = envelope_schema();
        assert_eq!(schema.field_index(TIMESTAMP_FIELD), Some(0));
        assert_eq!(schema.field_index(HEADER_FIELD), Some(1));
    }

    #[test]
    fn message_roundtrip_through_row() {
        let catalog = OntologyCatalog::with_builtins();
        let schema = Arc::new(Message::<Temperature>::combined_schema().unwrap());

        let message = Message::with_header(
            42,
            Header {
                stamp_ns: Some(41),
                frame_id: Some("probe0".into()),
            },
            Temperature::from_celsius(20.0),
        );
        let row = message.to_row();
        schema.validate_row(&row).unwrap();

        let decoded = AnyMessage::decode(&catalog, Temperature::tag(), &schema, &row).unwrap();
        assert_eq!(decoded.timestamp_ns, 42);
        assert_eq!(decoded.header, message.header);
        assert_eq!(decoded.ontology_tag(), Temperature::tag());
        let payload = decoded.payload::<Temperature>().unwrap();
        assert!((payload.value - 293.15).abs() < 1e-9);
    }
}
