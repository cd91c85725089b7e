//! Built-in sensor ontologies.
//!
//! These cover the common robotics streams and double as the reference for
//! implementing [`Ontology`] on custom payload types. Shared field groups
//! (acquisition header, uncertainty) are appended through the explicit
//! builder helpers below rather than inherited.

use crate::batch::RowView;
use crate::message::Header;
use crate::ontology::{Ontology, OntologyCatalog};
use crate::schema::{FieldKind, RecordSchema, SchemaBuilder, SchemaError};
use crate::value::Value;

/// Appends the optional acquisition `header` field.
pub fn header_field(builder: SchemaBuilder) -> Result<SchemaBuilder, SchemaError> {
    builder.field("header", Header::struct_kind(), true)
}

/// Appends the scalar uncertainty fields (`variance`, `variance_type`).
pub fn variance_fields(builder: SchemaBuilder) -> Result<SchemaBuilder, SchemaError> {
    builder
        .field("variance", FieldKind::Float64, true)?
        .field("variance_type", FieldKind::Int16, true)
}

fn req_f64(row: &RowView<'_>, name: &str) -> Result<f64, SchemaError> {
    row.require(name)?
        .as_f64()
        .ok_or_else(|| SchemaError::InvalidPayload {
            field: name.into(),
            reason: "expected float64".into(),
        })
}

fn opt_f64(row: &RowView<'_>, name: &str) -> Option<f64> {
    row.non_null(name).and_then(Value::as_f64)
}

fn opt_header(row: &RowView<'_>, name: &str) -> Result<Option<Header>, SchemaError> {
    match row.non_null(name) {
        Some(value) => Header::from_value(value).map(Some),
        None => Ok(None),
    }
}

fn f64_list(row: &RowView<'_>, name: &str) -> Result<Vec<f64>, SchemaError> {
    let items = row
        .require(name)?
        .as_list()
        .ok_or_else(|| SchemaError::InvalidPayload {
            field: name.into(),
            reason: "expected list<float64>".into(),
        })?;
    items
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| SchemaError::InvalidPayload {
                field: name.into(),
                reason: "expected float64 list item".into(),
            })
        })
        .collect()
}

fn f64_list_value(values: &[f64]) -> Value {
    Value::List(values.iter().copied().map(Value::Float).collect())
}

// ---- Temperature ----

/// A thermodynamic temperature, stored in Kelvin.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Temperature {
    /// Temperature value in Kelvin.
    pub value: f64,
    pub variance: Option<f64>,
    pub variance_type: Option<i16>,
}

impl Temperature {
    pub fn new(kelvin: f64) -> Self {
        Temperature {
            value: kelvin,
            ..Default::default()
        }
    }

    /// Converts from Celsius (`Kelvin = Celsius + 273.15`).
    pub fn from_celsius(celsius: f64) -> Self {
        Temperature::new(celsius + 273.15)
    }
}

impl Ontology for Temperature {
    fn tag() -> &'static str {
        "temperature"
    }

    fn schema() -> RecordSchema {
        let builder = RecordSchema::builder()
            .field("value", FieldKind::Float64, false)
            .expect("temperature schema is static");
        variance_fields(builder)
            .expect("temperature schema is static")
            .build()
    }

    fn encode(&self, row: &mut Vec<Value>) {
        row.push(Value::Float(self.value));
        row.push(self.variance.map_or(Value::Null, Value::Float));
        row.push(self.variance_type.map_or(Value::Null, |v| Value::Int(v as i64)));
    }

    fn decode(row: &RowView<'_>) -> Result<Self, SchemaError> {
        Ok(Temperature {
            value: req_f64(row, "value")?,
            variance: opt_f64(row, "variance"),
            variance_type: row
                .non_null("variance_type")
                .and_then(Value::as_i64)
                .map(|v| v as i16),
        })
    }
}

// ---- NavSatFix ----

/// A processed GNSS fix with optional precision metrics.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NavSatFix {
    /// Fix status indicator (no fix, 2D, 3D).
    pub status: i8,
    /// Constellation/service used for the fix.
    pub service: u16,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: Option<f64>,
    /// Horizontal Dilution of Precision, lower is better.
    pub hdop: Option<f64>,
    pub header: Option<Header>,
}

impl Ontology for NavSatFix {
    fn tag() -> &'static str {
        "nav_sat_fix"
    }

    fn schema() -> RecordSchema {
        let builder = RecordSchema::builder()
            .field("status", FieldKind::Int8, false)
            .expect("nav_sat_fix schema is static")
            .field("service", FieldKind::UInt16, false)
            .expect("nav_sat_fix schema is static")
            .field("latitude_deg", FieldKind::Float64, false)
            .expect("nav_sat_fix schema is static")
            .field("longitude_deg", FieldKind::Float64, false)
            .expect("nav_sat_fix schema is static")
            .field("altitude_m", FieldKind::Float64, true)
            .expect("nav_sat_fix schema is static")
            .field("hdop", FieldKind::Float64, true)
            .expect("nav_sat_fix schema is static");
        header_field(builder)
            .expect("nav_sat_fix schema is static")
            .build()
    }

    fn encode(&self, row: &mut Vec<Value>) {
        row.push(Value::Int(self.status as i64));
        row.push(Value::UInt(self.service as u64));
        row.push(Value::Float(self.latitude_deg));
        row.push(Value::Float(self.longitude_deg));
        row.push(self.altitude_m.map_or(Value::Null, Value::Float));
        row.push(self.hdop.map_or(Value::Null, Value::Float));
        row.push(self.header.as_ref().map_or(Value::Null, Header::to_value));
    }

    fn decode(row: &RowView<'_>) -> Result<Self, SchemaError> {
        Ok(NavSatFix {
            status: row
                .require("status")?
                .as_i64()
                .ok_or_else(|| SchemaError::InvalidPayload {
                    field: "status".into(),
                    reason: "expected int8".into(),
                })? as i8,
            service: row
                .require("service")?
                .as_u64()
                .ok_or_else(|| SchemaError::InvalidPayload {
                    field: "service".into(),
                    reason: "expected uint16".into(),
                })? as u16,
            latitude_deg: req_f64(row, "latitude_deg")?,
            longitude_deg: req_f64(row, "longitude_deg")?,
            altitude_m: opt_f64(row, "altitude_m"),
            hdop: opt_f64(row, "hdop"),
            header: opt_header(row, "header")?,
        })
    }
}

// ---- Imu ----

/// An inertial measurement: orientation quaternion plus body rates and
/// accelerations, each stored as a flat float list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Imu {
    /// Orientation quaternion `[x, y, z, w]`.
    pub orientation: Vec<f64>,
    /// Angular velocity `[x, y, z]` in rad/s.
    pub angular_velocity: Vec<f64>,
    /// Linear acceleration `[x, y, z]` in m/s².
    pub linear_acceleration: Vec<f64>,
    pub header: Option<Header>,
}

impl Ontology for Imu {
    fn tag() -> &'static str {
        "imu"
    }

    fn schema() -> RecordSchema {
        let builder = RecordSchema::builder()
            .field(
                "orientation",
                FieldKind::List(Box::new(FieldKind::Float64)),
                false,
            )
            .expect("imu schema is static")
            .field(
                "angular_velocity",
                FieldKind::List(Box::new(FieldKind::Float64)),
                false,
            )
            .expect("imu schema is static")
            .field(
                "linear_acceleration",
                FieldKind::List(Box::new(FieldKind::Float64)),
                false,
            )
            .expect("imu schema is static");
        header_field(builder).expect("imu schema is static").build()
    }

    fn encode(&self, row: &mut Vec<Value>) {
        row.push(f64_list_value(&self.orientation));
        row.push(f64_list_value(&self.angular_velocity));
        row.push(f64_list_value(&self.linear_acceleration));
        row.push(self.header.as_ref().map_or(Value::Null, Header::to_value));
    }

    fn decode(row: &RowView<'_>) -> Result<Self, SchemaError> {
        Ok(Imu {
            orientation: f64_list(row, "orientation")?,
            angular_velocity: f64_list(row, "angular_velocity")?,
            linear_acceleration: f64_list(row, "linear_acceleration")?,
            header: opt_header(row, "header")?,
        })
    }
}

/// Registers every built-in ontology into `catalog`.
pub fn register_builtins(catalog: &OntologyCatalog) -> Result<(), SchemaError> {
    catalog.register::<Temperature>()?;
    catalog.register::<NavSatFix>()?;
    catalog.register::<Imu>()?;
    Ok(())
}
