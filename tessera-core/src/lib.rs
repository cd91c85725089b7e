pub mod batch;
pub mod message;
pub mod ontology;
pub mod schema;
pub mod sensors;
pub mod transport;
pub mod value;
