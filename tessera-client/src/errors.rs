use thiserror::Error;

use tessera_core::schema::SchemaError;
use tessera_core::transport::TransportError;

pub type Result<T> = std::result::Result<T, TesseraError>;

#[derive(Debug, Error)]
pub enum TesseraError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
}

impl TesseraError {
    /// Remaps transport-level not-found outcomes onto the client taxonomy,
    /// leaving other transport failures untouched.
    pub(crate) fn from_lookup(err: TransportError) -> Self {
        match err {
            TransportError::NotFound(what) => TesseraError::NotFound(what),
            other => TesseraError::Connection(other.to_string()),
        }
    }
}
