//! Error types for the SisDb mapping layer.

use sisdb_client::{ApiVersion, ClientError};
use thiserror::Error;

/// Result type for SisDb operations.
pub type SisDbResult<T> = Result<T, SisDbError>;

/// Errors that can occur while compiling schemas, converting field values,
/// or talking to the data service.
#[derive(Debug, Error)]
pub enum SisDbError {
    /// A type specification could not be compiled.
    #[error("schema error in field `{field}`: {detail}")]
    Schema { field: String, detail: String },

    /// A value cannot be coerced to the declared type of its field.
    #[error("cannot convert field `{field}` to {expected}: {value}")]
    FieldConversion {
        field: String,
        expected: &'static str,
        value: String,
    },

    /// A query contract was violated (e.g. `find_one` matched several rows).
    #[error("query error: {0}")]
    Query(String),

    /// The entity type declares no such field.
    #[error("unknown field `{field}` on schema `{schema}`")]
    UnknownField { schema: String, field: String },

    /// No entity type is registered under this name.
    #[error("unknown schema: {0}")]
    UnknownSchema(String),

    /// The data service speaks an API version older than required.
    #[error("API version {found} is not supported (need {required} or higher)")]
    UnsupportedVersion {
        found: ApiVersion,
        required: ApiVersion,
    },

    /// Persistence was requested for an embedded schema.
    #[error("`{0}` is an embedded schema and cannot be persisted on its own")]
    NotPersistable(String),

    /// Failure reported by the data service, passed through unmodified.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SisDbError {
    pub(crate) fn schema(field: impl Into<String>, detail: impl Into<String>) -> Self {
        SisDbError::Schema {
            field: field.into(),
            detail: detail.into(),
        }
    }

    /// Returns true for coercion failures.
    pub fn is_conversion(&self) -> bool {
        matches!(self, SisDbError::FieldConversion { .. })
    }

    /// Returns true if the data service reported a missing schema or record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SisDbError::Client(err) if err.is_not_found())
    }
}
