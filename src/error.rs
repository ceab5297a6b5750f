//! Engine error types
//!
//! Every failure the engine surfaces to a caller is one of these variants.
//! Permission denial is deliberately absent: it compiles into an
//! always-false predicate and never reaches this module.

use thiserror::Error;

use crate::store::RowStoreError;

/// Engine result type
pub type EngineResult<T> = Result<T, EngineError>;

/// Stable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorCode {
    SchemaMismatch,
    InvalidQuery,
    UnsupportedFunction,
    RowStoreFailure,
    InvalidConfig,
    MalformedSchema,
    InvalidTransition,
}

impl EngineErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::SchemaMismatch => "QUERY_SCHEMA_MISMATCH",
            Self::InvalidQuery => "QUERY_INVALID",
            Self::UnsupportedFunction => "QUERY_UNSUPPORTED_FUNCTION",
            Self::RowStoreFailure => "ROW_STORE_FAILURE",
            Self::InvalidConfig => "CONFIG_INVALID",
            Self::MalformedSchema => "SCHEMA_MALFORMED",
            Self::InvalidTransition => "ENGINE_INVALID_TRANSITION",
        }
    }

    /// HTTP-equivalent status for transport layers
    pub fn status_code(&self) -> u16 {
        match self {
            Self::SchemaMismatch | Self::InvalidQuery | Self::UnsupportedFunction => 400,
            Self::RowStoreFailure => 503,
            Self::InvalidConfig | Self::MalformedSchema | Self::InvalidTransition => 500,
        }
    }
}

/// Engine error
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// A field, relation or collection is absent from the schema overview
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Structurally inconsistent query
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Function applied to a column type it is not implemented for
    #[error("Function \"{function}\" is not supported on field \"{field}\" of type \"{field_type}\"")]
    UnsupportedFunction {
        function: String,
        field: String,
        field_type: String,
    },

    /// The row store failed; the whole request is aborted
    #[error(transparent)]
    RowStore(#[from] RowStoreError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed schema: {0}")]
    MalformedSchema(String),

    /// A branch was driven through a state change it does not allow
    #[error("Invalid branch transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl EngineError {
    /// Field missing on a collection
    pub fn unknown_field(collection: &str, field: &str) -> Self {
        Self::SchemaMismatch(format!(
            "field \"{}\" does not exist on collection \"{}\"",
            field, collection
        ))
    }

    /// Collection missing from the schema overview
    pub fn unknown_collection(collection: &str) -> Self {
        Self::SchemaMismatch(format!("collection \"{}\" does not exist", collection))
    }

    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    pub fn unsupported_function(
        function: impl Into<String>,
        field: impl Into<String>,
        field_type: impl Into<String>,
    ) -> Self {
        Self::UnsupportedFunction {
            function: function.into(),
            field: field.into(),
            field_type: field_type.into(),
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn malformed_schema(msg: impl Into<String>) -> Self {
        Self::MalformedSchema(msg.into())
    }

    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Get the error code
    pub fn code(&self) -> EngineErrorCode {
        match self {
            Self::SchemaMismatch(_) => EngineErrorCode::SchemaMismatch,
            Self::InvalidQuery(_) => EngineErrorCode::InvalidQuery,
            Self::UnsupportedFunction { .. } => EngineErrorCode::UnsupportedFunction,
            Self::RowStore(_) => EngineErrorCode::RowStoreFailure,
            Self::InvalidConfig(_) => EngineErrorCode::InvalidConfig,
            Self::MalformedSchema(_) => EngineErrorCode::MalformedSchema,
            Self::InvalidTransition { .. } => EngineErrorCode::InvalidTransition,
        }
    }

    /// The engine never retries; row-store retries belong to the store.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
