//! CLI-specific error types
//!
//! Every CLI error is fatal: the command prints it and exits non-zero.

use std::io;

use thiserror::Error;

use crate::error::EngineError;

/// CLI error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Input file could not be read or parsed
    InputError,
    /// I/O error (stdin/stdout)
    IoError,
    /// The engine rejected the request
    EngineError,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::InputError => "NESTQUERY_CLI_INPUT_ERROR",
            Self::IoError => "NESTQUERY_CLI_IO_ERROR",
            Self::EngineError => "NESTQUERY_CLI_ENGINE_ERROR",
        }
    }
}

/// CLI error
#[derive(Debug, Error)]
#[error("{}: {message}", .code.code())]
pub struct CliError {
    code: CliErrorCode,
    message: String,
    /// Engine code when the engine failed
    engine_code: Option<&'static str>,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            engine_code: None,
        }
    }

    pub fn input_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::InputError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn code(&self) -> CliErrorCode {
        self.code
    }

    /// Most specific code available: the engine's when it failed
    pub fn code_str(&self) -> &'static str {
        self.engine_code.unwrap_or_else(|| self.code.code())
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        Self {
            code: CliErrorCode::EngineError,
            message: e.to_string(),
            engine_code: Some(e.code().code()),
        }
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::input_error(format!("JSON error: {}", e))
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_code_wins() {
        let err: CliError = EngineError::invalid_query("bad").into();
        assert_eq!(err.code(), CliErrorCode::EngineError);
        assert_eq!(err.code_str(), "QUERY_INVALID");
        assert!(err.to_string().starts_with("NESTQUERY_CLI_ENGINE_ERROR"));
    }

    #[test]
    fn test_plain_code() {
        let err = CliError::input_error("missing file");
        assert_eq!(err.code_str(), "NESTQUERY_CLI_INPUT_ERROR");
        assert_eq!(err.message(), "missing file");
    }
}
