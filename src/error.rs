// ABOUTME: Error types for reader and evaluation failures

use thiserror::Error;

// ===== Arity constant strings =====
pub const ARITY_AT_LEAST_ONE: &str = "at least 1";

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Parse error: {0}")]
    Syntax(String),

    #[error("Unbound symbol: {0}")]
    UnboundSymbol(String),

    /// Type mismatch with function name, expected kind, actual kind, and
    /// argument position
    #[error("{function}: expected {expected}, got {actual} at argument {position}")]
    TypeMismatch {
        function: String,
        expected: String,
        actual: String,
        position: usize,
    },

    /// Arity error with function name, expected count description, and
    /// actual count
    #[error("{function}: expected {expected} arguments, got {actual}")]
    Arity {
        function: String,
        expected: String,
        actual: usize,
    },

    /// Runtime error with function context
    #[error("{function}: {message}")]
    Runtime { function: String, message: String },

    #[error("Unsupported procedure type: {0}")]
    NotCallable(String),
}

impl Error {
    /// Create a type mismatch error with full context
    pub fn type_error(function: &str, expected: &str, actual: &str, position: usize) -> Self {
        Error::TypeMismatch {
            function: function.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
            position,
        }
    }

    /// Create an arity error with expected and actual counts
    pub fn arity_error(function: &str, expected: impl Into<String>, actual: usize) -> Self {
        Error::Arity {
            function: function.to_string(),
            expected: expected.into(),
            actual,
        }
    }

    /// Create a runtime error with function context
    pub fn runtime_error(function: &str, message: impl Into<String>) -> Self {
        Error::Runtime {
            function: function.to_string(),
            message: message.into(),
        }
    }
}
