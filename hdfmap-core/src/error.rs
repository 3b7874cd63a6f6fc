//! Error types for hdfmap-core.

use thiserror::Error;

/// Result type alias for hdfmap operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for hdfmap operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A node could not be read during the tree walk.
    #[error("scan error at '{path}': {reason}")]
    Scan { path: String, reason: String },

    /// A requested name, path or class has no mapping.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed token, unbalanced fallback group or default-value syntax.
    #[error("syntax error in '{expression}': {message}")]
    ExpressionSyntax { expression: String, message: String },

    /// The substituted expression failed at evaluation time.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Region of interest definition rejected.
    #[error("invalid region of interest: {0}")]
    InvalidRoi(String),

    /// The external reader failed.
    #[error("source error: {0}")]
    Source(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for a syntax error on `expression`.
    pub fn syntax(expression: &str, message: impl Into<String>) -> Self {
        Self::ExpressionSyntax {
            expression: expression.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error means "nothing is mapped under that name".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
