//! Error Handling Module
//!
//! Defines the error type returned while building, validating and loading
//! Aligned Xception networks. Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for network construction and weight loading
#[derive(Error, Debug)]
pub enum XceptionError {
    /// Invalid output stride, malformed channel triple, or other bad settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// A block's declared input width does not match what feeds it
    #[error("Shape mismatch at {block}: expected {expected} channels, found {found}")]
    ShapeMismatch {
        block: String,
        expected: usize,
        found: usize,
    },

    /// Saving or restoring a parameter record failed
    #[error("Weights error: {0}")]
    Weights(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for XceptionError {
    fn from(err: serde_json::Error) -> Self {
        XceptionError::Config(err.to_string())
    }
}

/// Convenience Result type for network operations
pub type Result<T> = std::result::Result<T, XceptionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = XceptionError::Config("output_stride must be 8, 16 or 32".to_string());
        assert_eq!(
            format!("{}", err),
            "Configuration error: output_stride must be 8, 16 or 32"
        );
    }

    #[test]
    fn test_shape_mismatch_display() {
        let err = XceptionError::ShapeMismatch {
            block: "blocks.3".to_string(),
            expected: 728,
            found: 256,
        };
        let msg = err.to_string();
        assert!(msg.contains("blocks.3"));
        assert!(msg.contains("728"));
        assert!(msg.contains("256"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: XceptionError = io_err.into();
        assert!(matches!(err, XceptionError::Io(_)));
    }

    #[test]
    fn test_json_error_is_config_error() {
        let err: XceptionError = serde_json::from_str::<usize>("not a number")
            .unwrap_err()
            .into();
        assert!(matches!(err, XceptionError::Config(_)));
    }
}
