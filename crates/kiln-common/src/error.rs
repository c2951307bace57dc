//! Unified error types for the Kiln workspace.
//!
//! The four fatal build failure kinds (`Config`, `SchemaValidation`,
//! `BaseImageResolution`, `BuildExecution`) live here next to the plumbing
//! variants so every crate reports through one enum.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum KilnError {
    /// The project descriptor is malformed or unsupported.
    #[error("invalid configuration ({field}): {message}")]
    Config {
        /// Descriptor field that failed validation.
        field: String,
        /// Description of the problem.
        message: String,
    },

    /// The entry point's declared types, defaults or bounds are inconsistent.
    #[error("invalid schema for field \"{field}\": {message}")]
    SchemaValidation {
        /// Input or output field that failed validation.
        field: String,
        /// Description of the violated rule.
        message: String,
    },

    /// No maintained base image satisfies the request under `required` mode.
    #[error("base image resolution failed: {message}")]
    BaseImageResolution {
        /// Description of the unsatisfied combination.
        message: String,
    },

    /// The external build interface reported a failure.
    #[error("build failed: {message}")]
    BuildExecution {
        /// Failure output surfaced verbatim from the build interface.
        message: String,
    },

    /// The build was cancelled by the caller.
    #[error("build cancelled")]
    Cancelled,

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// The YAML project descriptor could not be parsed.
    #[error("invalid descriptor syntax: {source}")]
    Yaml {
        /// Underlying YAML error.
        #[from]
        source: serde_yaml::Error,
    },
}

impl KilnError {
    /// Builds a [`KilnError::Config`] for the given descriptor field.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Builds a [`KilnError::SchemaValidation`] for the given field.
    pub fn schema(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns the stable name of this error's kind, used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } | Self::Yaml { .. } => "ConfigError",
            Self::SchemaValidation { .. } => "SchemaValidationError",
            Self::BaseImageResolution { .. } => "BaseImageResolutionError",
            Self::BuildExecution { .. } => "BuildExecutionError",
            Self::Cancelled => "Cancelled",
            Self::Io { .. } => "IoError",
            Self::Serialization { .. } => "SerializationError",
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, KilnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_field_and_message() {
        let err = KilnError::config("build.python_version", "too old");
        assert_eq!(
            err.to_string(),
            "invalid configuration (build.python_version): too old"
        );
        assert_eq!(err.kind(), "ConfigError");
    }

    #[test]
    fn schema_error_names_field() {
        let err = KilnError::schema("count", "invalid default: number must be at least 2");
        let msg = err.to_string();
        assert!(msg.contains("\"count\""), "got: {msg}");
        assert!(msg.contains("number must be at least 2"), "got: {msg}");
        assert_eq!(err.kind(), "SchemaValidationError");
    }

    #[test]
    fn kinds_cover_fatal_taxonomy() {
        let resolution = KilnError::BaseImageResolution {
            message: "none".into(),
        };
        let build = KilnError::BuildExecution {
            message: "exit 1".into(),
        };
        assert_eq!(resolution.kind(), "BaseImageResolutionError");
        assert_eq!(build.kind(), "BuildExecutionError");
        assert_eq!(KilnError::Cancelled.kind(), "Cancelled");
    }
}
