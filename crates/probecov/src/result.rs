//! Result and error types for Probecov.

use thiserror::Error;

/// Result type for Probecov operations
pub type CoverageResult<T> = Result<T, CoverageError>;

/// Errors that can occur while instrumenting, analyzing or persisting coverage
#[derive(Debug, Error)]
pub enum CoverageError {
    /// The unit bytes cannot be parsed as a supported class file
    #[error("Malformed class {name}: {message}")]
    MalformedUnit {
        /// Declared name or location of the unit
        name: String,
        /// Error message
        message: String,
    },

    /// The unit carries the reserved probe members already
    #[error("Class {name} is already instrumented")]
    AlreadyInstrumented {
        /// Declared name of the unit
        name: String,
    },

    /// The unit is valid but uses a construct the prober cannot rewrite
    #[error("Unsupported class {name}: {message}")]
    UnsupportedUnit {
        /// Declared name of the unit
        name: String,
        /// Error message
        message: String,
    },

    /// Two structures that must agree do not (probe counts, class names)
    #[error("Structural mismatch: {message}")]
    StructuralMismatch {
        /// Error message
        message: String,
    },

    /// Execution data stream is corrupt
    #[error("Invalid execution data: {message}")]
    InvalidExecData {
        /// Error message
        message: String,
    },

    /// Execution data stream was written by an incompatible version
    #[error("Incompatible execution data version 0x{version:04x}")]
    IncompatibleExecVersion {
        /// Version found in the stream header
        version: u16,
    },

    /// Execution data record uses a probe representation this reader does not know
    #[error("Unknown probe representation tag {tag}")]
    UnknownProbeKind {
        /// Tag byte found in the stream
        tag: u8,
    },

    /// A jar or zip container cannot be read or written
    #[error("Archive {location}: {message}")]
    Archive {
        /// Path of the archive, with `@entry` for nested ones
        location: String,
        /// Error message
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoverageError {
    /// Create a malformed unit error
    #[must_use]
    pub fn malformed(name: impl Into<String>, message: impl ToString) -> Self {
        Self::MalformedUnit {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Create an unsupported unit error
    #[must_use]
    pub fn unsupported(name: impl Into<String>, message: impl ToString) -> Self {
        Self::UnsupportedUnit {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Create a structural mismatch error
    #[must_use]
    pub fn mismatch(message: impl Into<String>) -> Self {
        Self::StructuralMismatch {
            message: message.into(),
        }
    }

    /// Create an archive error
    #[must_use]
    pub fn archive(location: impl Into<String>, message: impl ToString) -> Self {
        Self::Archive {
            location: location.into(),
            message: message.to_string(),
        }
    }

    /// Create an invalid execution data error
    #[must_use]
    pub fn invalid_exec_data(message: impl Into<String>) -> Self {
        Self::InvalidExecData {
            message: message.into(),
        }
    }
}
