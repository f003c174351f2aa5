use thiserror::Error;

/// Main error type for the pidsim-train crate
#[derive(Error, Debug)]
pub enum PidsimError {
    /// Invalid hyper-parameters or configuration values
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation invoked before its preconditions were met
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Tensor dimensions that do not fit together
    #[error("Shape error: {0}")]
    Shape(String),

    /// Errors raised by the tensor engine
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PidsimError {
    /// Create a shape error with an optional hint
    pub fn shape_error(expected: &str, got: &str, suggestion: Option<&str>) -> Self {
        let message = if let Some(sugg) = suggestion {
            format!("Expected {}, got {}. Suggestion: {}", expected, got, sugg)
        } else {
            format!("Expected {}, got {}", expected, got)
        };
        PidsimError::Shape(message)
    }

    /// Create a configuration error naming the offending parameter
    pub fn invalid_parameter(name: &str, value: impl std::fmt::Display, requirement: &str) -> Self {
        PidsimError::Configuration(format!(
            "`{}` {}, got {}",
            name, requirement, value
        ))
    }

    /// Error raised when a model is used before `compile`
    pub fn not_compiled(operation: &str) -> Self {
        PidsimError::IllegalState(format!(
            "`{}` requires the model to be compiled first",
            operation
        ))
    }
}

impl From<std::io::Error> for PidsimError {
    fn from(err: std::io::Error) -> Self {
        PidsimError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PidsimError {
    fn from(err: serde_json::Error) -> Self {
        PidsimError::Serialization(err.to_string())
    }
}

/// Result type for pidsim-train operations
pub type PidsimResult<T> = Result<T, PidsimError>;

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalid,
    IllegalState,
    ShapeMismatch,
    TensorFailure,
    IoFailure,
    SerializationFailed,
}

impl PidsimError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            PidsimError::Configuration(_) => ErrorCode::ConfigInvalid,
            PidsimError::IllegalState(_) => ErrorCode::IllegalState,
            PidsimError::Shape(_) => ErrorCode::ShapeMismatch,
            PidsimError::Tensor(_) => ErrorCode::TensorFailure,
            PidsimError::Io(_) => ErrorCode::IoFailure,
            PidsimError::Serialization(_) => ErrorCode::SerializationFailed,
        }
    }

    /// Whether the caller can fix the problem and retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::ConfigInvalid | ErrorCode::IllegalState | ErrorCode::IoFailure
        )
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            PidsimError::Configuration(msg) => {
                format!("Configuration Error: {}\n\nCheck the hyper-parameters passed to the model, the optimizers or the trainer.", msg)
            }
            PidsimError::IllegalState(msg) => {
                format!("Illegal State: {}\n\nThe workflow is feed -> prepare_dataset -> compile -> train. Make sure the earlier steps were run.", msg)
            }
            PidsimError::Shape(msg) => {
                format!("Shape Error: {}\n\nInputs must be 2-D row-major batches whose column counts match the model dimensions.", msg)
            }
            _ => self.to_string(),
        }
    }
}
