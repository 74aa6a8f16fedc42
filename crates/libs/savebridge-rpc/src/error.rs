use serde::{Deserialize, Serialize};

/// An error as it travels inside a reply envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
}

impl ErrorValue {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn data_clone(message: impl Into<String>) -> Self {
        Self::new("DataCloneError", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new("TimeoutError", message)
    }
}

impl std::fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for ErrorValue {}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// Malformed optional parameter, reported to the immediate caller.
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("timed out: {0}")]
    Timeout(String),
    /// The remote handler failed, or its result could not be transmitted.
    #[error("remote handler failed: {0}")]
    Remote(ErrorValue),
    /// The message or its reply never made it across the boundary.
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("target origin mismatch: expected {expected}, target is {actual}")]
    OriginMismatch { expected: String, actual: String },
    #[error("helper reported setup failure: {0}")]
    Establishment(ErrorValue),
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl RpcError {
    /// Converts into the shape carried by a reply envelope.
    pub fn to_error_value(&self) -> ErrorValue {
        match self {
            Self::Validation(message) => ErrorValue::type_error(message.clone()),
            Self::Timeout(message) => ErrorValue::timeout(message.clone()),
            Self::Remote(value) | Self::Establishment(value) => value.clone(),
            Self::Delivery(message) => ErrorValue::data_clone(message.clone()),
            Self::OriginMismatch { .. } => ErrorValue::new("SecurityError", self.to_string()),
            Self::NotImplemented(message) => {
                ErrorValue::new("NotImplementedError", message.clone())
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<RpcError> for ErrorValue {
    fn from(err: RpcError) -> Self {
        err.to_error_value()
    }
}
