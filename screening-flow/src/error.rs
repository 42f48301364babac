use thiserror::Error;

/// Errors produced by screening session transitions and their collaborators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScreeningError {
    /// A precondition failed before any request was issued
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The prediction service failed, answered with an error status, or reported an error field
    #[error("Prediction service error: {0}")]
    Service(String),

    /// A request is already outstanding for this session
    #[error("A prediction request is already in progress")]
    RequestInFlight,

    /// The requested navigation is not allowed from the current step
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ScreeningError {
    /// Human-readable text stored in a session's `last_error`.
    ///
    /// Service errors carry the reported reason verbatim.
    pub fn operator_message(&self) -> String {
        match self {
            ScreeningError::Service(reason) => reason.clone(),
            ScreeningError::Validation(reason) => reason.clone(),
            ScreeningError::InvalidTransition(reason) => reason.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScreeningError>;
