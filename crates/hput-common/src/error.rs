use thiserror::Error;

/// Faults raised while running a stored script.
///
/// Every variant carries a human readable cause. None of them is allowed to
/// take the host process down.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("script compilation failed: {0}")]
    Compile(String),

    #[error("uncaught exception: {0}")]
    Uncaught(String),

    #[error("promise rejected: {0}")]
    Rejected(String),

    #[error("execution timed out after {0}ms with a pending promise")]
    Timeout(u64),

    #[error("promise can never settle: {0}")]
    Unsettled(String),

    #[error("could not bind host objects: {0}")]
    Binding(String),
}

#[derive(Error, Debug)]
pub enum HputError {
    #[error("cannot read request payload: {0}")]
    CannotReadPayload(String),

    #[error("attempted to add something to {0} which is not allowed")]
    ReservedPath(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("script execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HputError {
    /// Input faults are the caller's to fix and map to a 4xx status.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            HputError::CannotReadPayload(_)
                | HputError::ReservedPath(_)
                | HputError::InvalidRequest(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HputError>;
