use thiserror::Error;

use crate::job::JobId;

/// Main error type for the Rivulet service
#[derive(Error, Debug)]
pub enum RvError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job not found: {job_id}")]
    NotFound { job_id: JobId },

    #[error("Job {job_id} is not ready: status is {status}")]
    NotReady { job_id: JobId, status: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    #[error("Upstream {service} failed: {message}")]
    Collaborator { service: String, message: String },

    #[error("Job cancelled")]
    Cancelled,

    #[error("Job exceeded its timeout of {timeout_seconds} seconds")]
    TimedOut { timeout_seconds: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Artifact store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Artifact not found: {locator}")]
    NotFound { locator: String },

    #[error("Artifact {name} already written for job {job_id}")]
    AlreadyExists { job_id: JobId, name: String },

    #[error("Invalid artifact name: {name:?}")]
    InvalidName { name: String },

    #[error("Invalid locator: {locator}")]
    InvalidLocator { locator: String },

    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

/// Model invocation errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model execution failed: {message}")]
    Execution { message: String },

    #[error("Objective {metric} missing from model diagnostics")]
    ObjectiveMissing { metric: String },

    #[error("Model artifact could not be stored: {0}")]
    Storage(#[from] StoreError),
}

/// Parameter optimizer errors
#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("Invalid optimizer configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Evaluation {evaluation} failed: {message}")]
    Evaluation { evaluation: usize, message: String },

    #[error("No candidate is awaiting a result")]
    NoPendingCandidate,
}

/// Result type alias for Rivulet operations
pub type RvResult<T> = Result<T, RvError>;

/// Result type alias for artifact store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Macro for creating input validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::RvError::InvalidInput(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::RvError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::RvError::Config(format!($($arg)*))
    };
}
