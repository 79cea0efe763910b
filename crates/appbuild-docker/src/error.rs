//! Docker-specific error types

use thiserror::Error;

/// Docker-specific error type
#[derive(Error, Debug)]
pub enum DockerError {
    /// Bollard client error
    #[error("Docker client error: {0}")]
    Client(#[from] bollard::errors::Error),

    /// Container not found
    #[error("Container not found: {id}")]
    ContainerNotFound { id: String },

    /// Image not found
    #[error("Image not found: {name}")]
    ImageNotFound { name: String },

    /// Image build failed
    #[error("Docker build failed: {reason}")]
    BuildFailed { reason: String },

    /// Container creation or execution failed
    #[error("Container execution failed: {reason}")]
    ExecutionFailed { reason: String },

    /// Invalid configuration
    #[error("Invalid Docker configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Stream error
    #[error("Docker stream error: {reason}")]
    StreamError { reason: String },

    /// I/O error while preparing a build context
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Docker operations
pub type Result<T> = std::result::Result<T, DockerError>;

impl DockerError {
    /// Check if the daemon reported the object as missing
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ContainerNotFound { .. } | Self::ImageNotFound { .. } => true,
            Self::Client(e) => status_code(e) == Some(404),
            _ => false,
        }
    }
}

/// HTTP status code of a daemon error response, if any
pub(crate) fn status_code(error: &bollard::errors::Error) -> Option<u16> {
    match error {
        bollard::errors::Error::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}
