//! Error types for build supervision

use thiserror::Error;

/// Build supervision error taxonomy
///
/// Everything except [`BuildError::DuplicateJob`] and
/// [`BuildError::InvalidOptions`] is reported through the job's terminal
/// progress event rather than returned to the caller of `start_build`.
#[derive(Error, Debug)]
pub enum BuildError {
    /// A job with the same id is still active
    #[error("Build {build_id} is already active")]
    DuplicateJob { build_id: String },

    /// Options rejected before registration
    #[error(transparent)]
    InvalidOptions(#[from] appbuild_core::Error),

    /// Build image missing and could not be built
    #[error("Build image unavailable: {reason}")]
    Provisioning { reason: String },

    /// Build process could not be started
    #[error("Failed to launch build: {reason}")]
    Launch { reason: String },

    /// Build process exited with a non-zero code
    #[error("Build failed with exit code {exit_code}{}", format_tail(.stderr_tail))]
    Execution { exit_code: i64, stderr_tail: String },

    /// Deadline expired
    #[error("Build timeout")]
    Timeout { timeout_ms: u64 },

    /// Cancelled on request
    #[error("Build cancelled: {reason}")]
    Cancelled { reason: String },

    /// Zero exit but no artifact in the output directory
    #[error("No output file found")]
    ArtifactNotFound { build_id: String },

    /// Container runtime error
    #[error("Docker error: {0}")]
    Docker(#[from] appbuild_docker::DockerError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for build operations
pub type Result<T> = std::result::Result<T, BuildError>;

fn format_tail(tail: &str) -> String {
    let tail = tail.trim();
    if tail.is_empty() {
        String::new()
    } else {
        format!(": {tail}")
    }
}

impl BuildError {
    /// Create a duplicate job error
    pub fn duplicate(build_id: impl Into<String>) -> Self {
        Self::DuplicateJob { build_id: build_id.into() }
    }

    /// Create a provisioning error
    pub fn provisioning(reason: impl Into<String>) -> Self {
        Self::Provisioning { reason: reason.into() }
    }

    /// Create a launch error
    pub fn launch(reason: impl Into<String>) -> Self {
        Self::Launch { reason: reason.into() }
    }

    /// Create a cancellation error
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled { reason: reason.into() }
    }

    /// Check if the error is a caller mistake rather than a build outcome
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::DuplicateJob { .. } | Self::InvalidOptions(_))
    }

    /// Check if the error ends a job through cancellation or deadline
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(BuildError::Timeout { timeout_ms: 50 }.to_string(), "Build timeout");
        assert_eq!(
            BuildError::ArtifactNotFound { build_id: "b1".into() }.to_string(),
            "No output file found"
        );
        assert_eq!(
            BuildError::cancelled("user_requested").to_string(),
            "Build cancelled: user_requested"
        );
        assert_eq!(
            BuildError::Execution { exit_code: 2, stderr_tail: "  gradle: boom\n".into() }
                .to_string(),
            "Build failed with exit code 2: gradle: boom"
        );
        assert_eq!(
            BuildError::Execution { exit_code: 1, stderr_tail: String::new() }.to_string(),
            "Build failed with exit code 1"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(BuildError::duplicate("b1").is_rejection());
        assert!(!BuildError::launch("no daemon").is_rejection());
        assert!(BuildError::Timeout { timeout_ms: 1 }.is_cancellation());
        assert!(BuildError::cancelled("cleanup").is_cancellation());
        assert!(!BuildError::provisioning("missing").is_cancellation());
    }
}
