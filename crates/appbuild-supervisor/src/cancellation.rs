//! Graceful-then-forced termination of build containers

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use appbuild_core::BuildStatus;
use appbuild_docker::ContainerRuntime;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::BuildError;

/// Why a job is being cancelled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// Deadline expired
    Timeout,
    /// Cancelled by the user
    UserRequested,
    /// Registry shutting down
    Cleanup,
    /// Any other caller-supplied reason
    Other(String),
}

impl CancelReason {
    /// Parse a caller-supplied reason
    pub fn parse(reason: &str) -> Self {
        match reason {
            "timeout" => Self::Timeout,
            "user_requested" => Self::UserRequested,
            "cleanup" => Self::Cleanup,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire name of the reason
    pub fn as_str(&self) -> &str {
        match self {
            Self::Timeout => "timeout",
            Self::UserRequested => "user_requested",
            Self::Cleanup => "cleanup",
            Self::Other(reason) => reason,
        }
    }

    /// Terminal status recorded for a job cancelled for this reason
    pub fn terminal_status(&self) -> BuildStatus {
        match self {
            Self::Timeout => BuildStatus::Timeout,
            _ => BuildStatus::Cancelled,
        }
    }

    /// Error recorded in the terminal event
    pub fn to_error(&self, timeout_ms: u64) -> BuildError {
        match self {
            Self::Timeout => BuildError::Timeout { timeout_ms },
            other => BuildError::cancelled(other.as_str()),
        }
    }
}

impl From<&str> for CancelReason {
    fn from(reason: &str) -> Self {
        Self::parse(reason)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a termination request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The process had already exited
    AlreadyExited,
    /// The process exited within the grace period
    Graceful,
    /// The process had to be killed
    Forced,
}

/// Two-stage termination: graceful stop, then kill after a grace period
#[derive(Clone)]
pub struct CancellationController {
    runtime: Arc<dyn ContainerRuntime>,
    grace_period: Duration,
}

impl CancellationController {
    /// Create a new cancellation controller
    pub fn new(runtime: Arc<dyn ContainerRuntime>, grace_period: Duration) -> Self {
        Self { runtime, grace_period }
    }

    /// Configured grace period
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Terminate the container called `container`
    ///
    /// `exited` flips to `true` (or closes) once the supervised process is
    /// gone. The returned future resolves within roughly two grace periods.
    pub async fn terminate(
        &self,
        container: &str,
        mut exited: watch::Receiver<bool>,
    ) -> TerminationOutcome {
        if *exited.borrow() {
            return TerminationOutcome::AlreadyExited;
        }

        info!("Stopping container {}", container);

        let stop_request = async {
            match self.runtime.stop_container(container, self.grace_period).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => debug!("Container {} not created yet", container),
                Err(e) => warn!("Graceful stop of {} failed: {}", container, e),
            }
        };
        let graceful = tokio::time::timeout(self.grace_period, async {
            tokio::join!(stop_request, wait_for_exit(&mut exited));
        })
        .await
        .is_ok();

        if graceful || *exited.borrow() {
            return TerminationOutcome::Graceful;
        }

        warn!(
            "Container {} still running after {:?}, killing it",
            container, self.grace_period
        );
        if let Err(e) = self.runtime.kill_container(container).await {
            if !e.is_not_found() {
                warn!("Failed to kill container {}: {}", container, e);
            }
        }

        if tokio::time::timeout(self.grace_period, wait_for_exit(&mut exited))
            .await
            .is_err()
        {
            warn!("Container {} did not report exit after kill", container);
        }

        TerminationOutcome::Forced
    }
}

/// Resolve once the process has exited or its supervisor is gone
async fn wait_for_exit(exited: &mut watch::Receiver<bool>) {
    let _ = exited.wait_for(|exited| *exited).await;
}
