//! Build job records

use std::time::Duration;

use appbuild_core::{Artifact, BuildOptions, BuildProgress, BuildStatus};
use chrono::{DateTime, Utc};

use crate::error::BuildError;

/// Progress reported when a job is registered
pub const STARTING_PERCENT: u8 = 5;

/// How a job ended
#[derive(Debug)]
pub enum JobOutcome {
    /// Process exited cleanly and produced an artifact
    Completed(Artifact),
    /// Anything else; the error decides the terminal status
    Failed(BuildError),
}

impl JobOutcome {
    /// Terminal status for this outcome
    pub fn status(&self) -> BuildStatus {
        match self {
            Self::Completed(_) => BuildStatus::Completed,
            Self::Failed(BuildError::Timeout { .. }) => BuildStatus::Timeout,
            Self::Failed(BuildError::Cancelled { .. }) => BuildStatus::Cancelled,
            Self::Failed(_) => BuildStatus::Failed,
        }
    }
}

/// State of a single build job
#[derive(Debug, Clone)]
pub struct BuildJob {
    options: BuildOptions,
    status: BuildStatus,
    progress_percent: u8,
    message: String,
    error: Option<String>,
    artifact: Option<Artifact>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl BuildJob {
    /// Create a freshly registered job
    pub fn new(options: BuildOptions) -> Self {
        Self {
            options,
            status: BuildStatus::Starting,
            progress_percent: STARTING_PERCENT,
            message: "Preparing build environment".to_string(),
            error: None,
            artifact: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    pub fn build_id(&self) -> &str {
        &self.options.build_id
    }

    pub fn status(&self) -> BuildStatus {
        self.status
    }

    pub fn progress_percent(&self) -> u8 {
        self.progress_percent
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Time since registration, or total run time once finished
    pub fn elapsed(&self) -> Duration {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }

    /// Move to `Building` once the process is running
    pub fn mark_building(&mut self, message: impl Into<String>) -> bool {
        if !self.status.can_transition_to(BuildStatus::Building) {
            return false;
        }
        self.status = BuildStatus::Building;
        self.message = message.into();
        true
    }

    /// Record classified progress
    ///
    /// Only applies while building and only if `percent` is ahead of the
    /// current value. Returns whether anything changed.
    pub fn advance(&mut self, percent: u8, message: impl Into<String>) -> bool {
        let percent = percent.min(100);
        if self.status != BuildStatus::Building || percent <= self.progress_percent {
            return false;
        }
        self.progress_percent = percent;
        self.message = message.into();
        true
    }

    /// Move to the terminal status implied by `outcome`
    pub fn finish(&mut self, outcome: JobOutcome) -> bool {
        let status = outcome.status();
        if !self.status.can_transition_to(status) {
            return false;
        }

        self.status = status;
        self.finished_at = Some(Utc::now());
        let secs = self.elapsed().as_secs_f64();
        match outcome {
            JobOutcome::Completed(artifact) => {
                self.progress_percent = 100;
                self.message = format!("Build completed in {secs:.1}s");
                self.artifact = Some(artifact);
            }
            JobOutcome::Failed(error) => {
                self.message = match status {
                    BuildStatus::Timeout => format!("Build timed out after {secs:.1}s"),
                    BuildStatus::Cancelled => format!("Build cancelled after {secs:.1}s"),
                    _ => format!("Build failed after {secs:.1}s"),
                };
                self.error = Some(error.to_string());
            }
        }
        true
    }

    /// Progress event describing the current state
    pub fn snapshot(&self) -> BuildProgress {
        let mut event = BuildProgress::new(
            self.options.build_id.clone(),
            self.status,
            self.progress_percent,
            self.message.clone(),
        );
        if let Some(artifact) = &self.artifact {
            event = event.with_artifact(artifact);
        }
        if let Some(error) = &self.error {
            event = event.with_error(error.clone());
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use appbuild_core::{BuildMode, BuildType};

    use super::*;

    fn job() -> BuildJob {
        BuildJob::new(BuildOptions::new(
            "b1",
            BuildType::Package,
            BuildMode::Debug,
            "demo",
            "/tmp/project",
            "/tmp/out",
        ))
    }

    #[test]
    fn test_new_job_reports_starting() {
        let job = job();
        let event = job.snapshot();
        assert_eq!(event.status, BuildStatus::Starting);
        assert_eq!(event.progress_percent, STARTING_PERCENT);
        assert!(event.error.is_none());
        assert!(job.finished_at().is_none());
    }

    #[test]
    fn test_progress_only_moves_forward_while_building() {
        let mut job = job();
        assert!(!job.advance(50, "compile"));

        assert!(job.mark_building("running"));
        assert!(job.advance(30, "build"));
        assert!(!job.advance(20, "deps"));
        assert!(!job.advance(30, "again"));
        assert_eq!(job.progress_percent(), 30);
        assert!(job.advance(250, "clamped"));
        assert_eq!(job.progress_percent(), 100);
    }

    #[test]
    fn test_completed_job_carries_artifact() {
        let mut job = job();
        job.mark_building("running");
        let artifact = Artifact { path: PathBuf::from("/tmp/out/b1.apk"), size_bytes: 10 };

        assert!(job.finish(JobOutcome::Completed(artifact.clone())));
        let event = job.snapshot();
        assert_eq!(event.status, BuildStatus::Completed);
        assert_eq!(event.progress_percent, 100);
        assert_eq!(event.output_path, Some(artifact.path));
        assert_eq!(event.size_bytes, Some(10));
        assert!(job.finished_at().is_some());
        assert!(event.message.starts_with("Build completed in "));
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut job = job();
        assert!(job.finish(JobOutcome::Failed(BuildError::Timeout { timeout_ms: 10 })));
        assert_eq!(job.status(), BuildStatus::Timeout);
        assert_eq!(job.error(), Some("Build timeout"));

        assert!(!job.finish(JobOutcome::Failed(BuildError::cancelled("late"))));
        assert!(!job.mark_building("late"));
        assert_eq!(job.status(), BuildStatus::Timeout);
    }

    #[test]
    fn test_outcome_status_mapping() {
        assert_eq!(
            JobOutcome::Failed(BuildError::cancelled("user_requested")).status(),
            BuildStatus::Cancelled
        );
        assert_eq!(
            JobOutcome::Failed(BuildError::provisioning("no image")).status(),
            BuildStatus::Failed
        );
    }
}
