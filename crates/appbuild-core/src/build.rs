//! Build job vocabulary shared across the workspace

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Deadline applied when the caller does not supply one
pub const DEFAULT_TIMEOUT_MS: u64 = 600_000;

/// Kind of distributable a build job produces
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BuildType {
    /// Installable application package
    Package,
    /// Store upload bundle
    Bundle,
    /// Archive of the generated project sources
    SourceArchive,
    /// iOS application archive
    IosPackage,
}

impl BuildType {
    /// All build types, in declaration order
    pub const ALL: [BuildType; 4] =
        [Self::Package, Self::Bundle, Self::SourceArchive, Self::IosPackage];

    /// Wire name of the build type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::Bundle => "bundle",
            Self::SourceArchive => "source-archive",
            Self::IosPackage => "ios-package",
        }
    }

    /// File extension (without the dot) of the artifact this type produces
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            Self::Package => "apk",
            Self::Bundle => "aab",
            Self::SourceArchive => "zip",
            Self::IosPackage => "ipa",
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::ParseError { message: format!("unknown build type: {s}") })
    }
}

/// Compilation mode passed through to the toolchain
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Debuggable build
    #[default]
    Debug,
    /// Optimised, signed build
    Release,
}

impl BuildMode {
    /// Wire name of the build mode
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "debug" => Ok(Self::Debug),
            "release" => Ok(Self::Release),
            other => Err(Error::ParseError { message: format!("unknown build mode: {other}") }),
        }
    }
}

/// Build job status
///
/// `Starting -> Building -> terminal`, or `Starting -> terminal` directly.
/// Terminal statuses never transition again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// Job registered, environment being prepared
    Starting,

    /// Build container is running
    Building,

    /// Artifact produced
    Completed,

    /// Launch, execution or artifact lookup failed
    Failed,

    /// Deadline expired
    Timeout,

    /// Cancelled on request
    Cancelled,
}

impl BuildStatus {
    /// Check if no further transition can happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled)
    }

    /// Check if the status is a failure-class terminal status
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Timeout | Self::Cancelled)
    }

    /// Check if moving to `next` respects the state machine
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        match self {
            Self::Starting => next != Self::Starting,
            Self::Building => next.is_terminal(),
            _ => false,
        }
    }

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Building => "building",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a build request, as received from the request layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    /// Caller-supplied unique identifier
    pub build_id: String,

    /// Artifact kind
    pub build_type: BuildType,

    /// Compilation mode
    pub build_mode: BuildMode,

    /// Application name passed to the toolchain
    pub app_name: String,

    /// Project tree, mounted read-only
    pub project_path: PathBuf,

    /// Output directory, mounted read-write
    pub output_path: PathBuf,

    /// Deadline in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl BuildOptions {
    /// Create build options with the default deadline
    pub fn new(
        build_id: impl Into<String>,
        build_type: BuildType,
        build_mode: BuildMode,
        app_name: impl Into<String>,
        project_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            build_id: build_id.into(),
            build_type,
            build_mode,
            app_name: app_name.into(),
            project_path: project_path.into(),
            output_path: output_path.into(),
            timeout_ms: None,
        }
    }

    /// Override the deadline
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Effective deadline, falling back to `default_ms`
    pub fn timeout_or(&self, default_ms: u64) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(default_ms))
    }

    /// Effective deadline, falling back to [`DEFAULT_TIMEOUT_MS`]
    pub fn timeout(&self) -> Duration {
        self.timeout_or(DEFAULT_TIMEOUT_MS)
    }

    /// Validate the options before a job is registered
    ///
    /// The build id ends up in container names, so it is restricted to
    /// `[A-Za-z0-9_.-]`.
    pub fn validate(&self) -> Result<()> {
        if self.build_id.is_empty() {
            return Err(Error::invalid_options("buildId must not be empty"));
        }
        if let Some(c) = self
            .build_id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
        {
            return Err(Error::invalid_options(format!(
                "buildId {:?} contains unsupported character {c:?}",
                self.build_id
            )));
        }
        if self.app_name.trim().is_empty() {
            return Err(Error::invalid_options("appName must not be empty"));
        }
        if self.timeout_ms == Some(0) {
            return Err(Error::invalid_options("timeoutMs must be greater than zero"));
        }
        Ok(())
    }
}

/// File produced by a completed build
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Absolute path of the artifact
    pub path: PathBuf,

    /// Size in bytes
    pub size_bytes: u64,
}

/// Progress event delivered to the progress sink
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildProgress {
    pub build_id: String,
    pub status: BuildStatus,
    pub progress_percent: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl BuildProgress {
    /// Create a progress event stamped with the current time
    pub fn new(
        build_id: impl Into<String>,
        status: BuildStatus,
        progress_percent: u8,
        message: impl Into<String>,
    ) -> Self {
        Self {
            build_id: build_id.into(),
            status,
            progress_percent: progress_percent.min(100),
            message: message.into(),
            output_path: None,
            size_bytes: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the produced artifact
    pub fn with_artifact(mut self, artifact: &Artifact) -> Self {
        self.output_path = Some(artifact.path.clone());
        self.size_bytes = Some(artifact.size_bytes);
        self
    }

    /// Attach an error description
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Check if this is the last event of its job
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Serialize as a single JSON line
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
