//! Docker-related types and structures

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Label set on every container the supervisor creates
pub const MANAGED_LABEL: &str = "appbuild.managed";

/// Docker image build context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBuildContext {
    /// Directory sent to the daemon
    pub context_dir: PathBuf,
    /// Dockerfile path relative to `context_dir`
    pub dockerfile: String,
    /// Build arguments
    pub build_args: HashMap<String, String>,
    /// Labels to apply
    pub labels: HashMap<String, String>,
}

impl ImageBuildContext {
    /// Create a build context using `context_dir/Dockerfile`
    pub fn new(context_dir: impl Into<PathBuf>) -> Self {
        Self {
            context_dir: context_dir.into(),
            dockerfile: "Dockerfile".to_string(),
            build_args: HashMap::new(),
            labels: HashMap::new(),
        }
    }

    /// Use a different Dockerfile inside the context
    pub fn with_dockerfile(mut self, dockerfile: impl Into<String>) -> Self {
        self.dockerfile = dockerfile.into();
        self
    }
}

/// Container resource limits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit in bytes
    pub memory: Option<i64>,
    /// CPU limit in units of 10^-9 CPUs
    pub nano_cpus: Option<i64>,
    /// Network mode (bridge, none, host, or a network name)
    pub network_mode: Option<String>,
}
