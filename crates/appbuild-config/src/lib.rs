//! Configuration management for the appbuild build supervisor
//!
//! This crate handles YAML configuration parsing, validation,
//! and environment variable substitution.

use std::path::{Path, PathBuf};

use appbuild_core::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Build image settings
    pub image: ImageConfig,

    /// Resource ceilings applied to every build container
    pub resources: ResourceConfig,

    /// Build job defaults
    pub build: BuildDefaults,

    /// Container daemon connection
    pub docker: DockerConnection,
}

/// Build image configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Image tag the build containers run
    pub tag: String,

    /// Dockerfile used when the image is missing
    pub dockerfile: Option<PathBuf>,

    /// Build context directory (defaults to the Dockerfile's directory)
    pub context_dir: Option<PathBuf>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self { tag: "appbuild-builder:latest".to_string(), dockerfile: None, context_dir: None }
    }
}

impl ImageConfig {
    /// Directory sent to the daemon as the image build context
    pub fn build_context_dir(&self) -> Option<PathBuf> {
        self.context_dir.clone().or_else(|| {
            self.dockerfile
                .as_ref()
                .and_then(|d| d.parent().map(Path::to_path_buf))
        })
    }
}

/// Resource ceilings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// CPU share, in whole or fractional CPUs
    pub cpus: f64,

    /// Memory ceiling in MiB
    pub memory_mb: u64,

    /// Container network mode
    pub network: String,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self { cpus: 2.0, memory_mb: 4096, network: "bridge".to_string() }
    }
}

/// Build job defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildDefaults {
    /// Deadline used when a request does not carry one
    pub default_timeout_ms: u64,

    /// Delay between graceful stop and forced kill
    pub grace_period_secs: u64,

    /// Characters of stdout/stderr kept for failure diagnostics
    pub log_tail_chars: usize,
}

impl Default for BuildDefaults {
    fn default() -> Self {
        Self {
            default_timeout_ms: appbuild_core::build::DEFAULT_TIMEOUT_MS,
            grace_period_secs: 5,
            log_tail_chars: 500,
        }
    }
}

/// Container daemon connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConnection {
    /// Socket path (None for the platform default)
    pub socket: Option<String>,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for DockerConnection {
    fn default() -> Self {
        Self { socket: None, connect_timeout_secs: 120 }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::ConfigError {
            message: format!("Failed to read config file {path:?}: {e}"),
        })?;

        let mut config = Self::from_yaml(&content)?;

        // Relative Dockerfile paths are resolved against the config file
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from YAML text and expand environment variables
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigError { message: format!("Failed to parse YAML: {e}") })?;

        config.expand_env_vars()?;

        Ok(config)
    }

    /// Render the configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::ConfigError { message: format!("Failed to render YAML: {e}") })
    }

    /// Expand environment variables in paths
    fn expand_env_vars(&mut self) -> Result<()> {
        if let Some(dockerfile) = &self.image.dockerfile {
            self.image.dockerfile = Some(expand_path(dockerfile)?);
        }
        if let Some(context_dir) = &self.image.context_dir {
            self.image.context_dir = Some(expand_path(context_dir)?);
        }
        if let Some(socket) = &self.docker.socket {
            let expanded = expand_path(Path::new(socket))?;
            self.docker.socket = Some(expanded.to_string_lossy().into_owned());
        }

        Ok(())
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        for path in [&mut self.image.dockerfile, &mut self.image.context_dir]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.image.tag.trim().is_empty() {
            return Err(Error::ConfigError { message: "image.tag cannot be empty".to_string() });
        }

        if let Some(dockerfile) = &self.image.dockerfile {
            if !dockerfile.exists() {
                return Err(Error::ConfigError {
                    message: format!("Dockerfile does not exist: {dockerfile:?}"),
                });
            }
        }

        if self.resources.cpus.is_nan() || self.resources.cpus <= 0.0 {
            return Err(Error::ConfigError {
                message: "resources.cpus must be greater than zero".to_string(),
            });
        }

        if self.resources.memory_mb == 0 {
            return Err(Error::ConfigError {
                message: "resources.memory_mb must be greater than zero".to_string(),
            });
        }

        if self.build.default_timeout_ms == 0 {
            return Err(Error::ConfigError {
                message: "build.default_timeout_ms must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Memory ceiling in bytes
    pub fn memory_bytes(&self) -> i64 {
        (self.resources.memory_mb as i64).saturating_mul(1024 * 1024)
    }

    /// CPU ceiling in units of 10^-9 CPUs
    pub fn nano_cpus(&self) -> i64 {
        (self.resources.cpus * 1e9) as i64
    }
}

/// Expand environment variables in a path
fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path.to_string_lossy();
    let env_var_re = Regex::new(r"\$\{([^}]+)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .map_err(|e| Error::ConfigError { message: format!("Invalid regex: {e}") })?;

    let mut result = path_str.to_string();
    for cap in env_var_re.captures_iter(&path_str) {
        let Some(var_name) = cap.get(1).or_else(|| cap.get(2)).map(|m| m.as_str()) else {
            continue;
        };
        let var_value = std::env::var(var_name).map_err(|_| Error::ConfigError {
            message: format!("Environment variable not found: {var_name}"),
        })?;

        result = result.replace(&cap[0], &var_value);
    }

    Ok(PathBuf::from(result))
}

#[cfg(test)]
mod tests {
    use std::env;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_expand_path() {
        env::set_var("APPBUILD_TEST_VAR", "/test/path");

        let path = PathBuf::from("${APPBUILD_TEST_VAR}/sub");
        let expanded = expand_path(&path).unwrap();
        assert_eq!(expanded, PathBuf::from("/test/path/sub"));

        let path = PathBuf::from("$APPBUILD_TEST_VAR/sub");
        let expanded = expand_path(&path).unwrap();
        assert_eq!(expanded, PathBuf::from("/test/path/sub"));

        assert!(expand_path(Path::new("${APPBUILD_DEFINITELY_UNSET}/x")).is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.build.default_timeout_ms, 600_000);
        assert_eq!(config.build.grace_period_secs, 5);
        assert_eq!(config.build.log_tail_chars, 500);
        assert_eq!(config.memory_bytes(), 4096 * 1024 * 1024);
        assert_eq!(config.nano_cpus(), 2_000_000_000);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = Config::from_yaml("resources:\n  cpus: 1.5\n").unwrap();
        assert_eq!(config.resources.cpus, 1.5);
        assert_eq!(config.resources.memory_mb, 4096);
        assert_eq!(config.image.tag, "appbuild-builder:latest");
    }

    #[test]
    fn test_config_validation() {
        let temp_dir = TempDir::new().unwrap();
        let dockerfile = temp_dir.path().join("Dockerfile");
        std::fs::write(&dockerfile, "FROM node:20").unwrap();

        let mut config = Config::default();
        config.image.dockerfile = Some(dockerfile.clone());
        assert!(config.validate().is_ok());
        assert_eq!(config.image.build_context_dir(), Some(temp_dir.path().to_path_buf()));

        config.image.dockerfile = Some(temp_dir.path().join("missing"));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.resources.memory_mb = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.resources.cpus = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_resolves_relative_dockerfile() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("docker")).unwrap();
        std::fs::write(temp_dir.path().join("docker/Dockerfile"), "FROM node:20").unwrap();

        let config_path = temp_dir.path().join("appbuild.yaml");
        std::fs::write(&config_path, "image:\n  tag: builder:test\n  dockerfile: docker/Dockerfile\n")
            .unwrap();

        let config = Config::from_file(&config_path).unwrap();
        assert_eq!(config.image.tag, "builder:test");
        assert_eq!(config.image.dockerfile, Some(temp_dir.path().join("docker/Dockerfile")));
    }

    #[test]
    fn test_yaml_round_trip_of_defaults() {
        let yaml = Config::default().to_yaml().unwrap();
        assert_eq!(Config::from_yaml(&yaml).unwrap(), Config::default());
    }
}
