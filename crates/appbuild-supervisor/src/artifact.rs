//! Artifact lookup in a job's output directory

use std::path::{Path, PathBuf};

use appbuild_core::{Artifact, BuildType};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{BuildError, Result};

/// Locates the file a completed build left in its output directory
#[derive(Debug, Clone, Default)]
pub struct ArtifactLocator;

impl ArtifactLocator {
    /// Create a new locator
    pub fn new() -> Self {
        Self
    }

    /// Find the artifact of `build_id`, if any
    ///
    /// Only direct children of `output_dir` are considered. A candidate's file
    /// name must contain `build_id` and end with the extension mapped to
    /// `build_type`. When several files match, the largest wins and ties
    /// break on the lexicographically smallest name, so the result does not
    /// depend on directory iteration order.
    pub fn locate(
        &self,
        output_dir: &Path,
        build_id: &str,
        build_type: BuildType,
    ) -> Result<Option<Artifact>> {
        if !output_dir.is_dir() {
            return Ok(None);
        }

        let mut best: Option<(PathBuf, u64)> = None;

        for entry in WalkDir::new(output_dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| BuildError::Io(e.into()))?;

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if !matches_artifact(path, build_id, build_type) {
                continue;
            }

            let size = entry.metadata().map_err(|e| BuildError::Io(e.into()))?.len();
            debug!("Artifact candidate {} ({} bytes)", path.display(), size);

            let better = match &best {
                None => true,
                Some((best_path, best_size)) => {
                    size > *best_size || (size == *best_size && path < best_path.as_path())
                }
            };
            if better {
                best = Some((path.to_path_buf(), size));
            }
        }

        Ok(best.map(|(path, size_bytes)| Artifact { path, size_bytes }))
    }

    /// Like [`locate`](Self::locate), but a missing artifact is an error
    pub fn require(
        &self,
        output_dir: &Path,
        build_id: &str,
        build_type: BuildType,
    ) -> Result<Artifact> {
        self.locate(output_dir, build_id, build_type)?
            .ok_or_else(|| BuildError::ArtifactNotFound { build_id: build_id.to_string() })
    }
}

/// Check a path against the naming rule for `build_type`
pub fn matches_artifact(path: &Path, build_id: &str, build_type: BuildType) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let extension = path.extension().and_then(|e| e.to_str());

    name.contains(build_id) && extension == Some(build_type.artifact_extension())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn touch(dir: &Path, name: &str, size: usize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![0u8; size]).unwrap();
        path
    }

    #[test]
    fn test_locates_matching_artifact() {
        let dir = TempDir::new().unwrap();
        let expected = touch(dir.path(), "b1-app.apk", 128);
        touch(dir.path(), "b1-app.aab", 512);
        touch(dir.path(), "b2-app.apk", 1024);

        let artifact = ArtifactLocator::new()
            .locate(dir.path(), "b1", BuildType::Package)
            .unwrap()
            .unwrap();
        assert_eq!(artifact.path, expected);
        assert_eq!(artifact.size_bytes, 128);
    }

    #[test]
    fn test_extension_mapping_is_exact() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "b1-app.aab", 10);
        touch(dir.path(), "b1-app.zip", 10);
        touch(dir.path(), "b1-app.ipa", 10);
        touch(dir.path(), "b1-app.apk.tmp", 10);

        let locator = ArtifactLocator::new();
        assert!(locator.locate(dir.path(), "b1", BuildType::Package).unwrap().is_none());
        for build_type in [BuildType::Bundle, BuildType::SourceArchive, BuildType::IosPackage] {
            let artifact = locator.locate(dir.path(), "b1", build_type).unwrap().unwrap();
            assert!(matches_artifact(&artifact.path, "b1", build_type));
        }
    }

    #[test]
    fn test_missing_artifact() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("b1-app.apk")).unwrap();
        touch(dir.path(), "other.apk", 10);

        let locator = ArtifactLocator::new();
        let result = locator.require(dir.path(), "b1", BuildType::Package);
        assert!(matches!(result, Err(BuildError::ArtifactNotFound { .. })));

        let missing_dir = dir.path().join("missing");
        assert!(locator.locate(&missing_dir, "b1", BuildType::Package).unwrap().is_none());
    }

    #[test]
    fn test_nested_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("intermediates")).unwrap();
        touch(&dir.path().join("intermediates"), "b1-app.apk", 10);

        let found = ArtifactLocator::new().locate(dir.path(), "b1", BuildType::Package).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_largest_candidate_wins() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "b1-app-unsigned.apk", 10);
        let signed = touch(dir.path(), "b1-app.apk", 20);

        let artifact = ArtifactLocator::new()
            .require(dir.path(), "b1", BuildType::Package)
            .unwrap();
        assert_eq!(artifact.path, signed);
    }
}
