//! Core types for the appbuild build supervisor
//!
//! This crate provides the build job vocabulary (types, modes, statuses and
//! progress events) shared by the supervisor, the container runtime layer and
//! the CLI.

pub mod build;
pub mod error;

pub use build::{Artifact, BuildMode, BuildOptions, BuildProgress, BuildStatus, BuildType};
pub use error::{Error, Result};
