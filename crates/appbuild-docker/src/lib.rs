//! Container runtime integration for appbuild
//!
//! This crate provides the isolated execution environment for build jobs:
//! creating resource-capped containers, streaming their output, waiting for
//! exit, and terminating them by name.

pub mod client;
pub mod container;
pub mod error;
pub mod image;
pub mod service;
pub mod types;

pub use client::{DockerConfig, DockerService};
pub use container::{ContainerSpec, VolumeMount};
pub use error::{DockerError, Result};
pub use image::ImageManager;
pub use service::{ContainerRuntime, LogOutput, LogStream};
pub use types::{ImageBuildContext, ResourceLimits, MANAGED_LABEL};
