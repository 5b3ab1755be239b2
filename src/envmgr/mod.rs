//! Package environment management.
//!
//! The [`EnvironmentManager`] trait is the seam between the package
//! environment provider and the external tool that builds environments.
//! [`CondaManager`] drives the `conda` executable.

pub mod conda;

pub use conda::{CondaManager, PackageSpec};

use std::path::Path;

use thiserror::Error;

use crate::frontend::Frontend;
use crate::requirements::EnvSpec;

/// Failure reported by an environment manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct EnvManagerError(pub String);

impl EnvManagerError {
    /// Create an error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// How an existing environment differs from its env spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentDeviations {
    /// One-line description; `OK` when nothing deviates.
    pub summary: String,
    /// Declared packages that are not installed.
    pub missing_packages: Vec<String>,
    /// Declared packages installed at a different version or build.
    pub wrong_version_packages: Vec<String>,
    /// The prefix does not hold an environment at all.
    pub broken: bool,
}

impl EnvironmentDeviations {
    /// Deviations of an environment that matches its spec.
    pub fn none() -> Self {
        Self {
            summary: "OK".to_string(),
            missing_packages: Vec::new(),
            wrong_version_packages: Vec::new(),
            broken: false,
        }
    }

    /// Whether the environment matches its spec.
    pub fn ok(&self) -> bool {
        !self.broken && self.missing_packages.is_empty() && self.wrong_version_packages.is_empty()
    }
}

/// Builds and inspects package environments.
pub trait EnvironmentManager: Send + Sync {
    /// Compare the environment at `prefix` with `spec`.
    fn find_environment_deviations(
        &self,
        prefix: &Path,
        spec: &EnvSpec,
    ) -> Result<EnvironmentDeviations, EnvManagerError>;

    /// Install or create packages until `prefix` matches `spec`.
    ///
    /// With `create` false a missing environment is an error rather than
    /// something to build. Tool output is streamed to `frontend`.
    fn fix_environment_deviations(
        &self,
        prefix: &Path,
        spec: &EnvSpec,
        deviations: &EnvironmentDeviations,
        create: bool,
        frontend: &mut dyn Frontend,
    ) -> Result<(), EnvManagerError>;
}
