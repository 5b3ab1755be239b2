//! Requirements and their status model.
//!
//! A project declares an ordered list of [`Requirement`]s. Each one is
//! handled by the provider its [`ProviderKind`] selects from the
//! [`RequirementsRegistry`]. Providers report back through the types in
//! [`status`].
//!
//! # Modules
//!
//! - [`requirement`] - Requirement, kind, options and stored values
//! - [`download`] - Download item parsing and checksums
//! - [`status`] - Config, analysis, status and result types
//! - [`registry`] - Provider kinds and the lookup table

pub mod download;
pub mod registry;
pub mod requirement;
pub mod status;

use std::collections::HashMap;

pub use download::{DownloadSpec, HashAlgorithm, StreamingHasher};
pub use registry::{
    ProviderKind, RequirementsRegistry, RequirementsRegistryBuilder, DEFAULT_HTTP_TIMEOUT,
};
pub use requirement::{
    EnvSpec, Requirement, RequirementKind, RequirementOptions, StoredValue,
    CONDA_DEFAULT_ENV_VAR, CONDA_PREFIX_VAR, MASTER_PASSWORD_VAR, PROJECT_DIR_VAR,
};
pub use status::{
    ConfigSource, ProvideMode, ProvideResult, ProviderAnalysis, ProviderConfig,
    RequirementStatus, SimpleStatus, UserConfigOverrides,
};

/// A process environment: variable name to value.
pub type Environ = HashMap<String, String>;
