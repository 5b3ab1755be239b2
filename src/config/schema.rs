//! Manifest schema for `kapsel.yml`.
//!
//! Sections whose entries become requirements are kept as raw YAML
//! mappings so declaration order survives parsing.

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

/// Root of a `kapsel.yml` manifest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ManifestFile {
    /// Project name, for display.
    pub name: Option<String>,

    /// Either a list of variable names or a mapping of name to options.
    pub variables: Value,

    /// Service name to `redis` or `{type: redis, default: ...}`.
    pub services: Mapping,

    /// Download name to a URL or a download mapping.
    pub downloads: Mapping,

    /// Env spec name to [`EnvSpecConfig`].
    pub env_specs: Mapping,

    /// Command name to [`CommandConfig`].
    pub commands: Mapping,
}

/// One entry of `env_specs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvSpecConfig {
    /// Package specs.
    pub packages: Vec<String>,

    /// Extra channels.
    pub channels: Vec<String>,

    /// Human-readable description.
    pub description: Option<String>,
}

/// One entry of `commands`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandConfig {
    /// Shell command line used on Unix.
    pub unix: Option<String>,

    /// Shell command line used on Windows.
    pub windows: Option<String>,

    /// Human-readable description.
    pub description: Option<String>,

    /// Env spec to prepare for this command.
    pub env_spec: Option<String>,
}

/// Options of one entry of a mapping-style `variables` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct VariableConfig {
    /// Default value: a scalar or a `{key, encrypted}` reference.
    pub default: Option<Value>,

    /// Whether to keep values encrypted.
    pub encrypted: Option<bool>,

    /// Human-readable description.
    pub description: Option<String>,

    /// Anything else.
    #[serde(flatten)]
    pub extras: Mapping,
}
