//! Requirement status types.
//!
//! These types snapshot whether a requirement currently holds and why not.
//! They are produced by providers and consumed by the prepare orchestrator.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::registry::ProviderKind;
use super::requirement::Requirement;

/// Where a provider takes a requirement's value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// A user override in the local state.
    Variables,
    /// The caller's environment.
    Environ,
    /// The manifest default.
    Default,
    /// Nowhere yet.
    Unset,
    /// The package environment active when prepare started.
    Inherited,
    /// A project-local package environment.
    Project,
    /// Look for a project instance, then a system one.
    FindAll,
    /// Only a project instance.
    FindProject,
    /// Only the system instance.
    FindSystem,
    /// Fetch the file.
    Download,
}

impl ConfigSource {
    /// Name used in local state and prompts.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Variables => "variables",
            Self::Environ => "environ",
            Self::Default => "default",
            Self::Unset => "unset",
            Self::Inherited => "inherited",
            Self::Project => "project",
            Self::FindAll => "find_all",
            Self::FindProject => "find_project",
            Self::FindSystem => "find_system",
            Self::Download => "download",
        }
    }

    /// Whether a project-scoped service may satisfy this source.
    pub fn allows_project(&self) -> bool {
        matches!(self, Self::FindAll | Self::FindProject)
    }

    /// Whether the system-wide service may satisfy this source.
    pub fn allows_system(&self) -> bool {
        matches!(self, Self::FindAll | Self::FindSystem)
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "variables" => Ok(Self::Variables),
            "environ" => Ok(Self::Environ),
            "default" => Ok(Self::Default),
            "unset" => Ok(Self::Unset),
            "inherited" => Ok(Self::Inherited),
            "project" => Ok(Self::Project),
            "find_all" => Ok(Self::FindAll),
            "find_project" => Ok(Self::FindProject),
            "find_system" => Ok(Self::FindSystem),
            "download" => Ok(Self::Download),
            _ => Err(format!("unknown config source: {}", s)),
        }
    }
}

/// A provider's reading of the current configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Where the value comes from.
    pub source: ConfigSource,
    /// The value, when one is known.
    pub value: Option<String>,
    /// Selected env spec, for package environments.
    pub env_name: Option<String>,
    /// Provider-specific fields such as `lower_port`.
    pub extras: BTreeMap<String, String>,
}

impl ProviderConfig {
    /// A config with the given source and nothing else.
    pub fn new(source: ConfigSource) -> Self {
        Self {
            source,
            value: None,
            env_name: None,
            extras: BTreeMap::new(),
        }
    }

    /// Set the value.
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Read an integer extra.
    pub fn extra_u16(&self, name: &str) -> Option<u16> {
        self.extras.get(name).and_then(|v| v.parse().ok())
    }
}

/// Snapshot of a requirement's configuration and blockers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAnalysis {
    /// Configuration as read from local state and environment.
    pub config: ProviderConfig,
    /// Variables that must be set before this requirement can be configured.
    pub missing_env_vars_to_configure: Vec<String>,
    /// Variables that must be set before this requirement can be provided.
    pub missing_env_vars_to_provide: Vec<String>,
    /// URL of a previously started project service that still answers.
    pub existing_scoped_instance_url: Option<String>,
    /// Whether the system default service answers.
    pub default_system_exists: bool,
    /// An already-downloaded file.
    pub existing_filename: Option<PathBuf>,
    /// Why the package environment does not match its spec.
    pub env_problem: Option<String>,
}

impl ProviderAnalysis {
    /// Analysis with no provider-specific fields.
    pub fn new(
        config: ProviderConfig,
        missing_env_vars_to_configure: Vec<String>,
        missing_env_vars_to_provide: Vec<String>,
    ) -> Self {
        Self {
            config,
            missing_env_vars_to_configure,
            missing_env_vars_to_provide,
            existing_scoped_instance_url: None,
            default_system_exists: false,
            existing_filename: None,
            env_problem: None,
        }
    }
}

/// Errors from a single `provide()` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvideResult {
    errors: Vec<String>,
}

impl ProvideResult {
    /// A result with no errors.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A result carrying `errors`.
    pub fn with_errors(errors: Vec<String>) -> Self {
        Self { errors }
    }

    /// New result with `errors` appended.
    pub fn copy_with_additions(&self, errors: Vec<String>) -> Self {
        if errors.is_empty() {
            return self.clone();
        }
        let mut combined = self.errors.clone();
        combined.extend(errors);
        Self { errors: combined }
    }

    /// The collected errors.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Whether any error was recorded.
    pub fn failed(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Outcome of an operation that is not a full prepare, such as `unprovide`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleStatus {
    /// Whether it worked.
    pub success: bool,
    /// One-line summary.
    pub description: String,
    /// Details when it did not work.
    pub errors: Vec<String>,
}

impl SimpleStatus {
    /// A successful status.
    pub fn ok(description: impl Into<String>) -> Self {
        Self {
            success: true,
            description: description.into(),
            errors: Vec::new(),
        }
    }

    /// A failed status.
    pub fn failed(description: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            success: false,
            description: description.into(),
            errors,
        }
    }
}

/// How aggressively providers act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProvideMode {
    /// Act conservatively; never start throwaway services.
    Production,
    /// May start local services.
    #[default]
    Development,
    /// Only report; never create anything.
    Check,
}

impl ProvideMode {
    /// Name used on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Development => "development",
            Self::Check => "check",
        }
    }
}

impl fmt::Display for ProvideMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProvideMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" => Ok(Self::Production),
            "development" => Ok(Self::Development),
            "check" => Ok(Self::Check),
            _ => Err(format!("unknown provide mode: {}", s)),
        }
    }
}

/// Configuration forced by the caller for one prepare.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserConfigOverrides {
    /// Env spec chosen on the command line.
    pub env_spec_name: Option<String>,
    /// Package environment that was active when prepare started.
    pub inherited_env: Option<String>,
}

impl UserConfigOverrides {
    /// Overrides forcing an env spec.
    pub fn with_env_spec(name: impl Into<String>) -> Self {
        Self {
            env_spec_name: Some(name.into()),
            inherited_env: None,
        }
    }
}

/// Whether a requirement holds, and why not.
#[derive(Debug, Clone, PartialEq)]
pub struct RequirementStatus {
    /// The requirement this is the status of.
    pub requirement: Requirement,
    /// Provider that produced the analysis.
    pub provider: ProviderKind,
    /// The provider's analysis.
    pub analysis: ProviderAnalysis,
    /// Whether the requirement currently holds.
    pub has_been_provided: bool,
    /// How it holds or why it does not.
    pub status_description: String,
    /// Result of the latest `provide()`, if any.
    pub latest_provide_result: Option<ProvideResult>,
    /// Env spec the status was computed against.
    pub env_spec_name: Option<String>,
}

impl RequirementStatus {
    /// Errors from the latest provide.
    pub fn errors(&self) -> &[String] {
        self.latest_provide_result
            .as_ref()
            .map(ProvideResult::errors)
            .unwrap_or_default()
    }
}
