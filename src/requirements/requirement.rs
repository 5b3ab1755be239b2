//! Requirement definitions.
//!
//! A [`Requirement`] names the environment variable that must resolve to a
//! usable value, carries the manifest options for it, and says which kind
//! of provider knows how to satisfy it.

use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::download::DownloadSpec;
use super::registry::ProviderKind;

/// Environment variable holding the passphrase used for encrypted values.
pub const MASTER_PASSWORD_VAR: &str = "KAPSEL_MASTER_PASSWORD";

/// Environment variable naming the active package environment.
pub const CONDA_PREFIX_VAR: &str = "CONDA_PREFIX";

/// Companion variable set alongside [`CONDA_PREFIX_VAR`].
pub const CONDA_DEFAULT_ENV_VAR: &str = "CONDA_DEFAULT_ENV";

/// Environment variable pointing at the project directory.
pub const PROJECT_DIR_VAR: &str = "PROJECT_DIR";

const SECRET_SUFFIXES: &[&str] = &["_PASSWORD", "_SECRET_KEY", "_SECRET"];

/// A value stored in the local state or given as a manifest default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    /// A literal string.
    Plain(String),
    /// A secret package that decrypts with the passphrase found in `key`.
    Encrypted { key: String, encrypted: String },
}

impl StoredValue {
    /// Read a stored value from YAML; scalars are stringified.
    pub fn from_yaml(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Plain(s.clone())),
            Value::Number(n) => Some(Self::Plain(n.to_string())),
            Value::Bool(b) => Some(Self::Plain(b.to_string())),
            Value::Mapping(map) => {
                let key = map.get("key").and_then(Value::as_str)?;
                let encrypted = map.get("encrypted").and_then(Value::as_str)?;
                Some(Self::Encrypted {
                    key: key.to_string(),
                    encrypted: encrypted.to_string(),
                })
            }
            _ => None,
        }
    }

    /// Convert back to YAML for saving.
    pub fn to_yaml(&self) -> Value {
        match self {
            Self::Plain(s) => Value::String(s.clone()),
            Self::Encrypted { key, encrypted } => {
                let mut map = Mapping::new();
                map.insert("key".into(), Value::String(key.clone()));
                map.insert("encrypted".into(), Value::String(encrypted.clone()));
                Value::Mapping(map)
            }
        }
    }

    /// The passphrase variable, for secret references.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Plain(_) => None,
            Self::Encrypted { key, .. } => Some(key),
        }
    }

    /// Text suitable for showing the user; secret references are masked.
    pub fn display(&self) -> String {
        match self {
            Self::Plain(s) => s.clone(),
            Self::Encrypted { key, .. } => format!("<encrypted with {}>", key),
        }
    }
}

/// A named package environment declared by the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSpec {
    /// Name of the environment.
    pub name: String,
    /// Package specs such as `numpy`, `python=3.11` or `bokeh=3.4=py_0`.
    pub packages: Vec<String>,
    /// Extra channels to search.
    pub channels: Vec<String>,
    /// Human-readable description.
    pub description: Option<String>,
}

impl EnvSpec {
    /// Create an env spec with no channels or description.
    pub fn new(name: impl Into<String>, packages: Vec<String>) -> Self {
        Self {
            name: name.into(),
            packages,
            channels: Vec::new(),
            description: None,
        }
    }

    /// Default prefix of this environment inside the project.
    pub fn path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join("envs").join(&self.name)
    }
}

/// Manifest options attached to a requirement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequirementOptions {
    /// Value used when nothing else provides one.
    pub default: Option<StoredValue>,
    /// Explicit encrypted flag; inferred from the name when absent.
    pub encrypted: Option<bool>,
    /// Overrides the generated description.
    pub description: Option<String>,
    /// Anything else the manifest carried.
    pub extras: BTreeMap<String, Value>,
}

/// Which provider handles a requirement, plus kind-specific data.
#[derive(Debug, Clone, PartialEq)]
pub enum RequirementKind {
    /// A plain environment variable.
    EnvVar,
    /// The passphrase used to decrypt encrypted values.
    MasterPassword,
    /// A package environment built from one of the env specs.
    CondaEnv { env_specs: Vec<EnvSpec> },
    /// A Redis URL, discovered or started locally.
    Redis,
    /// A downloaded file.
    Download(DownloadSpec),
}

/// A named condition that must hold before the project can run.
#[derive(Debug, Clone, PartialEq)]
pub struct Requirement {
    /// The environment variable this requirement resolves.
    pub env_var: String,
    /// Manifest options.
    pub options: RequirementOptions,
    /// Kind of requirement.
    pub kind: RequirementKind,
}

impl Requirement {
    /// Create a requirement.
    pub fn new(env_var: impl Into<String>, kind: RequirementKind, options: RequirementOptions) -> Self {
        Self {
            env_var: env_var.into(),
            options,
            kind,
        }
    }

    /// A plain environment variable requirement with default options.
    pub fn env_var(env_var: impl Into<String>) -> Self {
        Self::new(env_var, RequirementKind::EnvVar, RequirementOptions::default())
    }

    /// The master password requirement.
    pub fn master_password() -> Self {
        Self::new(
            MASTER_PASSWORD_VAR,
            RequirementKind::MasterPassword,
            RequirementOptions::default(),
        )
    }

    /// A package environment requirement over `env_specs`.
    pub fn conda_env(env_specs: Vec<EnvSpec>) -> Self {
        Self::new(
            CONDA_PREFIX_VAR,
            RequirementKind::CondaEnv { env_specs },
            RequirementOptions::default(),
        )
    }

    /// The provider that handles this requirement.
    pub fn provider_kind(&self) -> ProviderKind {
        match self.kind {
            RequirementKind::EnvVar => ProviderKind::EnvVar,
            RequirementKind::MasterPassword => ProviderKind::MasterPassword,
            RequirementKind::CondaEnv { .. } => ProviderKind::CondaEnv,
            RequirementKind::Redis => ProviderKind::Redis,
            RequirementKind::Download(_) => ProviderKind::Download,
        }
    }

    /// Whether values for this requirement are kept encrypted.
    pub fn encrypted(&self) -> bool {
        if matches!(self.kind, RequirementKind::MasterPassword) {
            return false;
        }
        match self.options.encrypted {
            Some(flag) => flag,
            None => SECRET_SUFFIXES
                .iter()
                .any(|suffix| self.env_var.ends_with(suffix)),
        }
    }

    /// Short human-readable name.
    pub fn title(&self) -> String {
        match &self.kind {
            RequirementKind::MasterPassword => "A password used to encrypt other passwords".to_string(),
            RequirementKind::CondaEnv { .. } => "A Conda environment".to_string(),
            RequirementKind::Redis => "A running Redis server, located by a redis: URL".to_string(),
            RequirementKind::Download(_) | RequirementKind::EnvVar => self.env_var.clone(),
        }
    }

    /// Sentence describing what is required.
    pub fn description(&self) -> String {
        if let Some(description) = &self.options.description {
            return description.clone();
        }
        match &self.kind {
            RequirementKind::CondaEnv { .. } => {
                "The project needs a Conda environment containing all required packages.".to_string()
            }
            RequirementKind::Download(spec) => match &spec.description {
                Some(description) => description.clone(),
                None => format!("A downloaded file which is referenced by {}.", self.env_var),
            },
            RequirementKind::Redis => format!(
                "A running Redis server, located by a redis: URL set as {}.",
                self.env_var
            ),
            _ => format!("{} environment variable must be set.", self.env_var),
        }
    }

    /// Env specs of a package environment requirement.
    pub fn env_specs(&self) -> &[EnvSpec] {
        match &self.kind {
            RequirementKind::CondaEnv { env_specs } => env_specs,
            _ => &[],
        }
    }

    /// Look up an env spec by name.
    pub fn env_spec(&self, name: &str) -> Option<&EnvSpec> {
        self.env_specs().iter().find(|spec| spec.name == name)
    }

    /// Download details of a download requirement.
    pub fn download_spec(&self) -> Option<&DownloadSpec> {
        match &self.kind {
            RequirementKind::Download(spec) => Some(spec),
            _ => None,
        }
    }
}
