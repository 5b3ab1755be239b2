//! Provider registry.
//!
//! Maps each [`ProviderKind`] to its provider implementation. The set of
//! kinds is closed; adding one means extending the enum and the table
//! built in [`RequirementsRegistryBuilder::build`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::envmgr::{CondaManager, EnvironmentManager};
use crate::error::{KapselError, Result};
use crate::net::{SocketProbe, TcpProbe};
use crate::providers::{
    CondaEnvProvider, DownloadProvider, EnvVarProvider, MasterPasswordProvider, Provider,
    RedisProvider,
};
use crate::secrets::keychain;
use crate::secrets::SecretStore;
use crate::shell::{CommandRunner, SystemRunner};

/// Default timeout for a whole download request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// The closed set of provider kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    EnvVar,
    MasterPassword,
    CondaEnv,
    Redis,
    Download,
}

impl ProviderKind {
    /// Every kind, in table order.
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::EnvVar,
        ProviderKind::MasterPassword,
        ProviderKind::CondaEnv,
        ProviderKind::Redis,
        ProviderKind::Download,
    ];

    /// Name used in lookups and messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::EnvVar => "env_var",
            Self::MasterPassword => "master_password",
            Self::CondaEnv => "conda_env",
            Self::Redis => "redis",
            Self::Download => "download",
        }
    }

    /// Look up a kind by its name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Whether prompting the user for a value can satisfy this kind.
    pub fn is_user_configurable(&self) -> bool {
        matches!(self, Self::EnvVar | Self::MasterPassword | Self::Redis)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Holds one provider per kind.
pub struct RequirementsRegistry {
    env_var: Arc<dyn Provider>,
    master_password: Arc<dyn Provider>,
    conda_env: Arc<dyn Provider>,
    redis: Arc<dyn Provider>,
    download: Arc<dyn Provider>,
}

impl RequirementsRegistry {
    /// Registry backed by the real keychain, network, processes and HTTP.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring collaborators.
    pub fn builder() -> RequirementsRegistryBuilder {
        RequirementsRegistryBuilder::default()
    }

    /// Provider for a kind.
    pub fn provider(&self, kind: ProviderKind) -> Arc<dyn Provider> {
        let provider = match kind {
            ProviderKind::EnvVar => &self.env_var,
            ProviderKind::MasterPassword => &self.master_password,
            ProviderKind::CondaEnv => &self.conda_env,
            ProviderKind::Redis => &self.redis,
            ProviderKind::Download => &self.download,
        };
        Arc::clone(provider)
    }

    /// Provider registered under `name`.
    pub fn find_provider_by_name(&self, name: &str) -> Result<Arc<dyn Provider>> {
        ProviderKind::from_name(name)
            .map(|kind| self.provider(kind))
            .ok_or_else(|| KapselError::UnknownRequirementKind {
                kind: name.to_string(),
            })
    }

    /// All registered names.
    pub fn known_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = ProviderKind::ALL.iter().map(ProviderKind::name).collect();
        names.sort_unstable();
        names
    }
}

impl Default for RequirementsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`RequirementsRegistry`] with injectable collaborators.
#[derive(Default)]
pub struct RequirementsRegistryBuilder {
    secrets: Option<Arc<dyn SecretStore>>,
    probe: Option<Arc<dyn SocketProbe>>,
    runner: Option<Arc<dyn CommandRunner>>,
    env_manager: Option<Arc<dyn EnvironmentManager>>,
    http_timeout: Option<Duration>,
}

impl RequirementsRegistryBuilder {
    /// Use this secret store instead of the shared keychain.
    pub fn secrets(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Use this socket probe instead of real TCP connections.
    pub fn socket_probe(mut self, probe: Arc<dyn SocketProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Use this command runner instead of spawning processes.
    pub fn command_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Use this environment manager instead of conda.
    pub fn environment_manager(mut self, manager: Arc<dyn EnvironmentManager>) -> Self {
        self.env_manager = Some(manager);
        self
    }

    /// Timeout for download requests.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    /// Build the registry.
    pub fn build(self) -> RequirementsRegistry {
        let secrets = self.secrets.unwrap_or_else(keychain::shared);
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(TcpProbe::default()));
        let runner = self.runner.unwrap_or_else(|| Arc::new(SystemRunner));
        let env_manager = self
            .env_manager
            .unwrap_or_else(|| Arc::new(CondaManager::new(Arc::clone(&runner))));
        let http_timeout = self.http_timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT);

        let env_var = EnvVarProvider::new(Arc::clone(&secrets));

        RequirementsRegistry {
            env_var: Arc::new(env_var.clone()),
            master_password: Arc::new(MasterPasswordProvider::new(secrets)),
            conda_env: Arc::new(CondaEnvProvider::new(env_var.clone(), env_manager)),
            redis: Arc::new(RedisProvider::new(env_var.clone(), probe, runner)),
            download: Arc::new(DownloadProvider::new(env_var, http_timeout)),
        }
    }
}
