//! Providers: strategies that check and establish requirements.
//!
//! Every [`Requirement`] kind has one [`Provider`]. Providers are stateless
//! between calls; everything they remember lives in the
//! [`LocalStateFile`] or in the shared environment map they are handed.
//!
//! Providers never return `Err`. Failures end up as strings in a
//! [`ProvideResult`] or a [`SimpleStatus`].

pub mod conda_env;
pub mod download;
pub mod env_var;
pub mod master_password;
pub mod redis;
pub mod service;

pub use conda_env::CondaEnvProvider;
pub use download::DownloadProvider;
pub use env_var::EnvVarProvider;
pub use master_password::MasterPasswordProvider;
pub use redis::RedisProvider;
pub use service::{delete_service_directory, service_directory, shutdown_service_run_state};

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use serde_yaml::Mapping;

use crate::frontend::{ErrorRecorder, Frontend};
use crate::requirements::{
    Environ, ProvideMode, ProvideResult, ProviderAnalysis, ProviderConfig, ProviderKind,
    Requirement, RequirementStatus, SimpleStatus, UserConfigOverrides, PROJECT_DIR_VAR,
};
use crate::state::LocalStateFile;

/// Read-only inputs for reading a provider's configuration.
#[derive(Clone, Copy)]
pub struct ConfigContext<'a> {
    /// Current environment.
    pub environ: &'a Environ,
    /// Project local state.
    pub local_state: &'a LocalStateFile,
    /// Env spec to use when nothing else selects one.
    pub default_env_spec_name: Option<&'a str>,
    /// Caller-forced configuration.
    pub overrides: &'a UserConfigOverrides,
}

/// Mutable inputs for writing a provider's configuration.
pub struct ConfigWriter<'a> {
    /// Current environment; providers may drop variables they no longer use.
    pub environ: &'a mut Environ,
    /// Project local state; the caller saves it.
    pub local_state: &'a mut LocalStateFile,
    /// Env spec to use when nothing else selects one.
    pub default_env_spec_name: Option<&'a str>,
    /// Caller-forced configuration; cleared when the user picks something else.
    pub overrides: &'a mut UserConfigOverrides,
}

impl ConfigWriter<'_> {
    /// Borrow as a read-only context.
    pub fn reader(&self) -> ConfigContext<'_> {
        ConfigContext {
            environ: self.environ,
            local_state: self.local_state,
            default_env_spec_name: self.default_env_spec_name,
            overrides: self.overrides,
        }
    }
}

/// Everything a single `provide()` call may read or change.
pub struct ProvideContext<'a> {
    /// Environment to fill in.
    pub environ: &'a mut Environ,
    /// Project local state.
    pub local_state: &'a mut LocalStateFile,
    /// Env spec to use when nothing else selects one.
    pub default_env_spec_name: Option<&'a str>,
    /// Status computed just before this call.
    pub status: &'a RequirementStatus,
    /// How aggressively to act.
    pub mode: ProvideMode,
    /// Output sink; errors sent here are also kept for the result.
    pub frontend: ErrorRecorder<'a>,
}

impl<'a> ProvideContext<'a> {
    /// Assemble a context.
    pub fn new(
        environ: &'a mut Environ,
        local_state: &'a mut LocalStateFile,
        default_env_spec_name: Option<&'a str>,
        status: &'a RequirementStatus,
        mode: ProvideMode,
        frontend: &'a mut dyn Frontend,
    ) -> Self {
        Self {
            environ,
            local_state,
            default_env_spec_name,
            status,
            mode,
            frontend: ErrorRecorder::new(frontend),
        }
    }

    /// The analysis this call was planned from.
    pub fn analysis(&self) -> &ProviderAnalysis {
        &self.status.analysis
    }

    /// The config this call was planned from.
    pub fn config(&self) -> &ProviderConfig {
        &self.status.analysis.config
    }

    /// Create `PROJECT_DIR/services/<name>` and return it.
    pub fn ensure_service_directory(&self, name: &str) -> io::Result<PathBuf> {
        let path = service_directory(self.local_state, name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Run `f` over a copy of a service's run state.
    ///
    /// The state is written back and saved only if `f` changed it.
    pub fn transform_service_run_state<R>(
        &mut self,
        service_name: &str,
        f: impl FnOnce(&mut Mapping, &mut Self) -> R,
    ) -> R {
        let old_state = self.local_state.get_service_run_state(service_name);
        let mut modified = old_state.clone();
        let result = f(&mut modified, self);
        if modified != old_state {
            self.local_state
                .set_service_run_state(service_name, modified);
            if let Err(e) = self.local_state.save() {
                self.frontend
                    .error(&format!("Failed to save run state for {}: {}", service_name, e));
            }
        }
        result
    }

    /// Turn everything sent to `frontend.error` into a result.
    pub fn take_result(&mut self) -> ProvideResult {
        ProvideResult::with_errors(self.frontend.pop_errors())
    }
}

/// Strategy for one kind of requirement.
pub trait Provider: Send + Sync {
    /// Which kind this provider handles.
    fn kind(&self) -> ProviderKind;

    /// Variables that must be set before this requirement can be configured.
    fn missing_env_vars_to_configure(
        &self,
        requirement: &Requirement,
        environ: &Environ,
        local_state: &LocalStateFile,
    ) -> Vec<String>;

    /// Variables that must be set before this requirement can be provided.
    fn missing_env_vars_to_provide(
        &self,
        requirement: &Requirement,
        environ: &Environ,
        local_state: &LocalStateFile,
    ) -> Vec<String>;

    /// Read the current configuration.
    fn read_config(&self, requirement: &Requirement, ctx: &ConfigContext<'_>) -> ProviderConfig;

    /// Store user-entered configuration. Unknown keys are ignored.
    fn set_config_values_as_strings(
        &self,
        requirement: &Requirement,
        ctx: &mut ConfigWriter<'_>,
        values: &BTreeMap<String, String>,
    );

    /// Gather everything needed to decide status and provide.
    ///
    /// All probing IO happens here so that `status` and `provide` can work
    /// from a snapshot.
    fn analyze(&self, requirement: &Requirement, ctx: &ConfigContext<'_>) -> ProviderAnalysis {
        ProviderAnalysis::new(
            self.read_config(requirement, ctx),
            self.missing_env_vars_to_configure(requirement, ctx.environ, ctx.local_state),
            self.missing_env_vars_to_provide(requirement, ctx.environ, ctx.local_state),
        )
    }

    /// Whether the requirement holds, with a one-line description.
    fn status(
        &self,
        requirement: &Requirement,
        environ: &Environ,
        analysis: &ProviderAnalysis,
    ) -> (bool, String);

    /// Try to make the requirement hold, writing into `ctx.environ`.
    fn provide(&self, requirement: &Requirement, ctx: &mut ProvideContext<'_>) -> ProvideResult;

    /// Tear down whatever `provide` created.
    fn unprovide(
        &self,
        requirement: &Requirement,
        environ: &Environ,
        local_state: &mut LocalStateFile,
        overrides: &UserConfigOverrides,
    ) -> SimpleStatus;
}

/// The project directory: `PROJECT_DIR` when set, else where the local state lives.
pub fn project_dir(environ: &Environ, local_state: &LocalStateFile) -> PathBuf {
    environ
        .get(PROJECT_DIR_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| local_state.project_dir().to_path_buf())
}

/// Analyze a requirement and compute its status.
pub fn check_status(
    provider: &dyn Provider,
    requirement: &Requirement,
    ctx: &ConfigContext<'_>,
    latest_provide_result: Option<ProvideResult>,
) -> RequirementStatus {
    let analysis = provider.analyze(requirement, ctx);
    let (has_been_provided, status_description) =
        provider.status(requirement, ctx.environ, &analysis);
    let env_spec_name = analysis
        .config
        .env_name
        .clone()
        .or_else(|| ctx.default_env_spec_name.map(str::to_string));

    RequirementStatus {
        requirement: requirement.clone(),
        provider: provider.kind(),
        analysis,
        has_been_provided,
        status_description,
        latest_provide_result,
        env_spec_name,
    }
}
