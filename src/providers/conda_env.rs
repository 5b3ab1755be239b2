//! Package environments built from the manifest's env specs.
//!
//! By default each env spec gets a project-scoped environment under
//! `PROJECT_DIR/envs/<name>`. A project may instead opt in to reusing the
//! environment that was active when prepare started.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::Value;

use super::{project_dir, ConfigContext, ConfigWriter, EnvVarProvider, ProvideContext, Provider};
use crate::envmgr::EnvironmentManager;
use crate::requirements::{
    ConfigSource, EnvSpec, Environ, ProvideMode, ProvideResult, ProviderAnalysis, ProviderConfig,
    ProviderKind, Requirement, SimpleStatus, UserConfigOverrides, CONDA_DEFAULT_ENV_VAR,
};
use crate::state::LocalStateFile;

const INHERIT_ENVIRONMENT: &str = "inherit_environment";
const VARIABLES: &str = "variables";

fn inherits_environment(local_state: &LocalStateFile) -> bool {
    local_state
        .get_value(&[INHERIT_ENVIRONMENT])
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn default_spec_name(requirement: &Requirement, default_env_spec_name: Option<&str>) -> Option<String> {
    default_env_spec_name
        .map(str::to_string)
        .or_else(|| requirement.env_specs().first().map(|spec| spec.name.clone()))
}

/// The env spec whose project path is `prefix`.
fn spec_at<'r>(requirement: &'r Requirement, project_dir: &Path, prefix: &Path) -> Option<&'r EnvSpec> {
    requirement
        .env_specs()
        .iter()
        .find(|spec| spec.path(project_dir) == prefix)
}

/// Put the environment's executables first on `PATH`.
fn prepend_to_path(environ: &mut Environ, prefix: &Path) {
    let added: Vec<PathBuf> = if cfg!(windows) {
        vec![prefix.to_path_buf(), prefix.join("Scripts")]
    } else {
        vec![prefix.join("bin")]
    };
    let existing: Vec<PathBuf> = environ
        .get("PATH")
        .map(|path| {
            std::env::split_paths(path)
                .filter(|dir| !added.contains(dir))
                .collect()
        })
        .unwrap_or_default();

    match std::env::join_paths(added.iter().chain(&existing)) {
        Ok(joined) => {
            environ.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
        }
        Err(e) => tracing::warn!("Could not add {} to PATH: {}", prefix.display(), e),
    }
}

/// Delete a project-scoped environment directory.
///
/// Both paths are resolved first; a path that cannot be resolved is never
/// deleted.
pub fn remove_env_path(env_path: &Path, project_dir: &Path) -> SimpleStatus {
    if !env_path.is_dir() {
        let name = env_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return SimpleStatus::ok(format!("Nothing to clean up for environment '{}'.", name));
    }
    let inside = match (env_path.canonicalize(), project_dir.canonicalize()) {
        (Ok(env), Ok(project)) => env != project && env.starts_with(&project),
        _ => false,
    };
    if !inside {
        return SimpleStatus::ok(format!(
            "Current environment is not in {}, no need to delete it.",
            project_dir.display()
        ));
    }
    match std::fs::remove_dir_all(env_path) {
        Ok(()) => SimpleStatus::ok(format!(
            "Deleted environment files in {}.",
            env_path.display()
        )),
        Err(e) => {
            let problem = format!(
                "Failed to remove environment files in {}: {}.",
                env_path.display(),
                e
            );
            SimpleStatus::failed(problem.clone(), vec![problem])
        }
    }
}

/// Creates and updates package environments.
pub struct CondaEnvProvider {
    base: EnvVarProvider,
    manager: Arc<dyn EnvironmentManager>,
}

impl CondaEnvProvider {
    /// Create a provider driving `manager`.
    pub fn new(base: EnvVarProvider, manager: Arc<dyn EnvironmentManager>) -> Self {
        Self { base, manager }
    }
}

impl Provider for CondaEnvProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::CondaEnv
    }

    fn missing_env_vars_to_configure(
        &self,
        _requirement: &Requirement,
        _environ: &Environ,
        _local_state: &LocalStateFile,
    ) -> Vec<String> {
        Vec::new()
    }

    fn missing_env_vars_to_provide(
        &self,
        _requirement: &Requirement,
        _environ: &Environ,
        _local_state: &LocalStateFile,
    ) -> Vec<String> {
        Vec::new()
    }

    fn read_config(&self, requirement: &Requirement, ctx: &ConfigContext<'_>) -> ProviderConfig {
        let project_dir = project_dir(ctx.environ, ctx.local_state);

        if let Some(name) = &ctx.overrides.env_spec_name {
            if let Some(spec) = requirement.env_spec(name) {
                let mut config = ProviderConfig::new(ConfigSource::Project)
                    .with_value(spec.path(&project_dir).display().to_string());
                config.env_name = Some(name.clone());
                return config;
            }
            tracing::warn!("No env spec named {}; using the configured one", name);
        }

        let mut config = self.base.read_config(requirement, ctx);
        if matches!(config.source, ConfigSource::Unset | ConfigSource::Default) {
            config.source = ConfigSource::Project;
        }

        if inherits_environment(ctx.local_state) {
            if let Some(inherited) = &ctx.overrides.inherited_env {
                config.source = ConfigSource::Inherited;
                config.value = Some(inherited.clone());
            }
        }

        if config.source == ConfigSource::Environ {
            let is_project_env = config
                .value
                .as_deref()
                .is_some_and(|value| spec_at(requirement, &project_dir, Path::new(value)).is_some());
            if !is_project_env {
                tracing::debug!(
                    "Ignoring {} from the environment; the project does not inherit it",
                    requirement.env_var
                );
                config.value = None;
            }
            config.source = ConfigSource::Project;
        }

        config.env_name = default_spec_name(requirement, ctx.default_env_spec_name);

        if let Some(value) = &config.value {
            if let Some(spec) = spec_at(requirement, &project_dir, Path::new(value)) {
                config.env_name = Some(spec.name.clone());
                if config.source == ConfigSource::Variables {
                    config.source = ConfigSource::Project;
                }
            }
        } else if config.source == ConfigSource::Project {
            config.value = config
                .env_name
                .as_deref()
                .and_then(|name| requirement.env_spec(name))
                .map(|spec| spec.path(&project_dir).display().to_string());
        }

        config
    }

    fn set_config_values_as_strings(
        &self,
        requirement: &Requirement,
        ctx: &mut ConfigWriter<'_>,
        values: &BTreeMap<String, String>,
    ) {
        self.base
            .set_config_values_as_strings(requirement, ctx, values);
        ctx.overrides.env_spec_name = None;

        let Some(source) = values.get("source") else {
            return;
        };

        if source == ConfigSource::Inherited.as_str() {
            ctx.local_state.set_value(&[INHERIT_ENVIRONMENT], true);
        } else if ctx.local_state.get_value(&[INHERIT_ENVIRONMENT]).is_some() {
            ctx.local_state.set_value(&[INHERIT_ENVIRONMENT], false);
        }

        if source == ConfigSource::Project.as_str() {
            let project_dir = project_dir(ctx.environ, ctx.local_state);
            let spec = values
                .get("env_name")
                .and_then(|name| requirement.env_spec(name));
            if let Some(spec) = spec {
                let prefix = spec.path(&project_dir).display().to_string();
                ctx.local_state
                    .set_value(&[VARIABLES, &requirement.env_var], prefix);
            }
        }
    }

    fn analyze(&self, requirement: &Requirement, ctx: &ConfigContext<'_>) -> ProviderAnalysis {
        let config = self.read_config(requirement, ctx);
        let project_dir = project_dir(ctx.environ, ctx.local_state);

        let spec = config.value.as_deref().and_then(|prefix| {
            spec_at(requirement, &project_dir, Path::new(prefix)).or_else(|| {
                config
                    .env_name
                    .as_deref()
                    .and_then(|name| requirement.env_spec(name))
            })
        });

        let env_problem = match (config.value.as_deref(), spec) {
            (Some(prefix), Some(spec)) => {
                match self
                    .manager
                    .find_environment_deviations(Path::new(prefix), spec)
                {
                    Ok(deviations) if deviations.ok() => None,
                    Ok(deviations) => Some(deviations.summary),
                    Err(e) => Some(e.to_string()),
                }
            }
            _ => None,
        };

        let mut analysis = ProviderAnalysis::new(config, Vec::new(), Vec::new());
        analysis.env_problem = env_problem;
        analysis
    }

    fn status(
        &self,
        requirement: &Requirement,
        environ: &Environ,
        analysis: &ProviderAnalysis,
    ) -> (bool, String) {
        if let Some(problem) = &analysis.env_problem {
            return (false, problem.clone());
        }
        match environ.get(&requirement.env_var).filter(|v| !v.is_empty()) {
            None => (false, format!("{} is not set.", requirement.env_var)),
            Some(prefix) => (true, format!("Using Conda environment {}.", prefix)),
        }
    }

    fn provide(&self, requirement: &Requirement, ctx: &mut ProvideContext<'_>) -> ProvideResult {
        let var = requirement.env_var.clone();
        let config = ctx.config().clone();
        let inherited = config.source == ConfigSource::Inherited;

        if inherited {
            if let Some(value) = &config.value {
                ctx.environ.insert(var.clone(), value.clone());
            }
        }

        let base_result = self.base.provide(requirement, ctx);

        let project_dir = project_dir(ctx.environ, ctx.local_state);
        let env_name = config
            .env_name
            .clone()
            .or_else(|| default_spec_name(requirement, ctx.default_env_spec_name));
        let named_spec = env_name.as_deref().and_then(|name| requirement.env_spec(name));

        let inherited_prefix = ctx
            .environ
            .get(&var)
            .filter(|_| inherited)
            .map(PathBuf::from);
        let prefix = inherited_prefix.or_else(|| named_spec.map(|spec| spec.path(&project_dir)));

        let Some(prefix) = prefix else {
            return base_result.copy_with_additions(vec![format!(
                "No environment spec named '{}' for {}.",
                env_name.unwrap_or_default(),
                var
            )]);
        };

        let spec = spec_at(requirement, &project_dir, &prefix).or(named_spec);

        if ctx.mode != ProvideMode::Check {
            let Some(spec) = spec else {
                return base_result.copy_with_additions(vec![format!(
                    "No environment spec matches {}.",
                    prefix.display()
                )]);
            };

            let deviations = match self.manager.find_environment_deviations(&prefix, spec) {
                Ok(deviations) => deviations,
                Err(e) => return base_result.copy_with_additions(vec![e.to_string()]),
            };

            if !deviations.ok() {
                tracing::info!("Updating environment {}: {}", prefix.display(), deviations.summary);
                if let Err(e) = self.manager.fix_environment_deviations(
                    &prefix,
                    spec,
                    &deviations,
                    !inherited,
                    &mut ctx.frontend,
                ) {
                    return base_result.copy_with_additions(vec![e.to_string()]);
                }
            }
        }

        let prefix_text = prefix.display().to_string();
        ctx.environ.insert(var, prefix_text.clone());
        ctx.environ
            .insert(CONDA_DEFAULT_ENV_VAR.to_string(), prefix_text);
        prepend_to_path(ctx.environ, &prefix);

        base_result
    }

    fn unprovide(
        &self,
        requirement: &Requirement,
        environ: &Environ,
        local_state: &mut LocalStateFile,
        overrides: &UserConfigOverrides,
    ) -> SimpleStatus {
        let ctx = ConfigContext {
            environ,
            local_state,
            default_env_spec_name: None,
            overrides,
        };
        let config = self.read_config(requirement, &ctx);
        let project_dir = project_dir(environ, local_state);

        match config.value {
            Some(env_path) => remove_env_path(Path::new(&env_path), &project_dir),
            None => SimpleStatus::ok(format!(
                "Nothing to clean up for {}.",
                requirement.env_var
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envmgr::{EnvManagerError, EnvironmentDeviations};
    use crate::frontend::{CollectingFrontend, Frontend};
    use crate::providers::check_status;
    use crate::providers::testing::{local_state, project_environ, provide_in_mode, set_values, status_of};
    use crate::requirements::CONDA_PREFIX_VAR;
    use crate::secrets::InMemoryStore;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Environment manager whose environments are fixed by the first call.
    #[derive(Default)]
    struct FakeManager {
        broken: Mutex<bool>,
        fail_with: Option<String>,
        fixes: Mutex<Vec<(PathBuf, bool)>>,
    }

    impl FakeManager {
        fn broken() -> Self {
            Self {
                broken: Mutex::new(true),
                ..Self::default()
            }
        }

        fn fix_count(&self) -> usize {
            self.fixes.lock().unwrap().len()
        }
    }

    impl EnvironmentManager for FakeManager {
        fn find_environment_deviations(
            &self,
            prefix: &Path,
            spec: &EnvSpec,
        ) -> Result<EnvironmentDeviations, EnvManagerError> {
            if *self.broken.lock().unwrap() {
                Ok(EnvironmentDeviations {
                    summary: format!(
                        "'{}' doesn't look like it contains a Conda environment yet.",
                        prefix.display()
                    ),
                    missing_packages: spec.packages.clone(),
                    wrong_version_packages: Vec::new(),
                    broken: true,
                })
            } else {
                Ok(EnvironmentDeviations::none())
            }
        }

        fn fix_environment_deviations(
            &self,
            prefix: &Path,
            _spec: &EnvSpec,
            _deviations: &EnvironmentDeviations,
            create: bool,
            frontend: &mut dyn Frontend,
        ) -> Result<(), EnvManagerError> {
            self.fixes.lock().unwrap().push((prefix.to_path_buf(), create));
            if let Some(message) = &self.fail_with {
                return Err(EnvManagerError::new(message.clone()));
            }
            frontend.partial_info("done\n");
            *self.broken.lock().unwrap() = false;
            Ok(())
        }
    }

    fn provider(manager: Arc<FakeManager>) -> CondaEnvProvider {
        CondaEnvProvider::new(EnvVarProvider::new(Arc::new(InMemoryStore::new())), manager)
    }

    fn requirement() -> Requirement {
        Requirement::conda_env(vec![
            EnvSpec::new("default", vec!["numpy".into()]),
            EnvSpec::new("py2", vec!["python=2.7".into()]),
        ])
    }

    fn read_with(
        provider: &CondaEnvProvider,
        environ: &Environ,
        state: &LocalStateFile,
        overrides: &UserConfigOverrides,
    ) -> ProviderConfig {
        provider.read_config(
            &requirement(),
            &ConfigContext {
                environ,
                local_state: state,
                default_env_spec_name: None,
                overrides,
            },
        )
    }

    #[test]
    fn defaults_to_first_project_env() {
        let temp = TempDir::new().unwrap();
        let environ = project_environ(temp.path());
        let state = local_state(temp.path());

        let config = read_with(
            &provider(Arc::new(FakeManager::default())),
            &environ,
            &state,
            &UserConfigOverrides::default(),
        );

        assert_eq!(config.source, ConfigSource::Project);
        assert_eq!(config.env_name.as_deref(), Some("default"));
        assert_eq!(
            config.value,
            Some(temp.path().join("envs/default").display().to_string())
        );
    }

    #[test]
    fn env_spec_override_short_circuits() {
        let temp = TempDir::new().unwrap();
        let environ = project_environ(temp.path());
        let state = local_state(temp.path());

        let config = read_with(
            &provider(Arc::new(FakeManager::default())),
            &environ,
            &state,
            &UserConfigOverrides::with_env_spec("py2"),
        );

        assert_eq!(config.source, ConfigSource::Project);
        assert_eq!(config.env_name.as_deref(), Some("py2"));
        assert_eq!(
            config.value,
            Some(temp.path().join("envs/py2").display().to_string())
        );
    }

    #[test]
    fn foreign_environ_prefix_is_ignored_without_opt_in() {
        let temp = TempDir::new().unwrap();
        let mut environ = project_environ(temp.path());
        environ.insert(CONDA_PREFIX_VAR.into(), "/opt/conda".into());
        let state = local_state(temp.path());

        let config = read_with(
            &provider(Arc::new(FakeManager::default())),
            &environ,
            &state,
            &UserConfigOverrides::default(),
        );

        assert_eq!(config.source, ConfigSource::Project);
        assert_eq!(
            config.value,
            Some(temp.path().join("envs/default").display().to_string())
        );
    }

    #[test]
    fn provide_creates_environment_and_activates_it() {
        let temp = TempDir::new().unwrap();
        let manager = Arc::new(FakeManager::broken());
        let provider = provider(manager.clone());
        let req = requirement();
        let mut environ = project_environ(temp.path());
        environ.insert("PATH".into(), "/usr/bin".into());
        let mut state = local_state(temp.path());

        let before = status_of(&provider, &req, &environ, &state);
        assert!(!before.has_been_provided);
        assert!(before
            .status_description
            .ends_with("doesn't look like it contains a Conda environment yet."));

        let (result, frontend) =
            provide_in_mode(&provider, &req, &mut environ, &mut state, ProvideMode::Development);

        assert!(!result.failed(), "{:?}", result.errors());
        let prefix = temp.path().join("envs/default");
        assert_eq!(manager.fixes.lock().unwrap()[0], (prefix.clone(), true));
        assert!(frontend.has_info("done"));
        assert_eq!(environ[CONDA_PREFIX_VAR], prefix.display().to_string());
        assert_eq!(environ[CONDA_DEFAULT_ENV_VAR], prefix.display().to_string());
        let first_on_path = std::env::split_paths(&environ["PATH"]).next().unwrap();
        assert_eq!(first_on_path, prefix.join("bin"));

        let after = status_of(&provider, &req, &environ, &state);
        assert!(after.has_been_provided);
        assert_eq!(
            after.status_description,
            format!("Using Conda environment {}.", prefix.display())
        );

        provide_in_mode(&provider, &req, &mut environ, &mut state, ProvideMode::Development);
        assert_eq!(manager.fix_count(), 1);
        assert_eq!(std::env::split_paths(&environ["PATH"]).count(), 2);
    }

    #[test]
    fn check_mode_does_not_touch_environment() {
        let temp = TempDir::new().unwrap();
        let manager = Arc::new(FakeManager::broken());
        let provider = provider(manager.clone());
        let mut environ = project_environ(temp.path());
        let mut state = local_state(temp.path());

        let (result, _) =
            provide_in_mode(&provider, &requirement(), &mut environ, &mut state, ProvideMode::Check);

        assert!(!result.failed());
        assert_eq!(manager.fix_count(), 0);
    }

    #[test]
    fn manager_failure_is_returned() {
        let temp = TempDir::new().unwrap();
        let manager = Arc::new(FakeManager {
            broken: Mutex::new(true),
            fail_with: Some("Failed to create environment at x: boom".into()),
            fixes: Mutex::default(),
        });
        let provider = provider(manager);
        let mut environ = project_environ(temp.path());
        let mut state = local_state(temp.path());

        let (result, _) = provide_in_mode(
            &provider,
            &requirement(),
            &mut environ,
            &mut state,
            ProvideMode::Production,
        );

        assert_eq!(
            result.errors(),
            &["Failed to create environment at x: boom".to_string()]
        );
        assert!(!environ.contains_key(CONDA_PREFIX_VAR));
    }

    #[test]
    fn inherited_environment_is_updated_not_created() {
        let temp = TempDir::new().unwrap();
        let manager = Arc::new(FakeManager::broken());
        let provider = provider(manager.clone());
        let req = requirement();
        let mut environ = project_environ(temp.path());
        let mut state = local_state(temp.path());
        state.set_value(&[INHERIT_ENVIRONMENT], true);
        let overrides = UserConfigOverrides {
            env_spec_name: None,
            inherited_env: Some("/opt/conda/envs/shared".into()),
        };

        let status = check_status(
            &provider,
            &req,
            &ConfigContext {
                environ: &environ,
                local_state: &state,
                default_env_spec_name: None,
                overrides: &overrides,
            },
            None,
        );
        assert_eq!(status.analysis.config.source, ConfigSource::Inherited);

        let mut frontend = CollectingFrontend::new();
        let result = {
            let mut ctx = ProvideContext::new(
                &mut environ,
                &mut state,
                None,
                &status,
                ProvideMode::Development,
                &mut frontend,
            );
            provider.provide(&req, &mut ctx)
        };

        assert!(!result.failed());
        assert_eq!(
            manager.fixes.lock().unwrap()[0],
            (PathBuf::from("/opt/conda/envs/shared"), false)
        );
        assert_eq!(environ[CONDA_PREFIX_VAR], "/opt/conda/envs/shared");
    }

    #[test]
    fn choosing_sources_updates_local_state() {
        let temp = TempDir::new().unwrap();
        let provider = provider(Arc::new(FakeManager::default()));
        let req = requirement();
        let mut environ = project_environ(temp.path());
        let mut state = local_state(temp.path());

        set_values(
            &provider,
            &req,
            &mut environ,
            &mut state,
            &[("source", "project"), ("env_name", "py2")],
        );
        assert_eq!(
            state.get_string(&[VARIABLES, CONDA_PREFIX_VAR]),
            Some(temp.path().join("envs/py2").display().to_string())
        );
        assert!(state.get_value(&[INHERIT_ENVIRONMENT]).is_none());

        set_values(&provider, &req, &mut environ, &mut state, &[("source", "inherited")]);
        assert!(inherits_environment(&state));
        assert!(state.get_value(&[VARIABLES, CONDA_PREFIX_VAR]).is_none());

        set_values(
            &provider,
            &req,
            &mut environ,
            &mut state,
            &[("source", "project"), ("env_name", "default")],
        );
        assert_eq!(
            state.get_value(&[INHERIT_ENVIRONMENT]),
            Some(&Value::Bool(false))
        );
        let config = read_with(&provider, &environ, &state, &UserConfigOverrides::default());
        assert_eq!(config.source, ConfigSource::Project);
        assert_eq!(config.env_name.as_deref(), Some("default"));
    }

    #[test]
    fn unprovide_deletes_project_environment_only() {
        let temp = TempDir::new().unwrap();
        let provider = provider(Arc::new(FakeManager::default()));
        let req = requirement();
        let environ = project_environ(temp.path());
        let mut state = local_state(temp.path());
        let overrides = UserConfigOverrides::default();

        let status = provider.unprovide(&req, &environ, &mut state, &overrides);
        assert_eq!(status.description, "Nothing to clean up for environment 'default'.");

        let prefix = temp.path().join("envs/default");
        std::fs::create_dir_all(prefix.join("conda-meta")).unwrap();
        let status = provider.unprovide(&req, &environ, &mut state, &overrides);
        assert!(status.success);
        assert_eq!(
            status.description,
            format!("Deleted environment files in {}.", prefix.display())
        );
        assert!(!prefix.exists());
    }

    #[test]
    fn remove_env_path_refuses_outside_project() {
        let project = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();

        let status = remove_env_path(elsewhere.path(), project.path());

        assert!(status.success);
        assert_eq!(
            status.description,
            format!(
                "Current environment is not in {}, no need to delete it.",
                project.path().display()
            )
        );
        assert!(elsewhere.path().exists());
    }

    #[test]
    fn remove_env_path_resolves_parent_components() {
        let root = TempDir::new().unwrap();
        let project = root.path().join("proj");
        let victim = root.path().join("victim");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::create_dir_all(victim.join("conda-meta")).unwrap();

        let status = remove_env_path(&project.join("..").join("victim"), &project);

        assert!(status.success);
        assert!(status.description.ends_with("no need to delete it."));
        assert!(victim.join("conda-meta").exists());
    }
}
