//! Preparing a project to run.
//!
//! A prepare pass copies the caller's environment, checks every
//! requirement, asks providers to fill in whatever is missing and then
//! checks again. [`prepare_with_interaction`] repeats passes, asking the
//! user for values in between, until the project is ready or the user
//! gives up.
//!
//! # Example
//!
//! ```no_run
//! use kapsel::config::load_project;
//! use kapsel::frontend::NullFrontend;
//! use kapsel::prepare::{prepare_without_interaction, PrepareOptions};
//! use kapsel::requirements::RequirementsRegistry;
//!
//! let project = load_project(std::path::Path::new(".")).unwrap();
//! let registry = RequirementsRegistry::new();
//! let environ = std::env::vars().collect();
//! let result = prepare_without_interaction(
//!     &project,
//!     &registry,
//!     &environ,
//!     &PrepareOptions::default(),
//!     &mut NullFrontend,
//! );
//! for error in &result.errors {
//!     eprintln!("{}", error);
//! }
//! ```

pub mod order;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use crate::config::{Project, MANIFEST_FILENAME};
use crate::error::{KapselError, Result};
use crate::frontend::{Frontend, UiFrontend};
use crate::providers::{check_status, ConfigContext, ConfigWriter, ProvideContext};
use crate::requirements::{
    ConfigSource, Environ, ProvideMode, ProvideResult, ProviderKind, Requirement,
    RequirementStatus, RequirementsRegistry, SimpleStatus, UserConfigOverrides,
    CONDA_DEFAULT_ENV_VAR, CONDA_PREFIX_VAR, PROJECT_DIR_VAR,
};
use crate::shell::{execute, CommandOptions};
use crate::state::LocalStateFile;
use crate::ui::{Prompt, PromptType, UserInterface};

pub use order::{order_or_input, topological_order};

/// Error appended when the user stops an interactive prepare.
pub const UI_STOPPED: &str = "UI was stopped";

/// Prompt key of the "try again" confirmation.
pub const CONTINUE_PROMPT_KEY: &str = "continue";

/// What to prepare and how.
#[derive(Debug, Clone, Default)]
pub struct PrepareOptions {
    /// How aggressively providers may act.
    pub mode: ProvideMode,
    /// Env spec and inherited environment choices.
    pub overrides: UserConfigOverrides,
    /// Command to prepare; `None` selects the default command.
    pub command: Option<String>,
    /// Extra arguments appended to the command line.
    pub extra_args: Vec<String>,
    /// When set, only these variables' requirements are provided.
    pub provide_whitelist: Option<Vec<String>>,
}

impl PrepareOptions {
    /// Options for a mode, everything else default.
    pub fn with_mode(mode: ProvideMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    fn allows_provide(&self, requirement: &Requirement) -> bool {
        self.provide_whitelist
            .as_ref()
            .map_or(true, |vars| vars.iter().any(|var| *var == requirement.env_var))
    }
}

/// How to run the prepared command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandExecInfo {
    /// Working directory; the project directory.
    pub cwd: PathBuf,
    /// Full argument vector.
    pub args: Vec<String>,
    /// Whether `args` run through the platform shell.
    pub shell: bool,
    /// Environment for the child process.
    pub env: Environ,
}

impl CommandExecInfo {
    /// Run the command with inherited stdio and return its exit code.
    pub fn execute(&self) -> Result<i32> {
        let options = CommandOptions::default()
            .with_cwd(&self.cwd)
            .with_env(&self.env);
        let result = execute(&self.args, &options)?;
        Ok(result.code_for_display())
    }
}

/// Outcome of preparing a project.
///
/// A result with no errors is a success.
#[derive(Debug, Clone)]
pub struct PrepareResult {
    /// Status of every requirement, in manifest order.
    pub statuses: Vec<RequirementStatus>,
    /// The prepared environment.
    pub environ: Environ,
    /// Overrides in effect, including any inherited environment.
    pub overrides: UserConfigOverrides,
    /// Env spec the project was prepared with.
    pub env_spec_name: Option<String>,
    /// How to run the selected command; only set on success.
    pub command_exec_info: Option<CommandExecInfo>,
    /// Problems, in the order they were found.
    pub errors: Vec<String>,
}

impl PrepareResult {
    /// Whether preparing failed.
    pub fn failed(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Status of the requirement resolving `env_var`.
    pub fn status_for(&self, env_var: &str) -> Option<&RequirementStatus> {
        self.statuses
            .iter()
            .find(|status| status.requirement.env_var == env_var)
    }

    /// Prefix of the prepared package environment, if any.
    pub fn env_prefix(&self) -> Option<&str> {
        self.statuses
            .iter()
            .find(|status| status.provider == ProviderKind::CondaEnv)
            .and_then(|status| self.environ.get(&status.requirement.env_var))
            .map(String::as_str)
    }

    /// Copy the prepared variables into `environ`. Nothing is removed.
    pub fn update_environ(&self, environ: &mut Environ) {
        for (key, value) in &self.environ {
            environ.insert(key.clone(), value.clone());
        }
    }

    fn early_failure(
        environ: Environ,
        overrides: UserConfigOverrides,
        env_spec_name: Option<String>,
        error: String,
    ) -> Self {
        Self {
            statuses: Vec::new(),
            environ,
            overrides,
            env_spec_name,
            command_exec_info: None,
            errors: vec![error],
        }
    }
}

fn working_environ(
    project: &Project,
    environ: &Environ,
    overrides: &UserConfigOverrides,
) -> (Environ, UserConfigOverrides) {
    let mut copy = environ.clone();
    copy.insert(
        PROJECT_DIR_VAR.to_string(),
        project.directory().display().to_string(),
    );

    let mut overrides = overrides.clone();
    if let Some(prefix) = copy.remove(CONDA_PREFIX_VAR) {
        if overrides.inherited_env.is_none() && !prefix.is_empty() {
            overrides.inherited_env = Some(prefix);
        }
    }
    copy.remove(CONDA_DEFAULT_ENV_VAR);

    (copy, overrides)
}

fn default_env_spec_name<'p>(project: &'p Project, options: &PrepareOptions) -> Option<&'p str> {
    project
        .command(options.command.as_deref())
        .and_then(|command| command.env_spec.as_deref())
        .or_else(|| project.default_env_spec_name())
}

fn check_names(project: &Project, options: &PrepareOptions) -> Option<String> {
    if let Some(name) = &options.overrides.env_spec_name {
        let names: Vec<&str> = project.env_specs().iter().map(|s| s.name.as_str()).collect();
        if !names.contains(&name.as_str()) {
            let mut names = names;
            names.sort_unstable();
            return Some(format!(
                "Environment name '{}' is not in {}, these names were found: {}",
                name,
                MANIFEST_FILENAME,
                names.join(", ")
            ));
        }
    }
    if let Some(name) = &options.command {
        if project.command(Some(name)).is_none() {
            let mut names: Vec<&str> = project.commands.iter().map(|c| c.name.as_str()).collect();
            names.sort_unstable();
            return Some(format!(
                "Command name '{}' is not in {}, these names were found: {}",
                name,
                MANIFEST_FILENAME,
                names.join(", ")
            ));
        }
    }
    None
}

fn compute_statuses(
    project: &Project,
    registry: &RequirementsRegistry,
    ctx: &ConfigContext<'_>,
    latest: &mut HashMap<usize, ProvideResult>,
) -> Vec<RequirementStatus> {
    project
        .requirements
        .iter()
        .enumerate()
        .map(|(i, requirement)| {
            let provider = registry.provider(requirement.provider_kind());
            check_status(provider.as_ref(), requirement, ctx, latest.remove(&i))
        })
        .collect()
}

/// Prepare `project` without asking the user anything.
///
/// `environ` is copied, never modified. Every problem is also sent to
/// `frontend.error`.
pub fn prepare_without_interaction(
    project: &Project,
    registry: &RequirementsRegistry,
    environ: &Environ,
    options: &PrepareOptions,
    frontend: &mut dyn Frontend,
) -> PrepareResult {
    let (mut environ, overrides) = working_environ(project, environ, &options.overrides);
    let default_env = default_env_spec_name(project, options);

    if let Some(error) = check_names(project, options) {
        frontend.error(&error);
        let env_spec = overrides
            .env_spec_name
            .clone()
            .or_else(|| default_env.map(str::to_string));
        return PrepareResult::early_failure(environ, overrides, env_spec, error);
    }

    let mut local_state = match LocalStateFile::load_for_directory(project.directory()) {
        Ok(state) => state,
        Err(e) => {
            let error = e.to_string();
            frontend.error(&error);
            let env_spec = default_env.map(str::to_string);
            return PrepareResult::early_failure(environ, overrides, env_spec, error);
        }
    };

    tracing::info!(
        "Preparing {} in {} mode",
        project.name,
        options.mode.as_str()
    );

    let mut latest: HashMap<usize, ProvideResult> = HashMap::new();
    let statuses = {
        let ctx = ConfigContext {
            environ: &environ,
            local_state: &local_state,
            default_env_spec_name: default_env,
            overrides: &overrides,
        };
        compute_statuses(project, registry, &ctx, &mut latest)
    };

    let order = order_or_input(
        &statuses,
        |status| status.requirement.env_var.as_str(),
        |status| status.analysis.missing_env_vars_to_provide.clone(),
        |var| environ.contains_key(var),
    );
    tracing::debug!(
        "Requirement order: {}",
        order
            .iter()
            .map(|&i| statuses[i].requirement.env_var.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut errors = Vec::new();
    for &i in &order {
        let requirement = &project.requirements[i];
        let provider = registry.provider(requirement.provider_kind());

        let blockers =
            provider.missing_env_vars_to_configure(requirement, &environ, &local_state);
        if !blockers.is_empty() {
            for blocker in blockers {
                frontend.info(&format!(
                    "Environment variable {} must be set before {} can be configured.",
                    blocker, requirement.env_var
                ));
            }
            continue;
        }

        if !options.allows_provide(requirement) {
            continue;
        }

        let status = {
            let ctx = ConfigContext {
                environ: &environ,
                local_state: &local_state,
                default_env_spec_name: default_env,
                overrides: &overrides,
            };
            check_status(provider.as_ref(), requirement, &ctx, None)
        };
        if status.has_been_provided {
            continue;
        }

        tracing::info!("Providing {}", requirement.env_var);
        let result = {
            let mut ctx = ProvideContext::new(
                &mut environ,
                &mut local_state,
                default_env,
                &status,
                options.mode,
                &mut *frontend,
            );
            provider.provide(requirement, &mut ctx)
        };
        errors.extend(result.errors().iter().cloned());
        latest.insert(i, result);
    }

    let statuses = {
        let ctx = ConfigContext {
            environ: &environ,
            local_state: &local_state,
            default_env_spec_name: default_env,
            overrides: &overrides,
        };
        compute_statuses(project, registry, &ctx, &mut latest)
    };

    let mut failed = false;
    for &i in &order {
        let status = &statuses[i];
        if !status.has_been_provided {
            let line = format!(
                "missing requirement to run this project: {} {}",
                status.requirement.description(),
                status.status_description
            );
            frontend.error(&line);
            errors.push(line);
            failed = true;
        }
    }

    let env_spec_name = statuses
        .iter()
        .find(|status| status.provider == ProviderKind::CondaEnv)
        .and_then(|status| status.env_spec_name.clone())
        .or_else(|| default_env.map(str::to_string));

    if !failed {
        tracing::info!("Prepared {}", project.name);
        let command_exec_info = project
            .command(options.command.as_deref())
            .and_then(|command| command.argv(&options.extra_args))
            .map(|args| CommandExecInfo {
                cwd: project.directory().to_path_buf(),
                args,
                shell: true,
                env: environ.clone(),
            });
        return PrepareResult {
            statuses,
            environ,
            overrides,
            env_spec_name,
            command_exec_info,
            errors: Vec::new(),
        };
    }

    PrepareResult {
        statuses,
        environ,
        overrides,
        env_spec_name,
        command_exec_info: None,
        errors,
    }
}

/// Prepare `project`, asking the user for missing values until it works.
///
/// On a non-interactive UI this is a single pass.
pub fn prepare_with_interaction(
    project: &Project,
    registry: &RequirementsRegistry,
    environ: &Environ,
    options: &PrepareOptions,
    ui: &mut dyn UserInterface,
) -> PrepareResult {
    let mut working = environ.clone();
    let mut options = options.clone();

    loop {
        let mut result = {
            let mut frontend = UiFrontend::new(ui);
            prepare_without_interaction(project, registry, &working, &options, &mut frontend)
        };
        if !result.failed() || !ui.is_interactive() {
            return result;
        }

        let default_env = default_env_spec_name(project, &options);
        match ask_for_unmet(project, registry, &result, default_env, &mut working, ui) {
            Ok(true) => {
                options.overrides = result.overrides;
            }
            Ok(false) => return result,
            Err(e) => {
                tracing::debug!("Interactive prepare stopped: {}", e);
                ui.error(UI_STOPPED);
                result.errors.push(UI_STOPPED.to_string());
                return result;
            }
        }
    }
}

/// Prompt for each unmet configurable requirement and store the answers.
///
/// Keys that block a requirement from being configured are asked for
/// first. Answers are stored against the prepared environment and any
/// environment changes are carried into `working` for the next pass.
///
/// Returns `Ok(false)` when there is nothing to ask. Declining to try
/// again is reported as an error.
fn ask_for_unmet(
    project: &Project,
    registry: &RequirementsRegistry,
    result: &PrepareResult,
    default_env: Option<&str>,
    working: &mut Environ,
    ui: &mut dyn UserInterface,
) -> Result<bool> {
    let unmet: Vec<&RequirementStatus> = result
        .statuses
        .iter()
        .filter(|status| !status.has_been_provided && status.provider.is_user_configurable())
        .collect();
    if unmet.is_empty() {
        return Ok(false);
    }

    let mut local_state = LocalStateFile::load_for_directory(project.directory())?;
    let mut overrides = result.overrides.clone();
    let mut environ = result.environ.clone();
    let mut answered = HashSet::new();

    for status in &unmet {
        let requirement = &status.requirement;
        let provider = registry.provider(status.provider);
        for key in provider.missing_env_vars_to_configure(requirement, &environ, &local_state) {
            if !answered.insert(key.clone()) {
                continue;
            }
            let answer = ui
                .prompt(&Prompt {
                    key: key.clone(),
                    question: format!("{}: needed to configure {}", key, requirement.env_var),
                    prompt_type: PromptType::Password,
                    default: None,
                })?
                .as_string();
            if !answer.is_empty() {
                environ.insert(key, answer);
            }
        }
    }

    for status in &unmet {
        let requirement = &status.requirement;
        let provider = registry.provider(status.provider);
        if answered.contains(&requirement.env_var)
            || !provider
                .missing_env_vars_to_configure(requirement, &environ, &local_state)
                .is_empty()
        {
            continue;
        }

        let prompt = Prompt {
            key: requirement.env_var.clone(),
            question: format!("{}: {}", requirement.title(), requirement.description()),
            prompt_type: if requirement.encrypted() {
                PromptType::Password
            } else {
                PromptType::Input
            },
            default: None,
        };
        let answer = ui.prompt(&prompt)?.as_string();
        if answer.is_empty() {
            continue;
        }

        let values = BTreeMap::from([
            ("source".to_string(), ConfigSource::Variables.as_str().to_string()),
            ("value".to_string(), answer),
        ]);
        let mut writer = ConfigWriter {
            environ: &mut environ,
            local_state: &mut local_state,
            default_env_spec_name: default_env,
            overrides: &mut overrides,
        };
        provider.set_config_values_as_strings(requirement, &mut writer, &values);
    }
    local_state.save()?;
    carry_changes(&result.environ, &environ, working);

    let again = ui.prompt(&Prompt {
        key: CONTINUE_PROMPT_KEY.to_string(),
        question: "Try again with these values?".to_string(),
        prompt_type: PromptType::Confirm,
        default: Some("yes".to_string()),
    })?;
    if again.as_bool() == Some(true) {
        Ok(true)
    } else {
        Err(KapselError::Other(anyhow::anyhow!("declined to continue")))
    }
}

/// Apply the difference between `before` and `after` to `working`.
fn carry_changes(before: &Environ, after: &Environ, working: &mut Environ) {
    for (key, value) in after {
        if before.get(key) != Some(value) {
            working.insert(key.clone(), value.clone());
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            working.remove(key);
        }
    }
}

/// Tear down what preparing created.
///
/// Calls `unprovide` for every requirement, or only for the variables in
/// `whitelist`, whether or not it was ever provided.
pub fn unprepare(
    project: &Project,
    registry: &RequirementsRegistry,
    prepare_result: &PrepareResult,
    whitelist: Option<&[String]>,
    frontend: &mut dyn Frontend,
) -> SimpleStatus {
    let mut local_state = match LocalStateFile::load_for_directory(project.directory()) {
        Ok(state) => state,
        Err(e) => {
            let error = e.to_string();
            frontend.error(&error);
            return SimpleStatus::failed("Unable to load local state.", vec![error]);
        }
    };

    let mut outcomes = Vec::new();
    for requirement in &project.requirements {
        if let Some(vars) = whitelist {
            if !vars.iter().any(|var| *var == requirement.env_var) {
                continue;
            }
        }
        let provider = registry.provider(requirement.provider_kind());
        let status = provider.unprovide(
            requirement,
            &prepare_result.environ,
            &mut local_state,
            &prepare_result.overrides,
        );
        tracing::info!("{}: {}", requirement.env_var, status.description);
        outcomes.push((requirement.env_var.clone(), status));
    }

    summarize_unprovide(outcomes, frontend)
}

fn summarize_unprovide(
    outcomes: Vec<(String, SimpleStatus)>,
    frontend: &mut dyn Frontend,
) -> SimpleStatus {
    if outcomes.is_empty() {
        return SimpleStatus::ok("Nothing to clean up.");
    }

    let (succeeded, failed): (Vec<_>, Vec<_>) =
        outcomes.into_iter().partition(|(_, status)| status.success);

    for (_, status) in &succeeded {
        frontend.info(&status.description);
    }
    if failed.is_empty() {
        return SimpleStatus::ok("Success.");
    }

    let mut errors = Vec::new();
    for (_, status) in &failed {
        errors.extend(status.errors.iter().cloned());
        errors.push(status.description.clone());
    }
    for error in &errors {
        frontend.error(error);
    }
    let mut names: Vec<String> = failed.into_iter().map(|(name, _)| name).collect();
    names.sort();
    SimpleStatus::failed(format!("Failed to clean up {}.", names.join(", ")), errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectCommand;
    use crate::frontend::CollectingFrontend;
    use crate::requirements::{EnvSpec, RequirementKind, RequirementOptions, StoredValue};
    use crate::secrets::{codec, keychain, InMemoryStore, SecretStore};
    use crate::state::LOCAL_STATE_FILENAME;
    use crate::ui::MockUI;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn registry() -> RequirementsRegistry {
        RequirementsRegistry::builder()
            .secrets(Arc::new(InMemoryStore::new()))
            .build()
    }

    fn project(dir: &TempDir, requirements: Vec<Requirement>) -> Project {
        Project::new(dir.path(), None, requirements, Vec::new())
    }

    fn with_default(var: &str, default: &str) -> Requirement {
        Requirement::new(
            var,
            RequirementKind::EnvVar,
            RequirementOptions {
                default: Some(StoredValue::Plain(default.into())),
                ..Default::default()
            },
        )
    }

    fn environ(pairs: &[(&str, &str)]) -> Environ {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn check_mode_reports_missing_variable_once() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, vec![Requirement::env_var("FOO")]);
        let mut frontend = CollectingFrontend::new();

        let result = prepare_without_interaction(
            &project,
            &registry(),
            &Environ::new(),
            &PrepareOptions::with_mode(ProvideMode::Check),
            &mut frontend,
        );

        assert!(result.failed());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("FOO is not set"));
        assert!(frontend.has_error("missing requirement to run this project"));
    }

    #[test]
    fn development_mode_with_value_succeeds() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, vec![Requirement::env_var("FOO")]);

        let result = prepare_without_interaction(
            &project,
            &registry(),
            &environ(&[("FOO", "bar")]),
            &PrepareOptions::default(),
            &mut CollectingFrontend::new(),
        );

        assert!(!result.failed());
        assert!(result.errors.is_empty());
        assert_eq!(result.environ.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(
            result.environ.get(PROJECT_DIR_VAR),
            Some(&dir.path().display().to_string())
        );
    }

    #[test]
    fn default_is_provided_in_every_mode() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, vec![with_default("PORT", "8080")]);

        let result = prepare_without_interaction(
            &project,
            &registry(),
            &Environ::new(),
            &PrepareOptions::default(),
            &mut CollectingFrontend::new(),
        );
        assert!(!result.failed());
        assert_eq!(result.environ.get("PORT").map(String::as_str), Some("8080"));

        let checked = prepare_without_interaction(
            &project,
            &registry(),
            &Environ::new(),
            &PrepareOptions::with_mode(ProvideMode::Check),
            &mut CollectingFrontend::new(),
        );
        assert!(!checked.failed(), "{:?}", checked.errors);
        assert_eq!(checked.environ.get("PORT").map(String::as_str), Some("8080"));
        assert!(!dir.path().join(LOCAL_STATE_FILENAME).exists());
    }

    #[test]
    fn caller_environ_is_not_modified() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, vec![with_default("PORT", "8080")]);
        let original = environ(&[("HOME", "/home/me")]);

        let result = prepare_without_interaction(
            &project,
            &registry(),
            &original,
            &PrepareOptions::default(),
            &mut CollectingFrontend::new(),
        );

        assert_eq!(original.len(), 1);
        let mut merged = original.clone();
        result.update_environ(&mut merged);
        assert_eq!(merged.get("PORT").map(String::as_str), Some("8080"));
        assert_eq!(merged.get("HOME").map(String::as_str), Some("/home/me"));
    }

    #[test]
    fn active_environment_is_recorded_as_inherited() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, Vec::new());

        let result = prepare_without_interaction(
            &project,
            &registry(),
            &environ(&[(CONDA_PREFIX_VAR, "/opt/envs/base"), (CONDA_DEFAULT_ENV_VAR, "base")]),
            &PrepareOptions::default(),
            &mut CollectingFrontend::new(),
        );

        assert_eq!(result.overrides.inherited_env.as_deref(), Some("/opt/envs/base"));
        assert!(!result.environ.contains_key(CONDA_PREFIX_VAR));
        assert!(!result.environ.contains_key(CONDA_DEFAULT_ENV_VAR));
    }

    #[test]
    fn unknown_command_fails_early() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, Vec::new());
        let options = PrepareOptions {
            command: Some("serve".into()),
            ..Default::default()
        };
        let mut frontend = CollectingFrontend::new();

        let result = prepare_without_interaction(
            &project,
            &registry(),
            &Environ::new(),
            &options,
            &mut frontend,
        );

        assert_eq!(
            result.errors,
            vec!["Command name 'serve' is not in kapsel.yml, these names were found: ".to_string()]
        );
        assert!(result.statuses.is_empty());
        assert!(frontend.has_error("Command name 'serve'"));
    }

    #[test]
    fn unknown_env_spec_fails_early() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, Vec::new());
        let options = PrepareOptions {
            overrides: UserConfigOverrides::with_env_spec("py3"),
            ..Default::default()
        };

        let result = prepare_without_interaction(
            &project,
            &registry(),
            &Environ::new(),
            &options,
            &mut CollectingFrontend::new(),
        );

        assert!(result.errors[0].starts_with("Environment name 'py3' is not in kapsel.yml"));
    }

    #[cfg(unix)]
    #[test]
    fn success_carries_command_exec_info() {
        let dir = TempDir::new().unwrap();
        let command = ProjectCommand {
            name: "default".into(),
            unix: Some("echo $FOO".into()),
            windows: None,
            description: None,
            env_spec: None,
        };
        let project = Project::new(dir.path(), None, vec![Requirement::env_var("FOO")], vec![command]);
        let options = PrepareOptions {
            extra_args: vec!["more".into()],
            ..Default::default()
        };

        let result = prepare_without_interaction(
            &project,
            &registry(),
            &environ(&[("FOO", "bar")]),
            &options,
            &mut CollectingFrontend::new(),
        );

        let info = result.command_exec_info.unwrap();
        assert_eq!(info.cwd, dir.path());
        assert_eq!(info.args, vec!["/bin/sh", "-c", "echo $FOO more"]);
        assert!(info.shell);
        assert_eq!(info.env.get("FOO").map(String::as_str), Some("bar"));
    }

    #[test]
    fn blocked_requirement_is_reported() {
        let dir = TempDir::new().unwrap();
        let secret = Requirement::new(
            "DB_PASSWORD",
            RequirementKind::EnvVar,
            RequirementOptions {
                encrypted: Some(true),
                ..Default::default()
            },
        );
        let project = project(&dir, vec![secret]);
        let mut state = LocalStateFile::load_for_directory(dir.path()).unwrap();
        let mut stored = serde_yaml::Mapping::new();
        stored.insert("key".into(), "SOME_KEY".into());
        stored.insert("encrypted".into(), "AAAA".into());
        state.set_value(&["variables", "DB_PASSWORD"], serde_yaml::Value::Mapping(stored));
        state.save().unwrap();
        let mut frontend = CollectingFrontend::new();

        let result = prepare_without_interaction(
            &project,
            &registry(),
            &Environ::new(),
            &PrepareOptions::default(),
            &mut frontend,
        );

        assert!(result.failed());
        assert!(frontend.has_info(
            "Environment variable SOME_KEY must be set before DB_PASSWORD can be configured."
        ));
    }

    #[test]
    fn interaction_stores_answers_and_retries() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, vec![Requirement::env_var("FOO")]);
        let mut ui = MockUI::new();
        ui.set_interactive(true);
        ui.set_prompt_response("FOO", "bar");

        let result = prepare_with_interaction(
            &project,
            &registry(),
            &Environ::new(),
            &PrepareOptions::default(),
            &mut ui,
        );

        assert!(!result.failed(), "{:?}", result.errors);
        assert_eq!(result.environ.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(ui.prompts_shown(), &["FOO".to_string(), "continue".to_string()]);
        let state = LocalStateFile::load_for_directory(dir.path()).unwrap();
        assert_eq!(state.get_string(&["variables", "FOO"]).as_deref(), Some("bar"));
    }

    fn encrypted(var: &str) -> Requirement {
        Requirement::new(
            var,
            RequirementKind::EnvVar,
            RequirementOptions {
                encrypted: Some(true),
                ..Default::default()
            },
        )
    }

    #[test]
    fn encrypted_answer_is_kept_in_project_keychain() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, vec![encrypted("DB_PASSWORD")]);
        let store = Arc::new(InMemoryStore::new());
        let registry = RequirementsRegistry::builder().secrets(store.clone()).build();
        let mut ui = MockUI::new();
        ui.set_interactive(true);
        ui.set_prompt_response("DB_PASSWORD", "s3cret");
        ui.queue_prompt_responses(CONTINUE_PROMPT_KEY, vec!["yes", "no"]);

        let result = prepare_with_interaction(
            &project,
            &registry,
            &environ(&[(CONDA_PREFIX_VAR, "/opt/envs/base")]),
            &PrepareOptions::default(),
            &mut ui,
        );

        assert!(!result.failed(), "{:?}", result.errors);
        assert_eq!(result.environ.get("DB_PASSWORD").map(String::as_str), Some("s3cret"));
        assert_eq!(ui.prompts_shown(), &["DB_PASSWORD".to_string(), "continue".to_string()]);
        let scope = dir.path().display().to_string();
        assert_eq!(
            store.get(&keychain::scoped_name(&scope, "DB_PASSWORD")).as_deref(),
            Some("s3cret")
        );
        assert!(store.get(&keychain::scoped_name("/opt/envs/base", "DB_PASSWORD")).is_none());
    }

    #[test]
    fn blocking_key_is_asked_before_its_variable() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, vec![encrypted("DB_PASSWORD")]);
        let mut state = LocalStateFile::load_for_directory(dir.path()).unwrap();
        let sealed = codec::encrypt_with_cost("old", "right", 4).unwrap();
        state.set_value(
            &["variables", "DB_PASSWORD"],
            StoredValue::Encrypted {
                key: "SOME_KEY".into(),
                encrypted: sealed,
            }
            .to_yaml(),
        );
        state.save().unwrap();
        let mut ui = MockUI::new();
        ui.set_interactive(true);
        ui.set_prompt_response("SOME_KEY", "right");
        ui.set_prompt_response("DB_PASSWORD", "changed");
        ui.queue_prompt_responses(CONTINUE_PROMPT_KEY, vec!["yes", "no"]);

        let result = prepare_with_interaction(
            &project,
            &registry(),
            &Environ::new(),
            &PrepareOptions::default(),
            &mut ui,
        );

        assert!(!result.failed(), "{:?}", result.errors);
        assert_eq!(
            ui.prompts_shown(),
            &["SOME_KEY".to_string(), "DB_PASSWORD".to_string(), "continue".to_string()]
        );
        assert_eq!(result.environ.get("DB_PASSWORD").map(String::as_str), Some("changed"));
        let state = LocalStateFile::load_for_directory(dir.path()).unwrap();
        let stored = state
            .get_value(&["variables", "DB_PASSWORD"])
            .and_then(StoredValue::from_yaml);
        assert_eq!(stored.as_ref().and_then(StoredValue::key), Some("SOME_KEY"));
    }

    #[test]
    fn unanswered_blocking_key_leaves_override_alone() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, vec![encrypted("DB_PASSWORD")]);
        let mut state = LocalStateFile::load_for_directory(dir.path()).unwrap();
        let sealed = codec::encrypt_with_cost("old", "right", 4).unwrap();
        state.set_value(
            &["variables", "DB_PASSWORD"],
            StoredValue::Encrypted {
                key: "SOME_KEY".into(),
                encrypted: sealed.clone(),
            }
            .to_yaml(),
        );
        state.save().unwrap();
        let mut ui = MockUI::new();
        ui.set_interactive(true);
        ui.set_prompt_response("DB_PASSWORD", "changed");
        ui.set_prompt_response(CONTINUE_PROMPT_KEY, "no");

        let result = prepare_with_interaction(
            &project,
            &registry(),
            &Environ::new(),
            &PrepareOptions::default(),
            &mut ui,
        );

        assert!(result.failed());
        assert_eq!(ui.prompts_shown(), &["SOME_KEY".to_string(), "continue".to_string()]);
        let state = LocalStateFile::load_for_directory(dir.path()).unwrap();
        assert_eq!(
            state
                .get_value(&["variables", "DB_PASSWORD"])
                .and_then(StoredValue::from_yaml),
            Some(StoredValue::Encrypted {
                key: "SOME_KEY".into(),
                encrypted: sealed,
            })
        );
    }

    #[test]
    fn command_env_spec_is_the_default() {
        let dir = TempDir::new().unwrap();
        let command = ProjectCommand {
            name: "legacy".into(),
            unix: Some("python2 old.py".into()),
            windows: None,
            description: None,
            env_spec: Some("py2".into()),
        };
        let specs = vec![
            EnvSpec::new("default", vec!["python".into()]),
            EnvSpec::new("py2", vec!["python=2.7".into()]),
        ];
        let project = Project::new(
            dir.path(),
            None,
            vec![Requirement::conda_env(specs)],
            vec![command],
        );

        assert_eq!(
            default_env_spec_name(&project, &PrepareOptions::default()),
            Some("py2")
        );
        let bare = Project::new(dir.path(), None, project.requirements.clone(), Vec::new());
        assert_eq!(
            default_env_spec_name(&bare, &PrepareOptions::default()),
            Some("default")
        );
    }

    #[test]
    fn carried_changes_skip_prepared_values() {
        let before = environ(&[(PROJECT_DIR_VAR, "/work"), ("GONE", "1"), ("SAME", "x")]);
        let after = environ(&[(PROJECT_DIR_VAR, "/work"), ("SAME", "x"), ("SOME_KEY", "k")]);
        let mut working = environ(&[("GONE", "1"), ("HOME", "/home/me")]);

        carry_changes(&before, &after, &mut working);

        assert_eq!(working, environ(&[("HOME", "/home/me"), ("SOME_KEY", "k")]));
    }

    #[test]
    fn declining_to_continue_stops() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, vec![Requirement::env_var("FOO")]);
        let mut ui = MockUI::new();
        ui.set_interactive(true);
        ui.set_prompt_response("continue", "no");

        let result = prepare_with_interaction(
            &project,
            &registry(),
            &Environ::new(),
            &PrepareOptions::default(),
            &mut ui,
        );

        assert!(result.failed());
        assert_eq!(result.errors.last().map(String::as_str), Some(UI_STOPPED));
    }

    #[test]
    fn cancelled_prompt_stops() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, vec![Requirement::env_var("FOO")]);
        let mut ui = MockUI::new();
        ui.set_interactive(true);
        ui.set_cancelled(true);

        let result = prepare_with_interaction(
            &project,
            &registry(),
            &Environ::new(),
            &PrepareOptions::default(),
            &mut ui,
        );

        assert_eq!(result.errors.last().map(String::as_str), Some(UI_STOPPED));
        assert!(ui.has_error(UI_STOPPED));
    }

    #[test]
    fn non_interactive_ui_runs_one_pass() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, vec![Requirement::env_var("FOO")]);
        let mut ui = MockUI::new();

        let result = prepare_with_interaction(
            &project,
            &registry(),
            &Environ::new(),
            &PrepareOptions::default(),
            &mut ui,
        );

        assert!(result.failed());
        assert!(ui.prompts_shown().is_empty());
        assert!(ui.has_error("FOO is not set"));
    }

    #[test]
    fn unprepare_with_nothing_declared() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, Vec::new());
        let result = prepare_without_interaction(
            &project,
            &registry(),
            &Environ::new(),
            &PrepareOptions::default(),
            &mut CollectingFrontend::new(),
        );

        let status = unprepare(&project, &registry(), &result, None, &mut CollectingFrontend::new());
        assert!(status.success);
        assert_eq!(status.description, "Nothing to clean up.");
    }

    #[test]
    fn unprepare_reports_success_and_honors_whitelist() {
        let dir = TempDir::new().unwrap();
        let project = project(
            &dir,
            vec![Requirement::env_var("FOO"), Requirement::env_var("BAR")],
        );
        let result = prepare_without_interaction(
            &project,
            &registry(),
            &environ(&[("FOO", "1"), ("BAR", "2")]),
            &PrepareOptions::default(),
            &mut CollectingFrontend::new(),
        );

        let mut frontend = CollectingFrontend::new();
        let status = unprepare(&project, &registry(), &result, None, &mut frontend);
        assert_eq!(status.description, "Success.");
        assert!(frontend.has_info("Nothing to clean up for FOO."));
        assert!(frontend.has_info("Nothing to clean up for BAR."));

        let mut frontend = CollectingFrontend::new();
        let only = vec!["BAR".to_string()];
        unprepare(&project, &registry(), &result, Some(&only), &mut frontend);
        assert!(!frontend.has_info("FOO"));
        assert!(frontend.has_info("BAR"));
    }

    #[test]
    fn failed_cleanup_names_each_variable() {
        let outcomes = vec![
            ("ZED".to_string(), SimpleStatus::failed("Could not stop.", vec!["boom".into()])),
            ("FOO".to_string(), SimpleStatus::ok("Stopped.")),
            ("ABC".to_string(), SimpleStatus::failed("Could not delete.", Vec::new())),
        ];
        let mut frontend = CollectingFrontend::new();

        let status = summarize_unprovide(outcomes, &mut frontend);

        assert!(!status.success);
        assert_eq!(status.description, "Failed to clean up ABC, ZED.");
        assert_eq!(
            status.errors,
            vec!["boom", "Could not stop.", "Could not delete."]
        );
        assert!(frontend.has_error("boom"));
        assert!(frontend.has_info("Stopped."));
    }
}
