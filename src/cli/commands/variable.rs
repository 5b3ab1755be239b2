//! Variable command implementation.
//!
//! The `kapsel variable` command stores or clears a value in the
//! project's local state, the same way answering a prepare prompt does.

use std::collections::BTreeMap;

use crate::cli::args::{VariableAction, VariableArgs};
use crate::config::MANIFEST_FILENAME;
use crate::error::Result;
use crate::providers::ConfigWriter;
use crate::requirements::{ConfigSource, UserConfigOverrides, PROJECT_DIR_VAR};
use crate::state::LocalStateFile;
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandContext, CommandResult, EXIT_CONFIG_NOT_FOUND};

/// The variable command implementation.
pub struct VariableCommand {
    args: VariableArgs,
}

impl VariableCommand {
    /// Create a new variable command.
    pub fn new(args: VariableArgs) -> Self {
        Self { args }
    }

    fn name(&self) -> &str {
        match &self.args.action {
            VariableAction::Set { name, .. } | VariableAction::Unset { name } => name,
        }
    }

    fn values(&self) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        values.insert(
            "source".to_string(),
            ConfigSource::Variables.as_str().to_string(),
        );
        let value = match &self.args.action {
            VariableAction::Set { value, .. } => value.clone(),
            VariableAction::Unset { .. } => String::new(),
        };
        values.insert("value".to_string(), value);
        values
    }
}

impl Command for VariableCommand {
    fn execute(&self, ctx: &CommandContext<'_>, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let Some(project) = ctx.load_project(ui)? else {
            return Ok(CommandResult::failure(EXIT_CONFIG_NOT_FOUND));
        };

        let name = self.name();
        let Some(requirement) = project.requirement(name) else {
            ui.error(&format!(
                "Variable {} is not declared in {}.",
                name, MANIFEST_FILENAME
            ));
            return Ok(CommandResult::failure(1));
        };

        let mut environ = ctx.environ.clone();
        environ.insert(
            PROJECT_DIR_VAR.to_string(),
            project.directory().display().to_string(),
        );
        let mut local_state = LocalStateFile::load_for_directory(project.directory())?;
        let mut overrides = UserConfigOverrides::default();
        let provider = ctx.registry.provider(requirement.provider_kind());
        {
            let mut writer = ConfigWriter {
                environ: &mut environ,
                local_state: &mut local_state,
                default_env_spec_name: project.default_env_spec_name(),
                overrides: &mut overrides,
            };
            provider.set_config_values_as_strings(requirement, &mut writer, &self.values());
        }
        local_state.save()?;

        let message = match &self.args.action {
            VariableAction::Set { .. } => format!("Set {} for this project.", name),
            VariableAction::Unset { .. } => format!("Unset {} for this project.", name),
        };
        ui.success(&message);
        Ok(CommandResult::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::dispatcher::testing::{project_dir, run};
    use crate::requirements::Environ;
    use crate::ui::MockUI;

    fn set(name: &str, value: &str) -> VariableCommand {
        VariableCommand::new(VariableArgs {
            action: VariableAction::Set {
                name: name.into(),
                value: value.into(),
            },
        })
    }

    fn unset(name: &str) -> VariableCommand {
        VariableCommand::new(VariableArgs {
            action: VariableAction::Unset { name: name.into() },
        })
    }

    #[test]
    fn set_then_unset() {
        let temp = project_dir("variables: [FOO]\n");
        let mut ui = MockUI::new();

        let result = run(&set("FOO", "bar"), temp.path(), &Environ::new(), &mut ui);
        assert!(result.success);
        assert!(ui.has_success("Set FOO"));
        let state = LocalStateFile::load_for_directory(temp.path()).unwrap();
        assert_eq!(state.get_string(&["variables", "FOO"]).as_deref(), Some("bar"));

        let result = run(&unset("FOO"), temp.path(), &Environ::new(), &mut ui);
        assert!(result.success);
        let state = LocalStateFile::load_for_directory(temp.path()).unwrap();
        assert!(state.get_value(&["variables", "FOO"]).is_none());
    }

    #[test]
    fn undeclared_variable_is_rejected() {
        let temp = project_dir("variables: [FOO]\n");
        let mut ui = MockUI::new();

        let result = run(&set("BAR", "x"), temp.path(), &Environ::new(), &mut ui);

        assert_eq!(result.exit_code, 1);
        assert!(ui.has_error("Variable BAR is not declared in kapsel.yml."));
    }
}
