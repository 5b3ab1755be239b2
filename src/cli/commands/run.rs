//! Run command implementation.
//!
//! The `kapsel run` command prepares the project, then runs one of its
//! commands in the prepared environment.

use crate::cli::args::RunArgs;
use crate::config::MANIFEST_FILENAME;
use crate::error::Result;
use crate::prepare::{prepare_with_interaction, PrepareOptions};
use crate::requirements::UserConfigOverrides;
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandContext, CommandResult, EXIT_CONFIG_NOT_FOUND};

/// The run command implementation.
pub struct RunCommand {
    args: RunArgs,
}

impl RunCommand {
    /// Create a new run command.
    pub fn new(args: RunArgs) -> Self {
        Self { args }
    }

    /// Get the command arguments.
    pub fn args(&self) -> &RunArgs {
        &self.args
    }

    fn options(&self) -> PrepareOptions {
        PrepareOptions {
            overrides: UserConfigOverrides {
                env_spec_name: self.args.env_spec.clone(),
                inherited_env: None,
            },
            command: self.args.command.clone(),
            extra_args: self.args.args.clone(),
            ..Default::default()
        }
    }
}

impl Command for RunCommand {
    fn execute(&self, ctx: &CommandContext<'_>, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let Some(project) = ctx.load_project(ui)? else {
            return Ok(CommandResult::failure(EXIT_CONFIG_NOT_FOUND));
        };

        let result = prepare_with_interaction(&project, ctx.registry, ctx.environ, &self.options(), ui);
        if result.failed() {
            return Ok(CommandResult::failure(1));
        }

        let Some(exec_info) = result.command_exec_info else {
            ui.error(&format!(
                "No known run command for project {}; try adding a 'commands:' section to {}",
                project.name, MANIFEST_FILENAME
            ));
            return Ok(CommandResult::failure(1));
        };

        tracing::info!("Running {:?} in {}", exec_info.args, exec_info.cwd.display());
        match exec_info.execute() {
            Ok(0) => Ok(CommandResult::success()),
            Ok(code) => Ok(CommandResult::failure(code)),
            Err(e) => {
                ui.error(&format!(
                    "Failed to execute '{}': {}",
                    exec_info.args.join(" "),
                    e
                ));
                Ok(CommandResult::failure(1))
            }
        }
    }
}
