//! Prepare command implementation.
//!
//! The `kapsel prepare` command gets every requirement in place, asking
//! for missing values when the terminal allows it.

use crate::cli::args::PrepareArgs;
use crate::error::Result;
use crate::prepare::{prepare_with_interaction, PrepareOptions};
use crate::requirements::UserConfigOverrides;
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandContext, CommandResult, EXIT_CONFIG_NOT_FOUND};

/// The prepare command implementation.
pub struct PrepareCommand {
    args: PrepareArgs,
}

impl PrepareCommand {
    /// Create a new prepare command.
    pub fn new(args: PrepareArgs) -> Self {
        Self { args }
    }

    /// Get the command arguments.
    pub fn args(&self) -> &PrepareArgs {
        &self.args
    }

    fn options(&self) -> PrepareOptions {
        PrepareOptions {
            mode: self.args.mode,
            overrides: UserConfigOverrides {
                env_spec_name: self.args.env_spec.clone(),
                inherited_env: None,
            },
            ..Default::default()
        }
    }
}

impl Command for PrepareCommand {
    fn execute(&self, ctx: &CommandContext<'_>, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let Some(project) = ctx.load_project(ui)? else {
            return Ok(CommandResult::failure(EXIT_CONFIG_NOT_FOUND));
        };
        ui.show_header(&project.name);

        let result = prepare_with_interaction(&project, ctx.registry, ctx.environ, &self.options(), ui);
        if result.failed() {
            return Ok(CommandResult::failure(1));
        }

        ui.success("The project is ready to run commands.");
        Ok(CommandResult::success())
    }
}
