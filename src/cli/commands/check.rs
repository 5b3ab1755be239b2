//! Check command implementation.
//!
//! The `kapsel check` command reports each requirement's status without
//! creating anything.

use crate::cli::args::CheckArgs;
use crate::error::Result;
use crate::frontend::UiFrontend;
use crate::prepare::{prepare_without_interaction, PrepareOptions};
use crate::requirements::{ProvideMode, UserConfigOverrides};
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandContext, CommandResult, EXIT_CONFIG_NOT_FOUND};
use super::display;

/// The check command implementation.
pub struct CheckCommand {
    args: CheckArgs,
}

impl CheckCommand {
    /// Create a new check command.
    pub fn new(args: CheckArgs) -> Self {
        Self { args }
    }
}

impl Command for CheckCommand {
    fn execute(&self, ctx: &CommandContext<'_>, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let Some(project) = ctx.load_project(ui)? else {
            return Ok(CommandResult::failure(EXIT_CONFIG_NOT_FOUND));
        };

        let options = PrepareOptions {
            mode: ProvideMode::Check,
            overrides: UserConfigOverrides {
                env_spec_name: self.args.env_spec.clone(),
                inherited_env: None,
            },
            ..Default::default()
        };
        let result = {
            let mut frontend = UiFrontend::new(ui);
            prepare_without_interaction(&project, ctx.registry, ctx.environ, &options, &mut frontend)
        };

        display::show_statuses(ui, &result.statuses);
        if result.failed() {
            return Ok(CommandResult::failure(1));
        }
        ui.success("All requirements are met.");
        Ok(CommandResult::success())
    }
}
