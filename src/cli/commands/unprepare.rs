//! Unprepare command implementation.
//!
//! The `kapsel unprepare` command stops project services and removes
//! what prepare created, keeping the user's configuration.

use crate::cli::args::UnprepareArgs;
use crate::config::MANIFEST_FILENAME;
use crate::error::Result;
use crate::frontend::{NullFrontend, UiFrontend};
use crate::prepare::{prepare_without_interaction, unprepare, PrepareOptions};
use crate::requirements::ProvideMode;
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandContext, CommandResult, EXIT_CONFIG_NOT_FOUND};

/// The unprepare command implementation.
pub struct UnprepareCommand {
    args: UnprepareArgs,
}

impl UnprepareCommand {
    /// Create a new unprepare command.
    pub fn new(args: UnprepareArgs) -> Self {
        Self { args }
    }
}

impl Command for UnprepareCommand {
    fn execute(&self, ctx: &CommandContext<'_>, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let Some(project) = ctx.load_project(ui)? else {
            return Ok(CommandResult::failure(EXIT_CONFIG_NOT_FOUND));
        };

        let unknown: Vec<&str> = self
            .args
            .env_vars
            .iter()
            .filter(|var| project.requirement(var).is_none())
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            ui.error(&format!(
                "Not declared in {}: {}",
                MANIFEST_FILENAME,
                unknown.join(", ")
            ));
            return Ok(CommandResult::failure(1));
        }

        let checked = prepare_without_interaction(
            &project,
            ctx.registry,
            ctx.environ,
            &PrepareOptions::with_mode(ProvideMode::Check),
            &mut NullFrontend,
        );
        let whitelist = (!self.args.env_vars.is_empty()).then_some(self.args.env_vars.as_slice());

        let status = {
            let mut frontend = UiFrontend::new(ui);
            unprepare(&project, ctx.registry, &checked, whitelist, &mut frontend)
        };
        if status.success {
            ui.success(&status.description);
        } else {
            ui.error(&status.description);
        }
        Ok(CommandResult::from_success(status.success))
    }
}
