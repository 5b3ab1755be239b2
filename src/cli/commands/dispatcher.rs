//! Command dispatching.
//!
//! This module provides the core command infrastructure:
//! - [`Command`] trait for implementing commands
//! - [`CommandResult`] for uniform result reporting
//! - [`CommandDispatcher`] for routing CLI subcommands

use std::path::{Path, PathBuf};

use crate::cli::args::{Cli, Commands};
use crate::config::{load_project, Project, MANIFEST_FILENAME};
use crate::error::{KapselError, Result};
use crate::requirements::{Environ, RequirementsRegistry};
use crate::ui::UserInterface;

/// Exit code when no manifest was found.
pub const EXIT_CONFIG_NOT_FOUND: i32 = 2;

/// Trait for command implementations.
///
/// Each CLI subcommand implements this trait to provide its execution logic.
pub trait Command {
    /// Execute the command.
    fn execute(&self, ctx: &CommandContext<'_>, ui: &mut dyn UserInterface)
        -> Result<CommandResult>;
}

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult {
    /// Whether the command succeeded.
    pub success: bool,

    /// Exit code to use (0 for success, non-zero for failure).
    pub exit_code: i32,
}

impl CommandResult {
    /// Create a successful result.
    pub fn success() -> Self {
        Self {
            success: true,
            exit_code: 0,
        }
    }

    /// Create a failure result.
    pub fn failure(exit_code: i32) -> Self {
        Self {
            success: false,
            exit_code,
        }
    }

    /// Success or exit code 1.
    pub fn from_success(success: bool) -> Self {
        if success {
            Self::success()
        } else {
            Self::failure(1)
        }
    }
}

/// Shared inputs for every command.
pub struct CommandContext<'a> {
    /// Project directory.
    pub project_root: &'a Path,
    /// Providers to prepare with.
    pub registry: &'a RequirementsRegistry,
    /// Environment the command was started with.
    pub environ: &'a Environ,
}

impl CommandContext<'_> {
    /// Load the project, reporting a missing manifest on the UI.
    ///
    /// `None` means the command should exit with [`EXIT_CONFIG_NOT_FOUND`].
    pub fn load_project(&self, ui: &mut dyn UserInterface) -> Result<Option<Project>> {
        match load_project(self.project_root) {
            Ok(project) => Ok(Some(project)),
            Err(KapselError::ConfigNotFound { path }) => {
                ui.error(&format!(
                    "No {} found at {}.",
                    MANIFEST_FILENAME,
                    path.display()
                ));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Dispatches CLI commands to their implementations.
pub struct CommandDispatcher {
    project_root: PathBuf,
    registry: RequirementsRegistry,
    environ: Environ,
}

impl CommandDispatcher {
    /// Dispatcher using real providers and the process environment.
    pub fn new(project_root: PathBuf) -> Self {
        Self::from_parts(
            project_root,
            RequirementsRegistry::new(),
            std::env::vars().collect(),
        )
    }

    /// Dispatcher with explicit providers and starting environment.
    pub fn from_parts(
        project_root: PathBuf,
        registry: RequirementsRegistry,
        environ: Environ,
    ) -> Self {
        Self {
            project_root,
            registry,
            environ,
        }
    }

    /// Get the project root path.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Route the CLI subcommand to its implementation and execute it.
    pub fn dispatch(&self, cli: &Cli, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let ctx = CommandContext {
            project_root: &self.project_root,
            registry: &self.registry,
            environ: &self.environ,
        };
        match &cli.command {
            Commands::Prepare(args) => {
                super::prepare::PrepareCommand::new(args.clone()).execute(&ctx, ui)
            }
            Commands::Check(args) => {
                super::check::CheckCommand::new(args.clone()).execute(&ctx, ui)
            }
            Commands::Unprepare(args) => {
                super::unprepare::UnprepareCommand::new(args.clone()).execute(&ctx, ui)
            }
            Commands::Run(args) => super::run::RunCommand::new(args.clone()).execute(&ctx, ui),
            Commands::Variable(args) => {
                super::variable::VariableCommand::new(args.clone()).execute(&ctx, ui)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use super::*;
    use crate::secrets::InMemoryStore;
    use tempfile::TempDir;

    pub fn project_dir(manifest: &str) -> TempDir {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(MANIFEST_FILENAME), manifest).unwrap();
        temp
    }

    pub fn registry() -> RequirementsRegistry {
        RequirementsRegistry::builder()
            .secrets(Arc::new(InMemoryStore::new()))
            .build()
    }

    pub fn run(
        command: &dyn Command,
        dir: &Path,
        environ: &Environ,
        ui: &mut dyn UserInterface,
    ) -> CommandResult {
        let registry = registry();
        let ctx = CommandContext {
            project_root: dir,
            registry: &registry,
            environ,
        };
        command.execute(&ctx, ui).unwrap()
    }
}
