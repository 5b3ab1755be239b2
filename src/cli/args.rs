//! CLI argument definitions.
//!
//! This module defines all CLI arguments using clap's derive macros.
//! The main entry point is the [`Cli`] struct.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::requirements::ProvideMode;

/// Kapsel - get a project's variables, services, downloads and
/// environments ready before running it.
#[derive(Debug, Parser)]
#[command(name = "kapsel")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Project directory (defaults to the current directory)
    #[arg(short, long, global = true, env = "KAPSEL_DIRECTORY")]
    pub directory: Option<PathBuf>,

    /// Show verbose output, including subprocess output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Minimal output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Whether the chosen subcommand may ask questions.
    pub fn wants_interaction(&self) -> bool {
        match &self.command {
            Commands::Prepare(args) => !args.non_interactive && args.mode != ProvideMode::Check,
            Commands::Run(args) => !args.non_interactive,
            _ => false,
        }
    }
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Set up the project so its commands can run
    Prepare(PrepareArgs),

    /// Report which requirements are met without changing anything
    Check(CheckArgs),

    /// Stop services and remove what prepare created
    Unprepare(UnprepareArgs),

    /// Prepare the project, then run one of its commands
    Run(RunArgs),

    /// Store or clear a variable's value for this project
    Variable(VariableArgs),
}

/// Arguments for the `prepare` command.
#[derive(Debug, Clone, clap::Args)]
pub struct PrepareArgs {
    /// How aggressively to act: production, development or check
    #[arg(long, default_value = "development")]
    pub mode: ProvideMode,

    /// Env spec to prepare instead of the default
    #[arg(long, value_name = "NAME")]
    pub env_spec: Option<String>,

    /// Never prompt for missing values
    #[arg(long)]
    pub non_interactive: bool,
}

impl Default for PrepareArgs {
    fn default() -> Self {
        Self {
            mode: ProvideMode::Development,
            env_spec: None,
            non_interactive: false,
        }
    }
}

/// Arguments for the `check` command.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct CheckArgs {
    /// Env spec to check instead of the default
    #[arg(long, value_name = "NAME")]
    pub env_spec: Option<String>,
}

/// Arguments for the `unprepare` command.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct UnprepareArgs {
    /// Only clean up the requirement for this variable (repeatable)
    #[arg(long = "env-var", value_name = "VAR")]
    pub env_vars: Vec<String>,
}

/// Arguments for the `run` command.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct RunArgs {
    /// Command to run (defaults to the project's default command)
    pub command: Option<String>,

    /// Extra arguments passed to the command
    #[arg(last = true)]
    pub args: Vec<String>,

    /// Env spec to prepare instead of the default
    #[arg(long, value_name = "NAME")]
    pub env_spec: Option<String>,

    /// Never prompt for missing values
    #[arg(long)]
    pub non_interactive: bool,
}

/// Arguments for the `variable` command.
#[derive(Debug, Clone, clap::Args)]
pub struct VariableArgs {
    #[command(subcommand)]
    pub action: VariableAction,
}

/// What to do with a variable.
#[derive(Debug, Clone, Subcommand)]
pub enum VariableAction {
    /// Store a value in the project's local state
    Set {
        /// Variable name
        name: String,
        /// Value to store
        value: String,
    },
    /// Clear a stored value
    Unset {
        /// Variable name
        name: String,
    },
}
