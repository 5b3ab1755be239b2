//! Command-line interface for kapsel.
//!
//! This module provides the CLI argument parsing using clap's derive macros
//! and command implementations.
//!
//! # Architecture
//!
//! - [`args`] - Argument definitions using clap derive macros
//! - [`commands`] - Command implementations
//! - [`bug_report`] - Crash notices and saved crash details

pub mod args;
pub mod bug_report;
pub mod commands;

pub use args::{
    CheckArgs, Cli, Commands, PrepareArgs, RunArgs, UnprepareArgs, VariableAction, VariableArgs,
};
pub use commands::{Command, CommandDispatcher, CommandResult};
