//! CLI command implementations.
//!
//! Each command implements the [`Command`] trait, which provides a uniform
//! interface for executing commands and reporting results.
//!
//! # Architecture
//!
//! Commands are dispatched via [`CommandDispatcher`], which routes CLI
//! subcommands to their implementations and hands each one the project
//! directory, the provider registry and the starting environment.

pub mod check;
pub mod dispatcher;
pub mod display;
pub mod prepare;
pub mod run;
pub mod unprepare;
pub mod variable;

pub use dispatcher::{
    Command, CommandContext, CommandDispatcher, CommandResult, EXIT_CONFIG_NOT_FOUND,
};
