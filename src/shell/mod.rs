//! Subprocess execution.

pub mod command;

pub use command::{
    execute, execute_streaming, shell_argv, CommandOptions, CommandResult, CommandRunner,
    OutputLine, SystemRunner,
};
