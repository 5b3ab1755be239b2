//! A loaded project: its directory, requirements and commands.

use std::path::{Path, PathBuf};

use crate::requirements::{EnvSpec, Requirement, RequirementKind};
use crate::shell::shell_argv;

/// A command declared in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectCommand {
    /// Name under `commands:`.
    pub name: String,
    /// Shell command line used on Unix.
    pub unix: Option<String>,
    /// Shell command line used on Windows.
    pub windows: Option<String>,
    /// Human-readable description.
    pub description: Option<String>,
    /// Env spec to prepare for this command.
    pub env_spec: Option<String>,
}

impl ProjectCommand {
    /// Command line for the current platform.
    pub fn command_line(&self) -> Option<&str> {
        if cfg!(windows) {
            self.windows.as_deref()
        } else {
            self.unix.as_deref()
        }
    }

    /// Argument vector running this command through the platform shell,
    /// with `extra_args` appended to the command line.
    pub fn argv(&self, extra_args: &[String]) -> Option<Vec<String>> {
        let line = self.command_line()?;
        let mut full = line.to_string();
        for arg in extra_args {
            full.push(' ');
            full.push_str(&quote_arg(arg));
        }
        Some(shell_argv(&full))
    }
}

fn quote_arg(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c));
    if plain {
        arg.to_string()
    } else if cfg!(windows) {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

/// Everything the manifest declares.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    /// Directory holding the manifest.
    pub directory: PathBuf,
    /// Display name; the directory name when the manifest has none.
    pub name: String,
    /// Requirements in preparation order.
    pub requirements: Vec<Requirement>,
    /// Commands in declaration order.
    pub commands: Vec<ProjectCommand>,
}

impl Project {
    /// Create a project from its parts.
    pub fn new(
        directory: impl Into<PathBuf>,
        name: Option<String>,
        requirements: Vec<Requirement>,
        commands: Vec<ProjectCommand>,
    ) -> Self {
        let directory = directory.into();
        let name = name.unwrap_or_else(|| {
            directory
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "project".to_string())
        });
        Self {
            directory,
            name,
            requirements,
            commands,
        }
    }

    /// The project directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Env specs declared by the project.
    pub fn env_specs(&self) -> &[EnvSpec] {
        self.requirements
            .iter()
            .find(|r| matches!(r.kind, RequirementKind::CondaEnv { .. }))
            .map(Requirement::env_specs)
            .unwrap_or_default()
    }

    /// Name of the env spec used when nothing selects one.
    pub fn default_env_spec_name(&self) -> Option<&str> {
        self.env_specs().first().map(|spec| spec.name.as_str())
    }

    /// Look up a command; `None` selects the default command.
    ///
    /// The default is the command named `default`, else the first one.
    pub fn command(&self, name: Option<&str>) -> Option<&ProjectCommand> {
        match name {
            Some(name) => self.commands.iter().find(|c| c.name == name),
            None => self
                .commands
                .iter()
                .find(|c| c.name == "default")
                .or_else(|| self.commands.first()),
        }
    }

    /// Requirement resolving `env_var`.
    pub fn requirement(&self, env_var: &str) -> Option<&Requirement> {
        self.requirements.iter().find(|r| r.env_var == env_var)
    }
}
