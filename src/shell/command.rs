//! Subprocess execution.
//!
//! Commands are given as argv vectors and spawned directly; only manifest
//! commands flagged as shell commands go through [`shell_argv`].

use crate::error::{KapselError, Result};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of executing a command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit code (None if killed by signal).
    pub exit_code: Option<i32>,

    /// Standard output.
    pub stdout: String,

    /// Standard error.
    pub stderr: String,

    /// Execution duration.
    pub duration: Duration,

    /// Whether command succeeded (exit code 0).
    pub success: bool,
}

impl CommandResult {
    /// Create a success result.
    pub fn success(stdout: String, stderr: String, duration: Duration) -> Self {
        Self {
            exit_code: Some(0),
            stdout,
            stderr,
            duration,
            success: true,
        }
    }

    /// Create a failure result.
    pub fn failure(
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        duration: Duration,
    ) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            duration,
            success: false,
        }
    }

    /// Exit code for messages, `-1` when killed by a signal.
    pub fn code_for_display(&self) -> i32 {
        self.exit_code.unwrap_or(-1)
    }
}

/// Options for command execution.
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    /// Working directory.
    pub cwd: Option<PathBuf>,

    /// Environment variables (merged with system env).
    pub env: HashMap<String, String>,

    /// Capture stdout (if false, inherits from parent).
    pub capture_stdout: bool,

    /// Capture stderr (if false, inherits from parent).
    pub capture_stderr: bool,
}

impl CommandOptions {
    /// Options that capture both streams.
    pub fn captured() -> Self {
        Self {
            capture_stdout: true,
            capture_stderr: true,
            ..Default::default()
        }
    }

    /// Set the environment.
    pub fn with_env(mut self, env: &HashMap<String, String>) -> Self {
        self.env = env.clone();
        self
    }

    /// Set the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Output line from command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Runs external programs.
///
/// Providers reach subprocesses only through this trait so tests can
/// substitute a scripted runner.
pub trait CommandRunner: Send + Sync {
    /// Run to completion and return the collected output.
    fn run(&self, argv: &[String], options: &CommandOptions) -> Result<CommandResult>;

    /// Run to completion, handing each output line to `on_output` as it arrives.
    fn run_streaming(
        &self,
        argv: &[String],
        options: &CommandOptions,
        on_output: &mut dyn FnMut(OutputLine),
    ) -> Result<CommandResult>;
}

/// [`CommandRunner`] that spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[String], options: &CommandOptions) -> Result<CommandResult> {
        execute(argv, options)
    }

    fn run_streaming(
        &self,
        argv: &[String],
        options: &CommandOptions,
        on_output: &mut dyn FnMut(OutputLine),
    ) -> Result<CommandResult> {
        execute_streaming(argv, options, on_output)
    }
}

fn build_command(argv: &[String], options: &CommandOptions) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| KapselError::CommandFailed {
            command: String::new(),
            code: None,
        })?;

    let mut cmd = Command::new(program);
    cmd.args(args);

    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }

    for (key, value) in &options.env {
        cmd.env(key, value);
    }

    Ok(cmd)
}

fn spawn_error(argv: &[String], err: std::io::Error) -> KapselError {
    tracing::debug!("failed to spawn {:?}: {}", argv, err);
    KapselError::CommandFailed {
        command: argv.join(" "),
        code: None,
    }
}

/// Execute a command.
pub fn execute(argv: &[String], options: &CommandOptions) -> Result<CommandResult> {
    let start = Instant::now();
    tracing::debug!("running {:?}", argv);

    let mut cmd = build_command(argv, options)?;

    if options.capture_stdout {
        cmd.stdout(Stdio::piped());
    } else {
        cmd.stdout(Stdio::inherit());
    }

    if options.capture_stderr {
        cmd.stderr(Stdio::piped());
    } else {
        cmd.stderr(Stdio::inherit());
    }

    let output = cmd.output().map_err(|e| spawn_error(argv, e))?;

    let duration = start.elapsed();

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if output.status.success() {
        Ok(CommandResult::success(stdout, stderr, duration))
    } else {
        Ok(CommandResult::failure(
            output.status.code(),
            stdout,
            stderr,
            duration,
        ))
    }
}

fn forward_lines<R: Read>(
    reader: R,
    tx: mpsc::Sender<OutputLine>,
    wrap: fn(String) -> OutputLine,
) -> String {
    let reader = BufReader::new(reader);
    let mut output = String::new();
    for line in reader.lines().map_while(std::result::Result::ok) {
        output.push_str(&line);
        output.push('\n');
        let _ = tx.send(wrap(line));
    }
    output
}

/// Execute a command with streaming output.
pub fn execute_streaming(
    argv: &[String],
    options: &CommandOptions,
    on_output: &mut dyn FnMut(OutputLine),
) -> Result<CommandResult> {
    let start = Instant::now();
    tracing::debug!("running {:?} (streaming)", argv);

    let mut cmd = build_command(argv, options)?;
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| spawn_error(argv, e))?;

    let (tx, rx) = mpsc::channel();

    let stdout_handle = child.stdout.take().map(|stdout| {
        let tx = tx.clone();
        thread::spawn(move || forward_lines(stdout, tx, OutputLine::Stdout))
    });
    let stderr_handle = child.stderr.take().map(|stderr| {
        let tx = tx.clone();
        thread::spawn(move || forward_lines(stderr, tx, OutputLine::Stderr))
    });
    drop(tx);

    for line in rx {
        on_output(line);
    }

    let stdout_output = stdout_handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let stderr_output = stderr_handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default();

    let status = child.wait().map_err(|e| spawn_error(argv, e))?;

    let duration = start.elapsed();

    if status.success() {
        Ok(CommandResult::success(
            stdout_output,
            stderr_output,
            duration,
        ))
    } else {
        Ok(CommandResult::failure(
            status.code(),
            stdout_output,
            stderr_output,
            duration,
        ))
    }
}

/// Wrap a command line so it runs through the platform shell.
pub fn shell_argv(command: &str) -> Vec<String> {
    if cfg!(target_os = "windows") {
        let shell = std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string());
        vec![shell, "/C".to_string(), command.to_string()]
    } else {
        vec!["/bin/sh".to_string(), "-c".to_string(), command.to_string()]
    }
}
