//! [`EnvironmentManager`] backed by the `conda` executable.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;

use super::{EnvManagerError, EnvironmentDeviations, EnvironmentManager};
use crate::frontend::Frontend;
use crate::requirements::EnvSpec;
use crate::shell::{CommandOptions, CommandResult, CommandRunner, OutputLine};

/// Variable naming the conda executable to run.
pub const CONDA_EXE_VAR: &str = "CONDA_EXE";

// name, then either a conda constraint (=ver[=build]) or a pip-style one
static SPEC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<name>[^=<>!\s]+)\s*(?:(?P<cc>=[^=<>!]+(?:=[^=<>!]+)?|==[^=<>!]+)|(?P<pc>[=<>!]{1,2}.+))?$")
        .unwrap()
});

/// A package spec such as `numpy`, `python=3.11` or `bokeh=3.4=py_0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    /// Lowercased package name.
    pub name: String,
    /// Required version, when pinned with `=` or `==`.
    pub version: Option<String>,
    /// Required build string, the third `=` field.
    pub build: Option<String>,
    /// Whether `version` must match exactly rather than as a prefix.
    pub exact: bool,
}

impl PackageSpec {
    /// Parse a spec the way conda reads one. Returns `None` for nonsense.
    pub fn parse(spec: &str) -> Option<Self> {
        let caps = SPEC_PATTERN.captures(spec.trim())?;
        let name = caps.name("name")?.as_str().to_lowercase();

        let mut parsed = Self {
            name,
            version: None,
            build: None,
            exact: false,
        };

        if let Some(cc) = caps.name("cc") {
            let text = cc.as_str();
            let (exact, rest) = match text.strip_prefix("==") {
                Some(rest) => (true, rest),
                None => (false, &text[1..]),
            };
            let mut fields = rest.splitn(2, '=');
            parsed.version = fields.next().map(|v| v.trim().to_string());
            parsed.build = fields.next().map(|b| b.trim().to_string());
            parsed.exact = exact || parsed.build.is_some();
        }

        Some(parsed)
    }

    fn accepts(&self, installed: &InstalledPackage) -> bool {
        if let Some(version) = &self.version {
            let matches = installed.version == *version
                || (!self.exact
                    && installed
                        .version
                        .strip_prefix(version.as_str())
                        .is_some_and(|rest| rest.starts_with('.')));
            if !matches {
                return false;
            }
        }
        match &self.build {
            Some(build) => installed.build_string == *build,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct InstalledPackage {
    name: String,
    version: String,
    #[serde(default)]
    build_string: String,
}

/// Runs `conda` through a [`CommandRunner`].
pub struct CondaManager {
    runner: Arc<dyn CommandRunner>,
    executable: String,
}

impl CondaManager {
    /// Use `$CONDA_EXE` when set, else `conda` from `PATH`.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let executable = std::env::var(CONDA_EXE_VAR)
            .ok()
            .filter(|exe| !exe.is_empty())
            .unwrap_or_else(|| "conda".to_string());
        Self::with_executable(runner, executable)
    }

    /// Use a specific conda executable.
    pub fn with_executable(runner: Arc<dyn CommandRunner>, executable: impl Into<String>) -> Self {
        Self {
            runner,
            executable: executable.into(),
        }
    }

    fn argv(&self, args: &[&str]) -> Vec<String> {
        std::iter::once(self.executable.as_str())
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect()
    }

    fn installed(&self, prefix: &Path) -> Result<Vec<InstalledPackage>, EnvManagerError> {
        let prefix_arg = prefix.display().to_string();
        let argv = self.argv(&["list", "--prefix", &prefix_arg, "--json"]);
        tracing::debug!("Running {:?}", argv);

        let listing_failed = |detail: String| {
            EnvManagerError(format!(
                "Conda failed while listing installed packages in {}: {}",
                prefix.display(),
                detail
            ))
        };

        let result = self
            .runner
            .run(&argv, &CommandOptions::captured())
            .map_err(|e| listing_failed(e.to_string()))?;
        if !result.success {
            return Err(listing_failed(failure_detail(&result)));
        }
        serde_json::from_str(&result.stdout).map_err(|e| listing_failed(e.to_string()))
    }

    fn run_streaming(
        &self,
        argv: &[String],
        frontend: &mut dyn Frontend,
    ) -> Result<(), String> {
        tracing::debug!("Running {:?}", argv);
        let outcome = self.runner.run_streaming(
            argv,
            &CommandOptions::captured(),
            &mut |line| match line {
                OutputLine::Stdout(text) => frontend.partial_info(&format!("{}\n", text)),
                OutputLine::Stderr(text) => frontend.partial_error(&format!("{}\n", text)),
            },
        );
        frontend.flush_partial();
        match outcome {
            Ok(result) if result.success => Ok(()),
            Ok(result) => Err(failure_detail(&result)),
            Err(e) => Err(e.to_string()),
        }
    }
}

fn failure_detail(result: &CommandResult) -> String {
    let stderr = result.stderr.trim();
    if stderr.is_empty() {
        format!("exited with code {}", result.code_for_display())
    } else {
        stderr.to_string()
    }
}

fn has_conda_meta(prefix: &Path) -> bool {
    prefix.join("conda-meta").is_dir()
}

impl EnvironmentManager for CondaManager {
    fn find_environment_deviations(
        &self,
        prefix: &Path,
        spec: &EnvSpec,
    ) -> Result<EnvironmentDeviations, EnvManagerError> {
        let declared: Vec<PackageSpec> = spec
            .packages
            .iter()
            .filter_map(|p| PackageSpec::parse(p))
            .collect();

        if !has_conda_meta(prefix) {
            return Ok(EnvironmentDeviations {
                summary: format!(
                    "'{}' doesn't look like it contains a Conda environment yet.",
                    prefix.display()
                ),
                missing_packages: declared.into_iter().map(|p| p.name).collect(),
                wrong_version_packages: Vec::new(),
                broken: true,
            });
        }

        let installed = self.installed(prefix)?;

        let mut missing = Vec::new();
        let mut wrong = Vec::new();
        for wanted in &declared {
            match installed
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(&wanted.name))
            {
                None => missing.push(wanted.name.clone()),
                Some(found) if !wanted.accepts(found) => wrong.push(wanted.name.clone()),
                Some(_) => {}
            }
        }
        missing.sort();
        wrong.sort();

        let summary = match (missing.is_empty(), wrong.is_empty()) {
            (true, true) => "OK".to_string(),
            (false, true) => format!("Conda environment is missing packages: {}", missing.join(", ")),
            (true, false) => format!(
                "Conda environment has wrong versions of: {}",
                wrong.join(", ")
            ),
            (false, false) => format!(
                "Conda environment is missing packages: {} and has wrong versions of: {}",
                missing.join(", "),
                wrong.join(", ")
            ),
        };

        Ok(EnvironmentDeviations {
            summary,
            missing_packages: missing,
            wrong_version_packages: wrong,
            broken: false,
        })
    }

    fn fix_environment_deviations(
        &self,
        prefix: &Path,
        spec: &EnvSpec,
        deviations: &EnvironmentDeviations,
        create: bool,
        frontend: &mut dyn Frontend,
    ) -> Result<(), EnvManagerError> {
        let prefix_arg = prefix.display().to_string();
        let channel_args: Vec<&str> = spec
            .channels
            .iter()
            .flat_map(|c| ["--channel", c.as_str()])
            .collect();

        if has_conda_meta(prefix) {
            let needs_work: Vec<&String> = deviations
                .missing_packages
                .iter()
                .chain(&deviations.wrong_version_packages)
                .collect();
            let specs: Vec<&str> = spec
                .packages
                .iter()
                .filter(|p| {
                    PackageSpec::parse(p).is_some_and(|parsed| needs_work.contains(&&parsed.name))
                })
                .map(String::as_str)
                .collect();
            if specs.is_empty() {
                return Ok(());
            }

            let mut args = vec!["install", "--yes", "--prefix", prefix_arg.as_str()];
            args.extend(&channel_args);
            args.extend(&specs);
            frontend.info(&format!("Installing {} into {}", specs.join(", "), prefix.display()));
            self.run_streaming(&self.argv(&args), frontend)
                .map_err(|detail| {
                    EnvManagerError(format!(
                        "Failed to install packages: {}: {}",
                        specs.join(", "),
                        detail
                    ))
                })
        } else if !create {
            Err(EnvManagerError(format!(
                "Conda environment at {} does not exist and will not be created.",
                prefix.display()
            )))
        } else {
            let mut specs: Vec<&str> = spec.packages.iter().map(String::as_str).collect();
            if specs.is_empty() {
                specs.push("python");
            }
            let mut args = vec!["create", "--yes", "--prefix", prefix_arg.as_str()];
            args.extend(&channel_args);
            args.extend(&specs);
            frontend.info(&format!("Creating environment at {}", prefix.display()));
            self.run_streaming(&self.argv(&args), frontend)
                .map_err(|detail| {
                    EnvManagerError(format!(
                        "Failed to create environment at {}: {}",
                        prefix.display(),
                        detail
                    ))
                })
        }
    }
}
