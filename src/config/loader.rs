//! Manifest discovery, parsing and conversion into a [`Project`].

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::config::project::{Project, ProjectCommand};
use crate::config::schema::{CommandConfig, EnvSpecConfig, ManifestFile, VariableConfig};
use crate::error::{KapselError, Result};
use crate::requirements::{
    DownloadSpec, EnvSpec, Requirement, RequirementKind, RequirementOptions, StoredValue,
};

/// File name of the project manifest.
pub const MANIFEST_FILENAME: &str = "kapsel.yml";

/// Path of the manifest in `project_dir`.
pub fn manifest_path(project_dir: &Path) -> PathBuf {
    project_dir.join(MANIFEST_FILENAME)
}

/// Find the project root by walking up from `start` to the first
/// directory holding a manifest.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if manifest_path(&current).is_file() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Load and parse the manifest in `project_dir`.
///
/// # Errors
///
/// Returns `ConfigNotFound` if there is no manifest,
/// `ConfigParseError` if the YAML is invalid, and
/// `ConfigValidationError` listing every problem found in its contents.
pub fn load_project(project_dir: &Path) -> Result<Project> {
    let path = manifest_path(project_dir);
    let content = fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            KapselError::ConfigNotFound { path: path.clone() }
        } else {
            KapselError::Io(e)
        }
    })?;
    let manifest = parse_manifest(&content, &path)?;
    build_project(project_dir, manifest)
}

/// Parse YAML content into a [`ManifestFile`].
pub fn parse_manifest(content: &str, source_path: &Path) -> Result<ManifestFile> {
    if content.trim().is_empty() {
        return Ok(ManifestFile::default());
    }
    serde_yaml::from_str(content).map_err(|e| KapselError::ConfigParseError {
        path: source_path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Turn a parsed manifest into a project.
///
/// Requirement order: the master password (when any variable is
/// encrypted), the package environment, then variables, services and
/// downloads as declared.
pub fn build_project(project_dir: &Path, manifest: ManifestFile) -> Result<Project> {
    let mut problems = Vec::new();
    let mut declared: Vec<Requirement> = Vec::new();

    let env_specs = parse_env_specs(&manifest.env_specs, &mut problems);

    declared.extend(parse_variables(&manifest.variables, &mut problems));
    declared.extend(parse_services(&manifest.services, &mut problems));
    declared.extend(parse_downloads(&manifest.downloads, &mut problems));

    let mut seen = Vec::new();
    for requirement in &declared {
        if seen.contains(&requirement.env_var) {
            problems.push(format!(
                "Variable {} is declared more than once.",
                requirement.env_var
            ));
        } else {
            seen.push(requirement.env_var.clone());
        }
    }

    let commands = parse_commands(&manifest.commands, &env_specs, &mut problems);

    if !problems.is_empty() {
        return Err(KapselError::ConfigValidationError {
            message: problems.join("\n"),
        });
    }

    let mut requirements = Vec::new();
    if declared.iter().any(Requirement::encrypted) {
        requirements.push(Requirement::master_password());
    }
    if !env_specs.is_empty() {
        requirements.push(Requirement::conda_env(env_specs));
    }
    requirements.extend(declared);

    tracing::debug!(
        "Loaded {} requirements and {} commands from {}",
        requirements.len(),
        commands.len(),
        project_dir.display()
    );

    Ok(Project::new(
        project_dir,
        manifest.name,
        requirements,
        commands,
    ))
}

fn key_name(key: &Value, section: &str, problems: &mut Vec<String>) -> Option<String> {
    match key {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        other => {
            problems.push(format!(
                "{} has a name that is not a string: {:?}",
                section, other
            ));
            None
        }
    }
}

fn parse_default(name: &str, value: &Value, problems: &mut Vec<String>) -> Option<StoredValue> {
    if value.is_null() {
        return None;
    }
    let stored = StoredValue::from_yaml(value);
    if stored.is_none() {
        problems.push(format!(
            "default value for variable {} must be null, a string, a number, or a mapping with 'key' and 'encrypted'",
            name
        ));
    }
    stored
}

fn parse_variables(section: &Value, problems: &mut Vec<String>) -> Vec<Requirement> {
    match section {
        Value::Null => Vec::new(),
        Value::Sequence(names) => names
            .iter()
            .filter_map(|name| key_name(name, "variables", problems))
            .map(Requirement::env_var)
            .collect(),
        Value::Mapping(map) => map
            .iter()
            .filter_map(|(key, value)| {
                let name = key_name(key, "variables", problems)?;
                let options = variable_options(&name, value, problems)?;
                Some(Requirement::new(name, RequirementKind::EnvVar, options))
            })
            .collect(),
        _ => {
            problems.push("variables section should contain a list or a mapping".to_string());
            Vec::new()
        }
    }
}

fn variable_options(
    name: &str,
    value: &Value,
    problems: &mut Vec<String>,
) -> Option<RequirementOptions> {
    let config = match value {
        Value::Mapping(map) if !is_secret_reference(map) => {
            match serde_yaml::from_value::<VariableConfig>(value.clone()) {
                Ok(config) => config,
                Err(e) => {
                    problems.push(format!("variable {}: {}", name, e));
                    return None;
                }
            }
        }
        Value::Sequence(_) | Value::Tagged(_) => {
            problems.push(format!(
                "variable {} should be followed by a default value or a mapping of options",
                name
            ));
            return None;
        }
        scalar => VariableConfig {
            default: Some(scalar.clone()),
            ..VariableConfig::default()
        },
    };

    let default = config
        .default
        .as_ref()
        .and_then(|value| parse_default(name, value, problems));

    Some(RequirementOptions {
        default,
        encrypted: config.encrypted,
        description: config.description,
        extras: string_keyed(config.extras),
    })
}

fn is_secret_reference(map: &Mapping) -> bool {
    map.contains_key("key") && map.contains_key("encrypted") && map.len() == 2
}

fn string_keyed(map: Mapping) -> std::collections::BTreeMap<String, Value> {
    map.into_iter()
        .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), v)))
        .collect()
}

fn parse_services(section: &Mapping, problems: &mut Vec<String>) -> Vec<Requirement> {
    section
        .iter()
        .filter_map(|(key, value)| {
            let name = key_name(key, "services", problems)?;
            let (kind, default) = match value {
                Value::String(kind) => (kind.clone(), None),
                Value::Mapping(map) => {
                    let Some(kind) = map.get("type").and_then(Value::as_str) else {
                        problems.push(format!(
                            "Service {} doesn't contain a 'type' field.",
                            name
                        ));
                        return None;
                    };
                    let default = map
                        .get("default")
                        .and_then(|value| parse_default(&name, value, problems));
                    (kind.to_string(), default)
                }
                _ => {
                    problems.push(format!(
                        "Service {} should have a service type string or a mapping as its value.",
                        name
                    ));
                    return None;
                }
            };
            if kind != "redis" {
                problems.push(format!(
                    "Service {} has an unknown type '{}'.",
                    name, kind
                ));
                return None;
            }
            let options = RequirementOptions {
                default,
                ..RequirementOptions::default()
            };
            Some(Requirement::new(name, RequirementKind::Redis, options))
        })
        .collect()
}

fn parse_downloads(section: &Mapping, problems: &mut Vec<String>) -> Vec<Requirement> {
    section
        .iter()
        .filter_map(|(key, value)| {
            let name = key_name(key, "downloads", problems)?;
            match DownloadSpec::parse(&name, value) {
                Ok(spec) => Some(Requirement::new(
                    name,
                    RequirementKind::Download(spec),
                    RequirementOptions::default(),
                )),
                Err(message) => {
                    problems.push(message);
                    None
                }
            }
        })
        .collect()
}

fn parse_env_specs(section: &Mapping, problems: &mut Vec<String>) -> Vec<EnvSpec> {
    section
        .iter()
        .filter_map(|(key, value)| {
            let name = key_name(key, "env_specs", problems)?;
            let config = if value.is_null() {
                EnvSpecConfig::default()
            } else {
                match serde_yaml::from_value::<EnvSpecConfig>(value.clone()) {
                    Ok(config) => config,
                    Err(e) => {
                        problems.push(format!("env spec {}: {}", name, e));
                        return None;
                    }
                }
            };
            Some(EnvSpec {
                name,
                packages: config.packages,
                channels: config.channels,
                description: config.description,
            })
        })
        .collect()
}

fn parse_commands(
    section: &Mapping,
    env_specs: &[EnvSpec],
    problems: &mut Vec<String>,
) -> Vec<ProjectCommand> {
    section
        .iter()
        .filter_map(|(key, value)| {
            let name = key_name(key, "commands", problems)?;
            let config: CommandConfig = match serde_yaml::from_value(value.clone()) {
                Ok(config) => config,
                Err(e) => {
                    problems.push(format!("command {}: {}", name, e));
                    return None;
                }
            };
            if config.unix.is_none() && config.windows.is_none() {
                problems.push(format!(
                    "Command '{}' has no 'unix' or 'windows' field.",
                    name
                ));
                return None;
            }
            if let Some(spec) = &config.env_spec {
                if !env_specs.iter().any(|s| &s.name == spec) {
                    problems.push(format!(
                        "Command '{}' uses env spec '{}' which is not declared.",
                        name, spec
                    ));
                    return None;
                }
            }
            Some(ProjectCommand {
                name,
                unix: config.unix,
                windows: config.windows,
                description: config.description,
                env_spec: config.env_spec,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirements::{HashAlgorithm, ProviderKind, MASTER_PASSWORD_VAR};
    use tempfile::TempDir;

    fn project_from(yaml: &str) -> Result<Project> {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(MANIFEST_FILENAME), yaml).unwrap();
        load_project(temp.path())
    }

    fn validation_message(yaml: &str) -> String {
        match project_from(yaml) {
            Err(KapselError::ConfigValidationError { message }) => message,
            other => panic!("expected validation error, got {:?}", other.map(|p| p.name)),
        }
    }

    #[test]
    fn missing_manifest_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = load_project(temp.path()).unwrap_err();
        assert!(matches!(err, KapselError::ConfigNotFound { .. }));
    }

    #[test]
    fn invalid_yaml_is_a_parse_error() {
        let err = project_from("variables: [unclosed").unwrap_err();
        assert!(matches!(err, KapselError::ConfigParseError { .. }));
    }

    #[test]
    fn empty_manifest_has_no_requirements() {
        let project = project_from("").unwrap();
        assert!(project.requirements.is_empty());
        assert!(project.commands.is_empty());
    }

    #[test]
    fn variable_list() {
        let project = project_from("name: demo\nvariables: [FOO, BAR]\n").unwrap();
        assert_eq!(project.name, "demo");
        let names: Vec<_> = project.requirements.iter().map(|r| r.env_var.as_str()).collect();
        assert_eq!(names, vec!["FOO", "BAR"]);
        assert!(project
            .requirements
            .iter()
            .all(|r| r.provider_kind() == ProviderKind::EnvVar));
    }

    #[test]
    fn variable_mapping_with_defaults() {
        let project = project_from(
            r#"
variables:
  PORT: 8080
  GREETING:
    default: hello
    description: What to say
  TOKEN:
    encrypted: true
"#,
        )
        .unwrap();

        assert_eq!(project.requirements[0].env_var, MASTER_PASSWORD_VAR);
        let port = project.requirement("PORT").unwrap();
        assert_eq!(port.options.default, Some(StoredValue::Plain("8080".into())));
        let greeting = project.requirement("GREETING").unwrap();
        assert_eq!(greeting.description(), "What to say");
        assert!(project.requirement("TOKEN").unwrap().encrypted());
    }

    #[test]
    fn secret_reference_default() {
        let project = project_from(
            "variables:\n  DB_PASSWORD: {key: KAPSEL_MASTER_PASSWORD, encrypted: abc}\n",
        )
        .unwrap();
        let req = project.requirement("DB_PASSWORD").unwrap();
        assert_eq!(
            req.options.default,
            Some(StoredValue::Encrypted {
                key: MASTER_PASSWORD_VAR.into(),
                encrypted: "abc".into()
            })
        );
    }

    #[test]
    fn services_and_downloads() {
        let project = project_from(
            r#"
services:
  REDIS_URL: redis
  CACHE_URL: {type: redis, default: "redis://cache:6379"}
downloads:
  DATA:
    url: http://example.com/data.csv
    sha256: ABCDEF
"#,
        )
        .unwrap();

        let kinds: Vec<_> = project.requirements.iter().map(Requirement::provider_kind).collect();
        assert_eq!(
            kinds,
            vec![ProviderKind::Redis, ProviderKind::Redis, ProviderKind::Download]
        );
        let cache = project.requirement("CACHE_URL").unwrap();
        assert_eq!(
            cache.options.default,
            Some(StoredValue::Plain("redis://cache:6379".into()))
        );
        let spec = project.requirement("DATA").unwrap().download_spec().unwrap();
        assert_eq!(spec.hash, Some((HashAlgorithm::Sha256, "abcdef".into())));
    }

    #[test]
    fn env_specs_become_one_requirement_first() {
        let project = project_from(
            r#"
variables: [FOO]
env_specs:
  default:
    packages: [numpy]
    channels: [conda-forge]
  py2:
    packages: ["python=2.7"]
commands:
  default:
    unix: python main.py
  legacy:
    unix: python2 main.py
    env_spec: py2
"#,
        )
        .unwrap();

        assert_eq!(project.requirements[0].provider_kind(), ProviderKind::CondaEnv);
        assert_eq!(project.env_specs().len(), 2);
        assert_eq!(project.env_specs()[0].channels, vec!["conda-forge"]);
        assert_eq!(project.default_env_spec_name(), Some("default"));
        assert_eq!(project.command(Some("legacy")).unwrap().env_spec.as_deref(), Some("py2"));
    }

    #[test]
    fn collects_every_problem() {
        let message = validation_message(
            r#"
variables: [FOO]
services:
  FOO: redis
  MEMCACHED_URL: memcached
downloads:
  BROKEN: {filename: x}
commands:
  empty: {description: nothing}
"#,
        );
        assert!(message.contains("Service MEMCACHED_URL has an unknown type 'memcached'."));
        assert!(message.contains("Download item BROKEN doesn't contain a 'url' field."));
        assert!(message.contains("Command 'empty' has no 'unix' or 'windows' field."));
        assert!(message.contains("Variable FOO is declared more than once."));
    }

    #[test]
    fn unknown_env_spec_in_command() {
        let message = validation_message("commands:\n  run: {unix: x, env_spec: missing}\n");
        assert_eq!(
            message,
            "Command 'run' uses env spec 'missing' which is not declared."
        );
    }

    #[test]
    fn find_project_root_walks_up() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp.path().join(MANIFEST_FILENAME), "").unwrap();

        assert_eq!(find_project_root(&nested), Some(temp.path().to_path_buf()));
    }
}
