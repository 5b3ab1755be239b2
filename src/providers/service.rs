//! Bookkeeping for background services started by providers.
//!
//! A service keeps its files under `PROJECT_DIR/services/<name>` and records
//! how to stop it in the `service_run_states` section of the local state.

use std::path::PathBuf;

use serde_yaml::Value;

use crate::requirements::SimpleStatus;
use crate::shell::{CommandOptions, CommandRunner};
use crate::state::LocalStateFile;

/// Key in a run state listing the commands that stop the service.
pub const SHUTDOWN_COMMANDS: &str = "shutdown_commands";

/// Working directory of a service.
pub fn service_directory(local_state: &LocalStateFile, name: &str) -> PathBuf {
    local_state.project_dir().join("services").join(name)
}

/// Remove a service's working directory. Failures are only logged.
pub fn delete_service_directory(local_state: &LocalStateFile, name: &str) {
    let path = service_directory(local_state, name);
    if !path.exists() {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(&path) {
        tracing::debug!("Could not remove {}: {}", path.display(), e);
    }
}

fn argv_from_yaml(value: &Value) -> Option<Vec<String>> {
    value
        .as_sequence()?
        .iter()
        .map(|part| match part {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

/// Run the recorded shutdown commands for a service, then forget them.
///
/// The run state is cleared and saved whether or not the commands worked.
pub fn shutdown_service_run_state(
    local_state: &mut LocalStateFile,
    service_name: &str,
    runner: &dyn CommandRunner,
) -> SimpleStatus {
    if !local_state
        .service_names()
        .iter()
        .any(|name| name == service_name)
    {
        return SimpleStatus::ok(format!("Nothing to do to shut down {}.", service_name));
    }

    let state = local_state.get_service_run_state(service_name);
    let commands: Vec<Vec<String>> = state
        .get(SHUTDOWN_COMMANDS)
        .and_then(Value::as_sequence)
        .map(|seq| seq.iter().filter_map(argv_from_yaml).collect())
        .unwrap_or_default();

    let mut errors = Vec::new();
    for argv in commands {
        tracing::debug!("Shutting down {} with {:?}", service_name, argv);
        match runner.run(&argv, &CommandOptions::captured()) {
            Ok(result) if result.success => {}
            Ok(result) => errors.push(format!(
                "Shutting down {}, command {:?} failed with code {}.",
                service_name,
                argv,
                result.code_for_display()
            )),
            Err(e) => errors.push(format!(
                "Shutting down {}, command {:?} failed: {}.",
                service_name, argv, e
            )),
        }
    }

    local_state.set_service_run_state(service_name, Default::default());
    if let Err(e) = local_state.save() {
        errors.push(format!("Failed to save run state for {}: {}", service_name, e));
    }

    if errors.is_empty() {
        SimpleStatus::ok(format!("Successfully shut down {}.", service_name))
    } else {
        SimpleStatus::failed(
            format!("Shutdown commands failed for {}.", service_name),
            errors,
        )
    }
}
