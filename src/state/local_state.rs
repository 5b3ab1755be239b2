//! Per-project local state document.
//!
//! `kapsel-local.yml` lives next to the manifest and holds what the user
//! entered or what providers recorded:
//!
//! ```yaml
//! variables:
//!   DB_HOST: db.internal
//!   DB_PASSWORD: {key: KAPSEL_MASTER_PASSWORD, encrypted: "eyJj..."}
//! disabled_variables: {}
//! service_run_states:
//!   REDIS_URL:
//!     port: 6380
//!     shutdown_commands: [[redis-cli, -p, "6380", shutdown]]
//! service_options:
//!   REDIS_URL: {scope: all, port_range: 6380-6449}
//! ```
//!
//! Saves go through a temporary file and [`rename_over_existing`], so a
//! crash never leaves a half-written document. There is no cross-process
//! locking; two runs against one directory can race.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use super::rename::rename_over_existing;
use crate::error::{KapselError, Result};

/// File name of the local state document inside a project directory.
pub const LOCAL_STATE_FILENAME: &str = "kapsel-local.yml";

const SERVICE_RUN_STATES: &str = "service_run_states";

/// In-memory view of a project's local state document.
#[derive(Debug, Clone)]
pub struct LocalStateFile {
    path: PathBuf,
    contents: Mapping,
}

impl LocalStateFile {
    /// Load the state document for a project directory.
    pub fn load_for_directory(project_dir: &Path) -> Result<Self> {
        Self::load(project_dir.join(LOCAL_STATE_FILENAME))
    }

    /// Load from an explicit path; a missing file is an empty document.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !path.exists() {
            return Ok(Self {
                path,
                contents: Mapping::new(),
            });
        }

        let text = fs::read_to_string(&path)?;
        let value: Value =
            serde_yaml::from_str(&text).map_err(|e| KapselError::ConfigParseError {
                path: path.clone(),
                message: e.to_string(),
            })?;

        let contents = match value {
            Value::Mapping(map) => map,
            Value::Null => Mapping::new(),
            _ => {
                return Err(KapselError::ConfigParseError {
                    path,
                    message: "top level must be a mapping".to_string(),
                })
            }
        };

        Ok(Self { path, contents })
    }

    /// Location of the document on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory that holds the document.
    pub fn project_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// True if nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Write the document atomically.
    pub fn save(&self) -> Result<()> {
        let dir = self.project_dir();
        fs::create_dir_all(dir)?;

        let yaml = serde_yaml::to_string(&self.contents).map_err(|e| {
            KapselError::LocalStateError {
                path: self.path.clone(),
                message: e.to_string(),
            }
        })?;

        let mut temp = tempfile::Builder::new()
            .prefix(".kapsel-local")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        temp.write_all(yaml.as_bytes())?;
        temp.as_file().sync_all()?;

        let temp_path = temp.into_temp_path();
        rename_over_existing(&temp_path, &self.path)?;
        // already moved; nothing left for the guard to delete
        let _ = temp_path.keep();

        tracing::debug!("Saved local state to {}", self.path.display());
        Ok(())
    }

    /// Look up a nested value.
    pub fn get_value(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.contents.get(*first)?;
        for key in rest {
            current = current.as_mapping()?.get(*key)?;
        }
        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }

    /// Look up a nested string.
    pub fn get_string(&self, path: &[&str]) -> Option<String> {
        match self.get_value(path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Set a nested value, creating intermediate mappings as needed.
    pub fn set_value(&mut self, path: &[&str], value: impl Into<Value>) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };

        let mut current = &mut self.contents;
        for key in parents {
            let slot = current
                .entry(Value::from(*key))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
            if !slot.is_mapping() {
                *slot = Value::Mapping(Mapping::new());
            }
            current = match slot {
                Value::Mapping(map) => map,
                _ => return,
            };
        }
        current.insert(Value::from(*last), value.into());
    }

    /// Remove a nested value. Returns true if something was removed.
    pub fn unset_value(&mut self, path: &[&str]) -> bool {
        let Some((last, parents)) = path.split_last() else {
            return false;
        };

        let mut current = &mut self.contents;
        for key in parents {
            current = match current.get_mut(*key) {
                Some(Value::Mapping(map)) => map,
                _ => return false,
            };
        }
        current.remove(*last).is_some()
    }

    /// Run state recorded for a service, empty if none.
    pub fn get_service_run_state(&self, service_name: &str) -> Mapping {
        self.get_value(&[SERVICE_RUN_STATES, service_name])
            .and_then(Value::as_mapping)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace the run state recorded for a service.
    pub fn set_service_run_state(&mut self, service_name: &str, state: Mapping) {
        self.set_value(&[SERVICE_RUN_STATES, service_name], Value::Mapping(state));
    }

    /// Names of all services with recorded run state.
    pub fn service_names(&self) -> Vec<String> {
        self.get_value(&[SERVICE_RUN_STATES])
            .and_then(Value::as_mapping)
            .map(|map| {
                map.keys()
                    .filter_map(|k| k.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}
