//! Plain environment variables, optionally stored encrypted.
//!
//! Values come from, in order: a `variables.<VAR>` override in the local
//! state, the OS keychain (encrypted variables only), the caller's
//! environment, and finally the manifest default.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{ConfigContext, ConfigWriter, ProvideContext, Provider};
use crate::frontend::Frontend;
use crate::requirements::{
    ConfigSource, Environ, ProvideResult, ProviderAnalysis, ProviderConfig, ProviderKind,
    Requirement, SimpleStatus, StoredValue, UserConfigOverrides, CONDA_PREFIX_VAR,
    MASTER_PASSWORD_VAR, PROJECT_DIR_VAR,
};
use crate::secrets::{codec, keychain, SecretStore};
use crate::state::LocalStateFile;

const VARIABLES: &str = "variables";
const DISABLED_VARIABLES: &str = "disabled_variables";

/// Meets a requirement by letting the user set the variable.
#[derive(Clone)]
pub struct EnvVarProvider {
    secrets: Arc<dyn SecretStore>,
}

impl EnvVarProvider {
    /// Create a provider backed by `secrets` for encrypted values.
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }

    fn local_override(requirement: &Requirement, local_state: &LocalStateFile) -> Option<StoredValue> {
        local_state
            .get_value(&[VARIABLES, &requirement.env_var])
            .and_then(StoredValue::from_yaml)
    }

    fn disabled_override(
        requirement: &Requirement,
        local_state: &LocalStateFile,
    ) -> Option<StoredValue> {
        local_state
            .get_value(&[DISABLED_VARIABLES, &requirement.env_var])
            .and_then(StoredValue::from_yaml)
    }

    /// Keychain entry for an encrypted variable.
    ///
    /// Entries are scoped to the active package environment when there is
    /// one, otherwise to the project directory.
    fn keychain_name(requirement: &Requirement, environ: &Environ) -> Option<String> {
        environ
            .get(CONDA_PREFIX_VAR)
            .or_else(|| environ.get(PROJECT_DIR_VAR))
            .map(|scope| keychain::scoped_name(scope, &requirement.env_var))
    }

    fn keychain_value(&self, requirement: &Requirement, environ: &Environ) -> Option<String> {
        if !requirement.encrypted() {
            return None;
        }
        let name = Self::keychain_name(requirement, environ)?;
        self.secrets.get(&name)
    }

    /// Turn a stored value into plaintext.
    fn reveal(requirement: &Requirement, stored: &StoredValue, environ: &Environ) -> Result<String, String> {
        match stored {
            StoredValue::Plain(value) => Ok(value.clone()),
            StoredValue::Encrypted { key, encrypted } => {
                let Some(passphrase) = environ.get(key) else {
                    return Err(format!(
                        "Master password {} is not set so can't get value of {}.",
                        key, requirement.env_var
                    ));
                };
                codec::decrypt(encrypted, passphrase).map_err(|e| {
                    format!("Failed to decrypt {} with {}: {}", requirement.env_var, key, e)
                })
            }
        }
    }

    fn reveal_quietly(
        requirement: &Requirement,
        stored: &StoredValue,
        environ: &Environ,
    ) -> Option<String> {
        match Self::reveal(requirement, stored, environ) {
            Ok(value) => Some(value),
            Err(message) => {
                tracing::debug!("{}", message);
                None
            }
        }
    }

    fn missing_key(stored: Option<&StoredValue>, environ: &Environ) -> Option<String> {
        stored
            .and_then(StoredValue::key)
            .filter(|key| !environ.contains_key(*key))
            .map(str::to_string)
    }

    /// Encrypt a value for storage, when a passphrase is available.
    fn seal(
        requirement: &Requirement,
        value: &str,
        existing_key: Option<&str>,
        environ: &Environ,
    ) -> Option<StoredValue> {
        let key = match existing_key {
            Some(key) => key,
            None if environ.contains_key(MASTER_PASSWORD_VAR) => MASTER_PASSWORD_VAR,
            None => return None,
        };
        let passphrase = environ.get(key)?;
        match codec::encrypt(value, passphrase) {
            Ok(encrypted) => Some(StoredValue::Encrypted {
                key: key.to_string(),
                encrypted,
            }),
            Err(e) => {
                tracing::warn!("Could not encrypt {}: {}", requirement.env_var, e);
                None
            }
        }
    }
}

impl Provider for EnvVarProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::EnvVar
    }

    fn missing_env_vars_to_configure(
        &self,
        requirement: &Requirement,
        environ: &Environ,
        local_state: &LocalStateFile,
    ) -> Vec<String> {
        let local = Self::local_override(requirement, local_state);
        Self::missing_key(local.as_ref(), environ).into_iter().collect()
    }

    fn missing_env_vars_to_provide(
        &self,
        requirement: &Requirement,
        environ: &Environ,
        local_state: &LocalStateFile,
    ) -> Vec<String> {
        let local = Self::local_override(requirement, local_state);
        if local.as_ref().and_then(StoredValue::key).is_some() {
            return Self::missing_key(local.as_ref(), environ).into_iter().collect();
        }
        if environ.contains_key(&requirement.env_var) {
            return Vec::new();
        }
        Self::missing_key(requirement.options.default.as_ref(), environ)
            .into_iter()
            .collect()
    }

    fn read_config(&self, requirement: &Requirement, ctx: &ConfigContext<'_>) -> ProviderConfig {
        if let Some(stored) = Self::local_override(requirement, ctx.local_state) {
            let mut config = ProviderConfig::new(ConfigSource::Variables);
            config.value = Self::reveal_quietly(requirement, &stored, ctx.environ);
            return config;
        }

        if let Some(value) = self.keychain_value(requirement, ctx.environ) {
            return ProviderConfig::new(ConfigSource::Variables).with_value(value);
        }

        let disabled = Self::disabled_override(requirement, ctx.local_state)
            .and_then(|stored| Self::reveal_quietly(requirement, &stored, ctx.environ));

        if let Some(value) = ctx.environ.get(&requirement.env_var) {
            ProviderConfig::new(ConfigSource::Environ).with_value(value.clone())
        } else {
            let source = if requirement.options.default.is_some() {
                ConfigSource::Default
            } else {
                ConfigSource::Unset
            };
            let mut config = ProviderConfig::new(source);
            config.value = disabled;
            config
        }
    }

    fn set_config_values_as_strings(
        &self,
        requirement: &Requirement,
        ctx: &mut ConfigWriter<'_>,
        values: &BTreeMap<String, String>,
    ) {
        let var = requirement.env_var.as_str();
        let overriding = values
            .get("source")
            .map_or(true, |source| source == ConfigSource::Variables.as_str());

        let existing = Self::local_override(requirement, ctx.local_state)
            .or_else(|| Self::disabled_override(requirement, ctx.local_state));
        let keychain_name = Self::keychain_name(requirement, ctx.environ)
            .filter(|_| requirement.encrypted());

        let stored = match values.get("value") {
            Some(value) if value.is_empty() => {
                ctx.local_state.unset_value(&[VARIABLES, var]);
                ctx.local_state.unset_value(&[DISABLED_VARIABLES, var]);
                if let Some(name) = &keychain_name {
                    self.secrets.unset(name);
                }
                return;
            }
            Some(value) if requirement.encrypted() => {
                let existing_key = existing.as_ref().and_then(StoredValue::key);
                match Self::seal(requirement, value, existing_key, ctx.environ) {
                    Some(sealed) => sealed,
                    None => {
                        ctx.local_state.unset_value(&[VARIABLES, var]);
                        ctx.local_state.unset_value(&[DISABLED_VARIABLES, var]);
                        if let Some(name) = &keychain_name {
                            if overriding {
                                self.secrets.set(name, value);
                            } else {
                                self.secrets.unset(name);
                            }
                        }
                        return;
                    }
                }
            }
            Some(value) => StoredValue::Plain(value.clone()),
            None => match existing {
                Some(stored) => stored,
                None => return,
            },
        };

        if overriding {
            ctx.local_state.set_value(&[VARIABLES, var], stored.to_yaml());
            ctx.local_state.unset_value(&[DISABLED_VARIABLES, var]);
        } else {
            ctx.local_state
                .set_value(&[DISABLED_VARIABLES, var], stored.to_yaml());
            ctx.local_state.unset_value(&[VARIABLES, var]);
            if let Some(name) = &keychain_name {
                self.secrets.unset(name);
            }
        }
    }

    fn status(
        &self,
        requirement: &Requirement,
        environ: &Environ,
        _analysis: &ProviderAnalysis,
    ) -> (bool, String) {
        match environ.get(&requirement.env_var).filter(|v| !v.is_empty()) {
            None => (
                false,
                format!("Environment variable {} is not set.", requirement.env_var),
            ),
            Some(_) if requirement.encrypted() => (
                true,
                format!("Environment variable {} is set.", requirement.env_var),
            ),
            Some(value) => (
                true,
                format!("Environment variable {} set to '{}'", requirement.env_var, value),
            ),
        }
    }

    fn provide(&self, requirement: &Requirement, ctx: &mut ProvideContext<'_>) -> ProvideResult {
        let var = &requirement.env_var;

        let chosen = if let Some(stored) = Self::local_override(requirement, ctx.local_state) {
            Some(stored)
        } else if let Some(value) = self.keychain_value(requirement, ctx.environ) {
            Some(StoredValue::Plain(value))
        } else if ctx.environ.contains_key(var) {
            None
        } else {
            requirement.options.default.clone()
        };

        if let Some(stored) = chosen {
            match Self::reveal(requirement, &stored, ctx.environ) {
                Ok(value) => {
                    ctx.environ.insert(var.clone(), value);
                }
                Err(message) => ctx.frontend.error(&message),
            }
        }

        ctx.take_result()
    }

    fn unprovide(
        &self,
        requirement: &Requirement,
        _environ: &Environ,
        _local_state: &mut LocalStateFile,
        _overrides: &UserConfigOverrides,
    ) -> SimpleStatus {
        SimpleStatus::ok(format!("Nothing to clean up for {}.", requirement.env_var))
    }
}
