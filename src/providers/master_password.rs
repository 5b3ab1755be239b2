//! The passphrase that unlocks encrypted variables.
//!
//! Kept in the OS keychain under its variable name, never in the local
//! state document.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{ConfigContext, ConfigWriter, ProvideContext, Provider};
use crate::frontend::Frontend;
use crate::requirements::{
    ConfigSource, Environ, ProvideResult, ProviderAnalysis, ProviderConfig, ProviderKind,
    Requirement, SimpleStatus, StoredValue, UserConfigOverrides, MASTER_PASSWORD_VAR,
};
use crate::secrets::SecretStore;
use crate::state::LocalStateFile;

/// Provides the master password from the keychain or the environment.
pub struct MasterPasswordProvider {
    secrets: Arc<dyn SecretStore>,
}

impl MasterPasswordProvider {
    /// Create a provider reading from `secrets`.
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }
}

impl Provider for MasterPasswordProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::MasterPassword
    }

    fn missing_env_vars_to_configure(
        &self,
        _requirement: &Requirement,
        _environ: &Environ,
        _local_state: &LocalStateFile,
    ) -> Vec<String> {
        Vec::new()
    }

    fn missing_env_vars_to_provide(
        &self,
        _requirement: &Requirement,
        _environ: &Environ,
        _local_state: &LocalStateFile,
    ) -> Vec<String> {
        Vec::new()
    }

    fn read_config(&self, requirement: &Requirement, ctx: &ConfigContext<'_>) -> ProviderConfig {
        if let Some(value) = self.secrets.get(&requirement.env_var) {
            return ProviderConfig::new(ConfigSource::Variables).with_value(value);
        }
        if let Some(value) = ctx.environ.get(&requirement.env_var) {
            return ProviderConfig::new(ConfigSource::Environ).with_value(value.clone());
        }
        if requirement.options.default.is_some() {
            ProviderConfig::new(ConfigSource::Default)
        } else {
            ProviderConfig::new(ConfigSource::Unset)
        }
    }

    fn set_config_values_as_strings(
        &self,
        requirement: &Requirement,
        _ctx: &mut ConfigWriter<'_>,
        values: &BTreeMap<String, String>,
    ) {
        match values.get("value") {
            Some(value) if value.is_empty() => self.secrets.unset(&requirement.env_var),
            Some(value) => self.secrets.set(&requirement.env_var, value),
            None => {}
        }
    }

    fn status(
        &self,
        requirement: &Requirement,
        environ: &Environ,
        _analysis: &ProviderAnalysis,
    ) -> (bool, String) {
        if environ
            .get(&requirement.env_var)
            .is_some_and(|v| !v.is_empty())
        {
            (
                true,
                "Using master password from the environment variable.".to_string(),
            )
        } else {
            (
                false,
                format!(
                    "Master password isn't set as the {} environment variable.",
                    MASTER_PASSWORD_VAR
                ),
            )
        }
    }

    fn provide(&self, requirement: &Requirement, ctx: &mut ProvideContext<'_>) -> ProvideResult {
        let var = &requirement.env_var;

        if let Some(value) = self.secrets.get(var) {
            ctx.environ.insert(var.clone(), value);
        } else if !ctx.environ.contains_key(var) {
            match &requirement.options.default {
                Some(StoredValue::Plain(value)) => {
                    ctx.environ.insert(var.clone(), value.clone());
                }
                Some(StoredValue::Encrypted { .. }) => {
                    ctx.frontend
                        .error(&format!("Value of '{}' should be a string", var));
                }
                None => {}
            }
        }

        ctx.take_result()
    }

    fn unprovide(
        &self,
        _requirement: &Requirement,
        _environ: &Environ,
        _local_state: &mut LocalStateFile,
        _overrides: &UserConfigOverrides,
    ) -> SimpleStatus {
        SimpleStatus::ok("Nothing to clean up for master password.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::CollectingFrontend;
    use crate::providers::check_status;
    use crate::providers::testing::{local_state, project_environ};
    use crate::requirements::ProvideMode;
    use crate::secrets::InMemoryStore;
    use tempfile::TempDir;

    fn provide_with(
        provider: &MasterPasswordProvider,
        req: &Requirement,
        environ: &mut Environ,
        state: &mut LocalStateFile,
    ) -> ProvideResult {
        let overrides = UserConfigOverrides::default();
        let status = check_status(
            provider,
            req,
            &ConfigContext {
                environ: &*environ,
                local_state: &*state,
                default_env_spec_name: None,
                overrides: &overrides,
            },
            None,
        );
        let mut frontend = CollectingFrontend::new();
        let mut ctx = ProvideContext::new(
            environ,
            state,
            None,
            &status,
            ProvideMode::Development,
            &mut frontend,
        );
        provider.provide(req, &mut ctx)
    }

    #[test]
    fn keychain_value_is_provided() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore::new());
        store.set(MASTER_PASSWORD_VAR, "hunter2");
        let provider = MasterPasswordProvider::new(store);
        let mut environ = project_environ(temp.path());
        let mut state = local_state(temp.path());

        let result = provide_with(&provider, &Requirement::master_password(), &mut environ, &mut state);

        assert!(!result.failed());
        assert_eq!(environ[MASTER_PASSWORD_VAR], "hunter2");
    }

    #[test]
    fn set_config_writes_and_clears_keychain() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore::new());
        let provider = MasterPasswordProvider::new(store.clone());
        let req = Requirement::master_password();
        let mut environ = project_environ(temp.path());
        let mut state = local_state(temp.path());
        let mut overrides = UserConfigOverrides::default();
        let mut writer = ConfigWriter {
            environ: &mut environ,
            local_state: &mut state,
            default_env_spec_name: None,
            overrides: &mut overrides,
        };

        let mut values = BTreeMap::new();
        values.insert("value".to_string(), "pw".to_string());
        provider.set_config_values_as_strings(&req, &mut writer, &values);
        assert_eq!(store.get(MASTER_PASSWORD_VAR).as_deref(), Some("pw"));
        assert_eq!(provider.read_config(&req, &writer.reader()).source, ConfigSource::Variables);

        values.insert("value".to_string(), String::new());
        provider.set_config_values_as_strings(&req, &mut writer, &values);
        assert_eq!(store.get(MASTER_PASSWORD_VAR), None);
        assert!(state.is_empty());
    }

    #[test]
    fn non_string_default_is_an_error() {
        let temp = TempDir::new().unwrap();
        let provider = MasterPasswordProvider::new(Arc::new(InMemoryStore::new()));
        let mut req = Requirement::master_password();
        req.options.default = Some(StoredValue::Encrypted {
            key: "X".into(),
            encrypted: "y".into(),
        });
        let mut environ = project_environ(temp.path());
        let mut state = local_state(temp.path());

        let result = provide_with(&provider, &req, &mut environ, &mut state);
        assert_eq!(
            result.errors(),
            &["Value of 'KAPSEL_MASTER_PASSWORD' should be a string".to_string()]
        );
    }

    #[test]
    fn status_messages() {
        let provider = MasterPasswordProvider::new(Arc::new(InMemoryStore::new()));
        let req = Requirement::master_password();
        let analysis =
            ProviderAnalysis::new(ProviderConfig::new(ConfigSource::Unset), vec![], vec![]);
        let mut environ = Environ::new();

        let (ok, msg) = provider.status(&req, &environ, &analysis);
        assert!(!ok);
        assert_eq!(
            msg,
            "Master password isn't set as the KAPSEL_MASTER_PASSWORD environment variable."
        );

        environ.insert(MASTER_PASSWORD_VAR.into(), "x".into());
        let (ok, msg) = provider.status(&req, &environ, &analysis);
        assert!(ok);
        assert_eq!(msg, "Using master password from the environment variable.");
    }
}
