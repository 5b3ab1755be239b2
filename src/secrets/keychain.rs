//! OS keychain access with an in-memory fallback.
//!
//! The platform store is probed once per process. If it is unusable, a
//! single warning is logged and every later lookup goes to memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// Service name used for platform keychain entries.
pub const KEYCHAIN_SERVICE: &str = "kapsel";

/// A small named-secret store.
pub trait SecretStore: Send + Sync {
    /// Look up a secret.
    fn get(&self, name: &str) -> Option<String>;

    /// Store a secret, replacing any previous value.
    fn set(&self, name: &str, value: &str);

    /// Remove a secret if present.
    fn unset(&self, name: &str);
}

/// Secrets held only for the life of the process.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SecretStore for InMemoryStore {
    fn get(&self, name: &str) -> Option<String> {
        self.lock().get(name).cloned()
    }

    fn set(&self, name: &str, value: &str) {
        self.lock().insert(name.to_string(), value.to_string());
    }

    fn unset(&self, name: &str) {
        self.lock().remove(name);
    }
}

/// The operating system's credential store.
#[derive(Debug, Clone)]
pub struct PlatformKeychain {
    service: String,
}

impl PlatformKeychain {
    /// Use entries under the given service name.
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, name: &str) -> keyring::Result<keyring::Entry> {
        keyring::Entry::new(&self.service, name)
    }

    /// Check that the platform store answers at all.
    ///
    /// A missing entry is a healthy answer; anything else is not.
    pub fn probe(&self) -> keyring::Result<()> {
        match self.entry("__kapsel_probe__")?.get_password() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl SecretStore for PlatformKeychain {
    fn get(&self, name: &str) -> Option<String> {
        match self.entry(name).and_then(|entry| entry.get_password()) {
            Ok(value) => Some(value),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                tracing::debug!("Keychain lookup for {} failed: {}", name, e);
                None
            }
        }
    }

    fn set(&self, name: &str, value: &str) {
        if let Err(e) = self.entry(name).and_then(|entry| entry.set_password(value)) {
            tracing::warn!("Could not save {} to the keychain: {}", name, e);
        }
    }

    fn unset(&self, name: &str) {
        match self
            .entry(name)
            .and_then(|entry| entry.delete_credential())
        {
            Ok(()) | Err(keyring::Error::NoEntry) => {}
            Err(e) => tracing::warn!("Could not remove {} from the keychain: {}", name, e),
        }
    }
}

static SHARED: OnceLock<Arc<dyn SecretStore>> = OnceLock::new();

/// The process-wide secret store.
///
/// Chosen on first use: the platform keychain when it responds, otherwise
/// an in-memory map.
pub fn shared() -> Arc<dyn SecretStore> {
    SHARED
        .get_or_init(|| {
            let platform = PlatformKeychain::new(KEYCHAIN_SERVICE);
            match platform.probe() {
                Ok(()) => Arc::new(platform) as Arc<dyn SecretStore>,
                Err(e) => {
                    tracing::warn!(
                        "OS keychain unavailable ({}); secrets will only be kept in memory",
                        e
                    );
                    Arc::new(InMemoryStore::new())
                }
            }
        })
        .clone()
}

/// Keychain entry name for a variable scoped to an environment or project.
pub fn scoped_name(scope: &str, env_var: &str) -> String {
    format!("{}/{}", scope, env_var)
}
