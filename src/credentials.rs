// ABOUTME: Credential resolution — injected lookup of vendor API keys.
// ABOUTME: Checks an environment variable first, then the settings store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Deserialize;

/// Resolves a vendor credential by key name. Injected into provider clients
/// so sessions are testable without process-wide environment state.
pub trait CredentialResolver: Send + Sync {
    /// Return the credential for `key`, or `None` if unresolvable.
    fn resolve(&self, key: &str) -> Option<String>;
}

/// Shape of the on-disk settings store: a flat map of secret names to values.
#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    secrets: HashMap<String, String>,
}

/// Production resolver: environment variable first, then the settings file.
/// The settings file is read once and cached.
pub struct EnvThenSettingsResolver {
    settings_path: PathBuf,
    cached: Mutex<Option<SettingsFile>>,
}

impl EnvThenSettingsResolver {
    pub fn new(settings_path: impl Into<PathBuf>) -> Self {
        Self {
            settings_path: settings_path.into(),
            cached: Mutex::new(None),
        }
    }

    /// Resolver backed by the default settings location,
    /// `~/.modelrelay/settings.json`.
    pub fn from_default_settings() -> Self {
        Self::new(crate::config::EngineConfig::settings_path())
    }

    fn settings_secret(&self, key: &str) -> Option<String> {
        let mut guard = self.cached.lock().ok()?;
        if guard.is_none() {
            *guard = Some(load_settings(&self.settings_path));
        }
        guard
            .as_ref()
            .and_then(|settings| settings.secrets.get(key).cloned())
    }
}

fn load_settings(path: &Path) -> SettingsFile {
    let Ok(content) = std::fs::read_to_string(path) else {
        return SettingsFile::default();
    };
    serde_json::from_str(&content).unwrap_or_default()
}

impl CredentialResolver for EnvThenSettingsResolver {
    fn resolve(&self, key: &str) -> Option<String> {
        if let Ok(value) = std::env::var(key) {
            if !value.is_empty() {
                return Some(value);
            }
        }
        self.settings_secret(key).filter(|v| !v.is_empty())
    }
}

/// Fixed-map resolver for tests and embedding applications that manage
/// credentials themselves.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    secrets: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(key.into(), value.into());
        self
    }
}

impl CredentialResolver for StaticCredentials {
    fn resolve(&self, key: &str) -> Option<String> {
        self.secrets.get(key).cloned()
    }
}
