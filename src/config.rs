//! Application configuration.
//!
//! The profile directory is resolved from, in order:
//!
//! 1. `<APP>_PROFILE_DIR` environment variable
//! 2. `<config dir>/<app>/profiles` (XDG or platform equivalent)
//! 3. `./.<app>/profiles`

use std::env;
use std::path::PathBuf;

use crate::storage::DirStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub app_name: String,
    pub profile_dir: PathBuf,
}

impl AppConfig {
    #[must_use]
    pub fn new(app_name: impl Into<String>, profile_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_name: app_name.into(),
            profile_dir: profile_dir.into(),
        }
    }

    // Resolve the configuration from the process environment
    #[must_use]
    pub fn from_env(app_name: &str) -> Self {
        let explicit = env::var_os(Self::env_var_name(app_name)).map(PathBuf::from);
        Self::new(app_name, Self::resolve_profile_dir(app_name, explicit))
    }

    /// Name of the variable overriding the profile directory, e.g. `MY_TOOL_PROFILE_DIR`.
    #[must_use]
    pub fn env_var_name(app_name: &str) -> String {
        let prefix: String = app_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{prefix}_PROFILE_DIR")
    }

    #[must_use]
    pub fn resolve_profile_dir(app_name: &str, explicit: Option<PathBuf>) -> PathBuf {
        if let Some(path) = explicit.filter(|path| !path.as_os_str().is_empty()) {
            return path;
        }
        Self::default_profile_dir(app_name)
    }

    #[must_use]
    pub fn default_profile_dir(app_name: &str) -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join(app_name).join("profiles"),
            None => PathBuf::from(format!(".{app_name}")).join("profiles"),
        }
    }

    #[must_use]
    pub fn open_store(&self) -> DirStore {
        DirStore::new(self.profile_dir.clone())
    }
}
