//! Remote definitions and location parsing.
//!
//! A remotes file names configured backends:
//!
//! ```json
//! {
//!   "remotes": {
//!     "backup": { "provider": "local", "options": { "root": "/mnt/backup" } },
//!     "dav": { "provider": "http", "options": { "base_url": "https://dav.example.com/files/" } }
//!   }
//! }
//! ```
//!
//! Locations are written `alias:path/to/object`. A location without an alias
//! is a path on the local filesystem.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use conduit_common::TransferOptions;
use conduit_storage::{Provider, ProviderRegistry};

/// One configured backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    /// Registered provider name (e.g., "local", "http").
    pub provider: String,
    /// Provider construction options.
    #[serde(default)]
    pub options: Value,
}

/// Contents of the remotes file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemotesConfig {
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteConfig>,
}

impl RemotesConfig {
    /// Default location: `<config_dir>/conduit/remotes.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("conduit").join("remotes.json"))
    }

    /// Load remotes from `path`, or from the default location.
    ///
    /// A missing default file yields an empty configuration; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !explicit && !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read remotes file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid remotes file {}", path.display()))
    }

    /// Resolve a location string into a provider and its transfer options.
    pub fn resolve(
        &self,
        registry: &ProviderRegistry,
        location: &str,
        extra: &[(String, Value)],
    ) -> Result<Location> {
        let (provider, path) = match split_location(location) {
            Some((alias, path)) => {
                let remote = self
                    .remotes
                    .get(alias)
                    .with_context(|| format!("Unknown remote '{}'", alias))?;
                let provider = registry
                    .create(&remote.provider, remote.options.clone())
                    .with_context(|| format!("Failed to set up remote '{}'", alias))?;
                (provider, path.to_string())
            }
            None => {
                let (root, path) = local_root(location)?;
                let provider = registry
                    .create("local", json!({ "root": root }))
                    .context("Failed to set up local filesystem")?;
                (provider, path)
            }
        };

        let mut options = TransferOptions::with_path(path);
        for (key, value) in extra {
            options.insert(key.clone(), value.clone());
        }

        Ok(Location {
            label: location.to_string(),
            provider,
            options,
        })
    }
}

/// A resolved transfer endpoint.
pub struct Location {
    /// The string the user wrote.
    pub label: String,
    pub provider: Arc<dyn Provider>,
    pub options: TransferOptions,
}

/// Split `alias:path`. Drive letters and paths containing a separator
/// before the colon are treated as plain local paths.
pub fn split_location(location: &str) -> Option<(&str, &str)> {
    let (alias, path) = location.split_once(':')?;
    let is_alias = alias.len() > 1
        && alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    is_alias.then_some((alias, path))
}

/// Root directory and object name for a local location.
fn local_root(location: &str) -> Result<(PathBuf, String)> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    local_root_in(&cwd, location)
}

/// Resolve `location` against `base`, drop `.` and `..` lexically, and split
/// the result into its parent directory and file name.
fn local_root_in(base: &Path, location: &str) -> Result<(PathBuf, String)> {
    let mut resolved = PathBuf::new();
    for component in base.join(location).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other.as_os_str()),
        }
    }

    let name = resolved
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("'{}' does not name a file", location))?
        .to_string();
    let root = resolved
        .parent()
        .map(Path::to_path_buf)
        .with_context(|| format!("'{}' has no parent directory", location))?;
    Ok((root, name))
}

/// Parse a `key=value` option. Values that parse as JSON keep their type;
/// anything else is a string.
pub fn parse_option(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty option key in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
