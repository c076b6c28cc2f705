//! Common types used throughout Conduit.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::{Error, Result};

/// A slash-separated object key, independent of the backend that stores it.
///
/// Backends map this onto their own addressing (a filesystem path under a
/// root, a URL under a base, a key in a map).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectPath {
    components: Vec<String>,
}

impl ObjectPath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a path from string components.
    ///
    /// # Errors
    /// - Returns error if any component is empty, contains a separator,
    ///   or is a `.`/`..` segment
    pub fn from_components(components: Vec<String>) -> Result<Self> {
        for comp in &components {
            Self::check_component(comp)?;
        }
        Ok(Self { components })
    }

    fn check_component(comp: &str) -> Result<()> {
        if comp.is_empty() {
            return Err(Error::InvalidInput(
                "Path component cannot be empty".to_string(),
            ));
        }
        if comp.contains('/') || comp.contains('\\') {
            return Err(Error::InvalidInput(
                "Path component cannot contain separators".to_string(),
            ));
        }
        if comp == "." || comp == ".." {
            return Err(Error::InvalidInput(format!(
                "Path component '{}' is not allowed",
                comp
            )));
        }
        Ok(())
    }

    /// Parse a path string into an ObjectPath.
    ///
    /// Uses '/' as separator. Leading and trailing separators are ignored.
    pub fn parse(path: &str) -> Result<Self> {
        let path = path.trim_start_matches('/').trim_end_matches('/');
        if path.is_empty() {
            return Ok(Self::root());
        }

        let components: Vec<String> = path.split('/').map(String::from).collect();
        Self::from_components(components)
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the object name (last component).
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> Result<Self> {
        Self::check_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Convert to a string representation.
    pub fn to_string_path(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("/{}", self.components.join("/"))
        }
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_path())
    }
}

/// Backend-specific parameters for a single transfer operation.
///
/// The core never inspects these; each backend reads the keys it understands
/// (`path`, container ids, part sizes, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferOptions(Map<String, Value>);

impl TransferOptions {
    /// Create an empty option set.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Option set carrying only a `path`.
    pub fn with_path(path: impl Into<String>) -> Self {
        Self::new().set("path", path.into())
    }

    /// Builder-style insert.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert a value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Raw value for a key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value for a key, if present.
    ///
    /// # Errors
    /// - Key is present but not a string
    pub fn get_str(&self, key: &str) -> Result<Option<&str>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(Error::InvalidInput(format!(
                "Option '{}' must be a string, got {}",
                key, other
            ))),
        }
    }

    /// Required string value for a key.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key)?
            .ok_or_else(|| Error::InvalidInput(format!("Missing required option '{}'", key)))
    }

    /// Unsigned integer value for a key, if present.
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "Option '{}' must be an unsigned integer, got {}",
                    key, value
                ))
            }),
        }
    }

    /// The `path` option parsed as an [`ObjectPath`].
    pub fn path(&self) -> Result<ObjectPath> {
        ObjectPath::parse(self.require_str("path")?)
    }

    /// Iterate over all keys and values.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for TransferOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
