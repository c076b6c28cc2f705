//! Provider registry for resolving backends by name.

use serde_json::{Map, Value};
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use tracing::debug;

use conduit_common::{Error, Result};

use crate::provider::{Backend, Provider};

/// Constructor for one backend type.
///
/// Two constructors are equal when they build the same backend type, which
/// makes repeated registration of a backend under the same name a no-op.
#[derive(Clone, Copy)]
pub struct Constructor {
    backend: TypeId,
    backend_name: &'static str,
    build: fn(Value) -> Result<Arc<dyn Provider>>,
}

impl Constructor {
    /// Constructor for backend `B`.
    pub fn of<B: Backend>() -> Self {
        Self {
            backend: TypeId::of::<B>(),
            backend_name: type_name::<B>(),
            build: build_backend::<B>,
        }
    }

    /// Fully qualified name of the backend type.
    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    /// Build a provider from a JSON object of options.
    ///
    /// # Errors
    /// - `Construction` if options are not an object, contain an undeclared
    ///   key, miss a required key, or the backend rejects them
    pub fn build(&self, options: Value) -> Result<Arc<dyn Provider>> {
        (self.build)(options)
    }
}

impl PartialEq for Constructor {
    fn eq(&self, other: &Self) -> bool {
        self.backend == other.backend
    }
}

impl Eq for Constructor {}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Constructor").field(&self.backend_name).finish()
    }
}

fn build_backend<B: Backend>(options: Value) -> Result<Arc<dyn Provider>> {
    let options = match options {
        Value::Null => Value::Object(Map::new()),
        Value::Object(map) => Value::Object(map),
        other => {
            return Err(Error::Construction(format!(
                "Options for {} must be an object, got {}",
                type_name::<B>(),
                other
            )))
        }
    };

    let config: B::Config = serde_json::from_value(options).map_err(|e| {
        Error::Construction(format!("Invalid options for {}: {}", type_name::<B>(), e))
    })?;

    let provider = B::from_config(config).map_err(|e| match e {
        Error::Construction(_) => e,
        other => Error::Construction(format!("{}: {}", type_name::<B>(), other)),
    })?;

    Ok(Arc::new(provider))
}

/// Registry of provider constructors.
///
/// Populated at startup and read afterwards. Registration is append-only:
/// there is no way to unbind a name.
pub struct ProviderRegistry {
    constructors: RwLock<HashMap<String, Constructor>>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            constructors: RwLock::new(HashMap::new()),
        }
    }

    /// Bind `name` to `constructor`.
    ///
    /// Registering the same constructor again under the same name succeeds
    /// without changing anything.
    ///
    /// # Postconditions
    /// - `name` resolves to `constructor`
    /// - An existing binding is never replaced
    ///
    /// # Errors
    /// - `DuplicateRegistration` if `name` is bound to a different constructor
    pub fn register(&self, name: impl Into<String>, constructor: Constructor) -> Result<()> {
        let name = name.into();
        let mut constructors = self
            .constructors
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        match constructors.get(&name) {
            Some(existing) if *existing == constructor => {
                debug!("Provider '{}' already registered, skipping", name);
                Ok(())
            }
            Some(existing) => Err(Error::DuplicateRegistration(format!(
                "Provider '{}' is already registered to {}",
                name,
                existing.backend_name()
            ))),
            None => {
                debug!("Registered provider '{}' ({})", name, constructor.backend_name());
                constructors.insert(name, constructor);
                Ok(())
            }
        }
    }

    /// Bind `name` to backend `B`.
    pub fn register_backend<B: Backend>(&self, name: impl Into<String>) -> Result<()> {
        self.register(name, Constructor::of::<B>())
    }

    /// Look up the constructor bound to `name`.
    ///
    /// # Errors
    /// - `UnknownProvider` if nothing is registered under `name`
    pub fn resolve(&self, name: &str) -> Result<Constructor> {
        self.constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownProvider(format!("No provider for '{}'", name)))
    }

    /// Resolve `name` and build a provider from `options`.
    ///
    /// The registry lock is released before the backend is constructed.
    ///
    /// # Preconditions
    /// - `options` is a JSON object or `null`
    ///
    /// # Postconditions
    /// - Returns a ready provider; nothing is registered or cached
    ///
    /// # Errors
    /// - `UnknownProvider` if nothing is registered under `name`
    /// - `Construction` for an undeclared key, a missing required key, or a
    ///   backend that rejects its options
    pub fn create(&self, name: &str, options: Value) -> Result<Arc<dyn Provider>> {
        self.resolve(name)?.build(options)
    }

    /// Registered provider names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Check if a provider is registered.
    pub fn has_provider(&self, name: &str) -> bool {
        self.constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: LazyLock<ProviderRegistry> = LazyLock::new(ProviderRegistry::new);

/// The process-wide registry.
pub fn global() -> &'static ProviderRegistry {
    &GLOBAL
}

/// Register the bundled backends under their default names.
///
/// Safe to call more than once.
pub fn register_builtin(registry: &ProviderRegistry) -> Result<()> {
    registry.register_backend::<crate::memory::MemoryProvider>("memory")?;
    registry.register_backend::<crate::local::LocalProvider>("local")?;
    registry.register_backend::<crate::http::HttpProvider>("http")?;
    Ok(())
}

/// Bind `name` to `constructor` in the process-wide registry.
pub fn register(name: impl Into<String>, constructor: Constructor) -> Result<()> {
    global().register(name, constructor)
}

/// Bind `name` to backend `B` in the process-wide registry.
pub fn register_backend<B: Backend>(name: impl Into<String>) -> Result<()> {
    global().register_backend::<B>(name)
}

/// Look up `name` in the process-wide registry.
pub fn resolve(name: &str) -> Result<Constructor> {
    global().resolve(name)
}

/// Build a provider registered in the process-wide registry.
pub fn create(name: &str, options: Value) -> Result<Arc<dyn Provider>> {
    global().create(name, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalProvider;
    use crate::memory::MemoryProvider;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_register_and_create() {
        let registry = ProviderRegistry::new();
        registry.register_backend::<MemoryProvider>("test").unwrap();

        let provider = registry.create("test", Value::Null).unwrap();
        assert_eq!(provider.name(), "memory");
    }

    #[test]
    fn test_identical_registration_is_idempotent() {
        let registry = ProviderRegistry::new();
        registry.register_backend::<MemoryProvider>("test").unwrap();
        registry.register_backend::<MemoryProvider>("test").unwrap();

        assert_eq!(registry.providers(), vec!["test".to_string()]);
    }

    #[test]
    fn test_conflicting_registration_fails() {
        let registry = ProviderRegistry::new();
        registry.register_backend::<MemoryProvider>("test").unwrap();

        let result = registry.register_backend::<LocalProvider>("test");
        assert!(matches!(result, Err(Error::DuplicateRegistration(_))));

        // The first binding survives.
        assert_eq!(registry.resolve("test").unwrap(), Constructor::of::<MemoryProvider>());
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = ProviderRegistry::new();
        assert!(matches!(
            registry.resolve("unknown"),
            Err(Error::UnknownProvider(_))
        ));
        assert!(matches!(
            registry.create("unknown", Value::Null),
            Err(Error::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_undeclared_option_is_rejected() {
        let registry = ProviderRegistry::new();
        register_builtin(&registry).unwrap();

        let result = registry.create("memory", json!({ "bucket": "nope" }));
        assert!(matches!(result, Err(Error::Construction(_))));

        let temp = TempDir::new().unwrap();
        let result = registry.create(
            "local",
            json!({ "root": temp.path(), "compress": true }),
        );
        assert!(matches!(result, Err(Error::Construction(_))));
    }

    #[test]
    fn test_missing_required_option_is_rejected() {
        let registry = ProviderRegistry::new();
        register_builtin(&registry).unwrap();

        assert!(matches!(
            registry.create("local", json!({})),
            Err(Error::Construction(_))
        ));
        assert!(matches!(
            registry.create("http", Value::Null),
            Err(Error::Construction(_))
        ));
    }

    #[test]
    fn test_non_object_options_are_rejected() {
        let registry = ProviderRegistry::new();
        register_builtin(&registry).unwrap();

        assert!(matches!(
            registry.create("memory", json!(["root"])),
            Err(Error::Construction(_))
        ));
    }

    #[test]
    fn test_backend_rejection_is_construction_error() {
        let registry = ProviderRegistry::new();
        register_builtin(&registry).unwrap();

        let result = registry.create("http", json!({ "base_url": "not a url" }));
        assert!(matches!(result, Err(Error::Construction(_))));
    }

    #[test]
    fn test_builtin_registration_is_repeatable() {
        let registry = ProviderRegistry::new();
        register_builtin(&registry).unwrap();
        register_builtin(&registry).unwrap();

        assert_eq!(registry.providers(), vec!["http", "local", "memory"]);
        assert!(registry.has_provider("local"));
        assert!(!registry.has_provider("gdrive"));
    }

    #[test]
    fn test_global_registry() {
        register_builtin(global()).unwrap();
        register_backend::<MemoryProvider>("memory").unwrap();
        assert!(matches!(
            register("memory", Constructor::of::<LocalProvider>()),
            Err(Error::DuplicateRegistration(_))
        ));

        let temp = TempDir::new().unwrap();
        let provider = create("local", json!({ "root": temp.path() })).unwrap();
        assert_eq!(provider.name(), "local");
        assert_eq!(resolve("local").unwrap().backend_name(), type_name::<LocalProvider>());
    }
}
