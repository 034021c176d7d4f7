use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use thiserror::Error;

use crate::extensions::RequestExtensions;
use crate::request::RequestFactory;
use crate::root::RootFactory;

/// Free-form application settings carried by a registry.
pub type Settings = serde_json::Map<String, serde_json::Value>;

/// Capabilities a registry can be asked for during request bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    RequestFactory,
    RequestExtensions,
    RootFactory,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::RequestFactory => "request_factory",
            Capability::RequestExtensions => "request_extensions",
            Capability::RootFactory => "root_factory",
        };
        f.write_str(name)
    }
}

/// A provider returned by a capability lookup.
#[derive(Clone)]
pub enum Utility {
    RequestFactory(Arc<dyn RequestFactory>),
    RequestExtensions(Arc<RequestExtensions>),
    RootFactory(Arc<dyn RootFactory>),
}

impl Utility {
    /// The capability this provider satisfies.
    pub fn capability(&self) -> Capability {
        match self {
            Utility::RequestFactory(_) => Capability::RequestFactory,
            Utility::RequestExtensions(_) => Capability::RequestExtensions,
            Utility::RootFactory(_) => Capability::RootFactory,
        }
    }

    pub fn into_request_factory(self) -> Option<Arc<dyn RequestFactory>> {
        match self {
            Utility::RequestFactory(f) => Some(f),
            _ => None,
        }
    }

    pub fn into_request_extensions(self) -> Option<Arc<RequestExtensions>> {
        match self {
            Utility::RequestExtensions(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_root_factory(self) -> Option<Arc<dyn RootFactory>> {
        match self {
            Utility::RootFactory(f) => Some(f),
            _ => None,
        }
    }
}

impl fmt::Debug for Utility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Utility").field(&self.capability()).finish()
    }
}

/// Capability lookup scoped to one application.
pub trait Registry: Send + Sync + 'static {
    /// Look up the provider for `capability`, if any.
    fn query_utility(&self, capability: Capability) -> Option<Utility>;

    fn name(&self) -> &str {
        ""
    }

    fn settings(&self) -> Option<&Settings> {
        None
    }
}

impl fmt::Debug for dyn Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// Map-backed registry built once at application setup.
pub struct AppRegistry {
    name: String,
    utilities: HashMap<Capability, Utility>,
    settings: Settings,
}

impl fmt::Debug for AppRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut caps: Vec<String> = self.utilities.keys().map(|c| c.to_string()).collect();
        caps.sort();
        f.debug_struct("AppRegistry")
            .field("name", &self.name)
            .field("utilities", &caps)
            .field("settings_count", &self.settings.len())
            .finish()
    }
}

impl AppRegistry {
    pub fn builder(name: impl Into<String>) -> RegistryBuilder {
        RegistryBuilder::new(name)
    }

    /// An empty registry with no utilities and no settings.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            utilities: HashMap::new(),
            settings: Settings::new(),
        }
    }

    pub fn has_utility(&self, capability: Capability) -> bool {
        self.utilities.contains_key(&capability)
    }
}

impl Registry for AppRegistry {
    fn query_utility(&self, capability: Capability) -> Option<Utility> {
        self.utilities.get(&capability).cloned()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> Option<&Settings> {
        Some(&self.settings)
    }
}

/// Collects utilities and settings; duplicates are reported at build time.
pub struct RegistryBuilder {
    name: String,
    utilities: HashMap<Capability, Utility>,
    settings: Settings,
    errors: Vec<String>,
}

impl RegistryBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            utilities: HashMap::new(),
            settings: Settings::new(),
            errors: Vec::new(),
        }
    }

    pub fn register_utility(mut self, utility: Utility) -> Self {
        let capability = utility.capability();
        if self.utilities.contains_key(&capability) {
            self.errors.push(format!(
                "Utility '{capability}' is already registered for '{}'",
                self.name
            ));
            return self;
        }
        self.utilities.insert(capability, utility);
        self
    }

    pub fn root_factory(self, factory: Arc<dyn RootFactory>) -> Self {
        self.register_utility(Utility::RootFactory(factory))
    }

    pub fn request_factory(self, factory: Arc<dyn RequestFactory>) -> Self {
        self.register_utility(Utility::RequestFactory(factory))
    }

    pub fn request_extensions(self, extensions: RequestExtensions) -> Self {
        self.register_utility(Utility::RequestExtensions(Arc::new(extensions)))
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings.extend(settings);
        self
    }

    pub fn setting(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Result<AppRegistry, RegistryError> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if !self.errors.is_empty() {
            return Err(RegistryError::InvalidRegistryConfiguration {
                errors: self.errors,
            });
        }

        tracing::debug!(
            registry = %self.name,
            utilities = ?self.utilities.keys().collect::<Vec<_>>(),
            "Application registry built"
        );

        Ok(AppRegistry {
            name: self.name,
            utilities: self.utilities,
            settings: self.settings,
        })
    }
}

/// Structured errors for registry construction.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry name must not be empty")]
    EmptyName,
    #[error("invalid registry configuration:\n{errors:#?}")]
    InvalidRegistryConfiguration { errors: Vec<String> },
}

static GLOBAL_REGISTRY: OnceLock<Arc<AppRegistry>> = OnceLock::new();

/// The process-wide fallback registry reported when no request context is active.
pub fn global_registry() -> Arc<dyn Registry> {
    GLOBAL_REGISTRY
        .get_or_init(|| Arc::new(AppRegistry::empty("global")))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;
    use crate::root::{DefaultRootFactory, Root};

    struct NamedRootFactory;
    impl RootFactory for NamedRootFactory {
        fn create_root(&self, _request: &Arc<Request>) -> Root {
            Arc::new("named")
        }
    }

    #[test]
    fn lookup_returns_registered_utility() {
        let reg = AppRegistry::builder("app")
            .root_factory(Arc::new(NamedRootFactory))
            .build()
            .unwrap();

        let utility = reg.query_utility(Capability::RootFactory).unwrap();
        assert_eq!(utility.capability(), Capability::RootFactory);
        assert!(reg.query_utility(Capability::RequestExtensions).is_none());
        assert!(reg.query_utility(Capability::RequestFactory).is_none());
    }

    #[test]
    fn duplicate_utility_reported_in_configuration_errors() {
        let err = AppRegistry::builder("app")
            .root_factory(Arc::new(NamedRootFactory))
            .root_factory(Arc::new(DefaultRootFactory))
            .build()
            .unwrap_err();

        match err {
            RegistryError::InvalidRegistryConfiguration { errors } => {
                assert!(
                    errors.iter().any(|e| e.contains("already registered")),
                    "expected duplicate registration error, got {errors:?}"
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = AppRegistry::builder("  ").build().unwrap_err();
        assert!(matches!(err, RegistryError::EmptyName));
    }

    #[test]
    fn settings_are_merged() {
        let mut bag = Settings::new();
        bag.insert("debug".into(), serde_json::json!(true));
        let reg = AppRegistry::builder("app")
            .settings(bag)
            .setting("title", serde_json::json!("Blog"))
            .build()
            .unwrap();

        let settings = reg.settings().unwrap();
        assert_eq!(settings["debug"], serde_json::json!(true));
        assert_eq!(settings["title"], serde_json::json!("Blog"));
    }

    #[test]
    fn global_registry_is_a_singleton() {
        let a = global_registry();
        let b = global_registry();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "global");
        assert!(a.query_utility(Capability::RootFactory).is_none());
    }
}
