//! Request extensions: properties and methods installed onto every bootstrapped request.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::registry::Capability;
use crate::request::Request;
use crate::root::Object;

pub type PropertyGetter = Arc<dyn Fn(&Request) -> Object + Send + Sync>;

/// A named callable attached to requests.
pub type RequestMethod = Arc<dyn Fn(&Request, &[Object]) -> Object + Send + Sync>;

/// A lazily evaluated request property.
#[derive(Clone)]
pub struct PropertyDescriptor {
    pub(crate) getter: PropertyGetter,
    pub(crate) reify: bool,
}

impl fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("reify", &self.reify)
            .finish_non_exhaustive()
    }
}

impl PropertyDescriptor {
    /// Evaluated on every access.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn(&Request) -> Object + Send + Sync + 'static,
    {
        Self {
            getter: Arc::new(getter),
            reify: false,
        }
    }

    /// Evaluated on first access, then cached on the request.
    pub fn reified<F>(getter: F) -> Self
    where
        F: Fn(&Request) -> Object + Send + Sync + 'static,
    {
        Self {
            getter: Arc::new(getter),
            reify: true,
        }
    }

    pub fn is_reified(&self) -> bool {
        self.reify
    }
}

/// Bundle of descriptors and methods registered under `Capability::RequestExtensions`.
#[derive(Clone, Default)]
pub struct RequestExtensions {
    pub descriptors: HashMap<String, PropertyDescriptor>,
    pub methods: HashMap<String, RequestMethod>,
}

impl fmt::Debug for RequestExtensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut descriptors: Vec<&String> = self.descriptors.keys().collect();
        descriptors.sort();
        let mut methods: Vec<&String> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("RequestExtensions")
            .field("descriptors", &descriptors)
            .field("methods", &methods)
            .finish()
    }
}

impl RequestExtensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_property<F>(&mut self, name: impl Into<String>, getter: F) -> &mut Self
    where
        F: Fn(&Request) -> Object + Send + Sync + 'static,
    {
        self.descriptors
            .insert(name.into(), PropertyDescriptor::new(getter));
        self
    }

    pub fn add_reified_property<F>(&mut self, name: impl Into<String>, getter: F) -> &mut Self
    where
        F: Fn(&Request) -> Object + Send + Sync + 'static,
    {
        self.descriptors
            .insert(name.into(), PropertyDescriptor::reified(getter));
        self
    }

    pub fn add_method<F>(&mut self, name: impl Into<String>, method: F) -> &mut Self
    where
        F: Fn(&Request, &[Object]) -> Object + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(method));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty() && self.methods.is_empty()
    }

    /// Install every method and descriptor onto `request`.
    pub fn apply_to(&self, request: &Request) {
        for (name, method) in &self.methods {
            request.set_method(name.clone(), method.clone());
        }
        for (name, descriptor) in &self.descriptors {
            request.set_property(name.clone(), descriptor.clone());
        }
    }
}

/// Query the request's registry for extensions and install them.
///
/// A lookup that yields anything other than an extensions bundle is ignored.
/// Returns whether extensions were applied.
pub fn apply_request_extensions(request: &Request) -> bool {
    let Some(registry) = request.registry() else {
        return false;
    };
    let Some(extensions) = registry
        .query_utility(Capability::RequestExtensions)
        .and_then(|u| u.into_request_extensions())
    else {
        return false;
    };

    tracing::debug!(
        registry = %registry.name(),
        properties = extensions.descriptors.len(),
        methods = extensions.methods.len(),
        "Applying request extensions"
    );
    extensions.apply_to(request);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AppRegistry;

    #[test]
    fn apply_installs_properties_and_methods() {
        let mut exts = RequestExtensions::new();
        exts.add_property("foo", |_| Arc::new("bar") as Object)
            .add_method("greet", |_, args| {
                let who = args
                    .first()
                    .and_then(|a| a.downcast_ref::<&str>())
                    .copied()
                    .unwrap_or("world");
                Arc::new(format!("hello {who}")) as Object
            });

        let request = Request::blank("/");
        exts.apply_to(&request);

        assert_eq!(*request.property_as::<&str>("foo").unwrap(), "bar");
        let out = request
            .call_method("greet", &[Arc::new("rust") as Object])
            .unwrap()
            .downcast::<String>()
            .unwrap();
        assert_eq!(out.as_str(), "hello rust");
        assert!(request.call_method("missing", &[]).is_none());
    }

    #[test]
    fn apply_request_extensions_reads_request_registry() {
        let mut exts = RequestExtensions::new();
        exts.add_reified_property("answer", |_| Arc::new(42u32) as Object);
        let registry = Arc::new(
            AppRegistry::builder("app")
                .request_extensions(exts)
                .build()
                .unwrap(),
        );

        let request = Request::blank("/");
        assert!(!apply_request_extensions(&request), "no registry yet");

        request.set_registry(registry);
        assert!(apply_request_extensions(&request));
        assert_eq!(*request.property_as::<u32>("answer").unwrap(), 42);
    }

    #[test]
    fn registry_without_extensions_is_a_noop() {
        let request = Request::blank("/");
        request.set_registry(Arc::new(AppRegistry::empty("bare")));
        assert!(!apply_request_extensions(&request));
        assert!(!request.has_property("foo"));
    }
}
