use std::sync::Arc;

use crate::global_registries::global_registries;
use crate::registry::{AppRegistry, Capability, Registry};
use crate::request::Request;
use crate::root::{DefaultRootFactory, Root, RootFactory};

/// An application that scripts can bootstrap requests against.
pub trait Application {
    fn registry(&self) -> Arc<dyn Registry>;

    /// Resolve the root object for `request`.
    fn root_factory(&self, request: &Arc<Request>) -> Root;
}

/// The concrete application built from a finished registry.
///
/// Creating a router registers its registry in the global set, so later
/// `prepare(None, None)` calls resolve to the most recently created application.
pub struct Router {
    registry: Arc<dyn Registry>,
    root_factory: Arc<dyn RootFactory>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Router {
    pub fn new(registry: Arc<AppRegistry>) -> Self {
        let registry: Arc<dyn Registry> = registry;
        let root_factory = registry
            .query_utility(Capability::RootFactory)
            .and_then(|u| u.into_root_factory())
            .unwrap_or_else(|| Arc::new(DefaultRootFactory) as Arc<dyn RootFactory>);

        global_registries().add(&registry);
        tracing::info!(registry = %registry.name(), "Application created");

        Self {
            registry,
            root_factory,
        }
    }
}

impl Application for Router {
    fn registry(&self) -> Arc<dyn Registry> {
        self.registry.clone()
    }

    fn root_factory(&self, request: &Arc<Request>) -> Root {
        self.root_factory.create_root(request)
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        global_registries().remove(&self.registry);
    }
}
