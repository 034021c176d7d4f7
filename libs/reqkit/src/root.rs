//! Root objects and the factories that produce them.

use std::any::Any;
use std::sync::Arc;

use crate::request::Request;

/// Type-erased, shareable value (roots, request properties, method results).
pub type Object = Arc<dyn Any + Send + Sync>;

/// The application's root object for a request.
pub type Root = Object;

/// Derives the application's root object from a request.
pub trait RootFactory: Send + Sync {
    fn create_root(&self, request: &Arc<Request>) -> Root;
}

impl<F> RootFactory for F
where
    F: Fn(&Arc<Request>) -> Root + Send + Sync,
{
    fn create_root(&self, request: &Arc<Request>) -> Root {
        self(request)
    }
}

/// Root used when the registry has no root factory: a nameless, parentless node.
#[derive(Default)]
pub struct DefaultRoot {
    pub name: Option<String>,
    pub parent: Option<Root>,
}

impl std::fmt::Debug for DefaultRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultRoot")
            .field("name", &self.name)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRootFactory;

impl RootFactory for DefaultRootFactory {
    fn create_root(&self, _request: &Arc<Request>) -> Root {
        Arc::new(DefaultRoot::default())
    }
}
