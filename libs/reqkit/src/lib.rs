//! # ReqKit - Request Bootstrap for Scripts
//!
//! Helpers for running application code outside of a live HTTP request:
//! maintenance scripts, shells, background jobs and tests.
//!
//! ## Features
//!
//! - **Thread-local context**: the current `(registry, request)` pair is kept on a
//!   per-thread stack so framework code can find it without parameter threading
//! - **Capability registry**: explicit `Capability` → `Utility` lookup instead of
//!   duck-typed utilities
//! - **Root resolution**: pluggable root factories with a default fallback
//! - **Scoped release**: `prepare()` returns a guard that unwinds the pushed
//!   context and runs finished callbacks exactly once
//!
//! ## Basic Example
//!
//! ```rust,ignore
//! use reqkit::{prepare, AppRegistry, Router};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(AppRegistry::builder("blog").build()?);
//! let _app = Router::new(registry);
//!
//! // Picks up the most recently created application.
//! let env = prepare(None, None)?;
//! assert_eq!(env.request.path(), "/");
//! // Dropping `env` pops the context and drains finished callbacks.
//! ```

pub mod error;
pub mod extensions;
pub mod global_registries;
pub mod registry;
pub mod request;
pub mod root;
pub mod router;
pub mod scripting;
pub mod threadlocal;

pub use error::ScriptingError;
pub use extensions::{apply_request_extensions, PropertyDescriptor, RequestExtensions, RequestMethod};
pub use global_registries::{global_registries, GlobalRegistries};
pub use registry::{
    global_registry, AppRegistry, Capability, Registry, RegistryBuilder, RegistryError, Settings,
    Utility,
};
pub use request::{Environ, FinishedCallback, Request, RequestFactory};
pub use root::{DefaultRoot, DefaultRootFactory, Object, Root, RootFactory};
pub use router::{Application, Router};
pub use scripting::{get_root, make_request, prepare, AppEnvironment, Closer};
pub use threadlocal::{
    get_current_registry, get_current_request, manager, ContextEntry, ContextStack,
    RequestContext, ThreadLocalManager,
};

#[cfg(test)]
pub(crate) mod test_support {
    /// Serializes unit tests that touch the process-wide registry set.
    pub static GLOBAL_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());
}
