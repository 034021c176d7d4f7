//! Bootstrapping requests and roots outside of the HTTP pipeline.
//!
//! - [`make_request`]: a blank request bound to a registry; no thread-local effects
//! - [`get_root`]: push a context for an application and resolve its root
//! - [`prepare`]: full bootstrap (extensions, root, context) returning a scope guard
//!
//! Contexts are pushed on the calling thread, so the returned [`Closer`] and
//! [`AppEnvironment`] are `!Send` and must be released on that same thread.

use std::fmt;
use std::sync::Arc;

use crate::error::ScriptingError;
use crate::extensions::apply_request_extensions;
use crate::global_registries::global_registries;
use crate::registry::{Capability, Registry, Utility};
use crate::request::Request;
use crate::root::{DefaultRootFactory, Root, RootFactory};
use crate::router::Application;
use crate::threadlocal::RequestContext;

/// One-shot release action.
///
/// Runs at most once: on the first [`Closer::close`] call, or when dropped.
///
/// The closer built by [`prepare`] drains every finished callback even when
/// one panics. The first panic is re-raised after the drain, except while the
/// thread is already unwinding, where it is logged and dropped instead.
#[must_use = "dropping a Closer releases the request context immediately"]
pub struct Closer {
    action: Option<Box<dyn FnOnce()>>,
}

impl Closer {
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            action: Some(Box::new(action)),
        }
    }

    /// Run the release action. Returns `false` if it already ran.
    pub fn close(&mut self) -> bool {
        match self.action.take() {
            Some(action) => {
                action();
                true
            }
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.action.is_none()
    }
}

/// An already-released closer.
impl Default for Closer {
    fn default() -> Self {
        Self { action: None }
    }
}

impl Drop for Closer {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Closer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closer")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Result of [`prepare`]. Dropping it runs `closer` exactly once.
pub struct AppEnvironment {
    pub root: Root,
    pub request: Arc<Request>,
    pub registry: Arc<dyn Registry>,
    pub root_factory: Arc<dyn RootFactory>,
    /// May be replaced inside the scope; whatever is stored here runs on drop.
    pub closer: Closer,
}

impl AppEnvironment {
    /// Release the environment now instead of at end of scope.
    pub fn close(mut self) {
        self.closer.close();
    }
}

impl Drop for AppEnvironment {
    fn drop(&mut self) {
        self.closer.close();
    }
}

impl fmt::Debug for AppEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppEnvironment")
            .field("request", &self.request)
            .field("registry", &self.registry)
            .field("closer", &self.closer)
            .finish_non_exhaustive()
    }
}

/// Build a blank request for `path` bound to `registry`.
///
/// Without a registry the most recently added global registry is used.
/// The registry's request factory builds the request when it has one.
pub fn make_request(
    path: &str,
    registry: Option<Arc<dyn Registry>>,
) -> Result<Arc<Request>, ScriptingError> {
    let registry = match registry {
        Some(registry) => registry,
        None => global_registries()
            .last()
            .ok_or(ScriptingError::NoRegistry)?,
    };

    let request = match registry
        .query_utility(Capability::RequestFactory)
        .and_then(Utility::into_request_factory)
    {
        Some(factory) => factory.blank(path),
        None => Request::blank(path),
    };
    request.set_registry(registry);
    Ok(Arc::new(request))
}

/// Push a context for `app` and return its root with a closer that pops it.
///
/// Without a request, one is built for `/` using the application's registry.
pub fn get_root<A>(app: &A, request: Option<Arc<Request>>) -> Result<(Root, Closer), ScriptingError>
where
    A: Application + ?Sized,
{
    let registry = app.registry();
    let request = match request {
        Some(request) => request,
        None => make_request("/", Some(registry.clone()))?,
    };
    request.set_registry(registry);

    let ctx = RequestContext::new(request.clone());
    ctx.begin();
    let closer = Closer::new(move || ctx.end());

    let root = app.root_factory(&request);
    Ok((root, closer))
}

/// Bootstrap a request for scripting.
///
/// Registry resolution order: the `registry` argument, then `request.registry`,
/// then the last global registry. An explicit registry always overwrites the
/// request's. Fails with [`ScriptingError::NoApplication`] before touching any
/// thread-local state when nothing resolves.
///
/// The closer pops the pushed context and then drains the request's finished
/// callbacks. A context already set on the request is kept.
pub fn prepare(
    request: Option<Arc<Request>>,
    registry: Option<Arc<dyn Registry>>,
) -> Result<AppEnvironment, ScriptingError> {
    let registry = registry
        .or_else(|| request.as_ref().and_then(|r| r.registry()))
        .or_else(|| global_registries().last())
        .ok_or(ScriptingError::NoApplication)?;

    let request = match request {
        Some(request) => request,
        None => make_request("/", Some(registry.clone()))?,
    };
    request.set_registry(registry.clone());

    let ctx = RequestContext::new(request.clone());
    ctx.begin();
    // Armed right after the push so a panicking root factory still unwinds it.
    let closer = {
        let request = request.clone();
        Closer::new(move || {
            ctx.end();
            if request.has_finished_callbacks() {
                let ran = request.process_finished_callbacks();
                tracing::debug!(callbacks = ran, "Finished callbacks processed");
            }
        })
    };

    apply_request_extensions(&request);

    let root_factory = registry
        .query_utility(Capability::RootFactory)
        .and_then(Utility::into_root_factory)
        .unwrap_or_else(|| Arc::new(DefaultRootFactory) as Arc<dyn RootFactory>);
    let root = root_factory.create_root(&request);

    if !request.set_context_if_absent(root.clone()) {
        tracing::debug!(path = %request.path(), "Keeping caller-provided request context");
    }

    tracing::debug!(
        registry = %registry.name(),
        path = %request.path(),
        "Request prepared"
    );

    Ok(AppEnvironment {
        root,
        request,
        registry,
        root_factory,
        closer,
    })
}
