use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::extensions::{PropertyDescriptor, RequestMethod};
use crate::registry::Registry;
use crate::root::{Object, Root};

/// WSGI-style request metadata.
pub type Environ = BTreeMap<String, String>;

/// Runs once request processing concludes; receives the finished request.
pub type FinishedCallback = Box<dyn FnOnce(&Request) + Send>;

/// Builds blank requests for a path. Registered under `Capability::RequestFactory`.
pub trait RequestFactory: Send + Sync {
    fn blank(&self, path: &str) -> Request;
}

/// A request record usable outside of the HTTP pipeline.
///
/// All state sits behind locks so the request can be shared through `Arc`
/// between the thread-local stack, the bootstrap result and user code.
pub struct Request {
    environ: RwLock<Environ>,
    registry: RwLock<Option<Arc<dyn Registry>>>,
    context: RwLock<Option<Root>>,
    finished_callbacks: Mutex<VecDeque<FinishedCallback>>,
    properties: RwLock<HashMap<String, PropertyDescriptor>>,
    reified: RwLock<HashMap<String, Object>>,
    methods: RwLock<HashMap<String, RequestMethod>>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("path", &self.path())
            .field("registry", &self.registry.read().as_ref().map(|r| r.name().to_string()))
            .field("has_context", &self.context.read().is_some())
            .field("finished_callbacks", &self.finished_callbacks.lock().len())
            .finish()
    }
}

impl Request {
    pub fn new(environ: Environ) -> Self {
        Self {
            environ: RwLock::new(environ),
            registry: RwLock::new(None),
            context: RwLock::new(None),
            finished_callbacks: Mutex::new(VecDeque::new()),
            properties: RwLock::new(HashMap::new()),
            reified: RwLock::new(HashMap::new()),
            methods: RwLock::new(HashMap::new()),
        }
    }

    /// A GET request for `path` on `localhost`; a `?query` suffix lands in `QUERY_STRING`.
    pub fn blank(path: &str) -> Self {
        let (path_info, query) = match path.split_once('?') {
            Some((p, q)) => (p, q),
            None => (path, ""),
        };
        let path_info = if path_info.is_empty() { "/" } else { path_info };

        let mut environ = Environ::new();
        environ.insert("REQUEST_METHOD".into(), "GET".into());
        environ.insert("SCRIPT_NAME".into(), String::new());
        environ.insert("PATH_INFO".into(), path_info.to_string());
        environ.insert("QUERY_STRING".into(), query.to_string());
        environ.insert("SERVER_NAME".into(), "localhost".into());
        environ.insert("SERVER_PORT".into(), "80".into());
        environ.insert("HTTP_HOST".into(), "localhost:80".into());
        environ.insert("wsgi.url_scheme".into(), "http".into());
        Self::new(environ)
    }

    /// Snapshot of the environ.
    pub fn environ(&self) -> Environ {
        self.environ.read().clone()
    }

    pub fn environ_value(&self, key: &str) -> Option<String> {
        self.environ.read().get(key).cloned()
    }

    pub fn set_environ_value(&self, key: impl Into<String>, value: impl Into<String>) {
        self.environ.write().insert(key.into(), value.into());
    }

    /// `SCRIPT_NAME` + `PATH_INFO`.
    pub fn path(&self) -> String {
        let environ = self.environ.read();
        let script = environ.get("SCRIPT_NAME").map(String::as_str).unwrap_or("");
        let info = environ.get("PATH_INFO").map(String::as_str).unwrap_or("");
        format!("{script}{info}")
    }

    pub fn registry(&self) -> Option<Arc<dyn Registry>> {
        self.registry.read().clone()
    }

    pub fn set_registry(&self, registry: Arc<dyn Registry>) {
        *self.registry.write() = Some(registry);
    }

    pub fn context(&self) -> Option<Root> {
        self.context.read().clone()
    }

    pub fn set_context(&self, context: Root) {
        *self.context.write() = Some(context);
    }

    /// Sets the context only when none is present. Returns whether it was set.
    pub(crate) fn set_context_if_absent(&self, context: Root) -> bool {
        let mut slot = self.context.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(context);
        true
    }

    pub fn add_finished_callback<F>(&self, callback: F)
    where
        F: FnOnce(&Request) + Send + 'static,
    {
        self.finished_callbacks.lock().push_back(Box::new(callback));
    }

    pub fn has_finished_callbacks(&self) -> bool {
        !self.finished_callbacks.lock().is_empty()
    }

    /// Run queued callbacks in FIFO order until the queue is empty.
    ///
    /// The queue lock is released while a callback runs, so callbacks may
    /// enqueue further callbacks; those run in the same drain. A panicking
    /// callback does not stop the drain: the first panic is resumed once the
    /// queue is empty, or logged and dropped if the thread is already unwinding.
    pub fn process_finished_callbacks(&self) -> usize {
        let mut ran = 0;
        let mut first_panic = None;
        loop {
            let next = self.finished_callbacks.lock().pop_front();
            let Some(callback) = next else {
                break;
            };
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(self))) {
                first_panic.get_or_insert(payload);
            }
            ran += 1;
        }

        if let Some(payload) = first_panic {
            if std::thread::panicking() {
                tracing::error!(
                    path = %self.path(),
                    "Finished callback panicked while unwinding; panic dropped"
                );
            } else {
                panic::resume_unwind(payload);
            }
        }
        ran
    }

    pub fn set_property(&self, name: impl Into<String>, descriptor: PropertyDescriptor) {
        let name = name.into();
        self.reified.write().remove(&name);
        self.properties.write().insert(name, descriptor);
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.read().contains_key(name)
    }

    /// Evaluate an extension property. Reified properties are computed once.
    pub fn property(&self, name: &str) -> Option<Object> {
        if let Some(cached) = self.reified.read().get(name) {
            return Some(cached.clone());
        }

        let descriptor = self.properties.read().get(name).cloned()?;
        let value = (descriptor.getter)(self);
        if descriptor.reify {
            // A concurrent evaluation may have won; keep the first value.
            let mut reified = self.reified.write();
            return Some(reified.entry(name.to_string()).or_insert(value).clone());
        }
        Some(value)
    }

    /// Typed view over [`Request::property`].
    pub fn property_as<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.property(name)?.downcast::<T>().ok()
    }

    pub fn set_method(&self, name: impl Into<String>, method: RequestMethod) {
        self.methods.write().insert(name.into(), method);
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.read().contains_key(name)
    }

    pub fn call_method(&self, name: &str, args: &[Object]) -> Option<Object> {
        let method = self.methods.read().get(name).cloned()?;
        Some(method(self, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn blank_splits_query_string() {
        let req = Request::blank("/search?q=rust");
        assert_eq!(req.environ_value("PATH_INFO").as_deref(), Some("/search"));
        assert_eq!(req.environ_value("QUERY_STRING").as_deref(), Some("q=rust"));
        assert_eq!(req.environ_value("REQUEST_METHOD").as_deref(), Some("GET"));
        assert_eq!(req.path(), "/search");
    }

    #[test]
    fn blank_defaults_empty_path_to_root() {
        let req = Request::blank("");
        assert_eq!(req.path(), "/");
    }

    #[test]
    fn new_request_is_bare() {
        let req = Request::new(Environ::new());
        assert!(req.environ().is_empty());
        assert!(req.registry().is_none());
        assert!(req.context().is_none());
        assert!(!req.has_finished_callbacks());
    }

    #[test]
    fn context_if_absent_keeps_existing() {
        let req = Request::new(Environ::new());
        let first: Root = Arc::new(1u8);
        let second: Root = Arc::new(2u8);

        assert!(req.set_context_if_absent(first.clone()));
        assert!(!req.set_context_if_absent(second));
        assert!(Arc::ptr_eq(&req.context().unwrap(), &first));
    }

    #[test]
    fn finished_callbacks_run_fifo_once() {
        let req = Request::new(Environ::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            req.add_finished_callback(move |_| order.lock().push(i));
        }

        assert_eq!(req.process_finished_callbacks(), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(req.process_finished_callbacks(), 0);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn callbacks_added_during_drain_also_run() {
        let req = Request::new(Environ::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let outer = order.clone();
        req.add_finished_callback(move |r| {
            outer.lock().push("first");
            let inner = outer.clone();
            r.add_finished_callback(move |_| inner.lock().push("nested"));
        });
        let tail = order.clone();
        req.add_finished_callback(move |_| tail.lock().push("second"));

        assert_eq!(req.process_finished_callbacks(), 3);
        assert_eq!(*order.lock(), vec!["first", "second", "nested"]);
    }

    #[test]
    fn panicking_callback_does_not_stop_the_drain() {
        let req = Request::new(Environ::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = order.clone();
        req.add_finished_callback(move |_| first.lock().push(0));
        req.add_finished_callback(|_| panic!("callback failed"));
        let last = order.clone();
        req.add_finished_callback(move |_| last.lock().push(2));

        let result = panic::catch_unwind(AssertUnwindSafe(|| req.process_finished_callbacks()));

        assert!(result.is_err(), "the callback panic is resumed after the drain");
        assert_eq!(*order.lock(), vec![0, 2]);
        assert!(!req.has_finished_callbacks());
    }

    #[test]
    fn reified_property_is_computed_once() {
        let req = Request::new(Environ::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        req.set_property(
            "token",
            PropertyDescriptor::reified(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::new(String::from("abc")) as Object
            }),
        );

        assert_eq!(req.property_as::<String>("token").unwrap().as_str(), "abc");
        assert_eq!(req.property_as::<String>("token").unwrap().as_str(), "abc");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn plain_property_is_computed_each_time() {
        let req = Request::blank("/a");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        req.set_property(
            "path_len",
            PropertyDescriptor::new(move |r| {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::new(r.path().len()) as Object
            }),
        );

        assert_eq!(*req.property_as::<usize>("path_len").unwrap(), 2);
        assert_eq!(*req.property_as::<usize>("path_len").unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(req.property("missing").is_none());
        assert!(req.property_as::<String>("path_len").is_none());
    }
}
