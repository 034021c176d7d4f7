//! Thread-local request context.
//!
//! Every thread owns an independent [`ContextStack`]. The [`ThreadLocalManager`]
//! handle is the only way to reach it: `push`, `pop`, `get` and `clear` all act
//! on the calling thread's stack and never observe other threads.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use crate::registry::{global_registry, Registry};
use crate::request::Request;

/// The `(registry, request)` pair that is "current" for a thread.
#[derive(Clone, Default)]
pub struct ContextEntry {
    pub registry: Option<Arc<dyn Registry>>,
    pub request: Option<Arc<Request>>,
}

impl ContextEntry {
    pub fn new(registry: Arc<dyn Registry>, request: Arc<Request>) -> Self {
        Self {
            registry: Some(registry),
            request: Some(request),
        }
    }
}

fn same<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Identity comparison: entries are equal when they hold the same registry and request objects.
impl PartialEq for ContextEntry {
    fn eq(&self, other: &Self) -> bool {
        same(&self.registry, &other.registry) && same(&self.request, &other.request)
    }
}

impl fmt::Debug for ContextEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextEntry")
            .field("registry", &self.registry.as_ref().map(|r| r.name().to_string()))
            .field("request", &self.request.as_ref().map(|r| r.path()))
            .finish()
    }
}

/// LIFO stack of context entries.
#[derive(Debug, Default)]
pub struct ContextStack {
    entries: Vec<ContextEntry>,
}

impl ContextStack {
    pub fn push(&mut self, entry: ContextEntry) {
        self.entries.push(entry);
    }

    pub fn pop(&mut self) -> Option<ContextEntry> {
        self.entries.pop()
    }

    /// Remove the topmost entry matching `pred`; entries above it stay in place.
    pub fn remove_latest<F>(&mut self, pred: F) -> Option<ContextEntry>
    where
        F: Fn(&ContextEntry) -> bool,
    {
        let index = self.entries.iter().rposition(pred)?;
        Some(self.entries.remove(index))
    }

    pub fn top(&self) -> Option<&ContextEntry> {
        self.entries.last()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

thread_local! {
    static STACK: RefCell<ContextStack> = RefCell::new(ContextStack::default());
}

fn default_entry() -> ContextEntry {
    ContextEntry {
        registry: Some(global_registry()),
        request: None,
    }
}

/// Handle onto the calling thread's [`ContextStack`].
#[derive(Clone, Copy)]
pub struct ThreadLocalManager {
    default: fn() -> ContextEntry,
}

impl fmt::Debug for ThreadLocalManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadLocalManager")
            .field("depth", &self.depth())
            .finish()
    }
}

static MANAGER: ThreadLocalManager = ThreadLocalManager::new(default_entry);

/// The process-wide manager whose default entry carries the global registry.
pub fn manager() -> &'static ThreadLocalManager {
    &MANAGER
}

impl ThreadLocalManager {
    /// `default` supplies the value `get()` reports for an empty stack.
    pub const fn new(default: fn() -> ContextEntry) -> Self {
        Self { default }
    }

    pub fn push(&self, entry: ContextEntry) {
        STACK.with(|stack| stack.borrow_mut().push(entry));
    }

    pub fn pop(&self) -> Option<ContextEntry> {
        STACK.with(|stack| stack.borrow_mut().pop())
    }

    /// Remove the innermost entry carrying `request`, wherever it sits in the stack.
    pub fn remove_request(&self, request: &Arc<Request>) -> Option<ContextEntry> {
        STACK.with(|stack| {
            stack.borrow_mut().remove_latest(|entry| {
                entry
                    .request
                    .as_ref()
                    .is_some_and(|r| Arc::ptr_eq(r, request))
            })
        })
    }

    /// The current entry, or the default one when nothing is pushed.
    pub fn get(&self) -> ContextEntry {
        STACK
            .with(|stack| stack.borrow().top().cloned())
            .unwrap_or_else(self.default)
    }

    pub fn clear(&self) {
        STACK.with(|stack| stack.borrow_mut().clear());
    }

    pub fn depth(&self) -> usize {
        STACK.with(|stack| stack.borrow().len())
    }
}

/// Request pushed by the innermost active context on this thread, if any.
pub fn get_current_request() -> Option<Arc<Request>> {
    manager().get().request
}

/// Registry of the innermost active context, falling back to the global registry.
pub fn get_current_registry() -> Arc<dyn Registry> {
    manager().get().registry.unwrap_or_else(global_registry)
}

/// Pairs pushing a request's context with popping it.
pub struct RequestContext {
    request: Arc<Request>,
}

impl RequestContext {
    pub fn new(request: Arc<Request>) -> Self {
        Self { request }
    }

    /// Push `{registry, request}` using the request's own registry.
    pub fn begin(&self) -> Arc<Request> {
        let entry = ContextEntry {
            registry: self.request.registry(),
            request: Some(self.request.clone()),
        };
        manager().push(entry);
        tracing::debug!(
            path = %self.request.path(),
            depth = manager().depth(),
            "Request context pushed"
        );
        self.request.clone()
    }

    /// Remove the entry pushed by [`RequestContext::begin`].
    ///
    /// Contexts released out of order only take their own entry off the
    /// stack; anything pushed later stays current.
    pub fn end(&self) {
        let on_top = get_current_request().is_some_and(|r| Arc::ptr_eq(&r, &self.request));
        match manager().remove_request(&self.request) {
            Some(_) if !on_top => {
                tracing::warn!(
                    path = %self.request.path(),
                    current = ?manager().get(),
                    "Request context released out of order"
                );
            }
            Some(_) => {}
            None => {
                tracing::warn!(
                    path = %self.request.path(),
                    "Request context ended but is not on this thread's stack"
                );
            }
        }
        tracing::debug!(depth = manager().depth(), "Request context popped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AppRegistry;
    use std::sync::mpsc;
    use std::thread;

    fn entry(name: &str, path: &str) -> ContextEntry {
        ContextEntry::new(
            Arc::new(AppRegistry::empty(name)),
            Arc::new(Request::blank(path)),
        )
    }

    #[test]
    fn empty_stack_reports_default() {
        let m = manager();
        let got = m.get();
        assert!(got.request.is_none());
        assert!(Arc::ptr_eq(got.registry.as_ref().unwrap(), &global_registry()));
        assert_eq!(got, m.get());
    }

    #[test]
    fn push_and_pop_restore_previous_entry() {
        let m = manager();
        let before = m.get();
        let outer = entry("outer", "/a");
        let inner = entry("inner", "/b");

        m.push(outer.clone());
        m.push(inner.clone());
        assert_eq!(m.get(), inner);
        assert_eq!(m.depth(), 2);

        assert_eq!(m.pop(), Some(inner));
        assert_eq!(m.get(), outer);
        assert_eq!(m.pop(), Some(outer));
        assert_eq!(m.get(), before);
        assert_eq!(m.pop(), None);
    }

    #[test]
    fn clear_drops_all_entries() {
        let m = manager();
        m.push(entry("a", "/"));
        m.push(entry("b", "/"));
        m.clear();
        assert_eq!(m.depth(), 0);
        assert!(m.get().request.is_none());
    }

    #[test]
    fn custom_default_is_used_when_empty() {
        fn nothing() -> ContextEntry {
            ContextEntry::default()
        }
        let m = ThreadLocalManager::new(nothing);
        assert_eq!(m.get(), ContextEntry::default());
    }

    #[test]
    fn entries_compare_by_identity() {
        let a = entry("same", "/");
        let b = entry("same", "/");
        assert_ne!(a, b);
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn stacks_are_independent_per_thread() {
        let m = manager();
        let mine = entry("main", "/main");
        m.push(mine.clone());

        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let m = manager();
            let saw_empty = m.get().request.is_none();
            m.push(entry("worker", "/worker"));
            let worker_depth = m.depth();
            tx.send((saw_empty, worker_depth)).unwrap();
        });
        handle.join().unwrap();
        let (saw_empty, worker_depth) = rx.recv().unwrap();

        assert!(saw_empty, "worker must not observe the main thread's entry");
        assert_eq!(worker_depth, 1);
        assert_eq!(m.get(), mine);
        m.pop();
    }

    #[test]
    fn request_context_begin_end_is_balanced() {
        let before = manager().get();
        let registry: Arc<dyn Registry> = Arc::new(AppRegistry::empty("ctx"));
        let request = Arc::new(Request::blank("/ctx"));
        request.set_registry(registry.clone());

        let ctx = RequestContext::new(request.clone());
        ctx.begin();
        assert!(Arc::ptr_eq(&get_current_request().unwrap(), &request));
        assert!(Arc::ptr_eq(&get_current_registry(), &registry));

        ctx.end();
        assert_eq!(manager().get(), before);
        assert!(get_current_request().is_none());
    }

    #[test]
    fn ending_an_outer_context_keeps_the_inner_one_current() {
        let before = manager().get();
        let outer = RequestContext::new(Arc::new(Request::blank("/outer")));
        let inner_request = Arc::new(Request::blank("/inner"));
        let inner = RequestContext::new(inner_request.clone());

        outer.begin();
        inner.begin();
        outer.end();
        assert_eq!(manager().depth(), 1);
        assert!(Arc::ptr_eq(&get_current_request().unwrap(), &inner_request));

        inner.end();
        assert_eq!(manager().get(), before);

        // Already removed: nothing else is touched.
        let bystander = entry("bystander", "/");
        manager().push(bystander.clone());
        inner.end();
        assert_eq!(manager().get(), bystander);
        manager().pop();
    }

    #[test]
    fn remove_latest_takes_the_topmost_match() {
        let mut stack = ContextStack::default();
        let shared = entry("shared", "/");
        let other = entry("other", "/");
        stack.push(shared.clone());
        stack.push(other.clone());
        stack.push(shared.clone());

        assert_eq!(stack.remove_latest(|e| *e == shared), Some(shared.clone()));
        assert_eq!(stack.top(), Some(&other));
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.remove_latest(|e| *e == entry("x", "/")), None);
    }
}
