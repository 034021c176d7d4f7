//! Process-wide ordered set of application registries.
//!
//! Holds weak references: an application that is dropped disappears from the set.

use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::registry::Registry;

#[derive(Default)]
pub struct GlobalRegistries {
    items: Mutex<Vec<Weak<dyn Registry>>>,
}

impl std::fmt::Debug for GlobalRegistries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .snapshot()
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        f.debug_struct("GlobalRegistries")
            .field("registries", &names)
            .finish()
    }
}

fn is(weak: &Weak<dyn Registry>, registry: &Arc<dyn Registry>) -> bool {
    std::ptr::addr_eq(weak.as_ptr(), Arc::as_ptr(registry))
}

impl GlobalRegistries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `registry` unless it is already present; insertion order is kept.
    pub fn add(&self, registry: &Arc<dyn Registry>) {
        let mut items = self.items.lock();
        items.retain(|w| w.strong_count() > 0);
        if items.iter().any(|w| is(w, registry)) {
            return;
        }
        items.push(Arc::downgrade(registry));
        tracing::debug!(
            registry = %registry.name(),
            count = items.len(),
            "Registry added to global set"
        );
    }

    pub fn remove(&self, registry: &Arc<dyn Registry>) -> bool {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|w| w.strong_count() > 0 && !is(w, registry));
        before != items.len()
    }

    pub fn empty(&self) {
        self.items.lock().clear();
    }

    /// The most recently added registry that is still alive.
    pub fn last(&self) -> Option<Arc<dyn Registry>> {
        self.items.lock().iter().rev().find_map(Weak::upgrade)
    }

    pub fn contains(&self, registry: &Arc<dyn Registry>) -> bool {
        self.items
            .lock()
            .iter()
            .any(|w| w.strong_count() > 0 && is(w, registry))
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live registries in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<dyn Registry>> {
        self.items.lock().iter().filter_map(Weak::upgrade).collect()
    }
}

static GLOBAL_REGISTRIES: OnceLock<GlobalRegistries> = OnceLock::new();

/// The set consulted when no registry is otherwise available.
pub fn global_registries() -> &'static GlobalRegistries {
    GLOBAL_REGISTRIES.get_or_init(GlobalRegistries::new)
}
