// Module-loading contexts: the unit of unloading.
//
// Every assembly lives in exactly one context. The default context is shared
// and never unloads; each plugin gets its own collectible context. While a
// context is live the registry holds it strongly; `begin_unload` runs the
// registered unload callbacks once and `remove` drops the registry's
// reference so liveness can be observed through `Weak`. A removed context
// stays known as retiring until `forget`, so allocations made for it in the
// meantime degrade to weak instead of failing.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};

use crate::registry::Assembly;

/// Identity of a module-loading context.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ContextId(u64);

impl ContextId {
    /// The shared, non-collectible context.
    pub const DEFAULT: ContextId = ContextId(0);

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        ContextId(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ContextState {
    Live,
    Unloading,
}

type UnloadCallback = Box<dyn FnOnce(ContextId) + Send>;

pub struct LoadContext {
    id: ContextId,
    name: String,
    collectible: bool,
    state: AtomicU8,
    unload_callbacks: Mutex<Vec<UnloadCallback>>,
    assemblies: RwLock<Vec<Arc<Assembly>>>,
}

impl LoadContext {
    fn new(id: ContextId, name: &str, collectible: bool) -> Self {
        LoadContext {
            id,
            name: name.to_string(),
            collectible,
            state: AtomicU8::new(0),
            unload_callbacks: Mutex::new(Vec::new()),
            assemblies: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_collectible(&self) -> bool {
        self.collectible
    }

    pub fn state(&self) -> ContextState {
        match self.state.load(Ordering::Acquire) {
            0 => ContextState::Live,
            _ => ContextState::Unloading,
        }
    }

    pub fn is_unloading(&self) -> bool {
        self.state() == ContextState::Unloading
    }

    /// Run `callback` when this context begins unloading. Returns false (and
    /// drops the callback) if unloading has already begun.
    pub fn on_unload(&self, callback: impl FnOnce(ContextId) + Send + 'static) -> bool {
        let mut callbacks = self.unload_callbacks.lock();
        // Checked under the callback lock so begin_unload cannot slip in between.
        if self.is_unloading() {
            return false;
        }
        callbacks.push(Box::new(callback));
        true
    }

    /// Transition to `Unloading` and run every unload callback once, in
    /// registration order. Returns false if already unloading or not collectible.
    pub fn begin_unload(&self) -> bool {
        if !self.collectible {
            return false;
        }
        let callbacks = {
            let mut guard = self.unload_callbacks.lock();
            if self
                .state
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return false;
            }
            std::mem::take(&mut *guard)
        };
        log::debug!("context {} ({}) unloading, {} callbacks", self.id, self.name, callbacks.len());
        for callback in callbacks {
            callback(self.id);
        }
        true
    }

    pub fn add_assembly(&self, assembly: Arc<Assembly>) {
        self.assemblies.write().push(assembly);
    }

    pub fn assemblies(&self) -> Vec<Arc<Assembly>> {
        self.assemblies.read().clone()
    }

    /// Drop this context's strong references to its assemblies.
    pub(crate) fn release_assemblies(&self) -> Vec<Weak<Assembly>> {
        let released: Vec<Arc<Assembly>> = std::mem::take(&mut *self.assemblies.write());
        released.iter().map(Arc::downgrade).collect()
    }
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("collectible", &self.collectible)
            .field("state", &self.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Registry of live contexts
// ---------------------------------------------------------------------------

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static CONTEXTS: OnceLock<RwLock<HashMap<ContextId, Arc<LoadContext>>>> = OnceLock::new();
static RETIRING: OnceLock<RwLock<HashSet<ContextId>>> = OnceLock::new();

fn retiring() -> &'static RwLock<HashSet<ContextId>> {
    RETIRING.get_or_init(|| RwLock::new(HashSet::new()))
}

fn contexts() -> &'static RwLock<HashMap<ContextId, Arc<LoadContext>>> {
    CONTEXTS.get_or_init(|| {
        let mut map = HashMap::new();
        map.insert(
            ContextId::DEFAULT,
            Arc::new(LoadContext::new(ContextId::DEFAULT, "default", false)),
        );
        RwLock::new(map)
    })
}

/// Create and register a new context.
pub fn create(name: &str, collectible: bool) -> Arc<LoadContext> {
    let id = ContextId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
    let cx = Arc::new(LoadContext::new(id, name, collectible));
    contexts().write().insert(id, cx.clone());
    log::debug!("created context {id} ({name}, collectible: {collectible})");
    cx
}

/// A registered context by id. Unregistered (removed) contexts resolve to `None`.
pub fn find(id: ContextId) -> Option<Arc<LoadContext>> {
    contexts().read().get(&id).cloned()
}

pub fn default_context() -> Arc<LoadContext> {
    // The default context is inserted at registry creation and never removed.
    match find(ContextId::DEFAULT) {
        Some(cx) => cx,
        None => unreachable!("default context is never removed"),
    }
}

/// Drop the registry's strong reference and mark the context retiring. The
/// default context is never removed.
pub fn remove(id: ContextId) -> Option<Weak<LoadContext>> {
    if id == ContextId::DEFAULT {
        return None;
    }
    let removed = contexts().write().remove(&id)?;
    retiring().write().insert(id);
    Some(Arc::downgrade(&removed))
}

/// Removed but not yet forgotten: its unload is still being waited on.
pub fn is_retiring(id: ContextId) -> bool {
    retiring().read().contains(&id)
}

/// Forget a retiring context once nothing of it is reachable.
pub fn forget(id: ContextId) {
    retiring().write().remove(&id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn unload_callbacks_run_once_in_order() {
        let cx = create("callbacks", true);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            assert!(cx.on_unload(move |_| order.lock().push(i)));
        }
        assert!(cx.begin_unload());
        assert!(!cx.begin_unload());
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        remove(cx.id());
    }

    #[test]
    fn callbacks_registered_after_unload_are_rejected() {
        let cx = create("late", true);
        cx.begin_unload();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        assert!(!cx.on_unload(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        remove(cx.id());
    }

    #[test]
    fn default_context_never_unloads() {
        let cx = default_context();
        assert!(!cx.is_collectible());
        assert!(!cx.begin_unload());
        assert!(remove(ContextId::DEFAULT).is_none());
        assert!(find(ContextId::DEFAULT).is_some());
    }

    #[test]
    fn removed_context_is_observable_through_weak() {
        let cx = create("weak", true);
        let id = cx.id();
        drop(cx);
        let weak = remove(id).unwrap();
        assert!(weak.upgrade().is_none());
        assert!(find(id).is_none());
        assert!(is_retiring(id));
        forget(id);
        assert!(!is_retiring(id));
    }
}
