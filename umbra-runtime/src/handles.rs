// Handle table: opaque handles given to native code.
//
// Slots live in one generational arena. A slot only ever holds a `Weak`; what
// makes a handle strong is an entry in the keep-alive bucket of the context
// that allocated it. Unloading a context clears its bucket in one step, after
// which every strong handle of that context behaves like a weak one and new
// strong allocations for it silently degrade to weak.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use umbra_ffi::GcHandle;

use crate::error::{UmbraError, UmbraResult};
use crate::load_context::{self, ContextId};
use crate::object::ManagedObject;

/// A managed value reachable through a handle.
#[derive(Clone)]
pub enum ManagedRef {
    /// Descriptors, delegates, assemblies and other plain values.
    Value(Arc<dyn Any + Send + Sync>),
    /// Shadow objects; freeing their handle disposes them.
    Object(Arc<dyn ManagedObject>),
}

impl ManagedRef {
    pub fn value<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        ManagedRef::Value(value)
    }

    fn downgrade(&self) -> WeakRef {
        match self {
            ManagedRef::Value(v) => WeakRef::Value(Arc::downgrade(v)),
            ManagedRef::Object(o) => WeakRef::Object(Arc::downgrade(o)),
        }
    }

    /// Typed view of the value. Objects are matched against their concrete type.
    pub fn downcast<T: Any + Send + Sync>(self) -> Option<Arc<T>> {
        match self {
            ManagedRef::Value(v) => v.downcast::<T>().ok(),
            ManagedRef::Object(o) => o.into_any().downcast::<T>().ok(),
        }
    }
}

#[derive(Clone)]
enum WeakRef {
    Value(Weak<dyn Any + Send + Sync>),
    Object(Weak<dyn ManagedObject>),
}

impl WeakRef {
    fn upgrade(&self) -> Option<ManagedRef> {
        match self {
            WeakRef::Value(v) => v.upgrade().map(ManagedRef::Value),
            WeakRef::Object(o) => o.upgrade().map(ManagedRef::Object),
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            WeakRef::Value(v) => v.strong_count() > 0,
            WeakRef::Object(o) => o.strong_count() > 0,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HandleKind {
    Weak,
    Strong,
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

enum Slot {
    Vacant {
        generation: u32,
        next_free: Option<u32>,
    },
    Occupied {
        generation: u32,
        kind: HandleKind,
        owner: Option<ContextId>,
        target: WeakRef,
    },
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    occupied: usize,
}

// Handle word: generation in the high 32 bits, slot index + 1 in the low 32.
fn encode(index: u32, generation: u32) -> GcHandle {
    GcHandle(((generation as usize) << 32) | (index as usize + 1))
}

fn decode(handle: GcHandle) -> Option<(u32, u32)> {
    let low = (handle.0 & 0xFFFF_FFFF) as u32;
    if low == 0 {
        return None;
    }
    Some((low - 1, (handle.0 >> 32) as u32))
}

impl Arena {
    fn insert(&mut self, target: WeakRef, kind: HandleKind, owner: Option<ContextId>) -> GcHandle {
        self.occupied += 1;
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let (generation, next_free) = match slot {
                Slot::Vacant { generation, next_free } => (*generation, *next_free),
                Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };
            self.free_head = next_free;
            *slot = Slot::Occupied { generation, kind, owner, target };
            return encode(index, generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 1,
            kind,
            owner,
            target,
        });
        encode(index, 1)
    }

    fn get(&self, handle: GcHandle) -> Option<&Slot> {
        let (index, generation) = decode(handle)?;
        match self.slots.get(index as usize)? {
            slot @ Slot::Occupied { generation: g, .. } if *g == generation => Some(slot),
            _ => None,
        }
    }

    /// Vacate the slot behind `handle`, bumping its generation.
    fn remove(&mut self, handle: GcHandle) -> Option<(Option<ContextId>, WeakRef)> {
        let (index, generation) = decode(handle)?;
        let slot = self.slots.get_mut(index as usize)?;
        let Slot::Occupied { generation: g, owner, target, .. } = slot else {
            return None;
        };
        if *g != generation {
            return None;
        }
        let removed = (*owner, target.clone());
        *slot = Slot::Vacant {
            generation: generation.wrapping_add(1).max(1),
            next_free: self.free_head,
        };
        self.free_head = Some(index);
        self.occupied -= 1;
        Some(removed)
    }
}

// ---------------------------------------------------------------------------
// Keep-alive buckets
// ---------------------------------------------------------------------------

#[derive(Default)]
struct KeepAliveBucket {
    state: Mutex<BucketState>,
}

#[derive(Default)]
struct BucketState {
    closed: bool,
    entries: HashMap<GcHandle, ManagedRef>,
}

impl KeepAliveBucket {
    /// Returns false when the bucket is already closed.
    fn keep(&self, handle: GcHandle, value: ManagedRef) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.entries.insert(handle, value);
        true
    }

    fn release(&self, handle: GcHandle) -> Option<ManagedRef> {
        self.state.lock().entries.remove(&handle)
    }

    /// Close and empty the bucket, returning what it kept alive so the caller
    /// can drop it outside the lock.
    fn close(&self) -> HashMap<GcHandle, ManagedRef> {
        let mut state = self.state.lock();
        state.closed = true;
        std::mem::take(&mut state.entries)
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}

// ---------------------------------------------------------------------------
// HandleTable
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct HandleTable {
    arena: RwLock<Arena>,
    buckets: DashMap<ContextId, Arc<KeepAliveBucket>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that does not keep `value` alive.
    pub fn allocate_weak(&self, value: ManagedRef) -> GcHandle {
        self.arena.write().insert(value.downgrade(), HandleKind::Weak, None)
    }

    /// Handle that keeps `value` alive until freed or until `context` begins
    /// unloading. Once unloading has begun (including a retiring context
    /// whose unload timed out) the handle is still valid but no keep-alive
    /// entry is recorded.
    pub fn allocate_strong(&self, value: ManagedRef, context: ContextId) -> UmbraResult<GcHandle> {
        let cx = load_context::find(context);
        if cx.is_none() && !load_context::is_retiring(context) {
            return Err(UmbraError::ContextNotFound(context.raw()));
        }
        let handle = self
            .arena
            .write()
            .insert(value.downgrade(), HandleKind::Strong, Some(context));
        let kept = match cx.and_then(|cx| self.bucket_for(&cx)) {
            Some(bucket) => bucket.keep(handle, value),
            None => false,
        };
        if !kept {
            log::debug!("strong handle {:#x} in unloading context {context} degraded to weak", handle.0);
        }
        Ok(handle)
    }

    fn bucket_for(&self, cx: &load_context::LoadContext) -> Option<Arc<KeepAliveBucket>> {
        if let Some(bucket) = self.buckets.get(&cx.id()) {
            return Some(bucket.clone());
        }
        let bucket = self
            .buckets
            .entry(cx.id())
            .or_insert_with(|| {
                let bucket = Arc::new(KeepAliveBucket::default());
                let hook = bucket.clone();
                let installed = cx.on_unload(move |id| {
                    let released = hook.close();
                    log::debug!("context {id}: released {} strong handles", released.len());
                });
                if !installed {
                    bucket.close();
                }
                bucket
            })
            .clone();
        (!bucket.is_closed()).then_some(bucket)
    }

    /// Resolve a handle to its value. Empty, stale, freed and collected handles resolve to `None`.
    pub fn resolve_ref(&self, handle: GcHandle) -> Option<ManagedRef> {
        let arena = self.arena.read();
        match arena.get(handle)? {
            Slot::Occupied { target, .. } => target.upgrade(),
            Slot::Vacant { .. } => None,
        }
    }

    /// Resolve a handle to a value of type `T`.
    pub fn resolve<T: Any + Send + Sync>(&self, handle: GcHandle) -> Option<Arc<T>> {
        self.resolve_ref(handle)?.downcast::<T>()
    }

    /// Resolve a handle to a shadow object.
    pub fn resolve_object(&self, handle: GcHandle) -> Option<Arc<dyn ManagedObject>> {
        match self.resolve_ref(handle)? {
            ManagedRef::Object(o) => Some(o),
            ManagedRef::Value(_) => None,
        }
    }

    pub fn kind(&self, handle: GcHandle) -> Option<HandleKind> {
        match self.arena.read().get(handle)? {
            Slot::Occupied { kind, .. } => Some(*kind),
            Slot::Vacant { .. } => None,
        }
    }

    /// Release a handle. Shadow objects are disposed before their keep-alive
    /// entry is dropped. Freeing the empty token or an already freed handle is a no-op.
    ///
    /// The keep-alive entry is always looked up through the context recorded
    /// at allocation. `context` is what the caller believes that owner is;
    /// native callers that do not track it pass `None`. A mismatch is a caller
    /// bug and asserts in debug builds.
    pub fn free(&self, handle: GcHandle, context: Option<ContextId>) {
        let Some((owner, target)) = self.arena.write().remove(handle) else {
            return;
        };
        if let (Some(expected), Some(owner)) = (context, owner) {
            debug_assert_eq!(
                expected, owner,
                "handle {:#x} freed through context {expected}, owned by {owner}",
                handle.0
            );
        }
        let value = target.upgrade();
        if let Some(ManagedRef::Object(object)) = &value {
            object.object_base().dispose();
        }
        let kept = owner
            .and_then(|cx| self.buckets.get(&cx).map(|b| b.clone()))
            .and_then(|bucket| bucket.release(handle));
        drop(kept);
        drop(value);
    }

    /// Vacate slots whose target has been dropped and forget closed buckets.
    /// Returns the number of slots reclaimed.
    pub fn sweep(&self) -> usize {
        let dead: Vec<GcHandle> = {
            let arena = self.arena.read();
            arena
                .slots
                .iter()
                .enumerate()
                .filter_map(|(index, slot)| match slot {
                    Slot::Occupied { generation, target, .. } if !target.is_alive() => {
                        Some(encode(index as u32, *generation))
                    }
                    _ => None,
                })
                .collect()
        };
        let mut arena = self.arena.write();
        let reclaimed = dead.iter().filter(|&&h| arena.remove(h).is_some()).count();
        drop(arena);
        self.buckets.retain(|_, bucket| !bucket.is_closed());
        reclaimed
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.arena.read().occupied
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of values kept alive for `context`.
    pub fn strong_count(&self, context: ContextId) -> usize {
        self.buckets.get(&context).map_or(0, |b| b.len())
    }
}

static HANDLES: OnceLock<HandleTable> = OnceLock::new();

/// The process-wide handle table.
pub fn handles() -> &'static HandleTable {
    HANDLES.get_or_init(HandleTable::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_context::create;

    #[derive(Debug, PartialEq)]
    struct Payload(u32);

    #[test]
    fn strong_handle_round_trips_until_freed() {
        let table = HandleTable::new();
        let cx = create("round-trip", true);
        let handle = table
            .allocate_strong(ManagedRef::value(Arc::new(Payload(7))), cx.id())
            .unwrap();
        assert!(!handle.is_null());
        assert_eq!(table.kind(handle), Some(HandleKind::Strong));
        assert_eq!(*table.resolve::<Payload>(handle).unwrap(), Payload(7));

        table.free(handle, Some(cx.id()));
        assert!(table.resolve::<Payload>(handle).is_none());
        // Double free and freeing the empty token are no-ops.
        table.free(handle, None);
        table.free(GcHandle::NULL, None);
        assert!(table.is_empty());
    }

    #[test]
    fn weak_handle_does_not_keep_value_alive() {
        let table = HandleTable::new();
        let value = Arc::new(Payload(1));
        let handle = table.allocate_weak(ManagedRef::value(value.clone()));
        assert_eq!(*table.resolve::<Payload>(handle).unwrap(), Payload(1));
        drop(value);
        assert!(table.resolve::<Payload>(handle).is_none());
        assert_eq!(table.sweep(), 1);
    }

    #[test]
    fn stale_handle_does_not_resolve_to_recycled_slot() {
        let table = HandleTable::new();
        let first = Arc::new(Payload(1));
        let old = table.allocate_weak(ManagedRef::value(first.clone()));
        table.free(old, None);
        let second = Arc::new(Payload(2));
        let new = table.allocate_weak(ManagedRef::value(second.clone()));
        assert_ne!(old, new);
        assert!(table.resolve::<Payload>(old).is_none());
        assert_eq!(*table.resolve::<Payload>(new).unwrap(), Payload(2));
    }

    #[test]
    fn resolve_with_wrong_type_is_none() {
        let table = HandleTable::new();
        let value = Arc::new(Payload(3));
        let handle = table.allocate_weak(ManagedRef::value(value.clone()));
        assert!(table.resolve::<String>(handle).is_none());
    }

    #[test]
    fn unload_degrades_strong_handles_to_weak() {
        let table = HandleTable::new();
        let cx = create("degrade", true);
        let handle = table
            .allocate_strong(ManagedRef::value(Arc::new(Payload(5))), cx.id())
            .unwrap();
        assert_eq!(table.strong_count(cx.id()), 1);

        cx.begin_unload();
        // The only strong reference lived in the bucket.
        assert!(table.resolve::<Payload>(handle).is_none());
        assert_eq!(table.strong_count(cx.id()), 0);

        // Allocation after teardown began: valid token, no keep-alive.
        let value = Arc::new(Payload(6));
        let late = table
            .allocate_strong(ManagedRef::value(value.clone()), cx.id())
            .unwrap();
        assert!(!late.is_null());
        assert_eq!(*table.resolve::<Payload>(late).unwrap(), Payload(6));
        drop(value);
        assert!(table.resolve::<Payload>(late).is_none());
        table.free(late, Some(cx.id()));
        load_context::remove(cx.id());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "freed through context")]
    fn freeing_through_the_wrong_context_asserts() {
        let table = HandleTable::new();
        let owner = create("free-owner", true);
        let other = create("free-other", true);
        let handle = table
            .allocate_strong(ManagedRef::value(Arc::new(Payload(9))), owner.id())
            .unwrap();
        table.free(handle, Some(other.id()));
    }

    #[test]
    fn unknown_context_is_rejected() {
        let table = HandleTable::new();
        let err = table
            .allocate_strong(ManagedRef::value(Arc::new(Payload(0))), ContextId::from_raw(u64::MAX))
            .unwrap_err();
        assert!(matches!(err, UmbraError::ContextNotFound(_)));
    }

    #[test]
    fn contexts_release_independently() {
        let table = HandleTable::new();
        let a = create("bucket-a", true);
        let b = create("bucket-b", true);
        let ha = table.allocate_strong(ManagedRef::value(Arc::new(Payload(1))), a.id()).unwrap();
        let hb = table.allocate_strong(ManagedRef::value(Arc::new(Payload(2))), b.id()).unwrap();
        a.begin_unload();
        assert!(table.resolve::<Payload>(ha).is_none());
        assert_eq!(*table.resolve::<Payload>(hb).unwrap(), Payload(2));
        table.free(hb, Some(b.id()));
        load_context::remove(a.id());
        load_context::remove(b.id());
    }
}
