// Typed references to native objects and classes.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use umbra_ffi::{NativeClassPtr, NativeObjectPtr, WeakObjectHandle};

use crate::construct::find_shadow;
use crate::handles::handles;
use crate::object::ManagedClass;

// Manual trait impls below avoid requiring the marker type `T` to implement them.

/// Non-owning reference to a native object of (nominal) type `T`.
/// The native side owns the object; a null reference is allowed.
#[repr(transparent)]
pub struct ObjectRef<T: ?Sized> {
    ptr: NativeObjectPtr,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ?Sized> ObjectRef<T> {
    pub const fn null() -> Self {
        ObjectRef {
            ptr: NativeObjectPtr::null(),
            _marker: PhantomData,
        }
    }

    pub fn from_native(ptr: NativeObjectPtr) -> Self {
        ObjectRef {
            ptr,
            _marker: PhantomData,
        }
    }

    pub fn native_ptr(&self) -> NativeObjectPtr {
        self.ptr
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Still alive on the native side.
    pub fn is_valid(&self) -> bool {
        !self.ptr.is_null() && unsafe { (crate::api::object().is_valid)(self.ptr) }
    }

    /// Reinterpret as a reference to another type. No runtime check.
    pub fn cast_unchecked<U: ?Sized>(self) -> ObjectRef<U> {
        ObjectRef::from_native(self.ptr)
    }
}

impl<T: ManagedClass> ObjectRef<T> {
    /// The managed shadow of the referenced object, if it has one of type `T`.
    pub fn get(&self) -> Option<Arc<T>> {
        let handle = find_shadow(self.ptr)?;
        handles().resolve::<T>(handle)
    }
}

impl<T: ?Sized> Clone for ObjectRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: ?Sized> Copy for ObjectRef<T> {}

impl<T: ?Sized> PartialEq for ObjectRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}
impl<T: ?Sized> Eq for ObjectRef<T> {}

impl<T: ?Sized> Hash for ObjectRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ptr.hash(state)
    }
}

impl<T: ?Sized> Default for ObjectRef<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized> fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:p})", self.ptr.0)
    }
}

/// Reference to a native class that is `T` or derives from it.
#[repr(transparent)]
pub struct SubclassOf<T: ?Sized> {
    class: NativeClassPtr,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ?Sized> SubclassOf<T> {
    pub fn from_native(class: NativeClassPtr) -> Self {
        SubclassOf {
            class,
            _marker: PhantomData,
        }
    }

    pub fn native_class(&self) -> NativeClassPtr {
        self.class
    }

    pub fn is_null(&self) -> bool {
        self.class.is_null()
    }
}

impl<T: ?Sized> Clone for SubclassOf<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: ?Sized> Copy for SubclassOf<T> {}
impl<T: ?Sized> PartialEq for SubclassOf<T> {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class
    }
}
impl<T: ?Sized> Eq for SubclassOf<T> {}
impl<T: ?Sized> Hash for SubclassOf<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.class.hash(state)
    }
}
impl<T: ?Sized> fmt::Debug for SubclassOf<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubclassOf({:p})", self.class.0)
    }
}

/// Weak native object reference (index + serial); bitwise copyable.
#[repr(transparent)]
pub struct WeakObjectRef<T: ?Sized> {
    handle: WeakObjectHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ?Sized> WeakObjectRef<T> {
    pub fn new(object: ObjectRef<T>) -> Self {
        let handle = if object.is_null() {
            WeakObjectHandle::default()
        } else {
            unsafe { (crate::api::object().make_weak)(object.native_ptr()) }
        };
        WeakObjectRef {
            handle,
            _marker: PhantomData,
        }
    }

    /// Strong reference, or null if the object is gone.
    pub fn upgrade(&self) -> ObjectRef<T> {
        if self.handle.object_index < 0 {
            return ObjectRef::null();
        }
        ObjectRef::from_native(unsafe { (crate::api::object().resolve_weak)(self.handle) })
    }

    pub fn raw(&self) -> WeakObjectHandle {
        self.handle
    }
}

impl<T: ?Sized> Clone for WeakObjectRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: ?Sized> Copy for WeakObjectRef<T> {}
impl<T: ?Sized> PartialEq for WeakObjectRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}
impl<T: ?Sized> Eq for WeakObjectRef<T> {}
impl<T: ?Sized> Hash for WeakObjectRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle.hash(state)
    }
}
impl<T: ?Sized> Default for WeakObjectRef<T> {
    fn default() -> Self {
        WeakObjectRef {
            handle: WeakObjectHandle::default(),
            _marker: PhantomData,
        }
    }
}
impl<T: ?Sized> fmt::Debug for WeakObjectRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakObjectRef({:?})", self.handle)
    }
}

/// Object referenced by path; may not be loaded.
pub struct SoftObjectRef<T: ?Sized> {
    path: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ?Sized> SoftObjectRef<T> {
    pub fn new(path: impl Into<String>) -> Self {
        SoftObjectRef {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_null(&self) -> bool {
        self.path.is_empty()
    }
}

impl<T: ?Sized> Clone for SoftObjectRef<T> {
    fn clone(&self) -> Self {
        SoftObjectRef::new(self.path.clone())
    }
}
impl<T: ?Sized> PartialEq for SoftObjectRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}
impl<T: ?Sized> Eq for SoftObjectRef<T> {}
impl<T: ?Sized> Hash for SoftObjectRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state)
    }
}
impl<T: ?Sized> Default for SoftObjectRef<T> {
    fn default() -> Self {
        SoftObjectRef::new(String::new())
    }
}
impl<T: ?Sized> fmt::Debug for SoftObjectRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SoftObjectRef({:?})", self.path)
    }
}

/// An object seen through interface `T`.
pub struct ScriptInterface<T: ?Sized> {
    object: ObjectRef<T>,
}

impl<T: ?Sized> ScriptInterface<T> {
    pub fn new(object: ObjectRef<T>) -> Self {
        ScriptInterface { object }
    }

    pub fn object(&self) -> ObjectRef<T> {
        self.object
    }

    pub fn is_null(&self) -> bool {
        self.object.is_null()
    }
}

impl<T: ?Sized> Clone for ScriptInterface<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: ?Sized> Copy for ScriptInterface<T> {}
impl<T: ?Sized> PartialEq for ScriptInterface<T> {
    fn eq(&self, other: &Self) -> bool {
        self.object == other.object
    }
}
impl<T: ?Sized> Eq for ScriptInterface<T> {}
impl<T: ?Sized> Hash for ScriptInterface<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object.hash(state)
    }
}
impl<T: ?Sized> Default for ScriptInterface<T> {
    fn default() -> Self {
        ScriptInterface::new(ObjectRef::null())
    }
}
impl<T: ?Sized> fmt::Debug for ScriptInterface<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptInterface({:?})", self.object)
    }
}
