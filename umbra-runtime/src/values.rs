// Value types that mirror native engine values: names, text and delegates.

use std::fmt;
use std::marker::PhantomData;

use umbra_ffi::{NameHandle, NativeObjectPtr, NativePropertyPtr, WeakObjectHandle};

use crate::wide::read_native_chars;

/// Interned native name. Bitwise copyable.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Name(pub NameHandle);

impl Name {
    pub const NONE: Name = Name(NameHandle(0));

    pub fn new(text: &str) -> Self {
        let chars: Vec<u16> = text.encode_utf16().collect();
        Name(unsafe { (crate::api::strings().name_from_chars)(chars.as_ptr(), chars.len() as u32) })
    }

    pub fn is_none(&self) -> bool {
        self.0 .0 == 0
    }

    pub fn to_string_lossy(&self) -> String {
        let handle = self.0;
        read_native_chars(|buf, cap, out| unsafe {
            (crate::api::strings().name_to_chars)(handle, buf, cap, out)
        })
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({:#x})", self.0 .0)
    }
}

/// Localisable display text. Only its display string crosses the boundary.
#[derive(Clone, PartialEq, Eq, Hash, Default, Debug)]
pub struct Text(pub String);

impl Text {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Text {
    fn from(s: &str) -> Self {
        Text(s.to_string())
    }
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Native single-cast delegate layout: weak target + function name.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug)]
pub struct ScriptDelegate {
    pub object: WeakObjectHandle,
    pub function: NameHandle,
}

impl ScriptDelegate {
    pub fn is_bound(&self) -> bool {
        self.object.object_index >= 0 && self.function.0 != 0
    }
}

/// Single-cast delegate with signature marker `F` (e.g. `fn(f32)`).
#[repr(transparent)]
pub struct Delegate<F: ?Sized> {
    raw: ScriptDelegate,
    _signature: PhantomData<fn() -> Box<F>>,
}

impl<F: ?Sized> Delegate<F> {
    pub fn from_raw(raw: ScriptDelegate) -> Self {
        Delegate {
            raw,
            _signature: PhantomData,
        }
    }

    pub fn raw(&self) -> ScriptDelegate {
        self.raw
    }

    pub fn is_bound(&self) -> bool {
        self.raw.is_bound()
    }
}

impl<F: ?Sized> Clone for Delegate<F> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<F: ?Sized> Copy for Delegate<F> {}
impl<F: ?Sized> PartialEq for Delegate<F> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}
impl<F: ?Sized> Default for Delegate<F> {
    fn default() -> Self {
        Delegate::from_raw(ScriptDelegate::default())
    }
}
impl<F: ?Sized> fmt::Debug for Delegate<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Delegate({:?})", self.raw)
    }
}

/// Multicast delegate property of a native object. Only reachable as a
/// class property; it is never copied out of native memory.
pub struct MulticastDelegate<F: ?Sized> {
    owner: NativeObjectPtr,
    property: NativePropertyPtr,
    _signature: PhantomData<fn() -> Box<F>>,
}

impl<F: ?Sized> MulticastDelegate<F> {
    pub fn new(owner: NativeObjectPtr, property: NativePropertyPtr) -> Self {
        MulticastDelegate {
            owner,
            property,
            _signature: PhantomData,
        }
    }

    pub fn owner(&self) -> NativeObjectPtr {
        self.owner
    }

    pub fn property(&self) -> NativePropertyPtr {
        self.property
    }
}

impl<F: ?Sized> fmt::Debug for MulticastDelegate<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MulticastDelegate({:p})", self.owner.0)
    }
}
