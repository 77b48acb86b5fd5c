use std::ffi::c_void;

/// Opaque managed-object handle handed to native code. `0` is the empty token.
///
/// Native code never interprets the bits; the runtime packs a slot index and a
/// generation counter so a stale handle resolves to nothing instead of to a
/// recycled slot.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct GcHandle(pub usize);

impl GcHandle {
    pub const NULL: GcHandle = GcHandle(0);

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn to_raw(self) -> usize {
        self.0
    }
}

macro_rules! native_ptr {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        pub struct $name(pub *mut c_void);

        impl $name {
            #[inline]
            pub const fn null() -> Self {
                $name(std::ptr::null_mut())
            }

            #[inline]
            pub fn is_null(self) -> bool {
                self.0.is_null()
            }

            #[inline]
            pub fn addr(self) -> usize {
                self.0 as usize
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::null()
            }
        }

        // Raw identifiers owned by the native side. They may be moved across
        // threads; dereferencing happens only inside native code.
        unsafe impl Send for $name {}
        unsafe impl Sync for $name {}
    };
}

native_ptr! {
    /// Native object instance. The managed side never dereferences it.
    NativeObjectPtr
}
native_ptr! {
    /// Native reflected class.
    NativeClassPtr
}
native_ptr! {
    /// Native reflected struct.
    NativeStructPtr
}
native_ptr! {
    /// Native reflected function.
    NativeFunctionPtr
}
native_ptr! {
    /// Native reflected property (also used for function parameters).
    NativePropertyPtr
}

/// Interned native name stored as a raw 64-bit value.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct NameHandle(pub u64);

/// Weak native object reference: object index + serial number.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct WeakObjectHandle {
    pub object_index: i32,
    pub object_serial_number: i32,
}

impl Default for WeakObjectHandle {
    fn default() -> Self {
        WeakObjectHandle {
            object_index: -1,
            object_serial_number: 0,
        }
    }
}

/// Caller-owned UTF-16 buffer that receives a failure message.
///
/// The callee writes at most `capacity - 1` code units followed by a null
/// terminator and stores the number of units written (without the null) in `len`.
#[repr(C)]
#[derive(Debug)]
pub struct ErrorBuffer {
    pub data: *mut u16,
    pub capacity: u32,
    pub len: u32,
}
