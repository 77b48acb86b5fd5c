// String-like marshalers. Strings cross the boundary as UTF-16.

use umbra_ffi::NativePropertyPtr;

use crate::api::strings;
use crate::values::{Name, Text};
use crate::wide::read_native_chars;

use super::{Blittable, Marshaller};

pub struct StringMarshaller;

impl Marshaller for StringMarshaller {
    type Value = String;

    unsafe fn to_native(value: &String, dst: *mut u8, _prop: NativePropertyPtr) {
        let units: Vec<u16> = value.encode_utf16().collect();
        unsafe { (strings().string_set)(dst, units.as_ptr(), units.len() as u32) }
    }

    unsafe fn from_native(src: *const u8, _prop: NativePropertyPtr) -> String {
        read_native_chars(|buf, cap, out| unsafe { (strings().string_get)(src, buf, cap, out) })
    }
}

pub struct TextMarshaller;

impl Marshaller for TextMarshaller {
    type Value = Text;

    unsafe fn to_native(value: &Text, dst: *mut u8, _prop: NativePropertyPtr) {
        let units: Vec<u16> = value.as_str().encode_utf16().collect();
        unsafe { (strings().text_set)(dst, units.as_ptr(), units.len() as u32) }
    }

    unsafe fn from_native(src: *const u8, _prop: NativePropertyPtr) -> Text {
        Text(read_native_chars(|buf, cap, out| unsafe { (strings().text_get)(src, buf, cap, out) }))
    }
}

/// Names are interned handles and copy bitwise.
pub type NameMarshaller = Blittable<Name>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_native;

    #[test]
    fn names_intern_through_native() {
        fake_native::install();
        let a = Name::new("Muzzle");
        let b = Name::new("Muzzle");
        assert_eq!(a, b);
        assert!(!a.is_none());
        assert_eq!(a.to_string_lossy(), "Muzzle");
        assert_eq!(Name::NONE.to_string_lossy(), "None");
    }

    #[test]
    fn long_strings_grow_the_read_buffer() {
        fake_native::install();
        let mut storage = String::new();
        let long = "ab".repeat(200);
        unsafe {
            StringMarshaller::to_native(&long, &mut storage as *mut String as *mut u8, NativePropertyPtr::null());
            assert_eq!(
                StringMarshaller::from_native(&storage as *const String as *const u8, NativePropertyPtr::null()),
                long
            );
        }
    }
}
