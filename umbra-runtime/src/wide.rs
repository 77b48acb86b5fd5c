// UTF-16 helpers for strings crossing the boundary.

use umbra_ffi::{BridgeStatus, ErrorBuffer};

use crate::error::{UmbraError, UmbraResult};

/// Read a null-terminated UTF-16 string. Invalid surrogates are an error.
///
/// # Safety
/// `ptr` must be null or point at a null-terminated UTF-16 sequence.
pub unsafe fn read_wide(ptr: *const u16) -> UmbraResult<String> {
    if ptr.is_null() {
        return Err(UmbraError::NullArgument("string"));
    }
    let mut len = 0usize;
    // SAFETY: the caller guarantees a terminator exists.
    unsafe {
        while *ptr.add(len) != 0 {
            len += 1;
        }
        let units = std::slice::from_raw_parts(ptr, len);
        String::from_utf16(units).map_err(|e| UmbraError::InvalidString(e.to_string()))
    }
}

/// Null-terminated UTF-16 copy of `s`.
pub fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Write `msg` into a caller-supplied error buffer, truncating to
/// `capacity - 1` units and always null-terminating. Null buffers, null data
/// pointers and zero capacity are ignored.
///
/// # Safety
/// `buf` must be null or point at an `ErrorBuffer` whose `data` holds
/// `capacity` writable units.
pub unsafe fn write_error(buf: *mut ErrorBuffer, msg: &str) {
    let Some(buf) = (unsafe { buf.as_mut() }) else {
        return;
    };
    if buf.data.is_null() || buf.capacity == 0 {
        return;
    }
    let max = buf.capacity as usize - 1;
    let mut written = 0usize;
    for unit in msg.encode_utf16().take(max) {
        unsafe { *buf.data.add(written) = unit };
        written += 1;
    }
    unsafe { *buf.data.add(written) = 0 };
    buf.len = written as u32;
}

/// Fetch a native string through a `(buf, buf_len, out_len) -> status` reader,
/// growing the buffer once when the first attempt is too small.
pub(crate) fn read_native_chars(read: impl Fn(*mut u16, u32, *mut u32) -> BridgeStatus) -> String {
    let mut buf = vec![0u16; 128];
    let mut len = 0u32;
    let mut status = read(buf.as_mut_ptr(), buf.len() as u32, &mut len);
    if status == BridgeStatus::BufferTooSmall || len as usize > buf.len() {
        buf.resize(len as usize, 0);
        status = read(buf.as_mut_ptr(), buf.len() as u32, &mut len);
    }
    if status != BridgeStatus::Ok {
        log::warn!("native string read failed with {status:?}");
        return String::new();
    }
    let len = (len as usize).min(buf.len());
    String::from_utf16_lossy(&buf[..len])
}
