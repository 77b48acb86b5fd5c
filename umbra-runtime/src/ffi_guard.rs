// FFI boundary guard: every `extern "C"` entry point runs its body inside one
// of these wrappers so neither a panic nor an error crosses into native code.
// Failures become a status code or a default value plus, where the caller
// supplied one, a UTF-16 message in its error buffer.

use std::any::Any;
use std::panic::{catch_unwind, UnwindSafe};

use umbra_ffi::{BridgeStatus, ErrorBuffer};

use crate::error::UmbraResult;
use crate::wide::write_error;

/// Execute `f` and catch any panic, returning `default` on failure.
pub fn ffi_boundary<F, R>(default: R, f: F) -> R
where
    F: FnOnce() -> R + UnwindSafe,
{
    match catch_unwind(f) {
        Ok(value) => value,
        Err(payload) => {
            log::error!("panic at FFI boundary: {}", panic_message(&*payload));
            default
        }
    }
}

/// Run a fallible entry point. Errors and panics are logged, written to
/// `error` (when non-null) and replaced by `default`.
pub fn guarded<F, R>(error: *mut ErrorBuffer, default: R, f: F) -> R
where
    F: FnOnce() -> UmbraResult<R> + UnwindSafe,
{
    match catch_unwind(f) {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            let msg = err.full_message();
            log::error!("{msg}");
            // SAFETY: the caller passes either null or a valid buffer.
            unsafe { write_error(error, &msg) };
            default
        }
        Err(payload) => {
            let msg = format!("panic: {}", panic_message(&*payload));
            log::error!("{msg}");
            unsafe { write_error(error, &msg) };
            default
        }
    }
}

/// Like [`guarded`] for entry points that only report a status.
pub fn guarded_status<F>(error: *mut ErrorBuffer, f: F) -> BridgeStatus
where
    F: FnOnce() -> UmbraResult<()> + UnwindSafe,
{
    match catch_unwind(f) {
        Ok(Ok(())) => BridgeStatus::Ok,
        Ok(Err(err)) => {
            let msg = err.full_message();
            log::error!("{msg}");
            unsafe { write_error(error, &msg) };
            err.status()
        }
        Err(payload) => {
            let msg = format!("panic: {}", panic_message(&*payload));
            log::error!("{msg}");
            unsafe { write_error(error, &msg) };
            BridgeStatus::Panicked
        }
    }
}

/// Extract a human-readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UmbraError;

    fn buffer(storage: &mut [u16]) -> ErrorBuffer {
        ErrorBuffer {
            data: storage.as_mut_ptr(),
            capacity: storage.len() as u32,
            len: 0,
        }
    }

    fn text(buf: &ErrorBuffer, storage: &[u16]) -> String {
        String::from_utf16_lossy(&storage[..buf.len as usize])
    }

    #[test]
    fn success_leaves_error_buffer_untouched() {
        let mut storage = [0u16; 16];
        let mut buf = buffer(&mut storage);
        let handle = guarded(&mut buf, umbra_ffi::GcHandle::NULL, || Ok(umbra_ffi::GcHandle(0x2A)));
        assert_eq!(handle, umbra_ffi::GcHandle(0x2A));
        assert_eq!(buf.len, 0);
        assert_eq!(guarded_status(&mut buf, || Ok(())), BridgeStatus::Ok);
        assert_eq!(buf.len, 0);
    }

    #[test]
    fn void_entry_points_swallow_panics() {
        // free_handle and dispose_object have no error buffer to write to.
        let released = ffi_boundary(false, || -> bool { panic!("double dispose of {:#x}", 0x2A) });
        assert!(!released);
        let mut storage = [0u16; 64];
        let mut buf = buffer(&mut storage);
        let count = guarded(&mut buf, 0u32, || -> UmbraResult<u32> { panic!("jobs queue poisoned") });
        assert_eq!(count, 0);
        assert_eq!(text(&buf, &storage), "panic: jobs queue poisoned");
    }

    #[test]
    fn guarded_writes_error_text_and_returns_default() {
        let mut storage = [0u16; 128];
        let mut buf = buffer(&mut storage);
        let out = guarded(&mut buf, 7u32, || Err(UmbraError::TypeNotFound("Game.Door".into())));
        assert_eq!(out, 7);
        assert_eq!(text(&buf, &storage), "type not found: Game.Door");
        assert_eq!(storage[buf.len as usize], 0);
    }

    #[test]
    fn guarded_status_reports_panics() {
        let mut storage = [0u16; 64];
        let mut buf = buffer(&mut storage);
        let status = guarded_status(&mut buf, || panic!("exploded in {}", "Tick"));
        assert_eq!(status, BridgeStatus::Panicked);
        assert_eq!(text(&buf, &storage), "panic: exploded in Tick");
    }

    #[test]
    fn guarded_status_tolerates_null_buffer() {
        let status = guarded_status(std::ptr::null_mut(), || Err(UmbraError::ObjectDisposed));
        assert_eq!(status, BridgeStatus::ObjectDisposed);
    }

    #[test]
    fn error_text_is_truncated_to_capacity() {
        let mut storage = [0xFFFFu16; 6];
        let mut buf = buffer(&mut storage);
        let _ = guarded(&mut buf, (), || Err(UmbraError::ObjectDisposed));
        assert_eq!(buf.len, 5);
        assert_eq!(text(&buf, &storage), "objec");
        assert_eq!(storage[5], 0);
    }
}
