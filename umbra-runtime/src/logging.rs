// Logging bridge: `log` records are forwarded to the native log sink.

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::api::{api, is_api_initialized};

/// Native log levels.
pub const LOG_DISPLAY: u8 = 0;
pub const LOG_WARNING: u8 = 1;
pub const LOG_ERROR: u8 = 2;

/// `log::Log` implementation writing through the native API's logging slot.
/// Before the API table is installed records go to stderr.
pub struct NativeLogger;

static LOGGER: NativeLogger = NativeLogger;

impl Log for NativeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = match record.level() {
            Level::Error => LOG_ERROR,
            Level::Warn => LOG_WARNING,
            _ => LOG_DISPLAY,
        };
        write_native(level, &format!("[umbra:{}] {}", record.target(), record.args()));
    }

    fn flush(&self) {}
}

/// Install [`NativeLogger`] as the global logger. A logger installed earlier
/// by the host (or by a test harness) is left in place.
pub fn init_logging(max_level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(max_level);
    }
}

/// Write one line to the native log sink (stderr before init).
#[doc(hidden)]
pub fn write_native(level: u8, msg: &str) {
    if is_api_initialized() {
        let bytes = msg.as_bytes();
        // SAFETY: the logging sub-table is non-null once the API is installed.
        unsafe {
            ((*api().logging).log)(level, bytes.as_ptr(), bytes.len() as u32);
        }
    } else {
        eprintln!("{msg}");
    }
}

/// Log straight to the native sink, bypassing `log` filtering.
///
/// ```ignore
/// umbra_log!(LOG_WARNING, "turret {} has no target", name);
/// ```
#[macro_export]
macro_rules! umbra_log {
    ($level:expr, $($arg:tt)*) => {{
        $crate::logging::write_native($level, &format!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_levels_follow_log_levels() {
        assert!(LOG_DISPLAY < LOG_WARNING && LOG_WARNING < LOG_ERROR);
        // No API table in unit tests: the line goes to stderr.
        crate::umbra_log!(LOG_WARNING, "turret {} has no target", "T-1");
        write_native(LOG_ERROR, "plain line");
    }
}
