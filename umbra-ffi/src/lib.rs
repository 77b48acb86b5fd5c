// umbra-ffi: #[repr(C)] types shared with the native host.
// Zero external dependencies. This crate is the complete managed ↔ native contract:
// handle words, status codes, the native API table, and the named export slots.

pub mod handles;
pub mod error;
pub mod api_table;
pub mod exports;

pub use handles::*;
pub use error::*;
pub use api_table::*;
pub use exports::*;
pub use umbra_flags::*;
