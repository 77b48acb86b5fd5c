// umbra-weaver: reads a script crate's sources, validates the reflected
// declarations, and writes woven sources plus a manifest per module.
// Modules weave in dependency order; unchanged modules are skipped.

pub mod config;
pub mod error;
pub mod naming;
pub mod model;
pub mod parse;
pub mod order;
pub mod validate;
pub mod classify;
pub mod emit;
pub mod manifest;
pub mod incremental;
pub mod driver;

pub use config::UmbraConfig;
pub use driver::{ModuleOutcome, WeaveOptions, WeaveReport, check, clean, weave};
pub use error::{AuthoringError, WeaveError, WeaveResult};
pub use model::ModuleManifest;
