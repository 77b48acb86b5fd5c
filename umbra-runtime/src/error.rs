// Error types for the umbra runtime.

use std::path::PathBuf;

use umbra_ffi::BridgeStatus;

/// Rich error type for bridge operations.
#[derive(Debug, thiserror::Error)]
pub enum UmbraError {
    #[error("native API table is not initialized")]
    ApiNotInitialized,
    #[error("native API table was already initialized")]
    AlreadyInitialized,
    #[error("native API version mismatch: expected {expected}, found {found}")]
    ApiVersion { expected: u32, found: u32 },
    #[error("null argument: {0}")]
    NullArgument(&'static str),
    #[error("handle {0:#x} does not resolve to a live value")]
    InvalidHandle(usize),
    #[error("handle {handle:#x} does not hold a {expected}")]
    HandleType { handle: usize, expected: &'static str },
    #[error("no load context with id {0}")]
    ContextNotFound(u64),
    #[error("type not found: {0}")]
    TypeNotFound(String),
    #[error("method `{method}` not found on `{type_name}` or its ancestors")]
    MethodNotFound { type_name: String, method: String },
    #[error("type `{0}` is registered twice in one assembly")]
    DuplicateType(String),
    #[error("inheritance cycle through `{0}`")]
    InheritanceCycle(String),
    #[error("type `{0}` has no parameterless constructor")]
    ConstructorMissing(String),
    #[error("object has been disposed")]
    ObjectDisposed,
    #[error("native class not found: {0}")]
    ClassNotFound(String),
    #[error("native struct not found: {0}")]
    StructNotFound(String),
    #[error("native function not found: {0}")]
    FunctionNotFound(String),
    #[error("native property not found: {0}")]
    PropertyNotFound(String),
    #[error("method `{0}` cannot be invoked with this calling convention")]
    InvocationMismatch(String),
    #[error("native call `{context}` failed with {status:?}")]
    Native { status: BridgeStatus, context: String },
    #[error("unknown export slot `{0}`")]
    UnknownExportSlot(String),
    #[error("plugin `{0}` is already loaded")]
    PluginAlreadyLoaded(String),
    #[error("plugin not found: {0}")]
    PluginNotFound(String),
    #[error("assembly `{0}` is registered twice")]
    DuplicateAssembly(String),
    #[error("failed to load library {path}")]
    Library {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("symbol `{symbol}` missing from {path}")]
    MissingSymbol {
        path: PathBuf,
        symbol: String,
        #[source]
        source: libloading::Error,
    },
    #[error("plugin `{name}` still alive {elapsed_ms} ms after unload began")]
    UnloadTimeout { name: String, elapsed_ms: u128 },
    #[error("load context `{0}` cannot be unloaded")]
    NotCollectible(String),
    #[error("invalid string argument: {0}")]
    InvalidString(String),
    #[error("panic: {0}")]
    Panicked(String),
}

impl UmbraError {
    /// Status code reported to native callers for this error.
    pub fn status(&self) -> BridgeStatus {
        match self {
            UmbraError::NullArgument(_) => BridgeStatus::NullArgument,
            UmbraError::InvalidHandle(_) | UmbraError::HandleType { .. } => BridgeStatus::InvalidHandle,
            UmbraError::TypeNotFound(_) | UmbraError::ClassNotFound(_) | UmbraError::StructNotFound(_) => {
                BridgeStatus::TypeNotFound
            }
            UmbraError::MethodNotFound { .. } | UmbraError::FunctionNotFound(_) => BridgeStatus::MethodNotFound,
            UmbraError::ConstructorMissing(_) => BridgeStatus::ConstructorMissing,
            UmbraError::ObjectDisposed => BridgeStatus::ObjectDisposed,
            UmbraError::UnknownExportSlot(_) => BridgeStatus::UnknownExportSlot,
            UmbraError::ApiVersion { .. } => BridgeStatus::VersionMismatch,
            UmbraError::Panicked(_) => BridgeStatus::Panicked,
            UmbraError::Native { status, .. } => *status,
            UmbraError::PluginAlreadyLoaded(_)
            | UmbraError::PluginNotFound(_)
            | UmbraError::DuplicateAssembly(_)
            | UmbraError::Library { .. }
            | UmbraError::MissingSymbol { .. }
            | UmbraError::UnloadTimeout { .. }
            | UmbraError::NotCollectible(_) => BridgeStatus::PluginError,
            _ => BridgeStatus::Failed,
        }
    }

    /// Display text including every `source()` in the chain, joined with ": ".
    pub fn full_message(&self) -> String {
        let mut msg = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            msg.push_str(": ");
            msg.push_str(&err.to_string());
            source = err.source();
        }
        msg
    }
}

/// Convenience alias used throughout the runtime and generated code.
pub type UmbraResult<T> = Result<T, UmbraError>;

/// Convert a native status code into a `UmbraResult<()>`.
pub fn check_status(status: BridgeStatus, context: &str) -> UmbraResult<()> {
    match status {
        BridgeStatus::Ok => Ok(()),
        status => Err(UmbraError::Native {
            status,
            context: context.to_string(),
        }),
    }
}

/// Record a native status that generated code does not expect to fail.
/// Debug builds assert; release builds log and carry on.
#[inline]
pub fn status_infallible(status: BridgeStatus, context: &str) {
    debug_assert_eq!(
        status,
        BridgeStatus::Ok,
        "native call '{}' returned {:?}",
        context,
        status
    );
    if status != BridgeStatus::Ok {
        log::error!("native call '{context}' returned {status:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_status_ok_returns_ok() {
        assert!(check_status(BridgeStatus::Ok, "noop").is_ok());
    }

    #[test]
    fn check_status_keeps_code_and_context() {
        let err = check_status(BridgeStatus::ObjectDisposed, "Actor.Jump").unwrap_err();
        assert_eq!(err.status(), BridgeStatus::ObjectDisposed);
        assert_eq!(err.to_string(), "native call `Actor.Jump` failed with ObjectDisposed");
    }

    #[test]
    fn errors_map_to_boundary_status() {
        let cases = [
            (UmbraError::NullArgument("ptr"), BridgeStatus::NullArgument),
            (UmbraError::InvalidHandle(3), BridgeStatus::InvalidHandle),
            (UmbraError::TypeNotFound("A".into()), BridgeStatus::TypeNotFound),
            (UmbraError::ConstructorMissing("A".into()), BridgeStatus::ConstructorMissing),
            (UmbraError::ObjectDisposed, BridgeStatus::ObjectDisposed),
            (UmbraError::UnknownExportSlot("X".into()), BridgeStatus::UnknownExportSlot),
            (UmbraError::PluginNotFound("P".into()), BridgeStatus::PluginError),
            (UmbraError::ContextNotFound(9), BridgeStatus::Failed),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{err}");
        }
    }

    #[test]
    fn display_formats_are_human_readable() {
        let err = UmbraError::MethodNotFound {
            type_name: "Game.Turret".into(),
            method: "Fire".into(),
        };
        assert_eq!(err.to_string(), "method `Fire` not found on `Game.Turret` or its ancestors");
    }
}
