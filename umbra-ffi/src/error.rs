/// Status codes returned across the boundary. `Ok` is zero, everything else is a failure.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeStatus {
    Ok = 0,
    Failed = 1,
    NullArgument = 2,
    InvalidHandle = 3,
    TypeNotFound = 4,
    MethodNotFound = 5,
    ConstructorMissing = 6,
    ObjectDisposed = 7,
    Panicked = 8,
    BufferTooSmall = 9,
    UnknownExportSlot = 10,
    VersionMismatch = 11,
    PluginError = 12,
}

impl BridgeStatus {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == BridgeStatus::Ok
    }
}
